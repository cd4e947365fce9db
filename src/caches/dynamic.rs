//! In-memory, backend-refreshed caches (spec §4.5), grounded on
//! `original_source/hahomematic/caches/dynamic.py`'s `DeviceDetailsCache`
//! and `DeviceDataCache`.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::address::Address;

/// Names/rooms/functions are refetched no more often than this (spec §4.5:
/// "min-refresh interval is half the general cache-age ceiling").
pub const MAX_CACHE_AGE: Duration = Duration::from_secs(60 * 60 * 24);

/// `true` if `last_updated` is recent enough that a refresh can be skipped,
/// mirroring `updated_within_seconds`.
fn updated_within(last_updated: Option<Instant>, max_age: Duration) -> bool {
    last_updated.is_some_and(|t| t.elapsed() < max_age)
}

/// Names, owning interface, device/channel ids, and room/function
/// metadata, all keyed by address (spec §4.5).
///
/// Holds no reference back to a `Central`; callers fetch from the backend
/// and push results in via `load_from` (spec §9 "arena+indices").
#[derive(Default)]
pub struct DeviceDetailsCache {
    inner: RwLock<DeviceDetailsInner>,
}

#[derive(Default)]
struct DeviceDetailsInner {
    names: HashMap<Address, String>,
    interfaces: HashMap<Address, String>,
    device_channel_ids: HashMap<Address, String>,
    channel_rooms: HashMap<Address, HashSet<String>>,
    device_room: HashMap<Address, String>,
    functions: HashMap<Address, HashSet<String>>,
    last_updated: Option<Instant>,
}

/// What a fetch cycle feeds into [`DeviceDetailsCache::load_from`].
#[derive(Default)]
pub struct DeviceDetailsFetch {
    pub names: HashMap<Address, String>,
    pub interfaces: HashMap<Address, String>,
    pub channel_rooms: HashMap<Address, HashSet<String>>,
    pub functions: HashMap<Address, HashSet<String>>,
}

impl DeviceDetailsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if the cache was refreshed within the last half of
    /// [`MAX_CACHE_AGE`] and a fresh fetch can be skipped.
    pub async fn is_fresh(&self) -> bool {
        updated_within(self.inner.read().await.last_updated, MAX_CACHE_AGE / 2)
    }

    /// Replaces the cache wholesale with one fetch cycle's results, then
    /// derives each device's single room from its channels' rooms (spec
    /// §4.5: "a room is relevant for a device only if exactly one room is
    /// assigned across its channels").
    pub async fn load_from(&self, fetch: DeviceDetailsFetch) {
        let mut inner = self.inner.write().await;
        inner.names = fetch.names;
        inner.interfaces = fetch.interfaces;
        inner.channel_rooms = fetch.channel_rooms;
        inner.functions = fetch.functions;
        inner.device_room.clear();

        let mut device_rooms: HashMap<Address, HashSet<String>> = HashMap::new();
        for (address, rooms) in &inner.channel_rooms {
            device_rooms.entry(address.device_address()).or_default().extend(rooms.iter().cloned());
        }
        for (device_address, rooms) in device_rooms {
            if rooms.len() == 1 {
                inner.device_room.insert(device_address, rooms.into_iter().next().unwrap());
            }
        }
        inner.last_updated = Some(Instant::now());
    }

    pub async fn add_name(&self, address: Address, name: String) {
        self.inner.write().await.names.entry(address).or_insert(name);
    }

    pub async fn name(&self, address: &Address) -> Option<String> {
        self.inner.read().await.names.get(address).cloned()
    }

    pub async fn add_interface(&self, address: Address, interface: String) {
        self.inner.write().await.interfaces.entry(address).or_insert(interface);
    }

    /// Falls back to `"BidCos-RF"` when no interface was recorded, matching
    /// the original's default.
    pub async fn interface(&self, address: &Address) -> String {
        self.inner
            .read()
            .await
            .interfaces
            .get(address)
            .cloned()
            .unwrap_or_else(|| "BidCos-RF".to_owned())
    }

    pub async fn add_device_channel_id(&self, address: Address, channel_id: String) {
        self.inner.write().await.device_channel_ids.insert(address, channel_id);
    }

    pub async fn room(&self, device_address: &Address) -> Option<String> {
        self.inner.read().await.device_room.get(device_address).cloned()
    }

    /// Comma-joined function text for `address`, or `None` if it has none.
    pub async fn function_text(&self, address: &Address) -> Option<String> {
        let inner = self.inner.read().await;
        let functions = inner.functions.get(address)?;
        if functions.is_empty() {
            return None;
        }
        let mut sorted: Vec<&String> = functions.iter().collect();
        sorted.sort();
        Some(sorted.into_iter().cloned().collect::<Vec<_>>().join(","))
    }

    /// Drops every name/channel-id entry belonging to `device_address` and
    /// its channels.
    pub async fn remove_device(&self, device_address: &Address, channel_addresses: &[Address]) {
        let mut inner = self.inner.write().await;
        inner.names.remove(device_address);
        for channel_address in channel_addresses {
            inner.names.remove(channel_address);
        }
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        *inner = DeviceDetailsInner::default();
    }
}

/// Marker value for "no cached entry", distinct from a genuine `Null`
/// backend value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NoCacheEntry;

/// Bulk interface -> channel_address -> parameter -> value snapshot,
/// refreshed in one shot by a single backend round-trip (spec §4.5).
#[derive(Default)]
pub struct CentralDataCache {
    inner: RwLock<CentralDataInner>,
}

#[derive(Default)]
struct CentralDataInner {
    values: HashMap<String, HashMap<Address, HashMap<String, serde_json::Value>>>,
    last_updated: Option<Instant>,
}

impl CentralDataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_empty(&self, max_age: Duration) -> bool {
        let mut inner = self.inner.write().await;
        if inner.values.is_empty() {
            return true;
        }
        if !updated_within(inner.last_updated, max_age) {
            inner.values.clear();
            inner.last_updated = None;
            return true;
        }
        false
    }

    pub async fn is_fresh(&self) -> bool {
        updated_within(self.inner.read().await.last_updated, MAX_CACHE_AGE / 2)
    }

    pub async fn load_from(
        &self,
        values: HashMap<String, HashMap<Address, HashMap<String, serde_json::Value>>>,
    ) {
        let mut inner = self.inner.write().await;
        inner.values = values;
        inner.last_updated = Some(Instant::now());
    }

    /// Returns `Ok(None)` if the cache is stale/empty (caller should fall
    /// back to a live read); `Ok(Some(None))` if the cache is fresh but has
    /// no entry for this key at all (a genuine cache miss on a present
    /// cache, distinct from staleness).
    pub async fn get(
        &self,
        interface: &str,
        channel_address: &Address,
        parameter: &str,
        max_age: Duration,
    ) -> Option<Option<serde_json::Value>> {
        if self.is_empty(max_age).await {
            return None;
        }
        let inner = self.inner.read().await;
        Some(
            inner
                .values
                .get(interface)
                .and_then(|m| m.get(channel_address))
                .and_then(|m| m.get(parameter))
                .cloned(),
        )
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.values.clear();
        inner.last_updated = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn device_room_resolved_only_when_channels_agree() {
        let cache = DeviceDetailsCache::new();
        let mut channel_rooms = HashMap::new();
        channel_rooms.insert(Address::new("VCU1:1"), HashSet::from(["Kitchen".to_owned()]));
        channel_rooms.insert(Address::new("VCU1:2"), HashSet::from(["Kitchen".to_owned()]));
        cache
            .load_from(DeviceDetailsFetch { channel_rooms, ..Default::default() })
            .await;
        assert_eq!(cache.room(&Address::new("VCU1")).await, Some("Kitchen".to_owned()));
    }

    #[tokio::test]
    async fn device_room_unresolved_when_channels_disagree() {
        let cache = DeviceDetailsCache::new();
        let mut channel_rooms = HashMap::new();
        channel_rooms.insert(Address::new("VCU1:1"), HashSet::from(["Kitchen".to_owned()]));
        channel_rooms.insert(Address::new("VCU1:2"), HashSet::from(["Office".to_owned()]));
        cache
            .load_from(DeviceDetailsFetch { channel_rooms, ..Default::default() })
            .await;
        assert_eq!(cache.room(&Address::new("VCU1")).await, None);
    }

    #[tokio::test]
    async fn interface_falls_back_to_bidcos_rf() {
        let cache = DeviceDetailsCache::new();
        assert_eq!(cache.interface(&Address::new("VCU1")).await, "BidCos-RF");
    }

    #[tokio::test]
    async fn central_data_cache_reports_empty_until_loaded() {
        let cache = CentralDataCache::new();
        assert!(cache.is_empty(MAX_CACHE_AGE).await);

        let mut values = HashMap::new();
        let mut channel = HashMap::new();
        channel.insert("LEVEL".to_owned(), serde_json::json!(0.5));
        let mut by_channel = HashMap::new();
        by_channel.insert(Address::new("VCU1:1"), channel);
        values.insert("hmip".to_owned(), by_channel);
        cache.load_from(values).await;

        assert!(!cache.is_empty(MAX_CACHE_AGE).await);
        let hit = cache.get("hmip", &Address::new("VCU1:1"), "LEVEL", MAX_CACHE_AGE).await;
        assert_eq!(hit, Some(Some(serde_json::json!(0.5))));
    }

    #[tokio::test]
    async fn central_data_cache_distinguishes_stale_from_miss() {
        let cache = CentralDataCache::new();
        cache.load_from(HashMap::from([("hmip".to_owned(), HashMap::new())])).await;
        let miss = cache.get("hmip", &Address::new("VCU1:1"), "LEVEL", MAX_CACHE_AGE).await;
        assert_eq!(miss, Some(None));

        let stale = cache.get("hmip", &Address::new("VCU1:1"), "LEVEL", Duration::from_secs(0)).await;
        assert_eq!(stale, None);
    }
}
