//! On-disk persistent caches (spec §4.5), grounded on
//! `original_source/hahomematic/caches/persistent.py`.
//!
//! `save()`/`load()` both hash the in-memory content with SHA-256 and skip
//! the disk operation when the hash already matches `last_hash_saved`,
//! exactly mirroring the original's `BasePersistentCache`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument};

use crate::address::Address;
use crate::error::Result;
use crate::model::device::DeviceDescription;
use crate::model::parameter::{ParameterData, ParamsetKey};

fn hash_sha256(value: &impl serde::Serialize) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    format!("{digest:x}")
}

/// Whether a `save`/`load` actually touched disk, for callers that log or
/// test on it (spec §4.5's `DataOperationResult`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CacheOp {
    Saved,
    NoSave,
    Loaded,
    NoLoad,
}

/// Guards a cache file so a save and a load never overlap (spec §5
/// "Shared-resource policy").
struct FileGuard {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, lock: Mutex::new(()) }
    }

    async fn write_atomic(&self, contents: &[u8]) -> Result<()> {
        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, contents).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    async fn read(&self) -> Result<Option<Vec<u8>>> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Map interface-id -> list of [`DeviceDescription`], plus the two derived
/// indices the original keeps: device -> channel addresses, and a flat
/// address -> description lookup (spec §4.5).
pub struct DeviceDescriptionCache {
    guard: FileGuard,
    raw: RwLock<HashMap<String, Vec<DeviceDescription>>>,
    addresses: RwLock<HashMap<String, HashMap<Address, Vec<Address>>>>,
    by_address: RwLock<HashMap<String, HashMap<Address, DeviceDescription>>>,
    last_hash_saved: Mutex<String>,
}

impl DeviceDescriptionCache {
    pub fn new(storage_folder: &Path, central_name: &str) -> Self {
        let path = storage_folder.join("cache").join(format!("{central_name}_devices"));
        Self {
            guard: FileGuard::new(path),
            raw: RwLock::new(HashMap::new()),
            addresses: RwLock::new(HashMap::new()),
            by_address: RwLock::new(HashMap::new()),
            last_hash_saved: Mutex::new(hash_sha256(&HashMap::<String, Vec<DeviceDescription>>::new())),
        }
    }

    pub async fn add(&self, interface_id: &str, description: DeviceDescription) {
        self.remove(interface_id, std::slice::from_ref(&description.address)).await;

        let mut raw = self.raw.write().await;
        raw.entry(interface_id.to_owned()).or_default().push(description.clone());
        drop(raw);

        self.index(interface_id, &description).await;
    }

    async fn index(&self, interface_id: &str, description: &DeviceDescription) {
        let address = description.address.clone();
        let mut by_address = self.by_address.write().await;
        by_address.entry(interface_id.to_owned()).or_default().insert(address.clone(), description.clone());
        drop(by_address);

        let mut addresses = self.addresses.write().await;
        let entry = addresses.entry(interface_id.to_owned()).or_default();
        if description.is_channel() {
            let device_address = address.device_address();
            entry.entry(device_address).or_default().push(address);
        } else {
            entry.entry(address.clone()).or_insert_with(|| vec![address]);
        }
    }

    pub async fn remove(&self, interface_id: &str, deleted_addresses: &[Address]) {
        let mut raw = self.raw.write().await;
        if let Some(list) = raw.get_mut(interface_id) {
            list.retain(|d| !deleted_addresses.contains(&d.address));
        }
        drop(raw);

        let mut by_address = self.by_address.write().await;
        let mut addresses = self.addresses.write().await;
        for address in deleted_addresses {
            if !address.is_channel() {
                addresses.get_mut(interface_id).map(|m| m.remove(address));
            }
            by_address.get_mut(interface_id).map(|m| m.remove(address));
        }
    }

    pub async fn get_device_description(&self, interface_id: &str, address: &Address) -> Option<DeviceDescription> {
        self.by_address.read().await.get(interface_id).and_then(|m| m.get(address)).cloned()
    }

    pub async fn get_addresses(&self, interface_id: &str) -> Vec<Address> {
        self.addresses.read().await.get(interface_id).map(|m| m.keys().cloned().collect()).unwrap_or_default()
    }

    /// `device_address` plus every channel address beneath it, each mapped
    /// to its own description (spec §4.9 export, `get_device_with_channels`
    /// in the original source).
    pub async fn get_device_with_channels(
        &self,
        interface_id: &str,
        device_address: &Address,
    ) -> HashMap<Address, DeviceDescription> {
        let mut result = HashMap::new();
        let by_address = self.by_address.read().await;
        let Some(descriptions) = by_address.get(interface_id) else {
            return result;
        };
        if let Some(desc) = descriptions.get(device_address) {
            result.insert(device_address.clone(), desc.clone());
        }
        let channels = self
            .addresses
            .read()
            .await
            .get(interface_id)
            .and_then(|m| m.get(device_address))
            .cloned()
            .unwrap_or_default();
        for channel_address in channels {
            if let Some(desc) = descriptions.get(&channel_address) {
                result.entry(channel_address).or_insert_with(|| desc.clone());
            }
        }
        result
    }

    async fn current_hash(&self) -> String {
        hash_sha256(&*self.raw.read().await)
    }

    /// Skips the write if the in-memory content's hash already equals
    /// `last_hash_saved` (spec §4.5).
    #[instrument(skip(self))]
    pub async fn save(&self) -> Result<CacheOp> {
        let hash = self.current_hash().await;
        if *self.last_hash_saved.lock().await == hash {
            return Ok(CacheOp::NoSave);
        }
        let bytes = serde_json::to_vec(&*self.raw.read().await)?;
        self.guard.write_atomic(&bytes).await?;
        *self.last_hash_saved.lock().await = hash;
        debug!("persisted device description cache");
        Ok(CacheOp::Saved)
    }

    /// No-op if the file is absent or its hash matches the in-memory
    /// content (spec §4.5).
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<CacheOp> {
        let Some(bytes) = self.guard.read().await? else {
            return Ok(CacheOp::NoLoad);
        };
        let data: HashMap<String, Vec<DeviceDescription>> = match serde_json::from_slice(&bytes) {
            Ok(data) => data,
            Err(_) => return Ok(CacheOp::NoLoad),
        };
        let hash = hash_sha256(&data);
        if *self.last_hash_saved.lock().await == hash {
            return Ok(CacheOp::NoLoad);
        }

        *self.raw.write().await = data.clone();
        self.addresses.write().await.clear();
        self.by_address.write().await.clear();
        for (interface_id, descriptions) in &data {
            for description in descriptions {
                self.index(interface_id, description).await;
            }
        }
        *self.last_hash_saved.lock().await = hash;
        Ok(CacheOp::Loaded)
    }
}

/// Map interface-id -> channel-address -> paramset-key -> parameter ->
/// [`ParameterData`], plus the derived (device, parameter) -> channel-no
/// set for "is-in-multiple-channels" queries (spec §4.5).
pub struct ParamsetDescriptionCache {
    guard: FileGuard,
    raw: RwLock<HashMap<String, HashMap<Address, HashMap<ParamsetKey, HashMap<String, ParameterData>>>>>,
    address_parameter: RwLock<HashMap<(Address, String), std::collections::HashSet<Option<u32>>>>,
    last_hash_saved: Mutex<String>,
}

impl ParamsetDescriptionCache {
    pub fn new(storage_folder: &Path, central_name: &str) -> Self {
        let path = storage_folder.join("cache").join(format!("{central_name}_paramsets"));
        Self {
            guard: FileGuard::new(path),
            raw: RwLock::new(HashMap::new()),
            address_parameter: RwLock::new(HashMap::new()),
            last_hash_saved: Mutex::new(hash_sha256(
                &HashMap::<String, HashMap<Address, HashMap<ParamsetKey, HashMap<String, ParameterData>>>>::new(),
            )),
        }
    }

    pub async fn add(
        &self,
        interface_id: &str,
        channel_address: Address,
        paramset_key: ParamsetKey,
        paramset: HashMap<String, ParameterData>,
    ) {
        let device_address = channel_address.device_address();
        let channel_no = channel_address.channel_no();
        {
            let mut address_parameter = self.address_parameter.write().await;
            for parameter in paramset.keys() {
                address_parameter
                    .entry((device_address.clone(), parameter.clone()))
                    .or_default()
                    .insert(channel_no);
            }
        }
        let mut raw = self.raw.write().await;
        raw.entry(interface_id.to_owned())
            .or_default()
            .entry(channel_address)
            .or_default()
            .insert(paramset_key, paramset);
    }

    pub async fn has_interface_id(&self, interface_id: &str) -> bool {
        self.raw.read().await.contains_key(interface_id)
    }

    pub async fn get_paramset_keys(&self, interface_id: &str, channel_address: &Address) -> Vec<ParamsetKey> {
        self.raw
            .read()
            .await
            .get(interface_id)
            .and_then(|m| m.get(channel_address))
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    /// The full `parameter -> ParameterData` map for one channel's paramset
    /// (spec §4.7 step 2, grounded on `get_channel_paramset_descriptions`).
    pub async fn get_channel_paramset_descriptions(
        &self,
        interface_id: &str,
        channel_address: &Address,
        paramset_key: ParamsetKey,
    ) -> HashMap<String, ParameterData> {
        self.raw
            .read()
            .await
            .get(interface_id)
            .and_then(|m| m.get(channel_address))
            .and_then(|m| m.get(&paramset_key))
            .cloned()
            .unwrap_or_default()
    }

    pub async fn get_parameter_data(
        &self,
        interface_id: &str,
        channel_address: &Address,
        paramset_key: ParamsetKey,
        parameter: &str,
    ) -> Option<ParameterData> {
        self.raw
            .read()
            .await
            .get(interface_id)?
            .get(channel_address)?
            .get(&paramset_key)?
            .get(parameter)
            .cloned()
    }

    /// `true` if `parameter` appears on more than one channel of the
    /// device owning `channel_address` (spec §4.5).
    pub async fn is_in_multiple_channels(&self, channel_address: &Address, parameter: &str) -> bool {
        if !channel_address.is_channel() {
            return false;
        }
        let device_address = channel_address.device_address();
        self.address_parameter
            .read()
            .await
            .get(&(device_address, parameter.to_owned()))
            .is_some_and(|channels| channels.len() > 1)
    }

    async fn current_hash(&self) -> String {
        hash_sha256(&*self.raw.read().await)
    }

    #[instrument(skip(self))]
    pub async fn save(&self) -> Result<CacheOp> {
        let hash = self.current_hash().await;
        if *self.last_hash_saved.lock().await == hash {
            return Ok(CacheOp::NoSave);
        }
        let bytes = serde_json::to_vec(&*self.raw.read().await)?;
        self.guard.write_atomic(&bytes).await?;
        *self.last_hash_saved.lock().await = hash;
        Ok(CacheOp::Saved)
    }

    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<CacheOp> {
        let Some(bytes) = self.guard.read().await? else {
            return Ok(CacheOp::NoLoad);
        };
        let data: HashMap<String, HashMap<Address, HashMap<ParamsetKey, HashMap<String, ParameterData>>>> =
            match serde_json::from_slice(&bytes) {
                Ok(data) => data,
                Err(_) => return Ok(CacheOp::NoLoad),
            };
        let hash = hash_sha256(&data);
        if *self.last_hash_saved.lock().await == hash {
            return Ok(CacheOp::NoLoad);
        }

        *self.raw.write().await = data.clone();
        self.address_parameter.write().await.clear();
        for channels in data.values() {
            for (channel_address, paramsets) in channels {
                let device_address = channel_address.device_address();
                let channel_no = channel_address.channel_no();
                for paramset in paramsets.values() {
                    let mut address_parameter = self.address_parameter.write().await;
                    for parameter in paramset.keys() {
                        address_parameter
                            .entry((device_address.clone(), parameter.clone()))
                            .or_default()
                            .insert(channel_no);
                    }
                }
            }
        }
        *self.last_hash_saved.lock().await = hash;
        Ok(CacheOp::Loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ParameterType;

    fn device_desc(address: &str, parent: &str) -> DeviceDescription {
        DeviceDescription {
            address: Address::new(address),
            device_type: "HmIP-BSM".into(),
            parent: parent.into(),
            children: vec![],
            paramsets: vec![ParamsetKey::Values],
            firmware: None,
            available_firmware: None,
            updatable: None,
            version: None,
            rx_mode: None,
            roaming: None,
            interface: None,
        }
    }

    #[tokio::test]
    async fn save_skips_write_when_hash_unchanged() {
        let dir = std::env::temp_dir().join(format!("hmcore-test-{}", std::process::id()));
        let cache = DeviceDescriptionCache::new(&dir, "ccu-test-a");
        assert_eq!(cache.save().await.unwrap(), CacheOp::NoSave);

        cache.add("hmip", device_desc("VCU2128127", "")).await;
        assert_eq!(cache.save().await.unwrap(), CacheOp::Saved);
        assert_eq!(cache.save().await.unwrap(), CacheOp::NoSave);
    }

    #[tokio::test]
    async fn save_then_load_round_trips_into_a_fresh_cache() {
        let dir = std::env::temp_dir().join(format!("hmcore-test-{}", std::process::id()));
        let cache = DeviceDescriptionCache::new(&dir, "ccu-test-b");
        cache.add("hmip", device_desc("VCU2128127", "")).await;
        cache.save().await.unwrap();

        let reloaded = DeviceDescriptionCache::new(&dir, "ccu-test-b");
        assert_eq!(reloaded.load().await.unwrap(), CacheOp::Loaded);
        assert!(reloaded.get_device_description("hmip", &Address::new("VCU2128127")).await.is_some());
    }

    #[tokio::test]
    async fn paramset_cache_tracks_multi_channel_parameters() {
        let dir = std::env::temp_dir().join(format!("hmcore-test-{}", std::process::id()));
        let cache = ParamsetDescriptionCache::new(&dir, "ccu-test-c");
        let pd = ParameterData {
            parameter_type: ParameterType::Bool,
            operations: crate::model::parameter::ParameterOperations::READ,
            flags: crate::model::parameter::ParameterFlags::VISIBLE,
            min: None,
            max: None,
            default: None,
            unit: None,
            value_list: None,
            special: None,
        };
        let mut paramset = HashMap::new();
        paramset.insert("LOWBAT".to_owned(), pd.clone());
        cache.add("hmip", Address::new("VCU1:1"), ParamsetKey::Values, paramset.clone()).await;
        assert!(!cache.is_in_multiple_channels(&Address::new("VCU1:1"), "LOWBAT").await);

        cache.add("hmip", Address::new("VCU1:2"), ParamsetKey::Values, paramset).await;
        assert!(cache.is_in_multiple_channels(&Address::new("VCU1:1"), "LOWBAT").await);
    }
}
