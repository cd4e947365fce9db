//! Subscription bookkeeping and event fan-out (spec §4.6, §5).
//!
//! Kept separate from `Device`/`Entity` per the arena+indices note in
//! [`crate::model`]: a `Subscription` names the key another map looks up
//! (`(channel_address, paramset_key, parameter)`), never an owning pointer
//! into a `Device`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use crate::address::Address;
use crate::model::parameter::ParamsetKey;
use crate::value::Value;

/// A host-supplied callback for one `(channel_address, VALUES, parameter)`
/// key. Errors are logged and do not interrupt the remaining subscribers
/// (spec §4.6 "exceptions from one subscriber do not block the rest").
pub type Subscriber = Arc<dyn Fn(Address, String, Value) + Send + Sync>;

type SubscriptionKey = (Address, ParamsetKey, String);

/// Subscribers for a given key are invoked in registration order (spec §5
/// "Ordering guarantees").
#[derive(Default)]
pub struct SubscriptionMap {
    subscribers: RwLock<HashMap<SubscriptionKey, Vec<Subscriber>>>,
    /// Serialises `newDevices` processing so two concurrent calls cannot
    /// race to add the same description twice (spec §5).
    new_devices_guard: Mutex<()>,
}

impl SubscriptionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(
        &self,
        channel_address: Address,
        paramset_key: ParamsetKey,
        parameter: impl Into<String>,
        subscriber: Subscriber,
    ) {
        let key = (channel_address, paramset_key, parameter.into());
        self.subscribers.write().await.entry(key).or_default().push(subscriber);
    }

    pub async fn unsubscribe_all(&self, channel_address: &Address, paramset_key: ParamsetKey, parameter: &str) {
        let key = (channel_address.clone(), paramset_key, parameter.to_owned());
        self.subscribers.write().await.remove(&key);
    }

    /// Invokes every subscriber for `(channel_address, VALUES, parameter)`
    /// in registration order; a panicking callback is caught and logged
    /// rather than aborting the remaining ones.
    pub async fn dispatch(&self, channel_address: &Address, parameter: &str, value: Value) {
        let key = (channel_address.clone(), ParamsetKey::Values, parameter.to_owned());
        let subscribers = {
            let guard = self.subscribers.read().await;
            guard.get(&key).cloned().unwrap_or_default()
        };
        for subscriber in subscribers {
            let channel_address = channel_address.clone();
            let parameter = parameter.to_owned();
            let value = value.clone();
            if let Err(panic) =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| subscriber(channel_address, parameter, value)))
            {
                warn!(?panic, "subscriber callback panicked");
            }
        }
    }

    /// Guards a `newDevices` processing critical section (spec §5).
    pub async fn new_devices_lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.new_devices_guard.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn subscribers_run_in_registration_order() {
        let map = SubscriptionMap::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for id in 0..3 {
            let order = order.clone();
            map.subscribe(
                Address::new("VCU1:1"),
                ParamsetKey::Values,
                "LEVEL",
                Arc::new(move |_, _, _| {
                    order.try_lock().unwrap().push(id);
                }),
            )
            .await;
        }

        map.dispatch(&Address::new("VCU1:1"), "LEVEL", Value::Int(1)).await;
        assert_eq!(*order.lock().await, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn one_panicking_subscriber_does_not_block_the_rest() {
        let map = SubscriptionMap::new();
        let hit = Arc::new(AtomicUsize::new(0));

        map.subscribe(
            Address::new("VCU1:1"),
            ParamsetKey::Values,
            "LEVEL",
            Arc::new(|_, _, _| panic!("boom")),
        )
        .await;
        let hit2 = hit.clone();
        map.subscribe(
            Address::new("VCU1:1"),
            ParamsetKey::Values,
            "LEVEL",
            Arc::new(move |_, _, _| {
                hit2.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await;

        map.dispatch(&Address::new("VCU1:1"), "LEVEL", Value::Int(1)).await;
        assert_eq!(hit.load(Ordering::SeqCst), 1);
    }
}
