//! The "homematic event bus" (spec §6 "Events emitted to host"): tagged
//! KEYPRESS/IMPULSE/DEVICE_ERROR/INTERFACE records forwarded to the host,
//! separate from the per-parameter [`crate::central::dispatch::SubscriptionMap`]
//! path that entities use. Modeled on `SubscriptionMap`'s registration-order,
//! panic-catching fan-out.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::warn;

use crate::address::Address;
use crate::value::Value;

/// The kind of interface-scoped condition an INTERFACE event reports (spec
/// §6).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InterfaceEventType {
    Proxy,
    Callback,
    Pingpong,
    PendingPong,
    UnknownPong,
}

/// Common fields shared by KEYPRESS/IMPULSE/DEVICE_ERROR events (spec §6).
#[derive(Clone, Debug)]
pub struct EventPayload {
    pub address: Address,
    pub channel_no: u32,
    pub device_type: String,
    pub interface_id: String,
    pub parameter: String,
    pub value: Option<Value>,
}

/// One record on the event bus (spec §6).
#[derive(Clone, Debug)]
pub enum HomematicEvent {
    Keypress(EventPayload),
    Impulse(EventPayload),
    DeviceError(EventPayload),
    Interface { interface_id: String, interface_event_type: InterfaceEventType, data: serde_json::Value },
}

/// A host-supplied callback invoked for every bus event. Panics are caught
/// and logged, matching `SubscriptionMap::dispatch`.
pub type EventListener = Arc<dyn Fn(HomematicEvent) + Send + Sync>;

/// Fan-out for [`HomematicEvent`]s, invoked in registration order.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<EventListener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, listener: EventListener) {
        self.listeners.write().await.push(listener);
    }

    pub async fn emit(&self, event: HomematicEvent) {
        let listeners = self.listeners.read().await.clone();
        for listener in listeners {
            let event = event.clone();
            if let Err(panic) =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(event)))
            {
                warn!(?panic, "event bus listener panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[tokio::test]
    async fn listeners_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for id in 0..3 {
            let order = order.clone();
            bus.subscribe(Arc::new(move |_event| {
                order.lock().unwrap().push(id);
            }))
            .await;
        }

        bus.emit(HomematicEvent::Interface {
            interface_id: "HmIP-RF".into(),
            interface_event_type: InterfaceEventType::Proxy,
            data: serde_json::json!({"available": false}),
        })
        .await;
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn one_panicking_listener_does_not_block_the_rest() {
        let bus = EventBus::new();
        let hit = Arc::new(AtomicUsize::new(0));

        bus.subscribe(Arc::new(|_event| panic!("boom"))).await;
        let hit2 = hit.clone();
        bus.subscribe(Arc::new(move |_event| {
            hit2.fetch_add(1, Ordering::SeqCst);
        }))
        .await;

        bus.emit(HomematicEvent::Impulse(EventPayload {
            address: Address::new("VCU1:1"),
            channel_no: 1,
            device_type: "HmIP-SCI".into(),
            interface_id: "HmIP-RF".into(),
            parameter: "SEQUENCE_OK".into(),
            value: None,
        }))
        .await;
        assert_eq!(hit.load(Ordering::SeqCst), 1);
    }
}
