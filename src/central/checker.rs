//! The connection-checker loop (spec §4.6), grounded on
//! `original_source/hahomematic/central_unit.py::ConnectionChecker`.
//!
//! The original runs this on a dedicated OS thread that hops onto the
//! event loop; under tokio the loop is simply an async task spawned by
//! `Central::start` via [`crate::looper::Looper`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::central::client::Client;
use crate::connection::ping_pong::{MAX_PENDING_AGE, MISMATCH_THRESHOLD};

/// `CONNECTION_CHECKER_INTERVAL` (spec §4.6).
pub const CONNECTION_CHECKER_INTERVAL: Duration = Duration::from_secs(15);

/// The three consecutive-failure count at which a client's interface is
/// marked force-unavailable (spec §4.6, §4.7 "three consecutive failures").
pub const FORCE_UNAVAILABLE_THRESHOLD: i64 = 3;

/// Everything one connection-checker tick needs from its owning `Central`,
/// kept narrow so this module stays testable without a full `Central`.
#[async_trait::async_trait]
pub trait CheckerHost: Send + Sync {
    fn clients(&self) -> Vec<Arc<Client>>;
    async fn restart_clients(&self);
    fn callback_url(&self, interface_id: &str) -> String;
    /// Called once after any successful reconnect (spec §4.6: "bulk-refresh
    /// entity data").
    async fn refresh_entity_data(&self);
    /// `true` iff this host still wants the checker loop running.
    fn is_active(&self) -> bool;
    /// Marks (or clears) every device on `interface_id` force-unavailable
    /// and emits a PROXY interface event (spec §4.6, §4.7).
    async fn set_interface_force_unavailable(&self, interface_id: &str, force_unavailable: bool);
    /// Fires a CALLBACK interface event on an `is_callback_alive()`
    /// transition (spec §4.6).
    async fn on_callback_alive_transition(&self, interface_id: &str, alive: bool);
    /// Fires a PINGPONG_MISMATCH interface event once the pending-ping set
    /// crosses the mismatch threshold (spec §4.4, §6).
    async fn on_pingpong_mismatch(
        &self,
        interface_id: &str,
        pending_pong_events: u64,
        unknown_pong_events: u64,
        mismatch_count: u64,
    );
}

/// Runs the checker loop until `host.is_active()` turns false. Call this
/// from a spawned task, not inline in `start()`.
pub async fn run(host: Arc<dyn CheckerHost>) {
    let mut interval = tokio::time::interval(CONNECTION_CHECKER_INTERVAL);
    while host.is_active() {
        interval.tick().await;
        if let Err(err) = tick(host.as_ref()).await {
            error!(error = %err, "check_connection failed");
        }
    }
}

async fn tick(host: &dyn CheckerHost) -> crate::error::Result<()> {
    let clients = host.clients();
    if clients.is_empty() {
        warn!("check_connection failed: no clients exist, restarting");
        host.restart_clients().await;
        return Ok(());
    }

    for client in &clients {
        let callback_alive = client.is_callback_alive();
        if client.note_callback_alive_transition(callback_alive) {
            host.on_callback_alive_transition(&client.interface_id, callback_alive).await;
        }

        if client.drain_and_check_pingpong(MAX_PENDING_AGE, MISMATCH_THRESHOLD) {
            let (pending, unknown, mismatches) = client.pingpong_counters();
            host.on_pingpong_mismatch(&client.interface_id, pending, unknown, mismatches).await;
        }
    }

    let mut reconnects = Vec::new();
    for client in &clients {
        let alive = client.available() && client.is_connected() && client.is_callback_alive();
        if !alive {
            debug!(interface_id = %client.interface_id, "scheduling reconnect");
            reconnects.push(client.clone());
        }
    }

    if reconnects.is_empty() {
        for client in &clients {
            client.check_connection_availability().await;
        }
        return Ok(());
    }

    let mut set = tokio::task::JoinSet::new();
    for client in reconnects {
        let callback_url = host.callback_url(&client.interface_id);
        set.spawn(async move {
            let result = client.reconnect(&callback_url).await;
            (client, result)
        });
    }
    let mut any_ok = false;
    while let Some(joined) = set.join_next().await {
        let Ok((client, result)) = joined else { continue };
        match result {
            Ok(()) => {
                any_ok = true;
                host.set_interface_force_unavailable(&client.interface_id, false).await;
            }
            Err(err) => {
                warn!(interface_id = %client.interface_id, error = %err, "reconnect failed");
                if client.consecutive_failures() >= FORCE_UNAVAILABLE_THRESHOLD {
                    host.set_interface_force_unavailable(&client.interface_id, true).await;
                }
            }
        }
    }

    if any_ok {
        host.refresh_entity_data().await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    struct FakeHost {
        restart_calls: AtomicUsize,
        active: std::sync::atomic::AtomicBool,
        refreshed: AtomicUsize,
        clients: Mutex<Vec<Arc<Client>>>,
    }

    #[async_trait::async_trait]
    impl CheckerHost for FakeHost {
        fn clients(&self) -> Vec<Arc<Client>> {
            self.clients.try_lock().map(|g| g.clone()).unwrap_or_default()
        }
        async fn restart_clients(&self) {
            self.restart_calls.fetch_add(1, Ordering::SeqCst);
        }
        fn callback_url(&self, _interface_id: &str) -> String {
            "http://127.0.0.1:9126".to_owned()
        }
        async fn refresh_entity_data(&self) {
            self.refreshed.fetch_add(1, Ordering::SeqCst);
        }
        fn is_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }
        async fn set_interface_force_unavailable(&self, _interface_id: &str, _force_unavailable: bool) {}
        async fn on_callback_alive_transition(&self, _interface_id: &str, _alive: bool) {}
        async fn on_pingpong_mismatch(
            &self,
            _interface_id: &str,
            _pending_pong_events: u64,
            _unknown_pong_events: u64,
            _mismatch_count: u64,
        ) {
        }
    }

    #[tokio::test]
    async fn tick_restarts_clients_when_none_exist() {
        let host = FakeHost {
            restart_calls: AtomicUsize::new(0),
            active: std::sync::atomic::AtomicBool::new(true),
            refreshed: AtomicUsize::new(0),
            clients: Mutex::new(Vec::new()),
        };
        tick(&host).await.unwrap();
        assert_eq!(host.restart_calls.load(Ordering::SeqCst), 1);
    }
}
