//! One configured interface's client: an `XmlRpcProxy` plus a shared
//! reference to the `JsonRpcClient` (spec §4.6), grounded on
//! `original_source/hahomematic/client/__init__.py`'s `Client` base and
//! `ConnectionChecker`'s liveness checks on it.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{info, instrument, warn};

use crate::connection::ping_pong::PingTimestampMs;
use crate::connection::{ConnectionState, PingPongCache};
use crate::error::{Error, Result};
use crate::transport::{JsonRpcClient, XmlRpcProxy};

/// Liveness is lost if no callback event has arrived for this long (spec
/// §4.6, `CALLBACK_WARN_INTERVAL`).
pub const CALLBACK_WARN_INTERVAL: Duration = Duration::from_secs(75);

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// One interface's client (spec §2 "Client"): owns the per-interface
/// `XmlRpcProxy`, shares the json_rpc client and connection-state tracker
/// across every interface of the same `Central`.
pub struct Client {
    pub interface_id: String,
    pub proxy: XmlRpcProxy,
    pub json_rpc: Arc<JsonRpcClient>,
    connection_state: Arc<ConnectionState>,
    available: AtomicBool,
    last_connection_check_ok: AtomicBool,
    last_updated_ms: AtomicI64,
    last_event_ms: AtomicI64,
    consecutive_failures: AtomicI64,
    /// `true` iff `is_callback_alive()` was true the last time a checker
    /// tick looked at it; used to fire a CALLBACK interface event only on
    /// the transition, not on every tick (spec §4.6).
    last_callback_alive: AtomicBool,
    pingpong: Mutex<PingPongCache>,
}

impl Client {
    pub fn new(
        interface_id: impl Into<String>,
        proxy: XmlRpcProxy,
        json_rpc: Arc<JsonRpcClient>,
        connection_state: Arc<ConnectionState>,
    ) -> Self {
        let now = now_ms();
        Self {
            interface_id: interface_id.into(),
            proxy,
            json_rpc,
            connection_state,
            available: AtomicBool::new(true),
            last_connection_check_ok: AtomicBool::new(true),
            last_updated_ms: AtomicI64::new(now),
            last_event_ms: AtomicI64::new(now),
            consecutive_failures: AtomicI64::new(0),
            last_callback_alive: AtomicBool::new(true),
            pingpong: Mutex::new(PingPongCache::new()),
        }
    }

    pub fn consecutive_failures(&self) -> i64 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Records that a backend-pushed callback event just arrived for this
    /// interface (spec §4.6, drives `is_callback_alive`).
    pub fn note_event_received(&self) {
        self.last_event_ms.store(now_ms(), Ordering::SeqCst);
    }

    /// Sends a synthetic `ping` carrying `<interface_id>#<ms-timestamp>` as
    /// its caller-id, recording the timestamp in the ping-pong cache before
    /// the call goes out (spec §4.3/§4.4). `true` iff the last tick's ping
    /// was accepted and the last success is recent enough (spec §4.6).
    #[instrument(skip(self), fields(interface_id = %self.interface_id))]
    pub async fn check_connection_availability(&self) -> bool {
        let ts = now_ms();
        self.pingpong.lock().unwrap().handle_send_ping(ts);
        let caller_id = format!("{}#{ts}", self.interface_id);
        let ok = self
            .proxy
            .call("ping", vec![serde_json::json!(caller_id)], &self.connection_state)
            .await
            .is_ok();
        self.last_connection_check_ok.store(ok, Ordering::SeqCst);
        if ok {
            self.last_updated_ms.store(now_ms(), Ordering::SeqCst);
        }
        ok
    }

    pub fn is_connected(&self) -> bool {
        let fresh = now_ms() - self.last_updated_ms.load(Ordering::SeqCst)
            < CALLBACK_WARN_INTERVAL.as_millis() as i64;
        self.last_connection_check_ok.load(Ordering::SeqCst) && fresh
    }

    pub fn is_callback_alive(&self) -> bool {
        now_ms() - self.last_event_ms.load(Ordering::SeqCst) < CALLBACK_WARN_INTERVAL.as_millis() as i64
    }

    /// Records `alive` as the latest known `is_callback_alive()` reading,
    /// returning `true` iff it differs from the previous reading (spec
    /// §4.6: "Transitions fire a CALLBACK interface event").
    pub fn note_callback_alive_transition(&self, alive: bool) -> bool {
        self.last_callback_alive.swap(alive, Ordering::SeqCst) != alive
    }

    /// Records a matching or unknown PONG (spec §4.3/§4.4).
    pub fn handle_received_pong(&self, pong_ts: PingTimestampMs) -> bool {
        self.pingpong.lock().unwrap().handle_received_pong(pong_ts)
    }

    /// Drains pings older than `max_pending_age` into `pending_pong_events`,
    /// then reports whether the pending set still exceeds
    /// `mismatch_threshold` (spec §4.4, "every connectivity tick").
    pub fn drain_and_check_pingpong(&self, max_pending_age: Duration, mismatch_threshold: usize) -> bool {
        let mut cache = self.pingpong.lock().unwrap();
        cache.drain_expired(now_ms(), max_pending_age);
        cache.exceeds_mismatch_threshold(mismatch_threshold)
    }

    /// `(pending_pong_events, unknown_pong_events, mismatch_count)`, for a
    /// PINGPONG_MISMATCH interface event's payload (spec §6).
    pub fn pingpong_counters(&self) -> (u64, u64, u64) {
        let cache = self.pingpong.lock().unwrap();
        (cache.pending_pong_events(), cache.unknown_pong_events(), cache.mismatch_count())
    }

    /// De-inits then re-inits the backend registration for this interface
    /// (spec §4.6 "Reconnect contract"). A de-init failure does not block
    /// the subsequent re-init attempt; only a failed re-init itself is
    /// surfaced as `DE_INIT_FAILED`-equivalent (an `Err` here).
    #[instrument(skip(self), fields(interface_id = %self.interface_id))]
    pub async fn reconnect(&self, callback_url: &str) -> Result<()> {
        if let Err(err) = self.proxy.proxy_de_init(callback_url).await {
            warn!(error = %err, "de-init failed, proceeding with re-init anyway");
        }

        match self.proxy.proxy_init(callback_url, &self.interface_id).await {
            Ok(()) => {
                self.set_available(true);
                self.consecutive_failures.store(0, Ordering::SeqCst);
                self.last_connection_check_ok.store(true, Ordering::SeqCst);
                self.last_updated_ms.store(now_ms(), Ordering::SeqCst);
                info!("reconnected");
                Ok(())
            }
            Err(err) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= 3 {
                    self.set_available(false);
                }
                Err(err)
            }
        }
    }

    pub async fn init(&self, callback_url: &str) -> Result<()> {
        self.proxy.proxy_init(callback_url, &self.interface_id).await
    }

    pub async fn de_init(&self, callback_url: &str) -> Result<()> {
        self.proxy.proxy_de_init(callback_url).await
    }

    pub fn connection_state(&self) -> &ConnectionState {
        &self.connection_state
    }
}

/// Maps a fallible client operation to `Err(Error::NoConnection)` once this
/// client has no remaining retries, matching `NoConnection` being the one
/// exception type the checker loop specifically logs and continues past.
pub fn as_no_connection(err: Error) -> Error {
    match err {
        Error::NoConnection(_) => err,
        other => Error::NoConnection(other.to_string()),
    }
}
