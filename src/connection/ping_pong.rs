//! Ping/pong liveness accounting per interface (spec §4.4).

use std::collections::BTreeSet;
use std::time::Duration;

/// Millisecond-precision timestamp, as carried in the `PONG` event payload
/// (`<interface_id>#<ms-timestamp>`, spec §4.3).
pub type PingTimestampMs = i64;

/// A pending ping older than this is drained into `pending_pong_events` on
/// the next connectivity tick (spec §4.4). Not given a fixed value in the
/// spec; set to outlast a couple of `CONNECTION_CHECKER_INTERVAL` ticks so a
/// single slow round-trip doesn't drain a still-live ping.
pub const MAX_PENDING_AGE: Duration = Duration::from_secs(60);

/// Pending-ping count above which a PINGPONG_MISMATCH interface event fires
/// (spec §4.4). Matches the "three consecutive failures" scale used
/// elsewhere in the connection checker (spec §4.6).
pub const MISMATCH_THRESHOLD: usize = 3;

/// Outstanding-ping set, mismatch counters, pending/unknown-pong
/// classification (spec §4.4). One instance per interface.
#[derive(Debug, Default)]
pub struct PingPongCache {
    pending_pings: BTreeSet<PingTimestampMs>,
    pending_pong_events: u64,
    unknown_pong_events: u64,
    mismatch_count: u64,
}

impl PingPongCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_send_ping(&mut self, ts: PingTimestampMs) {
        self.pending_pings.insert(ts);
    }

    /// `true` if `pong_ts` matched a pending ping (removed); `false` if it
    /// was counted as an unknown pong.
    pub fn handle_received_pong(&mut self, pong_ts: PingTimestampMs) -> bool {
        if self.pending_pings.remove(&pong_ts) {
            true
        } else {
            self.unknown_pong_events += 1;
            false
        }
    }

    /// Drains pending pings older than `max_pending_age` (relative to
    /// `now_ms`) into `pending_pong_events`, returning how many were
    /// drained this tick (spec §4.4 "Every connectivity tick...").
    pub fn drain_expired(&mut self, now_ms: PingTimestampMs, max_pending_age: Duration) -> u64 {
        let cutoff = now_ms - max_pending_age.as_millis() as i64;
        let expired: Vec<PingTimestampMs> =
            self.pending_pings.iter().copied().take_while(|ts| *ts < cutoff).collect();
        for ts in &expired {
            self.pending_pings.remove(ts);
        }
        self.pending_pong_events += expired.len() as u64;
        expired.len() as u64
    }

    /// `true` once the pending set crosses `ping_pong_mismatch_threshold`;
    /// the caller (Central) fires a PINGPONG_MISMATCH interface event but
    /// never tears down the connection from this alone (spec §4.4).
    pub fn exceeds_mismatch_threshold(&mut self, threshold: usize) -> bool {
        let exceeded = self.pending_pings.len() > threshold;
        if exceeded {
            self.mismatch_count += 1;
        }
        exceeded
    }

    pub fn pending_count(&self) -> usize {
        self.pending_pings.len()
    }

    pub fn pending_pong_events(&self) -> u64 {
        self.pending_pong_events
    }

    pub fn unknown_pong_events(&self) -> u64 {
        self.unknown_pong_events
    }

    pub fn mismatch_count(&self) -> u64 {
        self.mismatch_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_pong_removes_from_pending() {
        let mut cache = PingPongCache::new();
        cache.handle_send_ping(1000);
        assert!(cache.handle_received_pong(1000));
        assert_eq!(cache.pending_count(), 0);
    }

    #[test]
    fn unmatched_pong_increments_unknown_counter() {
        let mut cache = PingPongCache::new();
        assert!(!cache.handle_received_pong(999));
        assert_eq!(cache.unknown_pong_events(), 1);
    }

    #[test]
    fn expired_pings_move_to_pending_pong_events() {
        let mut cache = PingPongCache::new();
        cache.handle_send_ping(1_000);
        cache.handle_send_ping(5_000);
        let drained = cache.drain_expired(10_000, Duration::from_millis(4_000));
        assert_eq!(drained, 1);
        assert_eq!(cache.pending_pong_events(), 1);
        assert_eq!(cache.pending_count(), 1);
    }

    #[test]
    fn send_and_receive_counts_balance() {
        let mut cache = PingPongCache::new();
        for ts in 0..5 {
            cache.handle_send_ping(ts);
        }
        for ts in 0..3 {
            cache.handle_received_pong(ts);
        }
        assert_eq!(cache.pending_count(), 2);
        assert_eq!(cache.mismatch_count(), 0);
    }

    #[test]
    fn crossing_threshold_increments_mismatch_count_once_per_tick() {
        let mut cache = PingPongCache::new();
        for ts in 0..5 {
            cache.handle_send_ping(ts);
        }
        assert!(cache.exceeds_mismatch_threshold(3));
        assert_eq!(cache.mismatch_count(), 1);
        assert!(!cache.exceeds_mismatch_threshold(10));
    }
}
