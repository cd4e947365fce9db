//! Per-issuer issue set with dedup of failure logging (spec §4.4).

use std::collections::HashSet;
use std::sync::Mutex;

/// One JSON-RPC issue set plus one issue set per XML-RPC interface (keyed
/// by `"{interface_id}:{issue_id}"`). `add_issue`/`remove_issue` report
/// whether this was the first occurrence/removal so the caller can choose
/// warn-once-then-debug logging (spec §4.4).
#[derive(Debug, Default)]
pub struct ConnectionState {
    json_rpc_issues: Mutex<HashSet<String>>,
    interface_issues: Mutex<HashSet<String>>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    fn interface_key(interface_id: &str, issue_id: &str) -> String {
        format!("{interface_id}:{issue_id}")
    }

    /// `true` if there is any outstanding issue at all, for the XML-RPC
    /// proxy's "short-circuit with NoConnection" check (spec §4.1).
    pub fn has_issue(&self) -> bool {
        !self.json_rpc_issues.lock().unwrap().is_empty()
            || !self.interface_issues.lock().unwrap().is_empty()
    }

    pub fn has_interface_issue(&self, interface_id: &str, issue_id: &str) -> bool {
        self.interface_issues.lock().unwrap().contains(&Self::interface_key(interface_id, issue_id))
    }

    /// Returns `true` on first occurrence (caller logs at warning level);
    /// `false` on a repeat (caller logs at debug).
    pub fn add_interface_issue(&self, interface_id: &str, issue_id: &str) -> bool {
        self.interface_issues.lock().unwrap().insert(Self::interface_key(interface_id, issue_id))
    }

    /// Returns `true` on first removal so recovery is logged exactly once.
    pub fn remove_interface_issue(&self, interface_id: &str, issue_id: &str) -> bool {
        self.interface_issues.lock().unwrap().remove(&Self::interface_key(interface_id, issue_id))
    }

    pub fn add_json_rpc_issue(&self, issue_id: &str) -> bool {
        self.json_rpc_issues.lock().unwrap().insert(issue_id.to_owned())
    }

    pub fn remove_json_rpc_issue(&self, issue_id: &str) -> bool {
        self.json_rpc_issues.lock().unwrap().remove(issue_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_issue_returns_true_only_on_first_occurrence() {
        let state = ConnectionState::new();
        assert!(state.add_interface_issue("HmIP-RF", "no_connection"));
        assert!(!state.add_interface_issue("HmIP-RF", "no_connection"));
    }

    #[test]
    fn remove_issue_returns_true_only_on_first_removal() {
        let state = ConnectionState::new();
        state.add_interface_issue("HmIP-RF", "no_connection");
        assert!(state.remove_interface_issue("HmIP-RF", "no_connection"));
        assert!(!state.remove_interface_issue("HmIP-RF", "no_connection"));
    }

    #[test]
    fn has_issue_reflects_both_sets() {
        let state = ConnectionState::new();
        assert!(!state.has_issue());
        state.add_json_rpc_issue("auth_failure");
        assert!(state.has_issue());
        state.remove_json_rpc_issue("auth_failure");
        assert!(!state.has_issue());
    }

    #[test]
    fn issues_are_scoped_per_interface() {
        let state = ConnectionState::new();
        state.add_interface_issue("HmIP-RF", "no_connection");
        assert!(!state.has_interface_issue("BidCos-RF", "no_connection"));
        assert!(state.has_interface_issue("HmIP-RF", "no_connection"));
    }
}
