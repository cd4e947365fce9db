//! Hub entities (spec §3 "HubEntity", §4.8), grounded on
//! `platforms/hub/__init__.py::HmHub`.
//!
//! A [`Hub`] holds no transport of its own; `Central::fetch_sysvar_data`
//! and `Central::fetch_program_data` fetch the remote inventory over the
//! shared JSON-RPC client and hand the result here for diffing against the
//! local one, per the arena+indices split described on [`crate::model`].

pub mod program;
pub mod sysvar;

use std::collections::HashMap;

pub use program::{ProgramButton, ProgramData};
pub use sysvar::{SystemVariable, SystemVariableData, SysvarKind, SysvarType};

/// The result of one `fetch_sysvar_data`/`fetch_program_data` pass: which
/// unique identifiers are newly created versus removed, for the host's
/// `HUB_REFRESHED` system event (spec §6 "Events emitted to host").
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HubRefresh {
    pub created: Vec<String>,
    pub removed: Vec<String>,
}

impl HubRefresh {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.removed.is_empty()
    }
}

/// Owns the two hub-entity maps; not attached to any Device (spec §3).
#[derive(Debug, Default)]
pub struct Hub {
    pub sysvar_entities: HashMap<String, SystemVariable>,
    pub program_entities: HashMap<String, ProgramButton>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diffs a freshly fetched sysvar inventory against `sysvar_entities`:
    /// removed names are dropped, existing ones update their value in
    /// place, new ones are created (spec §4.8).
    pub fn update_sysvars(
        &mut self,
        central_name: &str,
        fetched: Vec<SystemVariableData>,
    ) -> HubRefresh {
        let mut refresh = HubRefresh::default();
        let fetched_names: std::collections::HashSet<&str> =
            fetched.iter().map(|data| data.name.as_str()).collect();

        let missing: Vec<String> = self
            .sysvar_entities
            .keys()
            .filter(|name| !fetched_names.contains(name.as_str()))
            .cloned()
            .collect();
        for name in missing {
            if let Some(entity) = self.sysvar_entities.remove(&name) {
                refresh.removed.push(entity.unique_identifier);
            }
        }

        for data in fetched {
            if sysvar::is_excluded(&data.name) {
                continue;
            }
            if let Some(existing) = self.sysvar_entities.get_mut(&data.name) {
                existing.update_value(data.value);
            } else {
                let entity = SystemVariable::new(central_name, &data);
                refresh.created.push(entity.unique_identifier.clone());
                self.sysvar_entities.insert(data.name, entity);
            }
        }

        refresh
    }

    /// Diffs a freshly fetched program inventory against `program_entities`
    /// the same way `update_sysvars` does for variables.
    pub fn update_programs(&mut self, central_name: &str, fetched: Vec<ProgramData>) -> HubRefresh {
        let mut refresh = HubRefresh::default();
        let fetched_ids: std::collections::HashSet<&str> =
            fetched.iter().map(|data| data.pid.as_str()).collect();

        let missing: Vec<String> = self
            .program_entities
            .keys()
            .filter(|pid| !fetched_ids.contains(pid.as_str()))
            .cloned()
            .collect();
        for pid in missing {
            if let Some(entity) = self.program_entities.remove(&pid) {
                refresh.removed.push(entity.unique_identifier);
            }
        }

        for data in fetched {
            if let Some(existing) = self.program_entities.get_mut(&data.pid) {
                existing.update_data(&data);
            } else {
                let entity = ProgramButton::new(central_name, &data);
                refresh.created.push(entity.unique_identifier.clone());
                self.program_entities.insert(data.pid.clone(), entity);
            }
        }

        refresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sysvar(name: &str, value: serde_json::Value) -> SystemVariableData {
        SystemVariableData {
            name: name.to_owned(),
            value,
            data_type: Some(SysvarType::Logic),
            extended_sysvar: false,
            value_list: None,
            min: None,
            max: None,
            unit: None,
        }
    }

    #[test]
    fn new_sysvar_is_created_and_reported() {
        let mut hub = Hub::new();
        let refresh = hub.update_sysvars("ccu", vec![sysvar("Alarm", serde_json::json!(true))]);
        assert_eq!(refresh.created.len(), 1);
        assert!(refresh.removed.is_empty());
        assert_eq!(hub.sysvar_entities.len(), 1);
    }

    #[test]
    fn existing_sysvar_updates_value_in_place_without_recreating() {
        let mut hub = Hub::new();
        hub.update_sysvars("ccu", vec![sysvar("Alarm", serde_json::json!(false))]);
        let before_id = hub.sysvar_entities["Alarm"].unique_identifier.clone();

        let refresh = hub.update_sysvars("ccu", vec![sysvar("Alarm", serde_json::json!(true))]);
        assert!(refresh.created.is_empty());
        assert_eq!(hub.sysvar_entities["Alarm"].value, serde_json::json!(true));
        assert_eq!(hub.sysvar_entities["Alarm"].unique_identifier, before_id);
    }

    #[test]
    fn sysvar_missing_from_fetch_is_removed() {
        let mut hub = Hub::new();
        hub.update_sysvars("ccu", vec![sysvar("Alarm", serde_json::json!(true))]);
        let refresh = hub.update_sysvars("ccu", vec![]);
        assert_eq!(refresh.removed.len(), 1);
        assert!(hub.sysvar_entities.is_empty());
    }

    #[test]
    fn excluded_sysvar_names_are_never_created() {
        let mut hub = Hub::new();
        let refresh = hub.update_sysvars("ccu", vec![sysvar("pcCCUID", serde_json::json!(1))]);
        assert!(refresh.is_empty());
        assert!(hub.sysvar_entities.is_empty());
    }

    fn program(pid: &str) -> ProgramData {
        ProgramData {
            pid: pid.to_owned(),
            name: "Evening lights".into(),
            is_active: true,
            is_internal: false,
            last_execute_time: None,
        }
    }

    #[test]
    fn program_lifecycle_create_update_remove() {
        let mut hub = Hub::new();
        let refresh = hub.update_programs("ccu", vec![program("1406")]);
        assert_eq!(refresh.created.len(), 1);

        let mut updated = program("1406");
        updated.is_active = false;
        let refresh = hub.update_programs("ccu", vec![updated]);
        assert!(refresh.created.is_empty());
        assert!(!hub.program_entities["1406"].is_active);

        let refresh = hub.update_programs("ccu", vec![]);
        assert_eq!(refresh.removed.len(), 1);
        assert!(hub.program_entities.is_empty());
    }
}
