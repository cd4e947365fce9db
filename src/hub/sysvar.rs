//! System variables (spec §4.8), grounded on
//! `platforms/hub/__init__.py::_create_sysvar_entity` and the per-kind
//! platform files it dispatches to (`binary_sensor.py`, `select.py`,
//! `number.py`, `text.py`).

use crate::model::entity::unique_identifier;

/// The backend's own sysvar type tag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SysvarType {
    Alarm,
    List,
    Logic,
    Number,
    String,
}

/// The platform kind a sysvar is surfaced as, derived from `SysvarType` and
/// the `extended_sysvar` flag (spec §4.8).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SysvarKind {
    Binary,
    Select,
    Number,
    Text,
}

impl SysvarKind {
    pub fn derive(data_type: SysvarType, extended_sysvar: bool) -> SysvarKind {
        match (data_type, extended_sysvar) {
            (SysvarType::Alarm | SysvarType::Logic, _) => SysvarKind::Binary,
            (SysvarType::List, true) => SysvarKind::Select,
            (SysvarType::Number, true) => SysvarKind::Number,
            (SysvarType::String, _) => SysvarKind::Text,
            // NUMBER/LIST without extended_sysvar still surface as a plain
            // read-only value; fold them into Text rather than invent a
            // fifth platform kind.
            (SysvarType::Number | SysvarType::List, false) => SysvarKind::Text,
        }
    }
}

/// One fetched system variable, as reported by `SysVar.getAll`.
#[derive(Clone, Debug)]
pub struct SystemVariableData {
    pub name: String,
    pub value: serde_json::Value,
    pub data_type: Option<SysvarType>,
    pub extended_sysvar: bool,
    pub value_list: Option<Vec<String>>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub unit: Option<String>,
}

/// A system variable surfaced as a hub entity; not attached to any Device.
#[derive(Debug)]
pub struct SystemVariable {
    pub name: String,
    pub kind: SysvarKind,
    pub value: serde_json::Value,
    pub value_list: Option<Vec<String>>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub unit: Option<String>,
    pub extended_sysvar: bool,
    pub unique_identifier: String,
}

impl SystemVariable {
    pub fn new(central_name: &str, data: &SystemVariableData) -> Self {
        let kind = SysvarKind::derive(
            data.data_type.unwrap_or(SysvarType::String),
            data.extended_sysvar,
        );
        Self {
            name: data.name.clone(),
            kind,
            value: data.value.clone(),
            value_list: data.value_list.clone(),
            min: data.min,
            max: data.max,
            unit: data.unit.clone(),
            extended_sysvar: data.extended_sysvar,
            unique_identifier: unique_identifier(central_name, "hub", &data.name),
        }
    }

    /// `update_value` (spec §4.8): existing entities update in place rather
    /// than being rebuilt, so subscribers keep a stable `unique_identifier`.
    pub fn update_value(&mut self, value: serde_json::Value) {
        self.value = value;
    }
}

/// Prefix-based sysvar exclusions applied before diffing against the local
/// inventory (`_clean_variables` / `EXCLUDED` in the original source).
const EXCLUDED_PREFIXES: &[&str] = &["OldVal", "pcCCUID"];

pub fn is_excluded(name: &str) -> bool {
    EXCLUDED_PREFIXES.iter().any(|marker| name.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alarm_and_logic_are_always_binary() {
        assert_eq!(SysvarKind::derive(SysvarType::Alarm, false), SysvarKind::Binary);
        assert_eq!(SysvarKind::derive(SysvarType::Logic, true), SysvarKind::Binary);
    }

    #[test]
    fn list_requires_extended_for_select() {
        assert_eq!(SysvarKind::derive(SysvarType::List, true), SysvarKind::Select);
        assert_eq!(SysvarKind::derive(SysvarType::List, false), SysvarKind::Text);
    }

    #[test]
    fn number_requires_extended_for_number_kind() {
        assert_eq!(SysvarKind::derive(SysvarType::Number, true), SysvarKind::Number);
        assert_eq!(SysvarKind::derive(SysvarType::Number, false), SysvarKind::Text);
    }

    #[test]
    fn excludes_old_value_and_ccu_id_variables() {
        assert!(is_excluded("svOldValueSomething"));
        assert!(is_excluded("pcCCUID"));
        assert!(!is_excluded("MyVariable"));
    }
}
