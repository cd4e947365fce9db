//! `ParameterData` and the paramset key enum (spec §3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::value::ParameterType;

/// `VALUES` (dynamic), `MASTER` (config), `LINK` (peerings).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ParamsetKey {
    Values,
    Master,
    Link,
}

impl ParamsetKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamsetKey::Values => "VALUES",
            ParamsetKey::Master => "MASTER",
            ParamsetKey::Link => "LINK",
        }
    }
}

bitflags::bitflags! {
    /// `OPERATIONS` bitmask: `READ=1, WRITE=2, EVENT=4`.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct ParameterOperations: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EVENT = 0b100;
    }

    /// `FLAGS` bitmask: `VISIBLE=1, INTERNAL=2, SERVICE=8`.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct ParameterFlags: u8 {
        const VISIBLE = 0b0001;
        const INTERNAL = 0b0010;
        const SERVICE = 0b1000;
    }
}

/// Per `(channel, paramset-key, parameter)` metadata the backend describes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterData {
    pub parameter_type: ParameterType,
    #[serde(with = "operations_as_bits")]
    pub operations: ParameterOperations,
    #[serde(with = "flags_as_bits")]
    pub flags: ParameterFlags,
    pub min: Option<serde_json::Value>,
    pub max: Option<serde_json::Value>,
    pub default: Option<serde_json::Value>,
    pub unit: Option<String>,
    /// Ordered tuple of string labels for ENUM/BOOL.
    pub value_list: Option<Vec<String>>,
    /// Named out-of-range admissible values.
    pub special: Option<HashMap<String, f64>>,
}

impl ParameterData {
    pub fn is_readable(&self) -> bool {
        self.operations.contains(ParameterOperations::READ)
    }

    pub fn is_writable(&self) -> bool {
        self.operations.contains(ParameterOperations::WRITE)
    }

    pub fn emits_events(&self) -> bool {
        self.operations.contains(ParameterOperations::EVENT)
    }

    pub fn is_visible(&self) -> bool {
        self.flags.contains(ParameterFlags::VISIBLE)
    }

    pub fn is_internal(&self) -> bool {
        self.flags.contains(ParameterFlags::INTERNAL)
    }

    /// `true` for the "2-value ENUM treated as binary-select" rule in spec
    /// §4.7 step 2 — `ENUM` with e.g. `("CLOSED", "OPEN")`.
    pub fn is_binary_select(&self) -> bool {
        matches!(self.parameter_type, crate::value::ParameterType::Enum)
            && self.value_list.as_ref().is_some_and(|list| list.len() == 2)
    }

    /// `true` for "ACTION with BOOL VALUE_LIST is a button".
    pub fn is_button(&self) -> bool {
        matches!(self.parameter_type, crate::value::ParameterType::Action) && self.value_list.is_none()
    }

    /// SPECIAL table as `(name, value)` pairs, for `convert_value`-adjacent
    /// bounds checks.
    pub fn specials(&self) -> Vec<(String, f64)> {
        self.special
            .as_ref()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default()
    }
}

mod operations_as_bits {
    use super::ParameterOperations;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &ParameterOperations, s: S) -> Result<S::Ok, S::Error> {
        value.bits().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<ParameterOperations, D::Error> {
        Ok(ParameterOperations::from_bits_truncate(u8::deserialize(d)?))
    }
}

mod flags_as_bits {
    use super::ParameterFlags;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &ParameterFlags, s: S) -> Result<S::Ok, S::Error> {
        value.bits().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<ParameterFlags, D::Error> {
        Ok(ParameterFlags::from_bits_truncate(u8::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_bitmask_roundtrips() {
        let ops = ParameterOperations::READ | ParameterOperations::EVENT;
        assert!(ops.contains(ParameterOperations::READ));
        assert!(!ops.contains(ParameterOperations::WRITE));
    }

    #[test]
    fn detects_binary_select_enum() {
        let pd = ParameterData {
            parameter_type: ParameterType::Enum,
            operations: ParameterOperations::READ,
            flags: ParameterFlags::VISIBLE,
            min: None,
            max: None,
            default: None,
            unit: None,
            value_list: Some(vec!["CLOSED".into(), "OPEN".into()]),
            special: None,
        };
        assert!(pd.is_binary_select());
    }
}
