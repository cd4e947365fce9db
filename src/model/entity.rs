//! `Entity` and its variants (spec §3, "Entity").
//!
//! Subscriptions are *not* stored on the entity itself — per spec §9's
//! "model as arena+indices" note, the subscriber list for a
//! `(channel_address, paramset_key, parameter)` lives in
//! `central::dispatch::SubscriptionMap`, keyed the same way `Central` keys
//! its device map. An `Entity` only holds its own state and the keys
//! needed to look itself up again.

use sha2::{Digest, Sha256};
use std::time::SystemTime;

use crate::address::Address;
use crate::model::parameter::{ParameterData, ParamsetKey};
use crate::value::{ParameterType, Value};

/// The concrete shape of a [`GenericEntity`], chosen from `ParameterData`
/// at construction time (spec §4.7 step 2).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntityKind {
    Binary,
    Float,
    Integer,
    /// A select backed by an ENUM VALUE_LIST with more than two entries.
    Select,
    Text,
    /// Write-only (ACTION, or a 2-value ENUM treated as binary-select).
    Action,
}

impl EntityKind {
    pub fn from_parameter_data(pd: &ParameterData) -> EntityKind {
        if pd.is_binary_select() {
            return EntityKind::Binary;
        }
        match pd.parameter_type {
            ParameterType::Action => EntityKind::Action,
            ParameterType::Bool => EntityKind::Binary,
            ParameterType::Enum => EntityKind::Select,
            ParameterType::Float => EntityKind::Float,
            ParameterType::Integer => EntityKind::Integer,
            ParameterType::String => EntityKind::Text,
        }
    }
}

/// `unique_identifier = sha256(central_name ⟂ address ⟂ parameter)`,
/// truncated to 16 hex characters (spec §3 "Entity").
pub fn unique_identifier(central_name: &str, address: &str, parameter: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(central_name.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(address.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(parameter.as_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest, 16)
}

/// `address_path = platform/interface_id/unique_identifier/`.
pub fn address_path(platform: &str, interface_id: &str, unique_id: &str) -> String {
    format!("{platform}/{interface_id}/{unique_id}/")
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for byte in bytes {
        if out.len() >= chars {
            break;
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out.truncate(chars);
    out
}

/// One exposed parameter (spec §3 "GenericEntity").
#[derive(Debug)]
pub struct GenericEntity {
    pub channel_address: Address,
    pub paramset_key: ParamsetKey,
    pub parameter: String,
    pub kind: EntityKind,
    pub parameter_data: ParameterData,
    pub value: Option<Value>,
    pub last_update: Option<SystemTime>,
    pub state_uncertain: bool,
    pub unique_identifier: String,
    /// Hidden-but-present parameters (spec §4.5) are built but not shown by
    /// default unless un-ignored.
    pub default_visible: bool,
}

impl GenericEntity {
    pub fn new(
        central_name: &str,
        channel_address: Address,
        paramset_key: ParamsetKey,
        parameter: String,
        parameter_data: ParameterData,
        default_visible: bool,
    ) -> Self {
        let kind = EntityKind::from_parameter_data(&parameter_data);
        let unique_identifier =
            unique_identifier(central_name, channel_address.as_str(), &parameter);
        Self {
            channel_address,
            paramset_key,
            parameter,
            kind,
            parameter_data,
            value: None,
            last_update: None,
            state_uncertain: false,
            unique_identifier,
            default_visible,
        }
    }

    /// Applies an incoming backend event. The library never optimistically
    /// updates on write (spec §4.7); this is only called from the event
    /// dispatch path.
    pub fn apply_event(&mut self, value: Value) {
        self.value = Some(value);
        self.last_update = Some(SystemTime::now());
        self.state_uncertain = false;
    }

    pub fn mark_uncertain(&mut self) {
        self.state_uncertain = true;
    }
}

/// A composite view assembled from one or more channels of a device (spec
/// §3 "CustomEntity", §4.7 step 4).
#[derive(Debug)]
pub struct CustomEntity {
    pub device_address: Address,
    pub model: String,
    pub recipe_name: String,
    /// logical field name -> backing `GenericEntity` key
    /// `(channel_address, paramset_key, parameter)`.
    pub fields: std::collections::HashMap<String, (Address, ParamsetKey, String)>,
    pub unique_identifier: String,
}

/// The kind of value-less backend event promoted from a parameter (spec
/// §4.7 step 3).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventKind {
    Click,
    Impulse,
    DeviceError,
}

/// Classifies a parameter name for event promotion (spec §4.7 step 3):
/// `PRESS_*` → `Click`, `SEQUENCE_OK` → `Impulse`, `ERROR_*` → `DeviceError`.
/// Everything else stays a `GenericEntity`.
pub fn classify_event_parameter(parameter: &str) -> Option<EventKind> {
    if parameter.starts_with("PRESS") {
        Some(EventKind::Click)
    } else if parameter == "SEQUENCE_OK" {
        Some(EventKind::Impulse)
    } else if parameter.starts_with("ERROR") {
        Some(EventKind::DeviceError)
    } else {
        None
    }
}

/// Entity-like but value-less; forwards each backend event to the
/// `homematic.*` event bus instead of a per-entity subscriber (spec §4.7
/// step 3).
#[derive(Debug)]
pub struct EventEntity {
    pub channel_address: Address,
    pub parameter: String,
    pub kind: EventKind,
    pub parameter_data: ParameterData,
    pub last_update: Option<SystemTime>,
    pub unique_identifier: String,
}

impl EventEntity {
    pub fn new(
        central_name: &str,
        channel_address: Address,
        parameter: String,
        kind: EventKind,
        parameter_data: ParameterData,
    ) -> Self {
        let unique_identifier =
            unique_identifier(central_name, channel_address.as_str(), &parameter);
        Self { channel_address, parameter, kind, parameter_data, last_update: None, unique_identifier }
    }

    pub fn fire(&mut self) {
        self.last_update = Some(SystemTime::now());
    }
}

/// The polymorphic entity capability set (spec §3 "Entity").
#[derive(Debug)]
pub enum Entity {
    Generic(GenericEntity),
    Custom(CustomEntity),
    Event(EventEntity),
}

impl Entity {
    pub fn unique_identifier(&self) -> &str {
        match self {
            Entity::Generic(e) => &e.unique_identifier,
            Entity::Custom(e) => &e.unique_identifier,
            Entity::Event(e) => &e.unique_identifier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_identifier_is_16_hex_chars() {
        let id = unique_identifier("ccu", "VCU2128127:4", "STATE");
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn unique_identifier_is_stable_for_same_inputs() {
        let a = unique_identifier("ccu", "VCU2128127:4", "STATE");
        let b = unique_identifier("ccu", "VCU2128127:4", "STATE");
        assert_eq!(a, b);
    }

    #[test]
    fn unique_identifier_differs_on_parameter() {
        let a = unique_identifier("ccu", "VCU2128127:4", "STATE");
        let b = unique_identifier("ccu", "VCU2128127:4", "ON_TIME");
        assert_ne!(a, b);
    }

    #[test]
    fn address_path_has_expected_shape() {
        assert_eq!(address_path("switch", "hmip", "abcd1234"), "switch/hmip/abcd1234/");
    }

    #[test]
    fn classifies_press_parameters_as_click() {
        assert_eq!(classify_event_parameter("PRESS_SHORT"), Some(EventKind::Click));
        assert_eq!(classify_event_parameter("PRESS_LONG"), Some(EventKind::Click));
    }

    #[test]
    fn classifies_sequence_ok_as_impulse() {
        assert_eq!(classify_event_parameter("SEQUENCE_OK"), Some(EventKind::Impulse));
    }

    #[test]
    fn classifies_error_prefixed_parameters_as_device_error() {
        assert_eq!(classify_event_parameter("ERROR_JAMMED"), Some(EventKind::DeviceError));
    }

    #[test]
    fn leaves_unrelated_parameters_unclassified() {
        assert_eq!(classify_event_parameter("STATE"), None);
        assert_eq!(classify_event_parameter("LEVEL"), None);
    }
}
