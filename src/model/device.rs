//! `DeviceDescription` and `Device` (spec §3, "Device").

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::model::entity::Entity;
use crate::model::parameter::ParamsetKey;

/// Immutable record from the backend describing a device or channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceDescription {
    #[serde(rename = "ADDRESS")]
    pub address: Address,
    #[serde(rename = "TYPE")]
    pub device_type: String,
    /// Empty for devices, device-address for channels.
    #[serde(rename = "PARENT")]
    pub parent: String,
    /// List of channel addresses; empty for channels.
    #[serde(rename = "CHILDREN")]
    pub children: Vec<Address>,
    #[serde(rename = "PARAMSETS")]
    pub paramsets: Vec<ParamsetKey>,
    #[serde(rename = "FIRMWARE")]
    pub firmware: Option<String>,
    #[serde(rename = "AVAILABLE_FIRMWARE")]
    pub available_firmware: Option<String>,
    #[serde(rename = "UPDATABLE")]
    pub updatable: Option<bool>,
    #[serde(rename = "VERSION")]
    pub version: Option<i32>,
    // Supplemental fields observed in the original source's device.py,
    // kept optional so backends that omit them still deserialize.
    #[serde(rename = "RX_MODE", default)]
    pub rx_mode: Option<String>,
    #[serde(rename = "ROAMING", default)]
    pub roaming: Option<bool>,
    #[serde(rename = "INTERFACE", default)]
    pub interface: Option<String>,
}

impl DeviceDescription {
    /// `true` if this description is for a channel (has a non-empty
    /// `PARENT`), as opposed to a device (channel 0).
    pub fn is_channel(&self) -> bool {
        !self.parent.is_empty()
    }
}

/// Firmware state derived from `FIRMWARE`/`AVAILABLE_FIRMWARE`/`UPDATABLE`
/// (spec §3.1 supplement), following `_refresh_firmware_data` in the
/// original source.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum FirmwareState {
    UpToDate,
    UpdateAvailable,
    UpdateInProgress,
    Unknown,
}

impl FirmwareState {
    pub fn derive(firmware: Option<&str>, available_firmware: Option<&str>, updatable: bool) -> Self {
        match (firmware, available_firmware) {
            (Some(cur), Some(avail)) if cur == avail => FirmwareState::UpToDate,
            (Some(_), Some(_)) if updatable => FirmwareState::UpdateAvailable,
            (Some(_), Some(_)) => FirmwareState::UpdateInProgress,
            _ => FirmwareState::Unknown,
        }
    }
}

/// A constructed device: channel 0 plus every child channel, owning the
/// entities and events built for it.
///
/// Holds only the keys (`interface_id`, device address) it needs to refer
/// back into `Central`'s maps, never an owning pointer — see spec §9 "Model
/// as arena+indices".
#[derive(Debug)]
pub struct Device {
    pub interface_id: String,
    pub address: Address,
    pub model: String,
    pub channel_addresses: HashSet<Address>,
    pub firmware_state: FirmwareState,
    /// Driven by `UN_REACH` plus a forced-availability override (spec §3
    /// invariant "central.available").
    available: bool,
    force_unavailable: bool,
    /// Entities keyed by (channel_address, paramset_key, parameter).
    pub entities: HashMap<(Address, ParamsetKey, String), Entity>,
}

impl Device {
    pub fn new(interface_id: impl Into<String>, description: &DeviceDescription) -> Self {
        let mut channel_addresses = HashSet::new();
        channel_addresses.insert(description.address.clone());
        channel_addresses.extend(description.children.iter().cloned());

        Self {
            interface_id: interface_id.into(),
            address: description.address.clone(),
            model: description.device_type.clone(),
            channel_addresses,
            firmware_state: FirmwareState::derive(
                description.firmware.as_deref(),
                description.available_firmware.as_deref(),
                description.updatable.unwrap_or(false),
            ),
            available: true,
            force_unavailable: false,
            entities: HashMap::new(),
        }
    }

    /// `central.available ⇔ every client reports available ∧ connected ∧
    /// callback-alive` is enforced one level up in `Central`; a device's own
    /// availability additionally folds in `UN_REACH` and the checker's
    /// forced-unavailable override.
    pub fn available(&self) -> bool {
        self.available && !self.force_unavailable
    }

    pub fn set_un_reach(&mut self, un_reach: bool) {
        self.available = !un_reach;
    }

    /// Set by the connection checker after three consecutive liveness
    /// failures on this device's interface (spec §4.6).
    pub fn set_force_unavailable(&mut self, force_unavailable: bool) {
        self.force_unavailable = force_unavailable;
    }

    pub fn insert_entity(&mut self, channel: Address, paramset_key: ParamsetKey, parameter: String, entity: Entity) {
        self.entities.insert((channel, paramset_key, parameter), entity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc() -> DeviceDescription {
        DeviceDescription {
            address: Address::new("VCU2128127"),
            device_type: "HmIP-BSM".into(),
            parent: String::new(),
            children: vec![Address::new("VCU2128127:4")],
            paramsets: vec![ParamsetKey::Master],
            firmware: Some("1.0".into()),
            available_firmware: Some("1.2".into()),
            updatable: Some(true),
            version: Some(10),
            rx_mode: None,
            roaming: None,
            interface: None,
        }
    }

    #[test]
    fn device_is_available_by_default() {
        let device = Device::new("hmip", &desc());
        assert!(device.available());
    }

    #[test]
    fn un_reach_and_force_unavailable_both_gate_availability() {
        let mut device = Device::new("hmip", &desc());
        device.set_un_reach(true);
        assert!(!device.available());

        device.set_un_reach(false);
        assert!(device.available());

        device.set_force_unavailable(true);
        assert!(!device.available());
    }

    #[test]
    fn firmware_state_reflects_updatable_flag() {
        assert_eq!(FirmwareState::derive(Some("1.0"), Some("1.0"), false), FirmwareState::UpToDate);
        assert_eq!(
            FirmwareState::derive(Some("1.0"), Some("1.2"), true),
            FirmwareState::UpdateAvailable
        );
        assert_eq!(
            FirmwareState::derive(Some("1.0"), Some("1.2"), false),
            FirmwareState::UpdateInProgress
        );
    }
}
