//! Device and channel address parsing (spec §3, "Address").
//!
//! A device address is an opaque controller-assigned string such as
//! `VCU1234567`. A channel address is `<device_address>:<channel_no>`.
//! Addresses are completely opaque beyond this one piece of structure, the
//! same way `ruma_common`'s identifier newtypes are opaque beyond their own
//! grammar — we keep the borrowed/owned split (`&str`-backed, cheaply
//! clonable `String`-backed) that pattern uses, without pulling in a
//! dedicated derive-macro crate for it.

use std::fmt;

use crate::error::{Error, Result};

/// A device or channel address, e.g. `VCU1234567` or `VCU1234567:4`.
///
/// Cloning an `Address` clones the underlying `String`; callers that pass
/// addresses around hot paths should prefer `&str` (`address.as_str()`).
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Wraps a raw address string without validation. Used when the value
    /// is already known to come from the backend.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Parses a channel address, requiring a `<device>:<n>` shape.
    pub fn parse_channel(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let (device, channel_no) = raw.split_once(':').ok_or_else(|| {
            Error::ConfigError(format!("'{raw}' is not a channel address (missing ':')"))
        })?;
        if device.is_empty() {
            return Err(Error::ConfigError(format!("'{raw}' has an empty device part")));
        }
        channel_no
            .parse::<u32>()
            .map_err(|_| Error::ConfigError(format!("'{raw}' has a non-numeric channel number")))?;
        Ok(Self(raw))
    }

    /// The full address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` if this address names a channel (contains `:`).
    pub fn is_channel(&self) -> bool {
        self.0.contains(':')
    }

    /// `get_device_address(x)`: truncates at the first `:`.
    ///
    /// For a device address (no `:`) this returns a clone of `self`.
    pub fn device_address(&self) -> Address {
        match self.0.split_once(':') {
            Some((device, _)) => Address(device.to_owned()),
            None => self.clone(),
        }
    }

    /// The channel number, or `None` for a device (channel-0-implicit)
    /// address.
    pub fn channel_no(&self) -> Option<u32> {
        self.0.split_once(':').and_then(|(_, n)| n.parse().ok())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(raw: &str) -> Self {
        Address(raw.to_owned())
    }
}

impl From<String> for Address {
    fn from(raw: String) -> Self {
        Address(raw)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Builds a channel address from a device address and channel number.
pub fn channel_address(device_address: &str, channel_no: u32) -> Address {
    Address(format!("{device_address}:{channel_no}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_address_truncates_at_colon() {
        let ch = Address::parse_channel("VCU2128127:4").unwrap();
        assert_eq!(ch.device_address().as_str(), "VCU2128127");
        assert_eq!(ch.channel_no(), Some(4));
    }

    #[test]
    fn device_address_of_a_device_is_itself() {
        let dev = Address::new("VCU2128127");
        assert_eq!(dev.device_address(), dev);
        assert_eq!(dev.channel_no(), None);
    }

    #[test]
    fn round_trips_through_channel_address() {
        for raw in ["VCU2128127:0", "VCU2128127:15", "VCU0000001:7"] {
            let addr = Address::parse_channel(raw).unwrap();
            let rebuilt =
                channel_address(addr.device_address().as_str(), addr.channel_no().unwrap());
            assert_eq!(rebuilt.as_str(), raw);
        }
    }

    #[test]
    fn rejects_malformed_channel_address() {
        assert!(Address::parse_channel("no-colon-here").is_err());
        assert!(Address::parse_channel(":4").is_err());
        assert!(Address::parse_channel("VCU123:not-a-number").is_err());
    }
}
