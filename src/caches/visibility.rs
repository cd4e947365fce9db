//! Parameter visibility policy (spec §4.5), grounded on
//! `original_source/hahomematic/parameter_visibility.py`.

use std::collections::{HashMap, HashSet};

use crate::model::parameter::ParamsetKey;

/// Parameters always built as entities but hidden from the default view
/// unless un-ignored (spec §4.5, §9 "hidden-but-present").
const HIDDEN_PARAMETERS: &[&str] = &[
    "CONFIG_PENDING",
    "ERROR",
    "STICKY_UN_REACH",
    "UN_REACH",
    "UPDATE_PENDING",
    "CHANNEL_OPERATION_MODE",
    "TEMPERATURE_MAXIMUM",
    "TEMPERATURE_MINIMUM",
    "ACTIVITY_STATE",
    "DIRECTION",
];

/// VALUES parameters never built as entities, full list in the original
/// source; kept to a representative subset plus the ones spec §4.5
/// explicitly names.
const IGNORED_PARAMETERS: &[&str] = &[
    "AES_KEY",
    "BOOST_TIME",
    "BOOT",
    "BURST_LIMIT_WARNING",
    "COMBINED_PARAMETER",
    "DATE_TIME_UNKNOWN",
    "DECISION_VALUE",
    "DEVICE_IN_BOOTLOADER",
    "EXTERNAL_CLOCK",
    "INHIBIT",
    "INSTALL_MODE",
    "LEVEL_COMBINED",
    "LEVEL_REAL",
    "OLD_LEVEL",
    "PROCESS",
    "SECTION",
    "STATE_UNCERTAIN",
    "TEMPERATURE_OUT_OF_RANGE",
    "TIME_OF_OPERATION",
    "WOCHENPROGRAMM",
];

const IGNORED_SUFFIXES: &[&str] = &["OVERFLOW", "OVERRUN", "REPORTING", "RESULT", "STATUS", "SUBMIT"];

const IGNORED_PREFIXES: &[&str] = &[
    "ADJUSTING",
    "ERR_TTM",
    "IDENTIFICATION_MODE_KEY_VISUAL",
    "IDENTIFY_",
    "PARTY_START",
    "PARTY_STOP",
    "STATUS_FLAG",
    "WEEK_PROGRAM",
    "WORKING",
];

/// `parameter -> device-type prefixes for which it's ignored` (spec §4.5
/// step 4, `_IGNORE_PARAMETERS_BY_DEVICE`).
fn ignore_by_device() -> HashMap<&'static str, &'static [&'static str]> {
    HashMap::from([
        ("CURRENT_ILLUMINATION", &["HmIP-SMI", "HmIP-SMO", "HmIP-SPI"][..]),
        ("LOW_BAT", &["HmIP-BWTH", "HmIP-PCBS"][..]),
        (
            "OPERATING_VOLTAGE",
            &[
                "ELV-SH-BS2",
                "HmIP-BS2",
                "HmIP-BDT",
                "HmIP-BSL",
                "HmIP-BSM",
                "HmIP-BWTH",
                "HmIP-DR",
                "HmIP-FDT",
                "HmIP-FSM",
                "HmIP-PCBS",
                "HmIP-PDT",
                "HmIP-PS",
            ][..],
        ),
    ])
}

/// `parameter -> channel_no it's only accepted on` (spec §4.5 step 5).
fn accept_only_on_channel() -> HashMap<&'static str, u32> {
    HashMap::from([("LOWBAT", 0)])
}

/// Device-type prefix -> channel numbers where MASTER is relevant (spec
/// §4.5 step 6, `_RELEVANT_MASTER_PARAMSETS_BY_DEVICE`).
fn relevant_master_channels() -> HashMap<&'static str, &'static [u32]> {
    HashMap::from([
        ("HmIP-eTRV", &[1u32][..]),
        ("HmIP-HEATING", &[1u32][..]),
        ("HmIP-BWTH", &[1u32][..]),
        ("HmIP-WTH", &[1u32][..]),
        ("HM-CC-RT-DN", &[1u32][..]),
    ])
}

/// A custom un-ignore entry parsed from the un-ignore file's most specific
/// syntax: `parameter@device_type:channel_no:paramset_key`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct DeviceScopedKey {
    device_type_lower: String,
    channel_no: u32,
    paramset_key: ParamsetKey,
}

/// Ordered policy rules deciding whether to instantiate an entity for
/// (model, channel_no, paramset_key, parameter) (spec §4.5).
#[derive(Debug, Default)]
pub struct ParameterVisibilityCache {
    /// general un-ignore, implicitly-VALUES or explicit paramset_key
    /// (un-ignore syntax 2 and 3).
    un_ignore_general: HashMap<ParamsetKey, HashSet<String>>,
    /// device-scoped un-ignore (un-ignore syntax 1).
    un_ignore_by_device: HashMap<DeviceScopedKey, HashSet<String>>,
    /// extra MASTER-relevant channels contributed by the un-ignore file.
    extra_relevant_master_channels: HashMap<String, HashSet<u32>>,
}

impl ParameterVisibilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the un-ignore file contents line by line (spec §4.5).
    pub fn load_un_ignore_lines(&mut self, contents: &str) {
        for line in contents.lines() {
            self.add_un_ignore_line(line);
        }
    }

    fn add_un_ignore_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        if let Some((parameter, rest)) = line.split_once('@') {
            let parts: Vec<&str> = rest.split(':').collect();
            if parts.len() != 3 {
                return;
            }
            let device_type_lower = parts[0].to_lowercase();
            let Ok(channel_no) = parts[1].parse::<u32>() else { return };
            let paramset_key = match parts[2] {
                "VALUES" => ParamsetKey::Values,
                "MASTER" => ParamsetKey::Master,
                "LINK" => ParamsetKey::Link,
                _ => return,
            };
            let key = DeviceScopedKey { device_type_lower: device_type_lower.clone(), channel_no, paramset_key };
            self.un_ignore_by_device.entry(key).or_default().insert(parameter.to_owned());
            if paramset_key == ParamsetKey::Master {
                self.extra_relevant_master_channels.entry(device_type_lower).or_default().insert(channel_no);
            }
            return;
        }

        if let Some((paramset_key, parameter)) = line.split_once(':') {
            let paramset_key = match paramset_key {
                "VALUES" => ParamsetKey::Values,
                "MASTER" => ParamsetKey::Master,
                _ => return,
            };
            self.un_ignore_general.entry(paramset_key).or_default().insert(parameter.to_owned());
            return;
        }

        self.un_ignore_general.entry(ParamsetKey::Values).or_default().insert(line.to_owned());
    }

    fn is_un_ignored(
        &self,
        device_type: &str,
        channel_no: u32,
        paramset_key: ParamsetKey,
        parameter: &str,
    ) -> bool {
        if self.un_ignore_general.get(&paramset_key).is_some_and(|set| set.contains(parameter)) {
            return true;
        }
        let key = DeviceScopedKey {
            device_type_lower: device_type.to_lowercase(),
            channel_no,
            paramset_key,
        };
        self.un_ignore_by_device.get(&key).is_some_and(|set| set.contains(parameter))
    }

    /// `true` if the parameter should be skipped entirely (spec §4.5 steps
    /// 1-6, in order).
    pub fn ignore_parameter(
        &self,
        device_type: &str,
        channel_no: u32,
        paramset_key: ParamsetKey,
        parameter: &str,
    ) -> bool {
        if self.is_un_ignored(device_type, channel_no, paramset_key, parameter) {
            return false;
        }

        if paramset_key == ParamsetKey::Values {
            if IGNORED_PARAMETERS.contains(&parameter)
                || IGNORED_SUFFIXES.iter().any(|suffix| parameter.ends_with(suffix))
                || IGNORED_PREFIXES.iter().any(|prefix| parameter.starts_with(prefix))
            {
                return true;
            }
            if let Some(prefixes) = ignore_by_device().get(parameter) {
                if prefixes.iter().any(|p| device_type.starts_with(p)) {
                    return true;
                }
            }
            if let Some(&only_channel) = accept_only_on_channel().get(parameter) {
                if only_channel != channel_no {
                    return true;
                }
            }
        }

        if paramset_key == ParamsetKey::Master && !self.is_relevant_paramset(device_type, paramset_key, channel_no) {
            return true;
        }

        false
    }

    /// `true` if `parameter` is on the fixed hidden list and not
    /// un-ignored (spec §4.5: "hidden-but-present").
    pub fn parameter_is_hidden(
        &self,
        device_type: &str,
        channel_no: u32,
        paramset_key: ParamsetKey,
        parameter: &str,
    ) -> bool {
        HIDDEN_PARAMETERS.contains(&parameter)
            && !self.is_un_ignored(device_type, channel_no, paramset_key, parameter)
    }

    /// `true` if `paramset_key` should be fetched/considered at all for
    /// this (device_type, channel_no): VALUES always is; MASTER only on
    /// the relevant-channels table or a file-contributed channel.
    /// The device-scoped MASTER channels contributed by the un-ignore file,
    /// for [`crate::export::validate_tables`]'s structural self-check.
    pub fn extra_relevant_master_channels_for_validation(&self) -> impl Iterator<Item = (&str, &HashSet<u32>)> {
        self.extra_relevant_master_channels.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_relevant_paramset(&self, device_type: &str, paramset_key: ParamsetKey, channel_no: u32) -> bool {
        if paramset_key == ParamsetKey::Values {
            return true;
        }
        if paramset_key != ParamsetKey::Master {
            return false;
        }
        let builtin = relevant_master_channels()
            .iter()
            .any(|(prefix, channels)| device_type.starts_with(prefix) && channels.contains(&channel_no));
        if builtin {
            return true;
        }
        self.extra_relevant_master_channels
            .get(&device_type.to_lowercase())
            .is_some_and(|channels| channels.contains(&channel_no))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_universal_values_parameter() {
        let cache = ParameterVisibilityCache::new();
        assert!(cache.ignore_parameter("HmIP-BSM", 1, ParamsetKey::Values, "AES_KEY"));
    }

    #[test]
    fn ignores_by_wildcard_suffix_and_prefix() {
        let cache = ParameterVisibilityCache::new();
        assert!(cache.ignore_parameter("HmIP-BSM", 1, ParamsetKey::Values, "SENSOR_RESULT"));
        assert!(cache.ignore_parameter("HmIP-BSM", 1, ParamsetKey::Values, "WORKING"));
    }

    #[test]
    fn master_is_ignored_unless_relevant() {
        let cache = ParameterVisibilityCache::new();
        assert!(cache.ignore_parameter("HmIP-Random", 1, ParamsetKey::Master, "SOME_PARAM"));
        assert!(!cache.ignore_parameter("HmIP-eTRV", 1, ParamsetKey::Master, "TEMPERATURE_MAXIMUM"));
    }

    #[test]
    fn un_ignore_line_with_device_scope_overrides_ignore() {
        let mut cache = ParameterVisibilityCache::new();
        cache.load_un_ignore_lines("ERROR_JAMMED@HmIP-DLD:1:VALUES");
        assert!(!cache.ignore_parameter("HmIP-DLD", 1, ParamsetKey::Values, "ERROR_JAMMED"));
    }

    #[test]
    fn un_ignore_line_implicit_values_syntax() {
        let mut cache = ParameterVisibilityCache::new();
        cache.load_un_ignore_lines("AES_KEY");
        assert!(!cache.ignore_parameter("HmIP-BSM", 1, ParamsetKey::Values, "AES_KEY"));
    }

    #[test]
    fn un_ignore_line_paramset_prefixed_syntax_applies_regardless_of_channel() {
        let mut cache = ParameterVisibilityCache::new();
        cache.load_un_ignore_lines("MASTER:CUSTOM_PARAM");
        assert!(!cache.ignore_parameter("HmIP-Weird", 3, ParamsetKey::Master, "CUSTOM_PARAM"));
    }

    #[test]
    fn hidden_parameters_stay_hidden_unless_un_ignored() {
        let cache = ParameterVisibilityCache::new();
        assert!(cache.parameter_is_hidden("HmIP-BSM", 0, ParamsetKey::Values, "UN_REACH"));
    }
}
