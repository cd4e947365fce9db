//! Typed parameter values (spec §9, "Dynamic typing of parameter values").
//!
//! Replaces the backend's dynamically-typed XML-RPC values with a tagged
//! sum once the `ParameterType` and optional `VALUE_LIST` for a parameter
//! are known.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The declared type of a parameter, from `ParameterData.TYPE`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ParameterType {
    Action,
    Bool,
    Enum,
    Float,
    Integer,
    String,
}

/// A coerced parameter value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i32),
    Float(f64),
    Str(String),
    /// An enum value, keeping both its ordinal and its label so callers can
    /// display either.
    Enum { ordinal: i32, label: String },
}

impl Value {
    /// `true` if this is a no-value placeholder for an `ACTION` parameter.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

/// `convert_value`: a total function from `(raw, ParameterType, value_list)`
/// to `Value` or a [`Error::ClientError`].
///
/// `raw` is the loosely-typed JSON representation the backend sent us
/// (XML-RPC values and JSON-RPC values are both normalised to
/// `serde_json::Value` by the transports before reaching this function).
pub fn convert_value(
    raw: &serde_json::Value,
    parameter_type: ParameterType,
    value_list: Option<&[String]>,
) -> Result<Value> {
    match parameter_type {
        ParameterType::Action => Ok(Value::Bool(raw.as_bool().unwrap_or(true))),
        ParameterType::Bool => raw
            .as_bool()
            .map(Value::Bool)
            .or_else(|| raw.as_i64().map(|i| Value::Bool(i != 0)))
            .ok_or_else(|| Error::ClientError(format!("expected BOOL value, got {raw}"))),
        ParameterType::Integer => raw
            .as_i64()
            .map(|i| Value::Int(i as i32))
            .ok_or_else(|| Error::ClientError(format!("expected INTEGER value, got {raw}"))),
        ParameterType::Float => raw
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| Error::ClientError(format!("expected FLOAT value, got {raw}"))),
        ParameterType::String => raw
            .as_str()
            .map(|s| Value::Str(s.to_owned()))
            .ok_or_else(|| Error::ClientError(format!("expected STRING value, got {raw}"))),
        ParameterType::Enum => convert_enum(raw, value_list),
    }
}

fn convert_enum(raw: &serde_json::Value, value_list: Option<&[String]>) -> Result<Value> {
    let value_list = value_list
        .ok_or_else(|| Error::ClientError("ENUM parameter has no VALUE_LIST".to_owned()))?;

    if let Some(ordinal) = raw.as_i64() {
        let ordinal = ordinal as usize;
        let label = value_list
            .get(ordinal)
            .ok_or_else(|| Error::ClientError(format!("enum ordinal {ordinal} out of range")))?;
        return Ok(Value::Enum { ordinal: ordinal as i32, label: label.clone() });
    }

    if let Some(label) = raw.as_str() {
        let ordinal = value_list
            .iter()
            .position(|candidate| candidate == label)
            .ok_or_else(|| Error::ClientError(format!("'{label}' is not in VALUE_LIST")))?;
        return Ok(Value::Enum { ordinal: ordinal as i32, label: label.to_owned() });
    }

    Err(Error::ClientError(format!("expected ENUM value, got {raw}")))
}

/// Validates a FLOAT write against `[min, max]`, allowing a listed
/// `SPECIAL` value through unconditionally (spec §8, boundary behaviour).
pub fn validate_float_bounds(
    value: f64,
    min: f64,
    max: f64,
    specials: &[(String, f64)],
) -> Result<()> {
    if (min..=max).contains(&value) {
        return Ok(());
    }
    if specials.iter().any(|(_, v)| *v == value) {
        return Ok(());
    }
    Err(Error::ClientError(format!("value {value} outside [{min}, {max}] and not a SPECIAL")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vlist() -> Vec<String> {
        vec!["CLOSED".to_owned(), "OPEN".to_owned()]
    }

    #[test]
    fn enum_accepts_ordinal_or_label() {
        let by_ordinal =
            convert_enum(&serde_json::json!(1), Some(&vlist())).unwrap();
        assert_eq!(by_ordinal, Value::Enum { ordinal: 1, label: "OPEN".to_owned() });

        let by_label = convert_enum(&serde_json::json!("CLOSED"), Some(&vlist())).unwrap();
        assert_eq!(by_label, Value::Enum { ordinal: 0, label: "CLOSED".to_owned() });
    }

    #[test]
    fn enum_rejects_unknown_label() {
        assert!(convert_enum(&serde_json::json!("HALF_OPEN"), Some(&vlist())).is_err());
    }

    #[test]
    fn float_bounds_allow_listed_special() {
        let specials = vec![("NOT_SET".to_owned(), -1.0)];
        assert!(validate_float_bounds(-1.0, 0.0, 100.0, &specials).is_ok());
        assert!(validate_float_bounds(-2.0, 0.0, 100.0, &specials).is_err());
        assert!(validate_float_bounds(50.0, 0.0, 100.0, &specials).is_ok());
    }
}
