//! The XML-RPC typed `<value>` wire format (spec §4.1), grounded on
//! `original_source/hahomematic/client/xml_rpc.py`'s call/response shapes
//! and encoded with `quick_xml`'s serde enum mapping (the same
//! serialize/deserialize pair already used for every other envelope in this
//! transport), rather than a hand-rolled reader over `quick_xml`'s raw
//! event API.
//!
//! A typed value is always one of the six XML-RPC scalars/containers this
//! backend actually emits; it never carries an untyped `<value>text</value>`
//! (no nested typed tag) — every backend this proxy targets emits typed
//! values, and such a payload fails to deserialize here.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One typed `<value>` payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum XmlRpcValueInner {
    #[serde(rename = "string")]
    String(String),
    #[serde(rename = "int", alias = "i4")]
    Int(i64),
    #[serde(rename = "double")]
    Double(f64),
    #[serde(rename = "boolean")]
    Boolean(#[serde(with = "bool_as_bit")] bool),
    #[serde(rename = "array")]
    Array(ArrayBody),
    #[serde(rename = "struct")]
    Struct(StructBody),
}

mod bool_as_bit {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "1" } else { "0" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(matches!(raw.trim(), "1" | "true"))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ArrayBody {
    data: DataBody,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct DataBody {
    #[serde(rename = "value", default)]
    value: Vec<XmlRpcValueInner>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StructBody {
    #[serde(rename = "member", default)]
    member: Vec<Member>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Member {
    name: String,
    value: XmlRpcValueInner,
}

/// One `<param><value>...</value></param>`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Param {
    pub value: XmlRpcValueInner,
}

/// The `<params>` wrapper, zero or more `<param>`s.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Params {
    #[serde(rename = "param", default)]
    pub param: Vec<Param>,
}

/// `<methodCall><methodName>.../methodName><params>...</params></methodCall>`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename = "methodCall")]
pub struct MethodCallEnvelope {
    #[serde(rename = "methodName")]
    pub method_name: String,
    #[serde(default)]
    pub params: Params,
}

/// `<methodResponse>`, either a `<params>` success or a `<fault>`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename = "methodResponse")]
pub struct MethodResponseEnvelope {
    #[serde(default)]
    pub params: Option<Params>,
    pub fault: Option<FaultBody>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FaultBody {
    pub value: XmlRpcValueInner,
}

impl FaultBody {
    /// Pulls `faultCode`/`faultString` out of the fault's struct members.
    /// Neither is a strongly-typed field here since the fault is itself
    /// carried as a generic typed `<value><struct>`.
    pub fn code_and_string(&self) -> (i32, String) {
        let XmlRpcValueInner::Struct(body) = &self.value else {
            return (0, "malformed fault (not a struct)".to_owned());
        };
        let mut code = 0;
        let mut message = String::new();
        for member in &body.member {
            match (member.name.as_str(), &member.value) {
                ("faultCode", XmlRpcValueInner::Int(v)) => code = *v as i32,
                ("faultString", XmlRpcValueInner::String(v)) => message = v.clone(),
                _ => {}
            }
        }
        (code, message)
    }
}

/// Builds the `<params>` wrapper for an outgoing call or response from a
/// list of loosely-typed JSON values (spec §4.1 "Argument cleanup" already
/// ran upstream of this).
pub fn params_from_json(values: Vec<serde_json::Value>) -> Params {
    Params { param: values.into_iter().map(|v| Param { value: (&v).into() }).collect() }
}

/// The inverse: every `<param>`'s value back to loosely-typed JSON.
pub fn params_to_json(params: Params) -> Vec<serde_json::Value> {
    params.param.into_iter().map(|p| p.value.into()).collect()
}

/// A single `<value>` to JSON, used for the one-argument shapes (a
/// callback's event value, a method response's sole return value).
pub fn value_to_json(value: XmlRpcValueInner) -> serde_json::Value {
    value.into()
}

pub fn json_to_value(value: &serde_json::Value) -> XmlRpcValueInner {
    value.into()
}

impl From<&serde_json::Value> for XmlRpcValueInner {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => XmlRpcValueInner::String(String::new()),
            serde_json::Value::Bool(b) => XmlRpcValueInner::Boolean(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    XmlRpcValueInner::Int(i)
                } else {
                    XmlRpcValueInner::Double(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => XmlRpcValueInner::String(s.clone()),
            serde_json::Value::Array(items) => XmlRpcValueInner::Array(ArrayBody {
                data: DataBody { value: items.iter().map(Into::into).collect() },
            }),
            serde_json::Value::Object(map) => XmlRpcValueInner::Struct(StructBody {
                member: map
                    .iter()
                    .map(|(name, v)| Member { name: name.clone(), value: v.into() })
                    .collect(),
            }),
        }
    }
}

impl From<XmlRpcValueInner> for serde_json::Value {
    fn from(value: XmlRpcValueInner) -> Self {
        match value {
            XmlRpcValueInner::String(s) => serde_json::Value::String(s),
            XmlRpcValueInner::Int(i) => serde_json::json!(i),
            XmlRpcValueInner::Double(d) => serde_json::json!(d),
            XmlRpcValueInner::Boolean(b) => serde_json::Value::Bool(b),
            XmlRpcValueInner::Array(body) => {
                serde_json::Value::Array(body.data.value.into_iter().map(Into::into).collect())
            }
            XmlRpcValueInner::Struct(body) => serde_json::Value::Object(
                body.member.into_iter().map(|m| (m.name, m.value.into())).collect(),
            ),
        }
    }
}

/// Parses a raw `<methodResponse>` body, mapping a `<fault>` to
/// [`Error::ClientError`] and a bare `<params>` to its JSON values.
pub fn parse_method_response(method: &str, body: &str) -> Result<Vec<serde_json::Value>> {
    let envelope: MethodResponseEnvelope =
        quick_xml::de::from_str(body).map_err(|e| Error::ClientError(format!("{method}: {e}")))?;
    if let Some(fault) = envelope.fault {
        let (code, message) = fault.code_and_string();
        return Err(Error::ClientError(format!("{method}: fault {code} {message}")));
    }
    Ok(params_to_json(envelope.params.unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_string_and_int_through_json() {
        let values = vec![serde_json::json!("HmIP-RF#1690000000000"), serde_json::json!(42)];
        let params = params_from_json(values.clone());
        assert_eq!(params_to_json(params), values);
    }

    #[test]
    fn array_of_structs_round_trips() {
        let original = serde_json::json!([{"ADDRESS": "VCU1:1", "VERSION": 10}]);
        let inner: XmlRpcValueInner = (&original).into();
        let back: serde_json::Value = inner.into();
        assert_eq!(back, original);
    }

    #[test]
    fn bool_encodes_as_bit() {
        let xml = quick_xml::se::to_string(&Param { value: XmlRpcValueInner::Boolean(true) }).unwrap();
        assert!(xml.contains(">1<"));
    }

    #[test]
    fn fault_extracts_code_and_string() {
        let fault = FaultBody {
            value: XmlRpcValueInner::Struct(StructBody {
                member: vec![
                    Member { name: "faultCode".into(), value: XmlRpcValueInner::Int(8) },
                    Member {
                        name: "faultString".into(),
                        value: XmlRpcValueInner::String("Unknown method".into()),
                    },
                ],
            }),
        };
        assert_eq!(fault.code_and_string(), (8, "Unknown method".to_owned()));
    }
}
