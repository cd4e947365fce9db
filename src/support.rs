//! Misc support functions: auth header building, TLS client construction,
//! and the fixed cosmetic unit table (spec §2 "Support", §3.1 supplement).

use std::collections::HashMap;

use crate::error::Result;

/// Builds a `reqwest::Client` honouring the config's TLS/verify-TLS
/// settings. Shared by the XML-RPC and JSON-RPC transports so both speak to
/// the backend with identical certificate policy.
pub fn build_http_client(verify_tls: bool, timeout: std::time::Duration) -> Result<reqwest::Client> {
    let builder = reqwest::Client::builder()
        .danger_accept_invalid_certs(!verify_tls)
        .timeout(timeout);
    builder.build().map_err(Into::into)
}

/// Builds the `Authorization: Basic ...` header value for a username and
/// password, as used by both transports (spec §4.1: "auth headers").
pub fn basic_auth_header(username: &str, password: &str) -> String {
    use base64::Engine;
    format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}")))
}

/// The fixed cosmetic unit-replacement table (spec §1 non-goals: "does not
/// transform measurement units beyond a fixed cosmetic table").
pub fn cosmetic_unit(unit: &str) -> String {
    let table: HashMap<&str, &str> =
        [("100%", "%"), ("°C", "°C"), ("CELSIUS", "°C"), ("\u{b0}C", "°C")].into_iter().collect();
    table.get(unit).map(|s| s.to_string()).unwrap_or_else(|| unit.to_owned())
}

/// Recursively cleans XML-RPC argument values before they are serialised:
/// enum-typed arguments are reduced to their scalar representation, nested
/// maps/arrays are cleaned depth-first (spec §4.1 "Argument cleanup").
pub fn clean_xml_rpc_arg(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(label) = map.get("label").and_then(|v| v.as_str()) {
                if map.len() == 2 && map.contains_key("ordinal") {
                    return serde_json::Value::String(label.to_owned());
                }
            }
            serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, clean_xml_rpc_arg(v))).collect(),
            )
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(clean_xml_rpc_arg).collect())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_matches_known_vector() {
        // "Aladdin:open sesame" is the canonical RFC 7617 example.
        assert_eq!(
            basic_auth_header("Aladdin", "open sesame"),
            "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="
        );
    }

    #[test]
    fn cosmetic_unit_rewrites_percent() {
        assert_eq!(cosmetic_unit("100%"), "%");
        assert_eq!(cosmetic_unit("lux"), "lux");
    }

    #[test]
    fn cleans_enum_arg_to_label() {
        let arg = serde_json::json!({"ordinal": 1, "label": "OPEN"});
        assert_eq!(clean_xml_rpc_arg(arg), serde_json::json!("OPEN"));
    }

    #[test]
    fn cleans_nested_maps() {
        let arg = serde_json::json!({"STATE": {"ordinal": 0, "label": "CLOSED"}, "n": 1});
        let cleaned = clean_xml_rpc_arg(arg);
        assert_eq!(cleaned["STATE"], serde_json::json!("CLOSED"));
        assert_eq!(cleaned["n"], serde_json::json!(1));
    }
}
