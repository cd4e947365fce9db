//! Embedded XML-RPC callback server (spec §4.3), grounded on
//! `fendermint-eth-api`'s `axum::Router` bind-and-serve shape
//! (`eth/api/src/lib.rs::listen`/`make_router`) for the listener, and on
//! `original_source/hahomematic/xml_rpc_server.py` for the routed-by
//! -interface-id method dispatch and the `/`, `/RPC2` path pair.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use quick_xml::se::to_string;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::address::Address;
use crate::transport::rpc_value::{params_from_json, params_to_json, MethodCallEnvelope, Params};

type IncomingCall = MethodCallEnvelope;

#[derive(serde::Serialize)]
#[serde(rename = "methodResponse")]
struct OutgoingResponse {
    params: Params,
}

/// A backend-pushed `event` call, already positionally decoded (spec §6).
#[derive(Clone, Debug)]
pub struct DeviceEvent {
    pub interface_id: String,
    pub channel_address: Address,
    pub parameter: String,
    pub value: serde_json::Value,
}

/// Everything the callback server needs to deliver to the `Central` that
/// owns a given interface-id. Implementors typically wrap a `Central`
/// behind a thin adapter so the server crate boundary stays narrow.
#[async_trait::async_trait]
pub trait CallbackSink: Send + Sync {
    async fn on_event(&self, event: DeviceEvent);
    async fn on_new_devices(&self, interface_id: &str, descriptions: Vec<serde_json::Value>);
    async fn on_delete_devices(&self, interface_id: &str, addresses: Vec<Address>);
    async fn on_list_devices(&self, interface_id: &str) -> Vec<serde_json::Value>;
    async fn on_topology_hint(&self, interface_id: &str, method: &str);
    async fn on_error(&self, interface_id: &str, code: i32, message: &str);
    /// A `PONG` event's raw value, still `<interface_id>#<ms-timestamp>`
    /// encoded (spec §6). Routing to the right client's ping-pong cache is
    /// the sink's job, since that requires checking the embedded
    /// interface-id against the caller's.
    async fn on_pong(&self, interface_id: &str, value: &str);
}

/// Routes incoming calls by `interface_id` (spec §4.3: "Routing invariant:
/// exactly one Central may own a given interface-id at a time").
#[derive(Clone)]
struct Registry {
    sinks: Arc<RwLock<HashMap<String, Arc<dyn CallbackSink>>>>,
}

impl Registry {
    fn new() -> Self {
        Self { sinks: Arc::new(RwLock::new(HashMap::new())) }
    }
}

/// An embedded server bound to one TCP listener (spec §4.3); may be shared
/// across multiple `Central`s registering distinct interface-ids.
pub struct CallbackServer {
    registry: Registry,
}

impl CallbackServer {
    pub fn new() -> Self {
        Self { registry: Registry::new() }
    }

    /// Registers `sink` as the owner of `interface_id`. Registering a
    /// second sink for an id already owned replaces it, matching
    /// "registration is atomic against teardown" (the old owner is simply
    /// dropped, never left dangling on a stale registration).
    pub async fn register(&self, interface_id: impl Into<String>, sink: Arc<dyn CallbackSink>) {
        self.registry.sinks.write().await.insert(interface_id.into(), sink);
    }

    pub async fn unregister(&self, interface_id: &str) {
        self.registry.sinks.write().await.remove(interface_id);
    }

    /// Binds and serves forever on `addr`. Paths `/` and `/RPC2` both
    /// accept callback calls (spec §6).
    pub async fn serve(self, addr: std::net::SocketAddr) -> crate::error::Result<()> {
        let router = self.router();
        info!(%addr, "binding embedded XML-RPC callback server");
        let server = axum::Server::try_bind(&addr)
            .map_err(|e| crate::error::Error::ConfigError(format!("{addr}: {e}")))?
            .serve(router.into_make_service());
        server
            .await
            .map_err(|e| crate::error::Error::InternalError(format!("callback server stopped: {e}")))
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/", post(handle_call))
            .route("/RPC2", post(handle_call))
            .with_state(self.registry.clone())
    }
}

impl Default for CallbackServer {
    fn default() -> Self {
        Self::new()
    }
}

async fn handle_call(State(registry): State<Registry>, body: String) -> impl IntoResponse {
    let call: IncomingCall = match quick_xml::de::from_str(&body) {
        Ok(call) => call,
        Err(err) => {
            warn!(error = %err, "malformed callback XML-RPC body");
            return (StatusCode::BAD_REQUEST, String::new());
        }
    };

    let response = dispatch(&registry, call).await;
    let envelope = OutgoingResponse { params: params_from_json(vec![response]) };
    match to_string(&envelope) {
        Ok(xml) => (StatusCode::OK, xml),
        Err(err) => {
            warn!(error = %err, "failed to encode callback response");
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}

async fn dispatch(registry: &Registry, call: IncomingCall) -> serde_json::Value {
    let method_name = call.method_name;
    let mut params = params_to_json(call.params);

    // Every method's first positional argument is the interface-id (spec
    // §4.3), except `system.listMethods` which takes none.
    let interface_id = match params.first().and_then(|v| v.as_str()) {
        Some(id) => id.to_owned(),
        None if method_name == "system.listMethods" => {
            return serde_json::json!(["event", "newDevices", "deleteDevices", "listDevices"]);
        }
        None => {
            warn!(method = %method_name, "callback call missing interface_id");
            return serde_json::Value::Null;
        }
    };

    let sink = registry.sinks.read().await.get(&interface_id).cloned();
    let Some(sink) = sink else {
        debug!(interface_id, method = %method_name, "no registered sink for interface");
        return serde_json::Value::Null;
    };

    if !params.is_empty() {
        params.remove(0);
    }

    match method_name.as_str() {
        "event" => {
            if params.len() >= 3 {
                let channel_address = Address::new(params[0].as_str().unwrap_or_default());
                let parameter = params[1].as_str().unwrap_or_default().to_owned();
                let value = params[2].clone();
                if parameter == "PONG" {
                    sink.on_pong(&interface_id, value.as_str().unwrap_or_default()).await;
                } else {
                    sink.on_event(DeviceEvent { interface_id, channel_address, parameter, value })
                        .await;
                }
            }
            serde_json::Value::Null
        }
        "listDevices" => serde_json::Value::Array(sink.on_list_devices(&interface_id).await),
        "newDevices" => {
            let descriptions = params.into_iter().next().and_then(|v| v.as_array().cloned());
            sink.on_new_devices(&interface_id, descriptions.unwrap_or_default()).await;
            serde_json::Value::Bool(true)
        }
        "deleteDevices" => {
            let addresses: Vec<Address> = params
                .into_iter()
                .next()
                .and_then(|v| v.as_array().cloned())
                .unwrap_or_default()
                .into_iter()
                .filter_map(|v| v.as_str().map(Address::new))
                .collect();
            sink.on_delete_devices(&interface_id, addresses).await;
            serde_json::Value::Bool(true)
        }
        "updateDevice" | "replaceDevice" | "readdedDevice" => {
            sink.on_topology_hint(&interface_id, &method_name).await;
            serde_json::Value::Bool(true)
        }
        "error" => {
            let code = params.first().and_then(|v| v.as_i64()).unwrap_or(0) as i32;
            let message = params.get(1).and_then(|v| v.as_str()).unwrap_or_default();
            sink.on_error(&interface_id, code, message).await;
            serde_json::Value::Null
        }
        other => {
            debug!(method = other, "unhandled callback method");
            serde_json::Value::Null
        }
    }
}

/// Decodes a `PONG` event value of shape `<interface_id>#<ms-timestamp>`
/// (spec §6).
pub fn decode_pong(value: &str) -> Option<(String, i64)> {
    let (interface_id, ts) = value.split_once('#')?;
    let ts = ts.parse().ok()?;
    Some((interface_id.to_owned(), ts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_pong_payload() {
        let (interface_id, ts) = decode_pong("HmIP-RF#1690000000000").unwrap();
        assert_eq!(interface_id, "HmIP-RF");
        assert_eq!(ts, 1_690_000_000_000);
    }

    #[test]
    fn rejects_malformed_pong_payload() {
        assert!(decode_pong("no-hash-here").is_none());
    }

    #[test]
    fn decodes_a_typed_event_call_from_a_real_ccu_body() {
        let body = r#"<?xml version="1.0"?>
<methodCall>
<methodName>event</methodName>
<params>
<param><value><string>HmIP-RF</string></value></param>
<param><value><string>VCU2128127:1</string></value></param>
<param><value><string>STATE</string></value></param>
<param><value><boolean>1</boolean></value></param>
</params>
</methodCall>"#;
        let call: IncomingCall = quick_xml::de::from_str(body).unwrap();
        assert_eq!(call.method_name, "event");
        let params = params_to_json(call.params);
        assert_eq!(params, vec![
            serde_json::json!("HmIP-RF"),
            serde_json::json!("VCU2128127:1"),
            serde_json::json!("STATE"),
            serde_json::json!(true),
        ]);
    }
}
