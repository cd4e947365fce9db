//! Per-interface XML-RPC proxy (spec §4.1), grounded on
//! `ruma_client::http_client::HttpClient` for the request-building shape
//! and on `original_source/hahomematic/client/xml_rpc.py` for the method
//! whitelist, worker-pool sizing, and fault mapping.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use quick_xml::se::to_string;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use crate::connection::state::ConnectionState;
use crate::error::{Error, Result};
use crate::support::{basic_auth_header, clean_xml_rpc_arg};
use crate::transport::rpc_value::{params_from_json, parse_method_response, MethodCallEnvelope};

/// Methods a proxy is always allowed to call, regardless of what
/// `ConnectionState` reports (spec §4.1: "Before issuing any method other
/// than `{init, ping, getVersion, system.listMethods}`...").
const ALWAYS_ALLOWED: &[&str] = &["init", "ping", "getVersion", "system.listMethods"];

/// One `<methodCall>` with a typed `<params>` tree, already cleaned (spec
/// §4.1 "Argument cleanup"). Rejects more than two top-level arguments,
/// matching the backend's own limit.
fn build_method_call(method: &str, args: Vec<serde_json::Value>) -> Result<String> {
    if args.len() > 2 {
        return Err(Error::ClientError(format!(
            "{method}: too many arguments ({}), backend accepts at most 2",
            args.len()
        )));
    }
    let cleaned: Vec<serde_json::Value> = args.into_iter().map(clean_xml_rpc_arg).collect();
    let envelope = MethodCallEnvelope {
        method_name: method.to_owned(),
        params: params_from_json(cleaned),
    };
    to_string(&envelope).map_err(Into::into)
}

/// The (host, port, path, tls) identity of one XML-RPC proxy (spec §4.1).
#[derive(Clone, Debug)]
pub struct XmlRpcProxyConfig {
    pub host: String,
    pub port: u16,
    pub remote_path: String,
    pub tls: bool,
    pub verify_tls: bool,
    pub username: String,
    pub password: String,
    pub max_workers: usize,
    pub request_timeout: Duration,
}

impl XmlRpcProxyConfig {
    fn url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}:{}{}", self.host, self.port, self.remote_path)
    }
}

/// A proxy to one backend interface. Holds a bounded worker pool (a
/// semaphore) so one slow call never starves others issued concurrently
/// (spec §4.1, §5 "Scheduling model").
pub struct XmlRpcProxy {
    config: XmlRpcProxyConfig,
    http: reqwest::Client,
    workers: Arc<Semaphore>,
    supported_methods: tokio::sync::RwLock<HashSet<String>>,
}

impl XmlRpcProxy {
    pub fn new(config: XmlRpcProxyConfig) -> Result<Self> {
        let http = crate::support::build_http_client(config.verify_tls, config.request_timeout)?;
        let workers = Arc::new(Semaphore::new(config.max_workers.max(1)));
        Ok(Self { config, http, workers, supported_methods: tokio::sync::RwLock::new(HashSet::new()) })
    }

    /// `supported_methods` populated from `system.listMethods()`, always
    /// augmented with `ping` (spec §4.1: "some backends omit it from the
    /// list but accept it").
    #[instrument(skip(self, interface_id), fields(interface_id = %interface_id))]
    pub async fn refresh_supported_methods(&self, interface_id: &str) -> Result<()> {
        let methods: Vec<String> =
            self.call_unchecked("system.listMethods", vec![]).await.and_then(|value| {
                serde_json::from_value(value)
                    .map_err(|e| Error::ClientError(format!("system.listMethods: {e}")))
            })?;
        let mut set: HashSet<String> = methods.into_iter().collect();
        set.insert("ping".to_owned());
        *self.supported_methods.write().await = set;
        debug!(interface_id, "refreshed supported methods");
        Ok(())
    }

    pub async fn supports(&self, method: &str) -> bool {
        self.supported_methods.read().await.contains(method)
    }

    /// The generic call entry point (spec §4.1): checks `ConnectionState`
    /// for non-exempt methods, then dispatches.
    #[instrument(skip(self, args, connection_state), fields(method = %method))]
    pub async fn call(
        &self,
        method: &str,
        args: Vec<serde_json::Value>,
        connection_state: &ConnectionState,
    ) -> Result<serde_json::Value> {
        if !ALWAYS_ALLOWED.contains(&method) && connection_state.has_issue() {
            return Err(Error::NoConnection(format!(
                "{method}: interface has an outstanding connection issue"
            )));
        }
        if !ALWAYS_ALLOWED.contains(&method) && !self.supports(method).await {
            return Err(Error::Unsupported(method.to_owned()));
        }
        self.call_unchecked(method, args).await
    }

    /// Issues the call without consulting `ConnectionState` or
    /// `supported_methods`; used for the bootstrap calls themselves.
    async fn call_unchecked(
        &self,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let _permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::InternalError("xml-rpc worker pool closed".into()))?;

        let body = build_method_call(method, args)?;
        let url = self.config.url();
        let auth = basic_auth_header(&self.config.username, &self.config.password);

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, auth)
            .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=iso-8859-1")
            .body(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::AuthFailure(format!("{method}: backend rejected credentials")));
        }

        let text = response.text().await.map_err(map_transport_error)?;
        let mut values = parse_method_response(method, &text)?;

        Ok(if values.is_empty() { serde_json::Value::Null } else { values.remove(0) })
    }

    /// `init(callback_url, interface_id)` subscribes; `init(callback_url,
    /// "")` cancels the subscription (spec §4.1).
    pub async fn proxy_init(&self, callback_url: &str, interface_id: &str) -> Result<()> {
        self.call_unchecked(
            "init",
            vec![serde_json::json!(callback_url), serde_json::json!(interface_id)],
        )
        .await?;
        Ok(())
    }

    pub async fn proxy_de_init(&self, callback_url: &str) -> Result<()> {
        self.call_unchecked("init", vec![serde_json::json!(callback_url), serde_json::json!("")])
            .await?;
        Ok(())
    }
}

/// `OSError`-equivalent classification (spec §4.1 "Error mapping"):
/// connect/timeout failures are `NoConnection`, everything else
/// `ClientError`. Reuses [`Error`]'s own `reqwest::Error` mapping.
fn map_transport_error(err: reqwest::Error) -> Error {
    Error::from(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_more_than_two_arguments() {
        let args = vec![serde_json::json!(1), serde_json::json!(2), serde_json::json!(3)];
        assert!(build_method_call("setValue", args).is_err());
    }

    #[test]
    fn cleans_enum_args_before_serializing() {
        let args = vec![serde_json::json!({"ordinal": 1, "label": "OPEN"})];
        let xml = build_method_call("setValue", args).unwrap();
        assert!(xml.contains("OPEN"));
        assert!(!xml.contains("ordinal"));
    }

    #[test]
    fn url_honours_tls_flag() {
        let config = XmlRpcProxyConfig {
            host: "ccu.local".into(),
            port: 2010,
            remote_path: "/".into(),
            tls: true,
            verify_tls: true,
            username: "admin".into(),
            password: "secret".into(),
            max_workers: 1,
            request_timeout: Duration::from_secs(5),
        };
        assert_eq!(config.url(), "https://ccu.local:2010/");
    }
}
