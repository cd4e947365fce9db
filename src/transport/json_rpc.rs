//! Session-based JSON-RPC client (spec §4.2), grounded on
//! `ruma_client::client::ClientData`'s `Mutex<Option<String>>` access-token
//! pattern for the held session id, and on
//! `original_source/hahomematic/client/json_rpc.py` for the renewal
//! throttling, script double-decode, and backslash-stripping workaround.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::error::{Error, Result};

/// Sessions are renewed at most this often; a post within the window
/// reuses the held id rather than calling `Session.renew` (spec §4.2).
const RENEW_INTERVAL: Duration = Duration::from_secs(90);

#[derive(Serialize)]
struct Envelope<'a> {
    method: &'a str,
    params: Value,
    jsonrpc: &'static str,
    id: u32,
}

#[derive(Deserialize)]
struct RawResponse {
    result: Option<Value>,
    error: Option<RawError>,
}

#[derive(Deserialize)]
struct RawError {
    message: String,
}

struct SessionState {
    id: Option<String>,
    last_renewed: Option<Instant>,
}

/// A session-oriented JSON-RPC client against `<base_url>/api/homematic.cgi`
/// (spec §4.2, §6).
pub struct JsonRpcClient {
    base_url: String,
    username: String,
    password: String,
    http: reqwest::Client,
    session: Mutex<SessionState>,
}

impl JsonRpcClient {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        verify_tls: bool,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http = crate::support::build_http_client(verify_tls, request_timeout)?;
        Ok(Self {
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            http,
            session: Mutex::new(SessionState { id: None, last_renewed: None }),
        })
    }

    /// `login`: if no session id is held, logs in; posts always attach the
    /// (possibly just-obtained) id under `_session_id_` (spec §4.2).
    #[instrument(skip(self))]
    pub async fn login(&self) -> Result<()> {
        let mut state = self.session.lock().await;
        if state.id.is_some() {
            return Ok(());
        }
        let params = json!({"username": self.username, "password": self.password});
        drop(state);
        let result = self.raw_post("Session.login", params).await?;
        let session_id = result
            .as_str()
            .ok_or_else(|| Error::AuthFailure("Session.login returned no session id".into()))?
            .to_owned();
        let mut state = self.session.lock().await;
        state.id = Some(session_id);
        state.last_renewed = Some(Instant::now());
        Ok(())
    }

    /// `Session.renew`, throttled to at most once per [`RENEW_INTERVAL`]
    /// (spec §4.2: "otherwise the held id is reused").
    ///
    /// Concurrent callers that both observe an expired session may each
    /// call `login`; per spec §5 "the last stored id wins and lost
    /// sessions are harmlessly logged out by the server after timeout" —
    /// this is intentionally not made re-entrant-safe beyond the mutex's
    /// own serialization.
    #[instrument(skip(self))]
    pub async fn renew(&self) -> Result<()> {
        let session_id = {
            let state = self.session.lock().await;
            match &state.id {
                Some(_) if state.last_renewed.is_some_and(|t| t.elapsed() < RENEW_INTERVAL) => {
                    return Ok(());
                }
                Some(id) => id.clone(),
                None => return self.login().await,
            }
        };

        let params = json!({"_session_id_": session_id});
        match self.raw_post("Session.renew", params).await {
            Ok(_) => {
                let mut state = self.session.lock().await;
                state.last_renewed = Some(Instant::now());
                Ok(())
            }
            Err(err) => {
                self.clear_session().await;
                Err(err)
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<()> {
        let session_id = self.session.lock().await.id.clone();
        if let Some(session_id) = session_id {
            let params = json!({"_session_id_": session_id});
            let _ = self.raw_post("Session.logout", params).await;
        }
        self.clear_session().await;
        Ok(())
    }

    async fn clear_session(&self) {
        let mut state = self.session.lock().await;
        state.id = None;
        state.last_renewed = None;
    }

    /// A generic authenticated post: ensures a session, attaches
    /// `_session_id_`, retries once on an expired-session error.
    pub async fn post(&self, method: &str, mut params: Value) -> Result<Value> {
        self.login().await?;
        self.renew().await?;

        let session_id =
            self.session.lock().await.id.clone().ok_or_else(|| {
                Error::InternalError("post called with no session established".into())
            })?;
        if let Value::Object(map) = &mut params {
            map.insert("_session_id_".to_owned(), json!(session_id));
        }

        self.raw_post(method, params).await
    }

    /// `post_script`: loads a named script, substitutes `##name##`
    /// placeholders with stringified params, executes it via
    /// `ReGa.runScript`, then double-decodes the JSON-encoded string
    /// result the backend wraps its output in (spec §4.2).
    pub async fn post_script(&self, script: &str, params: &Value) -> Result<Value> {
        let substituted = substitute_placeholders(script, params);
        let result = self.post("ReGa.runScript", json!({"script": substituted})).await?;

        let encoded = result
            .get("output")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::ClientError("ReGa.runScript: missing 'output' field".into()))?;

        decode_script_output(encoded)
    }

    /// Issues one unauthenticated POST; maps transport/TLS/auth failures
    /// per spec §4.2, and retries the body parse once with backslashes
    /// stripped if the first parse fails (the backend's "workaround").
    async fn raw_post(&self, method: &str, params: Value) -> Result<Value> {
        let envelope = Envelope { method, params, jsonrpc: "1.1", id: 0 };
        let response = self
            .http
            .post(&self.base_url)
            .json(&envelope)
            .send()
            .await
            .map_err(map_json_rpc_transport_error)?;

        let text = response.text().await.map_err(map_json_rpc_transport_error)?;
        let parsed: RawResponse = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(_) => {
                debug!(method, "initial JSON parse failed, retrying with backslashes stripped");
                let stripped = text.replace('\\', "");
                serde_json::from_str(&stripped)?
            }
        };

        if let Some(error) = parsed.error {
            if error.message.to_lowercase().contains("access denied") {
                self.clear_session().await;
                return Err(Error::AuthFailure(error.message));
            }
            return Err(Error::ClientError(error.message));
        }

        Ok(parsed.result.unwrap_or(Value::Null))
    }
}

fn map_json_rpc_transport_error(err: reqwest::Error) -> Error {
    if err.is_connect() {
        let message = err.to_string();
        if message.to_lowercase().contains("certificate") {
            return Error::ClientError(format!(
                "{message} (hint: check `tls`/`verify_tls` against the backend's actual scheme)"
            ));
        }
    }
    Error::from(err)
}

fn substitute_placeholders(script: &str, params: &Value) -> String {
    let mut out = script.to_owned();
    if let Value::Object(map) = params {
        for (key, value) in map {
            let placeholder = format!("##{key}##");
            let replacement = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out = out.replace(&placeholder, &replacement);
        }
    }
    out
}

/// The script result is a JSON-encoded string inside the outer response;
/// decode it, and if that itself still looks like a quoted JSON string
/// (the backend occasionally double-encodes), decode once more.
fn decode_script_output(encoded: &str) -> Result<Value> {
    let first: Value = serde_json::from_str(encoded)?;
    if let Value::String(inner) = &first {
        if let Ok(second) = serde_json::from_str(inner) {
            return Ok(second);
        }
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_named_placeholders() {
        let script = "var name = '##name##'; var value = ##value##;";
        let params = json!({"name": "Alarm", "value": 1});
        let result = substitute_placeholders(script, &params);
        assert_eq!(result, "var name = 'Alarm'; var value = 1;");
    }

    #[test]
    fn decodes_single_encoded_script_output() {
        let encoded = serde_json::to_string(&json!({"ok": true})).unwrap();
        let outer = serde_json::to_string(&Value::String(encoded)).unwrap();
        let outer_value: Value = serde_json::from_str(&outer).unwrap();
        let as_str = outer_value.as_str().unwrap();
        let decoded = decode_script_output(as_str).unwrap();
        assert_eq!(decoded, json!({"ok": true}));
    }

    #[test]
    fn decodes_plain_scalar_output_without_double_decode() {
        let decoded = decode_script_output("42").unwrap();
        assert_eq!(decoded, json!(42));
    }
}
