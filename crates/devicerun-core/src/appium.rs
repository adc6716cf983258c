//! [`DeviceClient`] backed by an Appium server.
//!
//! [`AppiumClient`] speaks the W3C WebDriver JSON protocol (plus Appium's
//! `appium/device/*` extensions for file transfer and key presses) over HTTP.
//! It is a thin adapter: every trait method is one request, and errors
//! reported by the server are mapped onto [`DriverError`] variants.
//!
//! # Example
//!
//! ```no_run
//! use devicerun_core::appium::AppiumClient;
//! use devicerun_core::config::RunConfig;
//!
//! # async fn example() -> Result<(), devicerun_core::driver::DriverError> {
//! let config = RunConfig::default();
//! let client = AppiumClient::connect(&config.server_url, config.capabilities()).await?;
//! println!("session {}", client.session_id());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, debug_span, Instrument};

use crate::driver::{AndroidKey, DeviceClient, DriverError, ElementRef, Selector};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Timeout for establishing the HTTP connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for one request. Session creation installs the app, and file
/// transfers carry whole models, so this is generous.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// W3C element reference key.
const W3C_ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Pre-W3C (JSON Wire Protocol) element reference key.
const LEGACY_ELEMENT_KEY: &str = "ELEMENT";

// ---------------------------------------------------------------------------
// Wire helpers
// ---------------------------------------------------------------------------

/// An error reported by the server in a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireError {
    /// W3C error code, e.g. `no such element`.
    pub error: String,
    pub message: String,
}

impl WireError {
    fn into_driver_error(self) -> DriverError {
        match self.error.as_str() {
            "no such element" => DriverError::NoSuchElement(self.message),
            "session not created" => DriverError::SessionNotCreated(self.message),
            "invalid session id" => DriverError::NotConnected,
            _ => DriverError::CommandFailed(format!("{}: {}", self.error, self.message)),
        }
    }

    fn looks_like_missing_file(&self) -> bool {
        let msg = self.message.to_ascii_lowercase();
        msg.contains("does not exist") || msg.contains("no such file") || msg.contains("not found")
    }
}

/// Why a command did not produce a `value`.
#[derive(Debug)]
pub enum ResponseError {
    /// The server answered with an error object.
    Server(WireError),
    /// The request never got a well-formed answer.
    Transport(DriverError),
}

impl From<ResponseError> for DriverError {
    fn from(err: ResponseError) -> Self {
        match err {
            ResponseError::Server(wire) => wire.into_driver_error(),
            ResponseError::Transport(e) => e,
        }
    }
}

/// Legacy numeric status codes worth distinguishing.
fn legacy_error_name(status: i64) -> &'static str {
    match status {
        7 => "no such element",
        6 => "invalid session id",
        33 => "session not created",
        _ => "unknown error",
    }
}

/// Split a response body into its `value` or a server-reported error.
///
/// Handles both W3C responses (error object in `value`) and JSON Wire
/// Protocol responses (non-zero numeric `status`).
pub fn parse_response(http_status: u16, body: &str) -> Result<Value, ResponseError> {
    let parsed: Value = serde_json::from_str(body).map_err(|e| {
        ResponseError::Transport(DriverError::Protocol(format!(
            "HTTP {} with non-JSON body ({}): {}",
            http_status,
            e,
            truncate(body, 200)
        )))
    })?;

    let value = parsed.get("value").cloned().unwrap_or(Value::Null);
    let message = || {
        value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        return Err(ResponseError::Server(WireError {
            error: error.to_string(),
            message: message(),
        }));
    }
    if let Some(status) = parsed.get("status").and_then(Value::as_i64) {
        if status != 0 {
            return Err(ResponseError::Server(WireError {
                error: legacy_error_name(status).to_string(),
                message: message(),
            }));
        }
    }
    if !(200..300).contains(&http_status) {
        return Err(ResponseError::Server(WireError {
            error: "unknown error".to_string(),
            message: format!("HTTP {}: {}", http_status, truncate(body, 200)),
        }));
    }
    Ok(value)
}

/// Extract the session id from a new-session response.
pub fn session_id_from(body: &Value) -> Option<String> {
    body.get("value")
        .and_then(|v| v.get("sessionId"))
        .or_else(|| body.get("sessionId"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Extract an element id from a find-element `value`.
pub fn element_id_from(value: &Value) -> Option<String> {
    value
        .get(W3C_ELEMENT_KEY)
        .or_else(|| value.get(LEGACY_ELEMENT_KEY))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

// ---------------------------------------------------------------------------
// AppiumClient
// ---------------------------------------------------------------------------

/// A live session on an Appium server.
pub struct AppiumClient {
    http: reqwest::Client,
    base_url: String,
    session_id: String,
}

impl AppiumClient {
    /// Create a session with the given W3C capabilities.
    ///
    /// Fails with [`DriverError::SessionNotCreated`] when the server rejects
    /// the capabilities or cannot start the app.
    pub async fn connect(server_url: &str, capabilities: Map<String, Value>) -> Result<Self, DriverError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DriverError::Http(e.to_string()))?;
        let base_url = server_url.trim_end_matches('/').to_string();

        debug!(server = %base_url, "creating session");
        let body = json!({ "capabilities": { "alwaysMatch": capabilities, "firstMatch": [{}] } });
        let response = http
            .post(format!("{}/session", base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| DriverError::SessionNotCreated(format!("{}: {}", base_url, e)))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| DriverError::Http(e.to_string()))?;
        if let Err(err) = parse_response(status, &text) {
            return Err(match err {
                ResponseError::Server(wire) => {
                    DriverError::SessionNotCreated(format!("{}: {}", wire.error, wire.message))
                }
                ResponseError::Transport(e) => e,
            });
        }

        let parsed: Value = serde_json::from_str(&text).map_err(|e| DriverError::Protocol(e.to_string()))?;
        let session_id = session_id_from(&parsed)
            .ok_or_else(|| DriverError::Protocol("new session response has no sessionId".into()))?;
        debug!(session_id = %session_id, "session created");

        Ok(Self {
            http,
            base_url,
            session_id,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn session_url(&self, path: &str) -> String {
        format!("{}/session/{}{}", self.base_url, self.session_id, path)
    }

    /// Send one command and return the response `value`, or the server's
    /// error unmapped so callers can classify it.
    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ResponseError> {
        let url = self.session_url(path);
        let span = debug_span!("appium", method = %method, path);
        async {
            let mut request = self.http.request(method.clone(), &url);
            if let Some(body) = body {
                request = request.json(&body);
            } else if method == Method::POST {
                request = request.json(&json!({}));
            }
            let response = request
                .send()
                .await
                .map_err(|e| ResponseError::Transport(DriverError::Http(e.to_string())))?;
            let status = response.status().as_u16();
            let text = response
                .text()
                .await
                .map_err(|e| ResponseError::Transport(DriverError::Http(e.to_string())))?;
            debug!(status, bytes = text.len(), "response");
            parse_response(status, &text)
        }
        .instrument(span)
        .await
    }

    async fn command_mapped(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, DriverError> {
        Ok(self.command(method, path, body).await?)
    }
}

#[async_trait]
impl DeviceClient for AppiumClient {
    async fn find_element(&self, selector: &Selector) -> Result<ElementRef, DriverError> {
        let body = json!({ "using": selector.strategy(), "value": selector.value() });
        let value = self
            .command_mapped(Method::POST, "/element", Some(body))
            .await
            .map_err(|e| match e {
                DriverError::NoSuchElement(_) => DriverError::NoSuchElement(selector.to_string()),
                other => other,
            })?;
        let id = element_id_from(&value)
            .ok_or_else(|| DriverError::Protocol(format!("no element reference in {}", value)))?;
        Ok(ElementRef::new(id, selector.clone()))
    }

    async fn click(&self, element: &ElementRef) -> Result<(), DriverError> {
        self.command_mapped(Method::POST, &format!("/element/{}/click", element.id), None)
            .await?;
        Ok(())
    }

    async fn element_text(&self, element: &ElementRef) -> Result<String, DriverError> {
        let value = self
            .command_mapped(Method::GET, &format!("/element/{}/text", element.id), None)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn push_file(&self, remote_path: &str, contents: &[u8]) -> Result<(), DriverError> {
        let body = json!({ "path": remote_path, "data": BASE64.encode(contents) });
        self.command_mapped(Method::POST, "/appium/device/push_file", Some(body))
            .await?;
        Ok(())
    }

    async fn pull_file(&self, remote_path: &str) -> Result<Vec<u8>, DriverError> {
        let body = json!({ "path": remote_path });
        let value = self
            .command(Method::POST, "/appium/device/pull_file", Some(body))
            .await
            .map_err(|err| match err {
                ResponseError::Server(wire) if wire.looks_like_missing_file() => {
                    DriverError::FileNotFound(remote_path.to_string())
                }
                other => DriverError::from(other),
            })?;
        let encoded = value
            .as_str()
            .ok_or_else(|| DriverError::Protocol("pull_file value is not a string".into()))?;
        BASE64
            .decode(encoded)
            .map_err(|e| DriverError::Protocol(format!("pull_file returned invalid base64: {}", e)))
    }

    async fn press_key(&self, key: AndroidKey) -> Result<(), DriverError> {
        let body = json!({ "keycode": key.keycode() });
        self.command_mapped(Method::POST, "/appium/device/press_keycode", Some(body))
            .await?;
        Ok(())
    }

    async fn quit(&self) -> Result<(), DriverError> {
        let url = format!("{}/session/{}", self.base_url, self.session_id);
        let response = self
            .http
            .delete(&url)
            .send()
            .await
            .map_err(|e| DriverError::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        if text.trim().is_empty() {
            return if (200..300).contains(&status) {
                Ok(())
            } else {
                Err(DriverError::CommandFailed(format!("quit returned HTTP {}", status)))
            };
        }
        parse_response(status, &text)?;
        Ok(())
    }
}
