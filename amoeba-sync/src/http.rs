//! HTTP transport seam.
//!
//! [`HttpClient`] is the only way the connector reaches the network. The
//! shipped implementation is [`ReqwestClient`]; tests substitute their own.

use crate::error::{ApiError, ApiResult};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

/// How request parameters are put on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParameterEncoding {
    /// JSON request body.
    #[default]
    Json,
    /// `application/x-www-form-urlencoded` body.
    Form,
    /// URL query string.
    Query,
}

/// Per-request transport options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSettings {
    pub encode_parameters: ParameterEncoding,
    /// Return status and body untouched instead of a parsed value.
    pub return_raw: bool,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            encode_parameters: ParameterEncoding::Json,
            return_raw: true,
        }
    }
}

impl RequestSettings {
    pub fn with_encoding(mut self, encoding: ParameterEncoding) -> Self {
        self.encode_parameters = encoding;
        self
    }
}

/// Status code and body of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub code: u16,
    pub body: String,
}

/// What [`HttpClient::send`] hands back.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportResponse {
    /// Returned when `settings.return_raw` is set.
    Raw(RawResponse),
    /// Parsed body, status already accepted by the transport.
    Parsed(Value),
}

/// Sends one HTTP request.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(
        &self,
        method: Method,
        url: &str,
        parameters: &Value,
        settings: &RequestSettings,
    ) -> ApiResult<TransportResponse>;
}

/// [`HttpClient`] over a shared `reqwest` client with bearer auth.
pub struct ReqwestClient {
    client: Client,
    access_token: Option<String>,
}

impl ReqwestClient {
    /// Creates a client whose requests time out after `timeout`.
    pub fn new(timeout: Duration, access_token: Option<String>) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Http(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            access_token,
        })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(
        &self,
        method: Method,
        url: &str,
        parameters: &Value,
        settings: &RequestSettings,
    ) -> ApiResult<TransportResponse> {
        debug!(%method, url, "sending request");
        let mut request = self.client.request(method, url);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }
        if has_parameters(parameters) {
            request = match settings.encode_parameters {
                ParameterEncoding::Json => request.json(parameters),
                ParameterEncoding::Form => request.form(&flatten_parameters(parameters)),
                ParameterEncoding::Query => request.query(&flatten_parameters(parameters)),
            };
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let code = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;
        debug!(code, bytes = body.len(), "received response");

        if settings.return_raw {
            Ok(TransportResponse::Raw(RawResponse { code, body }))
        } else {
            Ok(TransportResponse::Parsed(parse_body(&body)))
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Http(e.to_string())
    }
}

fn has_parameters(parameters: &Value) -> bool {
    match parameters {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

/// Flattens a JSON object into string pairs for form and query encoding.
fn flatten_parameters(parameters: &Value) -> Vec<(String, String)> {
    let Value::Object(map) = parameters else {
        return Vec::new();
    };
    map.iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), v)
        })
        .collect()
}

/// Interprets a response body.
///
/// Tries JSON, then `key=value&...` form encoding, then falls back to the
/// trimmed text. An empty body is `null`.
pub fn parse_body(body: &str) -> Value {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return value;
    }
    if let Some(form) = parse_form(trimmed) {
        return Value::Object(form);
    }
    Value::String(trimmed.to_string())
}

fn parse_form(body: &str) -> Option<Map<String, Value>> {
    if body.chars().any(char::is_whitespace) {
        return None;
    }
    let mut map = Map::new();
    for pair in body.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=')?;
        let key = decode_form_component(key)?;
        let value = decode_form_component(value)?;
        map.insert(key, Value::String(value));
    }
    (!map.is_empty()).then_some(map)
}

fn decode_form_component(raw: &str) -> Option<String> {
    urlencoding::decode(&raw.replace('+', " "))
        .ok()
        .map(|s| s.into_owned())
}
