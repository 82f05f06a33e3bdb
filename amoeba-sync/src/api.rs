//! AmoebaCRM API helper.
//!
//! Wraps an [`HttpClient`] with the CRM's endpoint layout, its success-code
//! rule and its error-message conventions. Transient failures are retried
//! with exponential backoff.

use crate::error::{ApiError, ApiResult};
use crate::http::{HttpClient, ParameterEncoding, RequestSettings, TransportResponse, parse_body};
use amoeba_mapper::RemotePayload;
use amoeba_types::{REMOTE_ENTITY_CONTACT, RemoteId};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Status codes the CRM uses for success.
pub const SUCCESS_CODES: [u16; 3] = [200, 201, 202];

/// URL layout of one CRM instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    instance_url: String,
}

impl Endpoints {
    pub fn new(instance_url: impl Into<String>) -> Self {
        let url: String = instance_url.into();
        Self {
            instance_url: url.trim().trim_end_matches('/').to_string(),
        }
    }

    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    pub fn fields(&self) -> String {
        format!("{}/api/contact/fields?_format=json", self.instance_url)
    }

    pub fn create_contact(&self) -> String {
        format!("{}/api/contact/create?_format=json", self.instance_url)
    }

    pub fn update_contact(&self, id: &RemoteId) -> String {
        format!(
            "{}/contact/{}?_format=json",
            self.instance_url,
            urlencoding::encode(id.as_str())
        )
    }

    pub fn retrieve_contacts(&self) -> String {
        format!("{}/api/retrieve/contact?_format=json", self.instance_url)
    }

    pub fn authorize(&self) -> String {
        format!("{}/oauth2/authorize/", self.instance_url)
    }

    pub fn access_token(&self) -> String {
        format!("{}/oauth2/token/", self.instance_url)
    }
}

/// One remote field as offered for mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadFieldInfo {
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub required: bool,
    pub group: String,
}

impl LeadFieldInfo {
    fn discovered(key: &str, label: String) -> Self {
        Self {
            label,
            field_type: "string".to_string(),
            required: key == "email",
            group: REMOTE_ENTITY_CONTACT.to_string(),
        }
    }
}

/// Retry schedule for transient failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based). Zero for attempt 0.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Client for the AmoebaCRM REST API.
pub struct AmoebaApi {
    http: Arc<dyn HttpClient>,
    endpoints: Endpoints,
    settings: RequestSettings,
    retry: RetryPolicy,
    field_cache: RwLock<Option<BTreeMap<String, LeadFieldInfo>>>,
}

impl AmoebaApi {
    pub fn new(http: Arc<dyn HttpClient>, endpoints: Endpoints) -> Self {
        Self {
            http,
            endpoints,
            settings: RequestSettings::default(),
            retry: RetryPolicy::default(),
            field_cache: RwLock::new(None),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Sends one request and applies the success-code rule.
    ///
    /// Only 200, 201 and 202 succeed. Any other status becomes
    /// [`ApiError::Rejected`] carrying the message the CRM sent back.
    pub async fn request(
        &self,
        url: &str,
        parameters: &Value,
        method: Method,
        settings: &RequestSettings,
    ) -> ApiResult<Value> {
        match self.http.send(method, url, parameters, settings).await? {
            TransportResponse::Parsed(value) => Ok(value),
            TransportResponse::Raw(raw) => {
                let parsed = parse_body(&raw.body);
                if SUCCESS_CODES.contains(&raw.code) {
                    Ok(parsed)
                } else {
                    Err(ApiError::Rejected {
                        status: raw.code,
                        message: error_message(&parsed, raw.code),
                    })
                }
            }
        }
    }

    async fn request_with_retry(
        &self,
        url: &str,
        parameters: &Value,
        method: Method,
        settings: &RequestSettings,
    ) -> ApiResult<Value> {
        let mut attempt = 0;
        loop {
            match self.request(url, parameters, method.clone(), settings).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(url, attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying request");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Creates a contact and returns the id the CRM assigned.
    pub async fn create_contact(&self, payload: &RemotePayload) -> ApiResult<RemoteId> {
        let body = payload_json(payload)?;
        let response = self
            .request_with_retry(
                &self.endpoints.create_contact(),
                &body,
                Method::POST,
                &self.settings,
            )
            .await?;
        response_id(&response)
    }

    /// Updates a contact. Succeeds only if the CRM echoes a contact id.
    pub async fn update_contact(
        &self,
        id: &RemoteId,
        payload: &RemotePayload,
    ) -> ApiResult<RemoteId> {
        let body = payload_json(payload)?;
        let response = self
            .request_with_retry(
                &self.endpoints.update_contact(id),
                &body,
                Method::PATCH,
                &self.settings,
            )
            .await?;
        response_id(&response)
    }

    /// Fetches contacts. `page` is `(page_number, page_size)`, 1-based.
    pub async fn retrieve_contacts(&self, page: Option<(usize, usize)>) -> ApiResult<Vec<Value>> {
        let (parameters, settings) = match page {
            Some((number, size)) => (
                json!({ "page": number, "limit": size }),
                self.settings.clone().with_encoding(ParameterEncoding::Query),
            ),
            None => (Value::Null, self.settings.clone()),
        };
        let response = self
            .request_with_retry(
                &self.endpoints.retrieve_contacts(),
                &parameters,
                Method::GET,
                &settings,
            )
            .await?;
        contact_list(response)
    }

    /// Remote contact fields, keyed by field key.
    ///
    /// Cached after the first successful discovery. Failures are logged and
    /// yield an empty map, which is not cached.
    pub async fn available_lead_fields(&self) -> BTreeMap<String, LeadFieldInfo> {
        if let Some(fields) = self.field_cache.read().await.as_ref() {
            return fields.clone();
        }

        let response = match self
            .request_with_retry(
                &self.endpoints.fields(),
                &Value::Null,
                Method::GET,
                &self.settings,
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "field discovery failed");
                return BTreeMap::new();
            }
        };

        let Some(listed) = response.get("fields").and_then(Value::as_object) else {
            warn!("field discovery response has no fields object");
            return BTreeMap::new();
        };
        let fields: BTreeMap<_, _> = listed
            .iter()
            .map(|(key, label)| {
                let label = label
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| label.to_string());
                (key.clone(), LeadFieldInfo::discovered(key, label))
            })
            .collect();
        if fields.is_empty() {
            return fields;
        }

        info!(count = fields.len(), "discovered remote lead fields");
        *self.field_cache.write().await = Some(fields.clone());
        fields
    }

    /// Drops cached field discovery results.
    pub async fn clear_field_cache(&self) {
        *self.field_cache.write().await = None;
    }
}

fn payload_json(payload: &RemotePayload) -> ApiResult<Value> {
    serde_json::to_value(payload).map_err(|e| ApiError::Decode(e.to_string()))
}

fn response_id(response: &Value) -> ApiResult<RemoteId> {
    let id = response.get("id").and_then(RemoteId::from_json);
    debug!(id = ?id, "response id");
    id.ok_or(ApiError::MissingId)
}

/// Extracts the contact list from a retrieve response.
///
/// Accepts a bare array or an object holding one under `records`,
/// `contacts` or `data`. An empty body is an empty list.
fn contact_list(response: Value) -> ApiResult<Vec<Value>> {
    match response {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => ["records", "contacts", "data"]
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .ok_or_else(|| ApiError::Decode("retrieve response holds no contact list".into())),
        other => Err(ApiError::Decode(format!(
            "unexpected retrieve response: {other}"
        ))),
    }
}

/// Picks the human-readable message out of an error body.
pub fn error_message(parsed: &Value, status: u16) -> String {
    for key in ["message", "error_description", "error"] {
        match parsed.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => return s.trim().to_string(),
            Some(Value::Object(inner)) => {
                if let Some(Value::String(s)) = inner.get("message") {
                    return s.clone();
                }
            }
            _ => {}
        }
    }
    match parsed {
        Value::String(s) if !s.is_empty() => s.clone(),
        _ => format!("request failed with status {status}"),
    }
}
