#![allow(dead_code)]

use amoeba_mapper::FieldPair;
use amoeba_store::{LeadStore, MemoryStore};
use amoeba_sync::{
    ApiResult, HttpClient, IntegrationConfig, RawResponse, RequestSettings, SyncEngine,
    TransportResponse, engine_from_config,
};
use amoeba_types::{FieldSet, Lead, LocalRecord};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// A request seen by [`ScriptedHttp`].
#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub url: String,
    pub body: Value,
}

type Handler = dyn Fn(&Method, &str, &Value) -> ApiResult<TransportResponse> + Send + Sync;

/// HttpClient double that answers from a closure and records every call.
pub struct ScriptedHttp {
    handler: Box<Handler>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedHttp {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&Method, &str, &Value) -> ApiResult<TransportResponse> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: Method) -> usize {
        self.calls().iter().filter(|c| c.method == method).count()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttp {
    async fn send(
        &self,
        method: Method,
        url: &str,
        parameters: &Value,
        _settings: &RequestSettings,
    ) -> ApiResult<TransportResponse> {
        self.calls.lock().unwrap().push(Call {
            method: method.clone(),
            url: url.to_string(),
            body: parameters.clone(),
        });
        (self.handler)(&method, url, parameters)
    }
}

pub fn raw(code: u16, body: Value) -> ApiResult<TransportResponse> {
    Ok(TransportResponse::Raw(RawResponse {
        code,
        body: body.to_string(),
    }))
}

/// Remote id addressed by an update URL, e.g. `r-1` for `.../contact/r-1?_format=json`.
pub fn update_target(url: &str) -> Option<&str> {
    let rest = url.split("/contact/").nth(1)?;
    rest.split('?').next()
}

pub fn is_create(url: &str) -> bool {
    url.contains("/api/contact/create")
}

pub fn is_retrieve(url: &str) -> bool {
    url.contains("/api/retrieve/contact")
}

pub fn test_config() -> IntegrationConfig {
    let mut config = IntegrationConfig::default();
    config.keys.instance_url = "https://crm.test".to_string();
    config.features.lead_fields = vec![
        FieldPair::new("email", "email"),
        FieldPair::new("firstname", "first_name"),
        FieldPair::new("country", "country_code"),
    ];
    config.sync.max_retries = 0;
    config.sync.retry_base_delay_ms = 1;
    config
}

pub fn engine_with(
    config: &IntegrationConfig,
    http: Arc<ScriptedHttp>,
    store: Arc<MemoryStore>,
) -> SyncEngine {
    engine_from_config(config, http, store)
}

pub fn fields(pairs: &[(&str, &str)]) -> FieldSet {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Inserts a lead with the given email and returns it as a managed record.
pub fn seed_lead(store: &MemoryStore, email: &str) -> Lead {
    store
        .insert_lead(fields(&[("email", email), ("firstname", "Test")]))
        .unwrap()
}

pub fn managed(lead: &Lead) -> LocalRecord {
    LocalRecord::Managed(lead.clone())
}
