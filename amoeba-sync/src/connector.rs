//! Host-facing connector surface.

use crate::api::LeadFieldInfo;
use crate::engine::{INTEGRATION_NAME, PullParams, PullReport, PushReport, SyncEngine};
use crate::error::SyncResult;
use amoeba_types::LocalRecord;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// A CRM integration as seen by the host application.
#[async_trait]
pub trait CrmConnector: Send + Sync {
    /// Internal integration name.
    fn name(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    fn authentication_type(&self) -> &'static str;

    /// Configuration keys the host must collect, with their labels.
    fn required_key_fields(&self) -> Vec<(&'static str, &'static str)>;

    fn supported_features(&self) -> &'static [&'static str];

    fn authentication_url(&self) -> String;

    fn access_token_url(&self) -> String;

    async fn available_lead_fields(&self) -> BTreeMap<String, LeadFieldInfo>;

    /// Pushes one lead. True if the CRM confirmed it.
    async fn push_lead(&self, lead: LocalRecord) -> bool;

    /// Pushes every pending lead.
    async fn push_leads(&self) -> SyncResult<PushReport>;

    /// Pulls contacts from the CRM.
    async fn get_leads(&self, params: PullParams) -> SyncResult<PullReport>;
}

/// [`CrmConnector`] for AmoebaCRM.
pub struct AmoebaConnector {
    engine: Arc<SyncEngine>,
}

impl AmoebaConnector {
    pub const FEATURES: [&'static str; 3] = ["push_lead", "get_leads", "push_leads"];

    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }
}

#[async_trait]
impl CrmConnector for AmoebaConnector {
    fn name(&self) -> &'static str {
        INTEGRATION_NAME
    }

    fn display_name(&self) -> &'static str {
        "AmoebaCrm"
    }

    fn authentication_type(&self) -> &'static str {
        "oauth2"
    }

    fn required_key_fields(&self) -> Vec<(&'static str, &'static str)> {
        vec![
            ("instance_url", "AmoebaCrm URL"),
            ("client_id", "Client ID"),
            ("client_secret", "Client Secret"),
        ]
    }

    fn supported_features(&self) -> &'static [&'static str] {
        &Self::FEATURES
    }

    fn authentication_url(&self) -> String {
        self.engine.api().endpoints().authorize()
    }

    fn access_token_url(&self) -> String {
        self.engine.api().endpoints().access_token()
    }

    async fn available_lead_fields(&self) -> BTreeMap<String, LeadFieldInfo> {
        self.engine.api().available_lead_fields().await
    }

    async fn push_lead(&self, lead: LocalRecord) -> bool {
        if lead.fields().is_empty() {
            warn!(local_id = %lead.id(), "lead has no fields to push");
            return false;
        }
        self.engine.push_single(lead).await
    }

    async fn push_leads(&self) -> SyncResult<PushReport> {
        self.engine.push_pending().await
    }

    async fn get_leads(&self, params: PullParams) -> SyncResult<PullReport> {
        self.engine.pull_batch(params).await
    }
}
