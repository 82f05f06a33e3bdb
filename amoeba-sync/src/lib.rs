//! AmoebaCRM contact sync.
//!
//! - [`http`]: the transport seam ([`HttpClient`]) and its reqwest client.
//! - [`api`]: endpoints, the success-code rule, retries and field discovery.
//! - [`engine`]: push and pull passes over the identity ledger.
//! - [`connector`]: the host-facing [`CrmConnector`] surface.
//!
//! ```ignore
//! let config = IntegrationConfig::from_file(Path::new("amoeba.toml"))?;
//! let http = Arc::new(ReqwestClient::new(config.sync.timeout(), config.keys.access_token.clone())?);
//! let api = AmoebaApi::new(http, Endpoints::new(config.instance_url()));
//! let engine = SyncEngine::new(&config, api, Arc::new(SqliteStore::new("amoeba.db")?));
//! let report = engine.push_pending().await?;
//! ```

pub mod api;
pub mod config;
pub mod connector;
pub mod engine;
pub mod error;
pub mod http;
mod locks;
pub mod state;

pub use api::{AmoebaApi, Endpoints, LeadFieldInfo, RetryPolicy, SUCCESS_CODES};
pub use config::{ConfigError, IntegrationConfig};
pub use connector::{AmoebaConnector, CrmConnector};
pub use engine::{
    EngineOptions, INTEGRATION_NAME, PullParams, PullReport, PushReport, SyncEngine,
};
pub use error::{ApiError, ApiResult, SyncError, SyncResult};
pub use http::{
    HttpClient, ParameterEncoding, RawResponse, ReqwestClient, RequestSettings, TransportResponse,
};
pub use state::RecordState;

use std::sync::Arc;

/// Builds an engine from configuration, sending through `http`.
pub fn engine_from_config<S>(
    config: &IntegrationConfig,
    http: Arc<dyn HttpClient>,
    store: Arc<S>,
) -> SyncEngine
where
    S: amoeba_store::IdentityLedger + amoeba_store::LeadStore + 'static,
{
    let retry = RetryPolicy {
        max_retries: config.sync.max_retries,
        base_delay: config.sync.retry_base_delay(),
        ..RetryPolicy::default()
    };
    let api = AmoebaApi::new(http, Endpoints::new(config.instance_url())).with_retry(retry);
    SyncEngine::new(config, api, store)
}
