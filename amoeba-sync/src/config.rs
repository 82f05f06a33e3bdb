//! Integration configuration.
//!
//! Loaded from a TOML file:
//!
//! ```toml
//! [keys]
//! instance_url = "https://crm.example.com"
//! client_id = "..."
//! client_secret = "..."
//! access_token = "..."
//!
//! [[features.lead_fields]]
//! local = "email"
//! remote = "email"
//!
//! [sync]
//! concurrency = 4
//! ```

use amoeba_mapper::{FieldMapping, FieldPair, MappingGapPolicy};
use amoeba_types::REMOTE_ENTITY_CONTACT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for one AmoebaCRM integration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrationConfig {
    pub keys: Keys,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Credentials and instance location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Keys {
    /// Base URL of the CRM instance, without trailing slash.
    pub instance_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Bearer token obtained out of band.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

/// What to sync and how records are matched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Features {
    /// Ordered local/remote field pairs.
    #[serde(default)]
    pub lead_fields: Vec<FieldPair>,
    /// Remote objects to pull from.
    #[serde(default = "default_objects")]
    pub objects: Vec<String>,
    /// Local fields used to match pulled contacts to existing leads.
    #[serde(default = "default_match_fields")]
    pub match_fields: Vec<String>,
    #[serde(default)]
    pub gap_policy: MappingGapPolicy,
}

/// Engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Records in flight at once (default: 4).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries after the first attempt (default: 2).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff base in milliseconds (default: 250).
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Contacts per pull page. Unset means one unpaginated request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_page_size: Option<usize>,
}

/// Local database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_objects() -> Vec<String> {
    vec![REMOTE_ENTITY_CONTACT.to_string()]
}

fn default_match_fields() -> Vec<String> {
    vec!["email".to_string()]
}

fn default_concurrency() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    250
}

fn default_database_path() -> PathBuf {
    PathBuf::from("amoeba.db")
}

impl Default for Features {
    fn default() -> Self {
        Self {
            lead_fields: Vec::new(),
            objects: default_objects(),
            match_fields: default_match_fields(),
            gap_policy: MappingGapPolicy::default(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            pull_page_size: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl SyncSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl IntegrationConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keys.instance_url.trim().is_empty() {
            return Err(ConfigError::Invalid("keys.instance_url is empty".into()));
        }
        if self.features.lead_fields.is_empty() {
            return Err(ConfigError::Invalid(
                "features.lead_fields has no entries".into(),
            ));
        }
        if self.sync.concurrency == 0 {
            return Err(ConfigError::Invalid("sync.concurrency must be at least 1".into()));
        }
        if self.sync.pull_page_size == Some(0) {
            return Err(ConfigError::Invalid(
                "sync.pull_page_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// The configured field pairs.
    pub fn mapping(&self) -> FieldMapping {
        FieldMapping::new(self.features.lead_fields.clone())
    }

    /// Whether contacts are pulled at all.
    pub fn pulls_contacts(&self) -> bool {
        self.features
            .objects
            .iter()
            .any(|o| o == REMOTE_ENTITY_CONTACT)
    }

    /// Instance URL with any trailing slash removed.
    pub fn instance_url(&self) -> &str {
        self.keys.instance_url.trim().trim_end_matches('/')
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
