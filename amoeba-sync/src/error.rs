//! Error types for the transport adapter and the sync engine.

use crate::config::ConfigError;
use crate::state::RecordState;
use amoeba_mapper::MappingError;
use amoeba_store::StoreError;
use thiserror::Error;

/// Result type for CRM requests.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors raised talking to the CRM.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The CRM answered with a status outside 200/201/202.
    #[error("remote rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The request did not complete within the client timeout.
    #[error("request timed out")]
    Timeout,

    /// Connection or protocol failure below the HTTP status level.
    #[error("http error: {0}")]
    Http(String),

    /// The response body could not be interpreted.
    #[error("decode error: {0}")]
    Decode(String),

    /// A successful response carried no contact id.
    #[error("response carried no contact id")]
    MissingId,
}

impl ApiError {
    /// Whether the request is worth repeating.
    ///
    /// Timeouts, connection failures, 5xx and 429 are transient. Any other
    /// rejection is permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Timeout | ApiError::Http(_) => true,
            ApiError::Rejected { status, .. } => *status == 429 || *status >= 500,
            ApiError::Decode(_) | ApiError::MissingId => false,
        }
    }

    /// HTTP status for rejections.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport or remote error.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Ledger or lead store error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Field translation error.
    #[error("mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The pass was cancelled before the record started.
    #[error("sync cancelled")]
    Cancelled,

    /// A record was driven along an edge the state machine does not allow.
    #[error("illegal transition {from:?} -> {to:?}")]
    InvalidTransition { from: RecordState, to: RecordState },
}
