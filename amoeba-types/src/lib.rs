//! Core type definitions for the AmoebaCRM connector.
//!
//! This crate defines the types shared by the mapper, the stores and the
//! sync engine:
//! - Local and remote record identifiers
//! - Local records (`Raw` rows from ledger queries or `Managed` leads)
//! - Remote contacts as returned by the CRM
//! - Identity links tying one local lead to one remote contact
//!
//! Nothing here performs I/O.

mod ids;
mod link;
mod record;

pub use ids::{LocalId, RemoteId};
pub use link::{IdentityLink, LinkScope, LOCAL_ENTITY_LEAD, REMOTE_ENTITY_CONTACT};
pub use record::{FieldSet, Lead, LocalRecord, RawLead, RemoteRecord};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid local id: {0}")]
    InvalidLocalId(String),

    #[error("malformed remote record: {0}")]
    MalformedRecord(String),
}
