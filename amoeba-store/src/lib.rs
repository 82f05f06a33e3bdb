//! Identity ledger and local lead store for the AmoebaCRM connector.
//!
//! Two contracts live here:
//! - [`IdentityLedger`]: the durable local-id ↔ remote-id mapping the sync
//!   engine consults before every push and pull.
//! - [`LeadStore`]: the local lead repository the pull pass writes into.
//!
//! [`SqliteStore`] implements both over one SQLite file so the batch
//! queries can join leads against links. [`MemoryStore`] is the in-process
//! equivalent used by tests and dry runs.

mod error;
mod leads;
mod ledger;
mod memory;
mod sqlite;

pub use error::{StoreError, StoreResult};
pub use leads::{LeadStore, UpsertOutcome, match_key};
pub use ledger::{IdentityLedger, project_fields};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
