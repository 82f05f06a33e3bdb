//! Identity links between local leads and remote contacts.

use crate::ids::{LocalId, RemoteId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Remote object type synced by the connector.
pub const REMOTE_ENTITY_CONTACT: &str = "Contact";

/// Local entity type the connector reads and writes.
pub const LOCAL_ENTITY_LEAD: &str = "lead";

/// The (integration, remote entity, local entity) triple a ledger
/// operation is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkScope {
    pub integration: String,
    pub remote_entity: String,
    pub local_entity: String,
}

impl LinkScope {
    pub fn new(
        integration: impl Into<String>,
        remote_entity: impl Into<String>,
        local_entity: impl Into<String>,
    ) -> Self {
        Self {
            integration: integration.into(),
            remote_entity: remote_entity.into(),
            local_entity: local_entity.into(),
        }
    }

    /// Scope for syncing local leads against remote contacts.
    pub fn contacts(integration: impl Into<String>) -> Self {
        Self::new(integration, REMOTE_ENTITY_CONTACT, LOCAL_ENTITY_LEAD)
    }
}

/// Durable mapping of one local lead to one remote contact.
///
/// At most one link exists per scope and local id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityLink {
    /// Row id assigned by the store.
    pub id: i64,
    pub scope: LinkScope,
    pub local_id: LocalId,
    pub remote_id: RemoteId,
    /// Last confirmed sync, `None` until the first touch.
    pub last_sync_date: Option<DateTime<Utc>>,
}

impl IdentityLink {
    /// Returns true if the link was synced at or after `at`.
    pub fn synced_since(&self, at: DateTime<Utc>) -> bool {
        self.last_sync_date.is_some_and(|d| d >= at)
    }
}
