//! The identity ledger contract.

use crate::error::StoreResult;
use amoeba_mapper::{QUERY_FIELD_PREFIX, parse_query_field_list};
use amoeba_types::{FieldSet, IdentityLink, LinkScope, LocalId, LocalRecord, RemoteId};
use chrono::{DateTime, Utc};

/// Persistent mapping between local leads and remote contacts.
///
/// Every operation is bound to a [`LinkScope`]. Implementations keep at
/// most one link per scope and local id.
pub trait IdentityLedger: Send + Sync {
    /// Returns the link for a local lead, if any.
    fn find_link(&self, scope: &LinkScope, local_id: LocalId) -> StoreResult<Option<IdentityLink>>;

    /// Local leads with no link in the scope, projected to `field_selector`.
    fn find_creatable(&self, scope: &LinkScope, field_selector: &str)
    -> StoreResult<Vec<LocalRecord>>;

    /// Local leads with a link in the scope, paired with their remote id.
    fn find_updatable(
        &self,
        scope: &LinkScope,
        field_selector: &str,
    ) -> StoreResult<Vec<(LocalRecord, RemoteId)>>;

    /// Creates the link if absent; otherwise points it at `remote_id`.
    fn upsert_link(
        &self,
        scope: &LinkScope,
        remote_id: &RemoteId,
        local_id: LocalId,
    ) -> StoreResult<IdentityLink>;

    /// Records a confirmed sync at `at`.
    fn touch_link(&self, link: &mut IdentityLink, at: DateTime<Utc>) -> StoreResult<()>;

    /// Removes the link so the lead becomes creatable again.
    fn delete_link(&self, link: &IdentityLink) -> StoreResult<()>;

    /// All links in the scope, ordered by local id.
    fn list_links(&self, scope: &LinkScope) -> StoreResult<Vec<IdentityLink>>;
}

/// Restricts a field set to the fields named in a selection clause.
///
/// An empty selector keeps every field.
pub fn project_fields(fields: &FieldSet, field_selector: &str) -> FieldSet {
    let wanted = parse_query_field_list(QUERY_FIELD_PREFIX, field_selector);
    if wanted.is_empty() {
        return fields.clone();
    }
    fields
        .iter()
        .filter(|(k, _)| wanted.iter().any(|w| w == *k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
