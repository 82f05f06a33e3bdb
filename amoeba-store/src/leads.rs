//! The local lead repository contract.

use crate::error::StoreResult;
use amoeba_types::{FieldSet, Lead, LocalId};

/// What [`LeadStore::upsert_lead`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    /// A match existed and already held the incoming values.
    Unchanged,
}

/// Local lead persistence used by the pull pass.
pub trait LeadStore: Send + Sync {
    fn get_lead(&self, id: LocalId) -> StoreResult<Option<Lead>>;

    fn insert_lead(&self, fields: FieldSet) -> StoreResult<Lead>;

    /// Inserts every lead or none of them.
    fn insert_leads(&self, batch: Vec<FieldSet>) -> StoreResult<Vec<Lead>>;

    /// Creates a lead or merges `fields` into the lead matched by the
    /// first of `match_keys` that has a value.
    ///
    /// Matching is ASCII case-insensitive. Without any match value a new
    /// lead is created.
    fn upsert_lead(&self, fields: &FieldSet, match_keys: &[String])
    -> StoreResult<(Lead, UpsertOutcome)>;

    fn lead_count(&self) -> StoreResult<usize>;
}

/// The first match key that has a non-empty value in `fields`.
pub fn match_key<'a>(fields: &'a FieldSet, match_keys: &'a [String]) -> Option<(&'a str, &'a str)> {
    match_keys.iter().find_map(|key| {
        fields
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(|v| (key.as_str(), v))
    })
}

/// Merges incoming values over existing ones. Returns true if anything
/// changed.
pub(crate) fn merge_fields(existing: &mut FieldSet, incoming: &FieldSet) -> bool {
    let mut changed = false;
    for (key, value) in incoming {
        if existing.get(key) != Some(value) {
            existing.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}
