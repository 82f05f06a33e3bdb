//! In-memory ledger and lead store.

use crate::error::{StoreError, StoreResult};
use crate::leads::{LeadStore, UpsertOutcome, match_key, merge_fields};
use crate::ledger::{IdentityLedger, project_fields};
use amoeba_types::{
    FieldSet, IdentityLink, Lead, LinkScope, LocalId, LocalRecord, RawLead, RemoteId,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct State {
    leads: BTreeMap<LocalId, Lead>,
    links: BTreeMap<i64, IdentityLink>,
    next_lead_id: i64,
    next_link_id: i64,
}

impl State {
    fn link_for(&self, scope: &LinkScope, local_id: LocalId) -> Option<&IdentityLink> {
        self.links
            .values()
            .find(|l| &l.scope == scope && l.local_id == local_id)
    }

    fn insert_lead(&mut self, fields: FieldSet) -> Lead {
        self.next_lead_id += 1;
        let lead = Lead {
            id: LocalId::new(self.next_lead_id),
            fields,
            date_modified: Utc::now(),
            newly_created: true,
        };
        let mut stored = lead.clone();
        stored.newly_created = false;
        self.leads.insert(lead.id, stored);
        lead
    }
}

/// Store that keeps everything in process memory.
///
/// Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl IdentityLedger for MemoryStore {
    fn find_link(&self, scope: &LinkScope, local_id: LocalId) -> StoreResult<Option<IdentityLink>> {
        Ok(self.state()?.link_for(scope, local_id).cloned())
    }

    fn find_creatable(
        &self,
        scope: &LinkScope,
        field_selector: &str,
    ) -> StoreResult<Vec<LocalRecord>> {
        let state = self.state()?;
        Ok(state
            .leads
            .values()
            .filter(|lead| state.link_for(scope, lead.id).is_none())
            .map(|lead| {
                LocalRecord::Raw(RawLead {
                    internal_entity_id: lead.id,
                    fields: project_fields(&lead.fields, field_selector),
                })
            })
            .collect())
    }

    fn find_updatable(
        &self,
        scope: &LinkScope,
        field_selector: &str,
    ) -> StoreResult<Vec<(LocalRecord, RemoteId)>> {
        let state = self.state()?;
        Ok(state
            .leads
            .values()
            .filter_map(|lead| {
                let link = state.link_for(scope, lead.id)?;
                let record = LocalRecord::Raw(RawLead {
                    internal_entity_id: lead.id,
                    fields: project_fields(&lead.fields, field_selector),
                });
                Some((record, link.remote_id.clone()))
            })
            .collect())
    }

    fn upsert_link(
        &self,
        scope: &LinkScope,
        remote_id: &RemoteId,
        local_id: LocalId,
    ) -> StoreResult<IdentityLink> {
        let mut state = self.state()?;
        if let Some(id) = state.link_for(scope, local_id).map(|l| l.id) {
            let link = state
                .links
                .get_mut(&id)
                .ok_or_else(|| StoreError::NotFound(format!("link {id}")))?;
            link.remote_id = remote_id.clone();
            return Ok(link.clone());
        }

        state.next_link_id += 1;
        let link = IdentityLink {
            id: state.next_link_id,
            scope: scope.clone(),
            local_id,
            remote_id: remote_id.clone(),
            last_sync_date: None,
        };
        state.links.insert(link.id, link.clone());
        Ok(link)
    }

    fn touch_link(&self, link: &mut IdentityLink, at: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state()?;
        let stored = state
            .links
            .get_mut(&link.id)
            .ok_or_else(|| StoreError::NotFound(format!("link {}", link.id)))?;
        stored.last_sync_date = Some(at);
        link.last_sync_date = Some(at);
        Ok(())
    }

    fn delete_link(&self, link: &IdentityLink) -> StoreResult<()> {
        self.state()?.links.remove(&link.id);
        Ok(())
    }

    fn list_links(&self, scope: &LinkScope) -> StoreResult<Vec<IdentityLink>> {
        let state = self.state()?;
        let mut links: Vec<_> = state
            .links
            .values()
            .filter(|l| &l.scope == scope)
            .cloned()
            .collect();
        links.sort_by_key(|l| l.local_id);
        Ok(links)
    }
}

impl LeadStore for MemoryStore {
    fn get_lead(&self, id: LocalId) -> StoreResult<Option<Lead>> {
        Ok(self.state()?.leads.get(&id).cloned())
    }

    fn insert_lead(&self, fields: FieldSet) -> StoreResult<Lead> {
        Ok(self.state()?.insert_lead(fields))
    }

    fn insert_leads(&self, batch: Vec<FieldSet>) -> StoreResult<Vec<Lead>> {
        let mut state = self.state()?;
        Ok(batch
            .into_iter()
            .map(|fields| state.insert_lead(fields))
            .collect())
    }

    fn upsert_lead(
        &self,
        fields: &FieldSet,
        match_keys: &[String],
    ) -> StoreResult<(Lead, UpsertOutcome)> {
        let mut state = self.state()?;

        let existing = match_key(fields, match_keys).and_then(|(key, value)| {
            state
                .leads
                .values()
                .find(|lead| {
                    lead.field(key)
                        .is_some_and(|v| v.trim().eq_ignore_ascii_case(value))
                })
                .map(|lead| lead.id)
        });

        let Some(id) = existing else {
            let lead = state.insert_lead(fields.clone());
            return Ok((lead, UpsertOutcome::Created));
        };

        let lead = state
            .leads
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("lead {id}")))?;
        if !merge_fields(&mut lead.fields, fields) {
            return Ok((lead.clone(), UpsertOutcome::Unchanged));
        }
        lead.date_modified = Utc::now();
        Ok((lead.clone(), UpsertOutcome::Updated))
    }

    fn lead_count(&self) -> StoreResult<usize> {
        Ok(self.state()?.leads.len())
    }
}
