//! Contact sync engine.
//!
//! Push reconciles local leads into the CRM: linked leads are updated,
//! unlinked leads and leads whose update did not confirm are created.
//! Pull brings remote contacts into the local lead store and links them.
//!
//! Every failure inside a pass is scoped to its record. It is logged with
//! the record's ids and counted; the pass carries on.

use crate::api::AmoebaApi;
use crate::config::{ConfigError, IntegrationConfig};
use crate::error::{SyncError, SyncResult};
use crate::locks::RecordLocks;
use crate::state::RecordState;
use amoeba_mapper::{
    FieldMapper, FieldMapping, QUERY_FIELD_PREFIX, RemotePayload, build_query_field_list,
    map_remote_to_local, populate_lead_fields,
};
use amoeba_store::{IdentityLedger, LeadStore, UpsertOutcome};
use amoeba_types::{IdentityLink, LinkScope, LocalId, LocalRecord, RemoteRecord};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

/// Integration name recorded on every link.
pub const INTEGRATION_NAME: &str = "Amoebacrm";

/// Counters for one push pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    pub total: usize,
    pub updated: usize,
    pub created: usize,
    pub errors: usize,
    /// Records the pass never finished, because it was cancelled.
    pub ignored: usize,
}

impl PushReport {
    /// `(updated, created, errors, ignored)`.
    pub fn as_tuple(&self) -> (usize, usize, usize, usize) {
        (self.updated, self.created, self.errors, self.ignored)
    }

    fn record(&mut self, outcome: PushOutcome) {
        match outcome {
            PushOutcome::Updated => self.updated += 1,
            PushOutcome::Created => self.created += 1,
            PushOutcome::Failed => self.errors += 1,
            PushOutcome::Ignored => self.ignored += 1,
        }
    }
}

/// Counters for one pull pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PullReport {
    /// Contacts returned by the CRM.
    pub fetched: usize,
    pub updated: usize,
    pub created: usize,
    /// Matched leads that already held the remote values.
    pub unchanged: usize,
    pub errors: usize,
    pub ignored: usize,
    /// A page after the first failed; later contacts were not seen.
    pub truncated: bool,
}

impl PullReport {
    /// `(updated, created)`.
    pub fn as_tuple(&self) -> (usize, usize) {
        (self.updated, self.created)
    }
}

/// Options for one pull pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullParams {
    /// Contacts per page. Overrides the configured page size.
    pub page_size: Option<usize>,
}

/// Engine settings derived from [`IntegrationConfig`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub concurrency: usize,
    pub match_fields: Vec<String>,
    pub pull_contacts: bool,
    pub pull_page_size: Option<usize>,
}

impl From<&IntegrationConfig> for EngineOptions {
    fn from(config: &IntegrationConfig) -> Self {
        Self {
            concurrency: config.sync.concurrency.max(1),
            match_fields: config.features.match_fields.clone(),
            pull_contacts: config.pulls_contacts(),
            pull_page_size: config.sync.pull_page_size,
        }
    }
}

#[derive(Debug)]
enum PushOutcome {
    Updated,
    Created,
    Failed,
    Ignored,
}

/// Result of the update leg of a record.
enum UpdateStep {
    Done(PushOutcome),
    /// The update did not confirm; the record goes to the create set.
    Requeue(LocalRecord, RecordState),
}

#[derive(Debug)]
enum PullOutcome {
    Created,
    Updated,
    Unchanged,
    Failed,
}

/// Reconciles local leads with AmoebaCRM contacts.
pub struct SyncEngine {
    api: Arc<AmoebaApi>,
    ledger: Arc<dyn IdentityLedger>,
    leads: Arc<dyn LeadStore>,
    scope: LinkScope,
    mapping: FieldMapping,
    mapper: FieldMapper,
    options: EngineOptions,
    cancelled: AtomicBool,
    locks: RecordLocks,
}

impl SyncEngine {
    /// Creates an engine over one store that serves as both ledger and
    /// lead store.
    pub fn new<S>(config: &IntegrationConfig, api: AmoebaApi, store: Arc<S>) -> Self
    where
        S: IdentityLedger + LeadStore + 'static,
    {
        Self {
            api: Arc::new(api),
            ledger: store.clone(),
            leads: store,
            scope: LinkScope::contacts(INTEGRATION_NAME),
            mapping: config.mapping(),
            mapper: FieldMapper::with_policy(config.features.gap_policy.clone()),
            options: EngineOptions::from(config),
            cancelled: AtomicBool::new(false),
            locks: RecordLocks::default(),
        }
    }

    pub fn api(&self) -> &AmoebaApi {
        &self.api
    }

    pub fn scope(&self) -> &LinkScope {
        &self.scope
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Stops the running pass before its next record starts.
    ///
    /// The flag stays set until [`SyncEngine::reset_cancel`].
    pub fn cancel(&self) {
        info!("sync cancellation requested");
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    // ── Push ─────────────────────────────────────────────────────

    /// Pushes the given records.
    ///
    /// Linked records are updated first; records whose update does not
    /// confirm lose their link and join the create set, which is then
    /// created.
    pub async fn push_batch(&self, records: Vec<LocalRecord>) -> PushReport {
        let pass_id = Uuid::now_v7();
        let span = info_span!("push", %pass_id, total = records.len());
        self.run_push(records).instrument(span).await
    }

    /// Pushes every lead the ledger reports as updatable or creatable.
    pub async fn push_pending(&self) -> SyncResult<PushReport> {
        let pass_id = Uuid::now_v7();
        let span = info_span!("push_pending", %pass_id);
        self.run_push_pending().instrument(span).await
    }

    async fn run_push_pending(&self) -> SyncResult<PushReport> {
        let selector = self.field_selector();
        let mut records: Vec<LocalRecord> = self
            .ledger
            .find_updatable(&self.scope, &selector)?
            .into_iter()
            .map(|(record, _)| record)
            .collect();
        records.extend(self.ledger.find_creatable(&self.scope, &selector)?);
        info!(total = records.len(), "pending leads collected");
        Ok(self.run_push(records).await)
    }

    /// Pushes one record. Returns true if the CRM confirmed an update or a
    /// create.
    pub async fn push_single(&self, record: LocalRecord) -> bool {
        let pass_id = Uuid::now_v7();
        let local_id = record.id();
        let span = info_span!("push_single", %pass_id, %local_id);
        async {
            let link = match self.ledger.find_link(&self.scope, local_id) {
                Ok(link) => link,
                Err(e) => {
                    warn!(error = %e, "link lookup failed");
                    return false;
                }
            };
            let outcome = match link {
                Some(link) => match self.update_record(record, link).await {
                    UpdateStep::Done(outcome) => outcome,
                    UpdateStep::Requeue(record, state) => self.create_record(record, state).await,
                },
                None => self.create_record(record, RecordState::Unsynced).await,
            };
            matches!(outcome, PushOutcome::Updated | PushOutcome::Created)
        }
        .instrument(span)
        .await
    }

    async fn run_push(&self, records: Vec<LocalRecord>) -> PushReport {
        let mut report = PushReport {
            total: records.len(),
            ..PushReport::default()
        };

        let mut to_update = Vec::new();
        let mut to_create = Vec::new();
        for record in records {
            match self.ledger.find_link(&self.scope, record.id()) {
                Ok(Some(link)) => to_update.push((record, link)),
                Ok(None) => to_create.push((record, RecordState::Unsynced)),
                Err(e) => {
                    warn!(local_id = %record.id(), error = %e, "link lookup failed");
                    report.errors += 1;
                }
            }
        }
        debug!(updates = to_update.len(), creates = to_create.len(), "records partitioned");

        let steps: Vec<UpdateStep> = stream::iter(to_update)
            .map(|(record, link)| self.update_record(record, link))
            .buffer_unordered(self.options.concurrency)
            .collect()
            .await;
        for step in steps {
            match step {
                UpdateStep::Done(outcome) => report.record(outcome),
                UpdateStep::Requeue(record, state) => to_create.push((record, state)),
            }
        }

        let outcomes: Vec<PushOutcome> = stream::iter(to_create)
            .map(|(record, state)| self.create_record(record, state))
            .buffer_unordered(self.options.concurrency)
            .collect()
            .await;
        for outcome in outcomes {
            report.record(outcome);
        }

        info!(
            updated = report.updated,
            created = report.created,
            errors = report.errors,
            ignored = report.ignored,
            "push finished"
        );
        report
    }

    async fn update_record(&self, record: LocalRecord, link: IdentityLink) -> UpdateStep {
        if self.is_cancelled() {
            return UpdateStep::Done(PushOutcome::Ignored);
        }
        let _guard = self.locks.acquire(record.id()).await;
        // Cancellation may have arrived while waiting on the lock.
        if self.is_cancelled() {
            return UpdateStep::Done(PushOutcome::Ignored);
        }
        self.update_locked(record, link).await
    }

    /// Update leg proper. The caller holds the record's lock.
    async fn update_locked(&self, record: LocalRecord, link: IdentityLink) -> UpdateStep {
        let local_id = record.id();
        let mut state = RecordState::Unsynced;
        if let Err(e) = state.transition(RecordState::PendingUpdate) {
            warn!(%local_id, error = %e, "state machine rejected update");
            return UpdateStep::Done(PushOutcome::Failed);
        }

        let payload = match self.payload_for(&record) {
            Some(payload) => payload,
            None => {
                // Nothing can be sent; the create leg would fail the same way.
                return UpdateStep::Done(self.fail(local_id, &mut state, true));
            }
        };

        match self.api.update_contact(&link.remote_id, &payload).await {
            Ok(remote_id) => {
                let mut link = link;
                if let Err(e) = self.ledger.touch_link(&mut link, Utc::now()) {
                    warn!(%local_id, %remote_id, error = %e, "failed to record sync date");
                }
                if let Err(e) = state.transition(RecordState::Synced) {
                    warn!(%local_id, error = %e, "state machine rejected sync");
                }
                debug!(%local_id, %remote_id, "contact updated");
                UpdateStep::Done(PushOutcome::Updated)
            }
            Err(e) => {
                warn!(%local_id, remote_id = %link.remote_id, error = %e, "update failed; creating instead");
                if let Err(e) = self.ledger.delete_link(&link) {
                    warn!(%local_id, error = %e, "failed to delete stale link");
                }
                match state.transition(RecordState::PendingCreate) {
                    Ok(()) => UpdateStep::Requeue(record, state),
                    Err(e) => {
                        warn!(%local_id, error = %e, "state machine rejected requeue");
                        UpdateStep::Done(PushOutcome::Failed)
                    }
                }
            }
        }
    }

    async fn create_record(&self, mut record: LocalRecord, mut state: RecordState) -> PushOutcome {
        if self.is_cancelled() {
            return PushOutcome::Ignored;
        }
        let local_id = record.id();
        let _guard = self.locks.acquire(local_id).await;
        if self.is_cancelled() {
            return PushOutcome::Ignored;
        }

        // Another task holding this id may have linked it in the meantime.
        match self.ledger.find_link(&self.scope, local_id) {
            Ok(Some(link)) => {
                debug!(%local_id, remote_id = %link.remote_id, "linked while queued; updating instead");
                match self.update_locked(record, link).await {
                    UpdateStep::Done(outcome) => return outcome,
                    UpdateStep::Requeue(requeued, requeued_state) => {
                        record = requeued;
                        state = requeued_state;
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(%local_id, error = %e, "link lookup failed");
                return PushOutcome::Failed;
            }
        }

        if state == RecordState::Unsynced {
            if let Err(e) = state.transition(RecordState::PendingCreate) {
                warn!(%local_id, error = %e, "state machine rejected create");
                return PushOutcome::Failed;
            }
        }

        let Some(payload) = self.payload_for(&record) else {
            return self.fail(local_id, &mut state, false);
        };

        let remote_id = match self.api.create_contact(&payload).await {
            Ok(remote_id) => remote_id,
            Err(e) => {
                warn!(%local_id, error = %e, "create failed");
                return self.fail(local_id, &mut state, false);
            }
        };

        let linked = self
            .ledger
            .upsert_link(&self.scope, &remote_id, local_id)
            .and_then(|mut link| self.ledger.touch_link(&mut link, Utc::now()));
        if let Err(e) = linked {
            warn!(%local_id, %remote_id, error = %e, "contact created but link not stored");
            return self.fail(local_id, &mut state, false);
        }

        if let Err(e) = state.transition(RecordState::Synced) {
            warn!(%local_id, error = %e, "state machine rejected sync");
        }
        debug!(%local_id, %remote_id, "contact created");
        PushOutcome::Created
    }

    /// Drives a record to `Failed`, passing through `PendingCreate` when it
    /// was still waiting on its update.
    fn fail(&self, local_id: LocalId, state: &mut RecordState, from_update: bool) -> PushOutcome {
        let result = if from_update {
            state
                .transition(RecordState::PendingCreate)
                .and_then(|()| state.transition(RecordState::Failed))
        } else {
            state.transition(RecordState::Failed)
        };
        if let Err(e) = result {
            warn!(%local_id, error = %e, "state machine rejected failure");
        }
        PushOutcome::Failed
    }

    /// Builds the request payload, or `None` when nothing can be sent.
    fn payload_for(&self, record: &LocalRecord) -> Option<RemotePayload> {
        let local_id = record.id();
        let populated = populate_lead_fields(record.fields(), &self.mapping);
        let mapped = match self.mapper.map(&populated) {
            Ok(mapped) => mapped,
            Err(e) => {
                warn!(%local_id, error = %e, "record rejected by field mapper");
                return None;
            }
        };
        for gap in &mapped.gaps {
            debug!(%local_id, field = %gap.field, value = %gap.value, "mapping gap");
        }
        if mapped.payload.is_empty() {
            warn!(%local_id, "record has no mapped fields");
            return None;
        }
        Some(mapped.payload)
    }

    fn field_selector(&self) -> String {
        build_query_field_list(QUERY_FIELD_PREFIX, &self.mapping.local_fields())
    }

    // ── Pull ─────────────────────────────────────────────────────

    /// Pulls remote contacts into the local lead store.
    ///
    /// Fails if the page size is zero or the first page cannot be fetched.
    /// A later page failure ends the pass early with
    /// [`PullReport::truncated`] set.
    pub async fn pull_batch(&self, params: PullParams) -> SyncResult<PullReport> {
        let pass_id = Uuid::now_v7();
        let span = info_span!("pull", %pass_id);
        self.run_pull(params).instrument(span).await
    }

    async fn run_pull(&self, params: PullParams) -> SyncResult<PullReport> {
        let mut report = PullReport::default();
        if !self.options.pull_contacts {
            info!("contact pull not enabled");
            return Ok(report);
        }

        let page_size = params.page_size.or(self.options.pull_page_size);
        if page_size == Some(0) {
            return Err(SyncError::Config(ConfigError::Invalid(
                "pull page size must be at least 1".into(),
            )));
        }
        let mut page = 1;
        loop {
            let contacts = match self
                .api
                .retrieve_contacts(page_size.map(|size| (page, size)))
                .await
            {
                Ok(contacts) => contacts,
                Err(e) if page == 1 => return Err(SyncError::Api(e)),
                Err(e) => {
                    warn!(page, error = %e, "page fetch failed; pull truncated");
                    report.truncated = true;
                    break;
                }
            };
            let count = contacts.len();
            report.fetched += count;
            debug!(page, count, "contacts fetched");

            for contact in contacts {
                if self.is_cancelled() {
                    report.ignored += 1;
                    continue;
                }
                match self.pull_record(contact).await {
                    PullOutcome::Created => report.created += 1,
                    PullOutcome::Updated => report.updated += 1,
                    PullOutcome::Unchanged => report.unchanged += 1,
                    PullOutcome::Failed => report.errors += 1,
                }
            }

            match page_size {
                Some(size) if count > 0 && count == size && !self.is_cancelled() => page += 1,
                _ => break,
            }
        }

        info!(
            fetched = report.fetched,
            updated = report.updated,
            created = report.created,
            errors = report.errors,
            "pull finished"
        );
        Ok(report)
    }

    async fn pull_record(&self, contact: Value) -> PullOutcome {
        let record = match RemoteRecord::from_json(contact) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "skipping malformed contact");
                return PullOutcome::Failed;
            }
        };
        let remote_id = record.id.clone();

        let fields = map_remote_to_local(&record, &self.mapping);
        if fields.is_empty() {
            warn!(%remote_id, "contact has no mapped fields");
            return PullOutcome::Failed;
        }

        let (lead, outcome) = match self.leads.upsert_lead(&fields, &self.options.match_fields) {
            Ok(result) => result,
            Err(e) => {
                warn!(%remote_id, error = %e, "failed to store lead");
                return PullOutcome::Failed;
            }
        };
        let local_id = lead.id;

        let _guard = self.locks.acquire(local_id).await;
        let linked = self
            .ledger
            .upsert_link(&self.scope, &remote_id, local_id)
            .and_then(|mut link| self.ledger.touch_link(&mut link, Utc::now()));
        if let Err(e) = linked {
            warn!(%local_id, %remote_id, error = %e, "failed to link pulled contact");
            return PullOutcome::Failed;
        }

        debug!(%local_id, %remote_id, ?outcome, "contact pulled");
        match outcome {
            UpsertOutcome::Created => PullOutcome::Created,
            UpsertOutcome::Updated => PullOutcome::Updated,
            UpsertOutcome::Unchanged => PullOutcome::Unchanged,
        }
    }
}
