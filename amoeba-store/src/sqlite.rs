//! SQLite-backed ledger and lead store.
//!
//! Leads and links share one database file so the batch queries can be
//! answered with a single join.

use crate::error::{StoreError, StoreResult};
use crate::leads::{LeadStore, UpsertOutcome, match_key, merge_fields};
use crate::ledger::{IdentityLedger, project_fields};
use amoeba_types::{
    FieldSet, IdentityLink, Lead, LinkScope, LocalId, LocalRecord, RawLead, RemoteId,
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Persistent store backed by SQLite.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) a store at the given path.
    pub fn new(path: &str) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        debug!(path, "opened sqlite store");
        Ok(store)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS leads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                fields TEXT NOT NULL,
                date_modified TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS integration_entity (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                integration TEXT NOT NULL,
                integration_entity TEXT NOT NULL,
                integration_entity_id TEXT NOT NULL,
                internal_entity TEXT NOT NULL,
                internal_entity_id INTEGER NOT NULL,
                last_sync_date TEXT,
                UNIQUE(integration, integration_entity, internal_entity, internal_entity_id)
            );
            ",
        )?;
        Ok(())
    }
}

// ── Row decoding ─────────────────────────────────────────────────

fn parse_time(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidData(format!("bad timestamp {raw:?}: {e}")))
}

fn parse_fields(raw: &str) -> StoreResult<FieldSet> {
    Ok(serde_json::from_str(raw)?)
}

struct LeadRow {
    id: i64,
    fields: String,
    date_modified: String,
}

impl LeadRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            fields: row.get(1)?,
            date_modified: row.get(2)?,
        })
    }

    fn into_lead(self) -> StoreResult<Lead> {
        Ok(Lead {
            id: LocalId::new(self.id),
            fields: parse_fields(&self.fields)?,
            date_modified: parse_time(&self.date_modified)?,
            newly_created: false,
        })
    }
}

struct LinkRow {
    id: i64,
    remote_id: String,
    local_id: i64,
    last_sync_date: Option<String>,
}

impl LinkRow {
    const COLUMNS: &'static str = "id, integration_entity_id, internal_entity_id, last_sync_date";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            remote_id: row.get(1)?,
            local_id: row.get(2)?,
            last_sync_date: row.get(3)?,
        })
    }

    fn into_link(self, scope: &LinkScope) -> StoreResult<IdentityLink> {
        Ok(IdentityLink {
            id: self.id,
            scope: scope.clone(),
            local_id: LocalId::new(self.local_id),
            remote_id: RemoteId::new(self.remote_id),
            last_sync_date: self.last_sync_date.as_deref().map(parse_time).transpose()?,
        })
    }
}

// ── Identity ledger ──────────────────────────────────────────────

impl IdentityLedger for SqliteStore {
    fn find_link(&self, scope: &LinkScope, local_id: LocalId) -> StoreResult<Option<IdentityLink>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM integration_entity
                     WHERE integration = ?1 AND integration_entity = ?2
                       AND internal_entity = ?3 AND internal_entity_id = ?4",
                    LinkRow::COLUMNS
                ),
                params![
                    scope.integration,
                    scope.remote_entity,
                    scope.local_entity,
                    local_id.get()
                ],
                LinkRow::from_row,
            )
            .optional()?;
        row.map(|r| r.into_link(scope)).transpose()
    }

    fn find_creatable(
        &self,
        scope: &LinkScope,
        field_selector: &str,
    ) -> StoreResult<Vec<LocalRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT l.id, l.fields FROM leads l
             WHERE NOT EXISTS (
                 SELECT 1 FROM integration_entity ie
                 WHERE ie.integration = ?1 AND ie.integration_entity = ?2
                   AND ie.internal_entity = ?3 AND ie.internal_entity_id = l.id
             )
             ORDER BY l.id",
        )?;
        let rows = stmt
            .query_map(
                params![scope.integration, scope.remote_entity, scope.local_entity],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, fields)| {
                Ok(LocalRecord::Raw(RawLead {
                    internal_entity_id: LocalId::new(id),
                    fields: project_fields(&parse_fields(&fields)?, field_selector),
                }))
            })
            .collect()
    }

    fn find_updatable(
        &self,
        scope: &LinkScope,
        field_selector: &str,
    ) -> StoreResult<Vec<(LocalRecord, RemoteId)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT l.id, l.fields, ie.integration_entity_id FROM leads l
             JOIN integration_entity ie ON ie.internal_entity_id = l.id
             WHERE ie.integration = ?1 AND ie.integration_entity = ?2
               AND ie.internal_entity = ?3
             ORDER BY l.id",
        )?;
        let rows = stmt
            .query_map(
                params![scope.integration, scope.remote_entity, scope.local_entity],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, fields, remote_id)| {
                let record = LocalRecord::Raw(RawLead {
                    internal_entity_id: LocalId::new(id),
                    fields: project_fields(&parse_fields(&fields)?, field_selector),
                });
                Ok((record, RemoteId::new(remote_id)))
            })
            .collect()
    }

    fn upsert_link(
        &self,
        scope: &LinkScope,
        remote_id: &RemoteId,
        local_id: LocalId,
    ) -> StoreResult<IdentityLink> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO integration_entity
                (integration, integration_entity, integration_entity_id, internal_entity, internal_entity_id)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(integration, integration_entity, internal_entity, internal_entity_id)
             DO UPDATE SET integration_entity_id = excluded.integration_entity_id",
            params![
                scope.integration,
                scope.remote_entity,
                remote_id.as_str(),
                scope.local_entity,
                local_id.get()
            ],
        )?;
        let row = conn.query_row(
            &format!(
                "SELECT {} FROM integration_entity
                 WHERE integration = ?1 AND integration_entity = ?2
                   AND internal_entity = ?3 AND internal_entity_id = ?4",
                LinkRow::COLUMNS
            ),
            params![
                scope.integration,
                scope.remote_entity,
                scope.local_entity,
                local_id.get()
            ],
            LinkRow::from_row,
        )?;
        row.into_link(scope)
    }

    fn touch_link(&self, link: &mut IdentityLink, at: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE integration_entity SET last_sync_date = ?1 WHERE id = ?2",
            params![at.to_rfc3339(), link.id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("link {}", link.id)));
        }
        link.last_sync_date = Some(at);
        Ok(())
    }

    fn delete_link(&self, link: &IdentityLink) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM integration_entity WHERE id = ?1",
            params![link.id],
        )?;
        Ok(())
    }

    fn list_links(&self, scope: &LinkScope) -> StoreResult<Vec<IdentityLink>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM integration_entity
             WHERE integration = ?1 AND integration_entity = ?2 AND internal_entity = ?3
             ORDER BY internal_entity_id",
            LinkRow::COLUMNS
        ))?;
        let rows = stmt
            .query_map(
                params![scope.integration, scope.remote_entity, scope.local_entity],
                LinkRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(|r| r.into_link(scope)).collect()
    }
}

// ── Lead store ───────────────────────────────────────────────────

impl SqliteStore {
    fn lead_by_id(conn: &Connection, id: i64) -> StoreResult<Option<Lead>> {
        let row = conn
            .query_row(
                "SELECT id, fields, date_modified FROM leads WHERE id = ?1",
                params![id],
                LeadRow::from_row,
            )
            .optional()?;
        row.map(LeadRow::into_lead).transpose()
    }

    fn insert(conn: &Connection, fields: FieldSet) -> StoreResult<Lead> {
        let now = Utc::now();
        conn.execute(
            "INSERT INTO leads (fields, date_modified) VALUES (?1, ?2)",
            params![serde_json::to_string(&fields)?, now.to_rfc3339()],
        )?;
        Ok(Lead {
            id: LocalId::new(conn.last_insert_rowid()),
            fields,
            date_modified: now,
            newly_created: true,
        })
    }
}

impl LeadStore for SqliteStore {
    fn get_lead(&self, id: LocalId) -> StoreResult<Option<Lead>> {
        let conn = self.conn()?;
        Self::lead_by_id(&conn, id.get())
    }

    fn insert_lead(&self, fields: FieldSet) -> StoreResult<Lead> {
        let conn = self.conn()?;
        Self::insert(&conn, fields)
    }

    fn insert_leads(&self, batch: Vec<FieldSet>) -> StoreResult<Vec<Lead>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let leads = batch
            .into_iter()
            .map(|fields| Self::insert(&tx, fields))
            .collect::<StoreResult<Vec<_>>>()?;
        tx.commit()?;
        debug!(count = leads.len(), "inserted lead batch");
        Ok(leads)
    }

    fn upsert_lead(
        &self,
        fields: &FieldSet,
        match_keys: &[String],
    ) -> StoreResult<(Lead, UpsertOutcome)> {
        let conn = self.conn()?;

        let existing = match match_key(fields, match_keys) {
            Some((key, value)) => {
                let path = format!("$.\"{}\"", key.replace('"', "\\\""));
                conn.query_row(
                    "SELECT id, fields, date_modified FROM leads
                     WHERE lower(trim(json_extract(fields, ?1))) = lower(?2)
                     ORDER BY id LIMIT 1",
                    params![path, value],
                    LeadRow::from_row,
                )
                .optional()?
            }
            None => None,
        };

        let Some(row) = existing else {
            let lead = Self::insert(&conn, fields.clone())?;
            return Ok((lead, UpsertOutcome::Created));
        };

        let mut lead = row.into_lead()?;
        if !merge_fields(&mut lead.fields, fields) {
            return Ok((lead, UpsertOutcome::Unchanged));
        }
        lead.date_modified = Utc::now();
        conn.execute(
            "UPDATE leads SET fields = ?1, date_modified = ?2 WHERE id = ?3",
            params![
                serde_json::to_string(&lead.fields)?,
                lead.date_modified.to_rfc3339(),
                lead.id.get()
            ],
        )?;
        Ok((lead, UpsertOutcome::Updated))
    }

    fn lead_count(&self) -> StoreResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM leads", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }
}
