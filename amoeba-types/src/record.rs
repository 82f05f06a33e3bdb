//! Local and remote record representations.

use crate::ids::{LocalId, RemoteId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Flat local field map, keyed by local field name.
pub type FieldSet = BTreeMap<String, String>;

/// A row-shaped lead as returned by the ledger's batch queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLead {
    pub internal_entity_id: LocalId,
    pub fields: FieldSet,
}

/// A lead managed by the local lead store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LocalId,
    pub fields: FieldSet,
    pub date_modified: DateTime<Utc>,
    /// Set when the store created the lead in the call that returned it.
    #[serde(default, skip_serializing)]
    pub newly_created: bool,
}

impl Lead {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

/// A local record handed to the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalRecord {
    Raw(RawLead),
    Managed(Lead),
}

impl LocalRecord {
    /// Local id regardless of representation.
    pub fn id(&self) -> LocalId {
        match self {
            LocalRecord::Raw(raw) => raw.internal_entity_id,
            LocalRecord::Managed(lead) => lead.id,
        }
    }

    /// Field map regardless of representation.
    pub fn fields(&self) -> &FieldSet {
        match self {
            LocalRecord::Raw(raw) => &raw.fields,
            LocalRecord::Managed(lead) => &lead.fields,
        }
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields().get(key).map(String::as_str)
    }
}

impl From<Lead> for LocalRecord {
    fn from(lead: Lead) -> Self {
        LocalRecord::Managed(lead)
    }
}

impl From<RawLead> for LocalRecord {
    fn from(raw: RawLead) -> Self {
        LocalRecord::Raw(raw)
    }
}

/// A contact as represented by the remote CRM.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    pub id: RemoteId,
    /// Every key of the contact object except `id`.
    pub fields: Map<String, Value>,
}

impl RemoteRecord {
    /// Builds a record from one element of a retrieve response.
    ///
    /// Fails if the value is not an object or carries no usable `id`.
    pub fn from_json(value: Value) -> Result<Self> {
        let Value::Object(mut fields) = value else {
            return Err(Error::MalformedRecord(format!(
                "expected an object, got {}",
                json_kind(&value)
            )));
        };
        let id = fields
            .remove("id")
            .as_ref()
            .and_then(RemoteId::from_json)
            .ok_or_else(|| Error::MalformedRecord("missing contact id".to_string()))?;
        Ok(Self { id, fields })
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
