//! Configured pairing of local and remote field keys.

use crate::country::resolve_country_name;
use crate::fields::{ADDRESS_KEY, COUNTRY_CODE_FIELD};
use amoeba_types::{FieldSet, RemoteRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One local field and the remote key it is sent as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPair {
    pub local: String,
    pub remote: String,
}

impl FieldPair {
    pub fn new(local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
        }
    }
}

/// Ordered local/remote key pairs, as configured in `lead_fields`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMapping(Vec<FieldPair>);

impl FieldMapping {
    pub fn new(pairs: Vec<FieldPair>) -> Self {
        Self(pairs)
    }

    /// Builds a mapping where local and remote keys are identical.
    pub fn identity<S: AsRef<str>>(keys: &[S]) -> Self {
        Self(
            keys.iter()
                .map(|k| FieldPair::new(k.as_ref(), k.as_ref()))
                .collect(),
        )
    }

    pub fn pairs(&self) -> &[FieldPair] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Local field names in configured order.
    pub fn local_fields(&self) -> Vec<&str> {
        self.0.iter().map(|p| p.local.as_str()).collect()
    }

    pub fn local_for_remote(&self, remote: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|p| p.remote == remote)
            .map(|p| p.local.as_str())
    }
}

/// Projects a local field set through the mapping, keyed by remote key.
///
/// Missing and empty values are skipped.
pub fn populate_lead_fields(fields: &FieldSet, mapping: &FieldMapping) -> FieldSet {
    mapping
        .pairs()
        .iter()
        .filter_map(|pair| {
            fields
                .get(&pair.local)
                .filter(|v| !v.trim().is_empty())
                .map(|v| (pair.remote.clone(), v.clone()))
        })
        .collect()
}

/// Translates a remote contact into a local field set.
///
/// `{"value": ...}` wrappers are unwrapped, the address composite is
/// flattened into its sub-fields and country codes are turned back into
/// display names. Only mapped remote keys are kept, renamed to their local
/// keys.
pub fn map_remote_to_local(record: &RemoteRecord, mapping: &FieldMapping) -> FieldSet {
    let mut flat = FieldSet::new();
    for (key, value) in &record.fields {
        if key == ADDRESS_KEY {
            flatten_address(value, &mut flat);
        } else if let Some(text) = value_text(value) {
            flat.insert(key.clone(), text);
        }
    }

    mapping
        .pairs()
        .iter()
        .filter_map(|pair| {
            flat.get(&pair.remote)
                .map(|v| (pair.local.clone(), v.clone()))
        })
        .collect()
}

fn flatten_address(value: &Value, out: &mut FieldSet) {
    let parts = match value.get("value") {
        Some(inner) => inner,
        None => value,
    };
    let Some(parts) = parts.as_object() else {
        return;
    };
    for (sub, raw) in parts {
        let Some(text) = value_text(raw) else {
            continue;
        };
        let text = if sub == COUNTRY_CODE_FIELD {
            resolve_country_name(&text).map(str::to_string).unwrap_or(text)
        } else {
            text
        };
        out.insert(sub.clone(), text);
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) => map.get("value").and_then(value_text),
        Value::Null | Value::Array(_) => None,
    }
}
