//! Local field set to CRM payload translation.

use crate::MappingError;
use crate::country::resolve_country_code;
use amoeba_types::FieldSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Local fields that are folded into the `address` composite.
pub const ADDRESS_FIELDS: [&str; 6] = [
    "country_code",
    "administrative_area",
    "locality",
    "postal_code",
    "address_line1",
    "address_line2",
];

/// Payload key of the address composite.
pub const ADDRESS_KEY: &str = "address";

/// Address sub-field that carries a country and goes through the lookup.
pub const COUNTRY_CODE_FIELD: &str = "country_code";

/// Content of a payload entry: a plain value or the address composite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldContent {
    Text(String),
    Composite(BTreeMap<String, String>),
}

/// A payload entry, serialised as `{"value": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldValue {
    pub value: FieldContent,
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            value: FieldContent::Text(value.into()),
        }
    }

    pub fn composite(parts: BTreeMap<String, String>) -> Self {
        Self {
            value: FieldContent::Composite(parts),
        }
    }
}

/// Request body for create and update calls.
pub type RemotePayload = BTreeMap<String, FieldValue>;

/// What to do with a value that has no remote translation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingGapPolicy {
    /// Leave the value out of the payload.
    #[default]
    Drop,
    /// Fail the record.
    Reject,
    /// Send the given code instead.
    DefaultFill(String),
}

/// A value that could not be translated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingGap {
    pub field: String,
    pub value: String,
}

/// Output of [`FieldMapper::map`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappedFields {
    pub payload: RemotePayload,
    pub gaps: Vec<MappingGap>,
}

/// Translates local field sets into CRM payloads.
#[derive(Debug, Clone, Default)]
pub struct FieldMapper {
    policy: MappingGapPolicy,
}

impl FieldMapper {
    pub fn with_policy(policy: MappingGapPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &MappingGapPolicy {
        &self.policy
    }

    /// Maps a field set, applying the gap policy.
    ///
    /// Only `Reject` can fail; under the other policies every gap is
    /// reported in [`MappedFields::gaps`].
    pub fn map(&self, fields: &FieldSet) -> Result<MappedFields, MappingError> {
        let mapped = self.map_lenient(fields);
        if self.policy == MappingGapPolicy::Reject {
            if let Some(gap) = mapped.gaps.first() {
                return Err(MappingError::Gap {
                    field: gap.field.clone(),
                    value: gap.value.clone(),
                });
            }
        }
        Ok(mapped)
    }

    fn map_lenient(&self, fields: &FieldSet) -> MappedFields {
        let mut payload = RemotePayload::new();
        let mut address = BTreeMap::new();
        let mut gaps = Vec::new();

        for (key, value) in fields {
            if !ADDRESS_FIELDS.contains(&key.as_str()) {
                payload.insert(key.clone(), FieldValue::text(value.clone()));
                continue;
            }
            if key != COUNTRY_CODE_FIELD {
                address.insert(key.clone(), value.clone());
                continue;
            }
            match resolve_country_code(value) {
                Some(code) => {
                    address.insert(key.clone(), code.to_string());
                }
                None => {
                    gaps.push(MappingGap {
                        field: key.clone(),
                        value: value.clone(),
                    });
                    match &self.policy {
                        MappingGapPolicy::DefaultFill(code) => {
                            address.insert(key.clone(), code.clone());
                        }
                        MappingGapPolicy::Drop => {
                            warn!(field = %key, value = %value, "unknown country dropped from payload");
                        }
                        MappingGapPolicy::Reject => {}
                    }
                }
            }
        }

        if !address.is_empty() {
            payload.insert(ADDRESS_KEY.to_string(), FieldValue::composite(address));
        }

        MappedFields { payload, gaps }
    }
}

/// Maps a field set with the default `Drop` policy.
///
/// Unresolvable country names are left out of the payload without error.
pub fn map_local_to_remote(fields: &FieldSet) -> RemotePayload {
    FieldMapper::default().map_lenient(fields).payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_serializes_with_value_wrappers() {
        let mut fields = FieldSet::new();
        fields.insert("email".into(), "a@b.com".into());
        fields.insert("locality".into(), "Paris".into());

        let payload = map_local_to_remote(&fields);
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({
                "address": {"value": {"locality": "Paris"}},
                "email": {"value": "a@b.com"}
            })
        );
    }

    #[test]
    fn gap_policy_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: MappingGapPolicy,
        }
        let w: Wrapper = toml::from_str(r#"policy = "reject""#).unwrap();
        assert_eq!(w.policy, MappingGapPolicy::Reject);
        let w: Wrapper = toml::from_str(r#"policy = { default_fill = "US" }"#).unwrap();
        assert_eq!(w.policy, MappingGapPolicy::DefaultFill("US".into()));
    }
}
