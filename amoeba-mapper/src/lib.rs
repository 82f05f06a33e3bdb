//! Field translation between local leads and AmoebaCRM contacts.
//!
//! - [`FieldMapper`] turns a flat local field set into the CRM's
//!   `{key: {"value": ...}}` payload, folding address sub-fields into a
//!   single `address` composite.
//! - [`resolve_country_code`] is the compiled-in country lookup used for
//!   the `country_code` sub-field.
//! - [`FieldMapping`] is the configured local/remote key pairing, applied
//!   on both push ([`populate_lead_fields`]) and pull
//!   ([`map_remote_to_local`]).
//! - [`build_query_field_list`] renders the configured local fields as a
//!   selection clause for the store's batch queries.

mod country;
mod fields;
mod mapping;
mod query;

pub use country::{country_count, resolve_country_code, resolve_country_name};
pub use fields::{
    ADDRESS_FIELDS, ADDRESS_KEY, COUNTRY_CODE_FIELD, FieldContent, FieldMapper, FieldValue,
    MappedFields, MappingGap, MappingGapPolicy, RemotePayload, map_local_to_remote,
};
pub use mapping::{FieldMapping, FieldPair, map_remote_to_local, populate_lead_fields};
pub use query::{QUERY_FIELD_PREFIX, build_query_field_list, parse_query_field_list};

use thiserror::Error;

/// Errors raised while translating fields.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    /// A value could not be translated and the policy is `Reject`.
    #[error("cannot translate {field} value {value:?}")]
    Gap { field: String, value: String },
}
