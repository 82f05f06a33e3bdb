//! Selection clause for the store's batch lead queries.

/// Table alias the lead store's queries use for the lead table.
pub const QUERY_FIELD_PREFIX: &str = "l.";

/// Joins field names as `"{prefix}a, {prefix}b"`. Empty input yields `""`.
pub fn build_query_field_list<S: AsRef<str>>(prefix: &str, fields: &[S]) -> String {
    fields
        .iter()
        .map(|f| format!("{prefix}{}", f.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Splits a selection clause back into bare field names.
pub fn parse_query_field_list(prefix: &str, selector: &str) -> Vec<String> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.strip_prefix(prefix).unwrap_or(s).to_string())
        .collect()
}
