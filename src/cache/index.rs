//! Secondary Index Module
//!
//! Key encoding and write-op helpers for indexed attributes. Index entries
//! are ordinary rows in the primary store under the `idx:` namespace, so
//! they ride in the same transactional batch as the record write they
//! belong to, and range/condition search over the cache is a plain ordered
//! scan that never touches the source adapter.

use serde_json::Value;

use crate::store::{RowInit, WriteOp};

/// Namespace prefix for index rows.
pub const INDEX_PREFIX: &str = "idx:";

// == Key Encoding ==
/// Builds the store key for one index entry:
/// `idx:{attribute}:{encoded component}:{primary key}`.
pub fn index_key(attribute: &str, component: &str, primary_key: &str) -> String {
    format!("{INDEX_PREFIX}{attribute}:{component}:{primary_key}")
}

/// Prefix under which every entry for one attribute sorts.
pub fn attribute_prefix(attribute: &str) -> String {
    format!("{INDEX_PREFIX}{attribute}:")
}

/// Encodes an attribute value into an order-preserving string component.
///
/// Strings sort as themselves; non-negative numbers are zero-padded so
/// lexicographic order matches numeric order. Other JSON shapes are not
/// indexable and return `None`.
pub fn encode_component(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Some(format!("{u:020}"))
            } else {
                n.as_f64().filter(|f| *f >= 0.0).map(|f| format!("{f:024.6}"))
            }
        }
        _ => None,
    }
}

// == Batch Helpers ==
/// Write ops inserting index entries for `value`'s indexed attributes.
///
/// Index rows point back at the primary key and never expire on their own;
/// they are removed in the same unit of work that removes (or rewrites) the
/// record they belong to.
pub fn insert_ops(attributes: &[String], primary_key: &str, value: &Value) -> Vec<WriteOp> {
    entry_keys(attributes, primary_key, value)
        .into_iter()
        .map(|key| WriteOp::Put {
            key,
            row: RowInit {
                value: Some(Value::String(primary_key.to_string())),
                expires_at: u64::MAX,
                evict_at: u64::MAX,
            },
        })
        .collect()
}

/// Write ops removing the index entries belonging to a stored value.
pub fn remove_ops(attributes: &[String], primary_key: &str, value: &Value) -> Vec<WriteOp> {
    entry_keys(attributes, primary_key, value)
        .into_iter()
        .map(|key| WriteOp::Delete { key })
        .collect()
}

fn entry_keys(attributes: &[String], primary_key: &str, value: &Value) -> Vec<String> {
    let Value::Object(fields) = value else {
        return Vec::new();
    };
    attributes
        .iter()
        .filter_map(|attribute| {
            let component = fields.get(attribute).and_then(encode_component)?;
            Some(index_key(attribute, &component, primary_key))
        })
        .collect()
}
