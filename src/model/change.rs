//! Change sets: the per-record delta between two snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What changed for one record between the previous and current poll.
///
/// Serialized externally tagged, which is also the webhook wire shape:
///
/// ```text
/// { "new_page": "<record key>" }
/// { "property_changed": { "old": { ... }, "new": { ... } } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSet {
    /// The record was absent from the previous snapshot.
    NewPage(String),

    /// One or more active properties differ.
    ///
    /// `old` holds an empty object for properties that were newly present.
    PropertyChanged {
        old: BTreeMap<String, Value>,
        new: BTreeMap<String, Value>,
    },
}

impl ChangeSet {
    /// A single-property change, used to evaluate rollup array elements.
    pub fn single(property: &str, value: Value) -> Self {
        Self::PropertyChanged {
            old: BTreeMap::new(),
            new: BTreeMap::from([(property.to_string(), value)]),
        }
    }
}

/// Change sets for one poll cycle, keyed by normalized record id.
pub type Changes = BTreeMap<String, ChangeSet>;
