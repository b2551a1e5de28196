//! Records: one externally stored entity and its raw properties.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A record as returned by the record store's query endpoint.
///
/// Properties are kept raw, keyed by property name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_edited_time: Option<String>,

    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl Record {
    /// The record id with separators stripped, stable across polls.
    pub fn key(&self) -> String {
        normalize_id(&self.id)
    }
}

/// Strip separators from a record or collection id.
///
/// The store accepts both dashed and undashed UUIDs; map keys and file names
/// always use the undashed form.
pub fn normalize_id(id: &str) -> String {
    id.replace('-', "")
}
