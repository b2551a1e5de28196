//! Snapshot differencing: what changed between two polls.
//!
//! Only active properties are compared. Records that disappeared from the
//! latest snapshot produce nothing; there is no deletion signal.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};
use tracing::debug;

use crate::model::{ChangeSet, Changes, Record};

/// Compare `old` and `new` snapshots over the `active` property names.
pub fn diff(old: &[Record], new: &[Record], active: &[String]) -> Changes {
    let old_by_key: HashMap<String, &BTreeMap<String, Value>> =
        old.iter().map(|r| (r.key(), &r.properties)).collect();

    let mut changes = Changes::new();
    for record in new {
        let key = record.key();

        let Some(before) = old_by_key.get(&key) else {
            debug!(record = %key, "new record");
            changes.insert(key.clone(), ChangeSet::NewPage(key));
            continue;
        };

        let mut old_values = BTreeMap::new();
        let mut new_values = BTreeMap::new();
        for name in active {
            let Some(after) = record.properties.get(name) else {
                continue;
            };
            match before.get(name) {
                Some(previous) if previous == after => {}
                previous => {
                    debug!(record = %key, property = %name, "property changed");
                    let previous = previous.cloned().unwrap_or_else(|| Value::Object(Map::new()));
                    old_values.insert(name.clone(), previous);
                    new_values.insert(name.clone(), after.clone());
                }
            }
        }

        if !new_values.is_empty() {
            changes.insert(
                key,
                ChangeSet::PropertyChanged {
                    old: old_values,
                    new: new_values,
                },
            );
        }
    }

    changes
}
