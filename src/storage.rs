//! Local persistence for collection snapshots.
//!
//! Each watched collection has one JSON file under the storage root:
//!
//! ```text
//! <root>/<collection_id>.json   # JSON array of records
//! ```
//!
//! Merging is additive: records absent from the latest query stay in the
//! snapshot, so a narrowing query filter never looks like a deletion.

use std::collections::HashMap;
use std::{fs, io, path::PathBuf};

use crate::model::{Record, normalize_id};

/// Errors that can occur during snapshot operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no snapshot for collection: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, StoreError>;

/// File-based storage for collection snapshots.
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Creates a new store rooted at the given directory.
    ///
    /// The directory is created if it doesn't exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Whether a snapshot has ever been saved for the collection.
    pub fn exists(&self, collection: &str) -> bool {
        self.path(collection).is_file()
    }

    /// Loads the stored snapshot for a collection.
    pub fn load(&self, collection: &str) -> Result<Vec<Record>> {
        let path = self.path(collection);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(normalize_id(collection)));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&json)?)
    }

    /// Replaces the stored snapshot for a collection.
    ///
    /// Written to a sibling temp file first so a crash never leaves a
    /// truncated snapshot behind.
    pub fn save(&self, collection: &str, records: &[Record]) -> Result<()> {
        let path = self.path(collection);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(records)?;
        fs::write(&tmp, json)?;
        fs::rename(tmp, path)?;
        Ok(())
    }

    /// Overlays `latest` onto the stored snapshot and persists the result.
    ///
    /// Records in `latest` replace stored records with the same id; new ones
    /// are appended; stored records missing from `latest` are kept.
    /// Returns the merged snapshot.
    pub fn merge(&self, collection: &str, latest: Vec<Record>) -> Result<Vec<Record>> {
        let mut merged = match self.load(collection) {
            Ok(records) => records,
            Err(StoreError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };

        let mut index: HashMap<String, usize> = merged
            .iter()
            .enumerate()
            .map(|(i, r)| (r.key(), i))
            .collect();

        for record in latest {
            let key = record.key();
            match index.get(&key) {
                Some(&i) => merged[i] = record,
                None => {
                    index.insert(key, merged.len());
                    merged.push(record);
                }
            }
        }

        self.save(collection, &merged)?;
        Ok(merged)
    }

    /// Move an unreadable snapshot aside so the collection is seeded afresh.
    ///
    /// Returns where the old file now lives.
    pub fn quarantine(&self, collection: &str) -> Result<PathBuf> {
        let path = self.path(collection);
        let aside = path.with_extension("json.corrupt");
        fs::rename(&path, &aside)?;
        Ok(aside)
    }

    fn path(&self, collection: &str) -> PathBuf {
        self.root.join(format!("{}.json", normalize_id(collection)))
    }
}
