//! The poll loop: fetch, diff, evaluate, dispatch, persist.
//!
//! A [`Listener`] is one long-running session. It owns the parsed rule set
//! and the per-collection lookback state; its collaborators are borrowed so
//! tests can drive it with in-memory fakes.
//!
//! Per collection, per cycle:
//!
//! 1. Load the stored snapshot. A snapshot that no longer parses is moved
//!    aside and the collection is skipped, so the next cycle reseeds it.
//! 2. Query the record store with each rule's content filter, falling back
//!    to the lookback window for rules without one.
//! 3. With no stored snapshot, seed the store and stop (nothing fires).
//! 4. Otherwise diff against the snapshot over the active properties,
//!    evaluate every rule against every change set and dispatch matches.
//! 5. Merge the query result into the store.
//!
//! A failed query skips the collection until the next cycle. A failed store
//! write is fatal: the same changes would fire again on every cycle.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, SystemTime};

use jiff::{SignedDuration, Timestamp};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::diff::diff;
use crate::dispatch::{Notifier, Outcome, dispatch};
use crate::evaluate::{Clock, Context, evaluate};
use crate::model::{Collection, RuleFile, collections};
use crate::source::RecordSource;
use crate::storage::{SnapshotStore, StoreError};

/// Granularity of the shutdown check while sleeping between cycles.
const SLEEP_STEP: Duration = Duration::from_millis(200);

/// Errors that stop the listener.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to read rules from {}: {message}", path.display())]
    Rules { path: PathBuf, message: String },

    #[error("snapshot store failed: {0}")]
    Store(#[from] StoreError),
}

/// Timing and file settings for a session.
#[derive(Debug, Clone)]
pub struct Settings {
    pub rules_path: PathBuf,
    pub poll_interval: Duration,
    pub initial_lookback: SignedDuration,
    pub lookback_padding: SignedDuration,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            rules_path: config.rules_path.clone(),
            poll_interval: config.poll_interval(),
            initial_lookback: SignedDuration::from_mins(config.initial_lookback_minutes),
            lookback_padding: SignedDuration::from_mins(config.lookback_padding_minutes),
        }
    }
}

/// Read and parse the rules file.
pub fn read_rules(path: &Path) -> Result<RuleFile, ListenerError> {
    let failed = |message: String| ListenerError::Rules {
        path: path.to_path_buf(),
        message,
    };
    let json = fs::read_to_string(path).map_err(|e| failed(e.to_string()))?;
    serde_json::from_str(&json).map_err(|e| failed(e.to_string()))
}

fn modified(path: &Path) -> io::Result<SystemTime> {
    fs::metadata(path)?.modified()
}

/// Totals for one cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub collections: usize,
    pub skipped: usize,
    pub changes: usize,
    pub fired: usize,
}

/// Result of polling one collection.
enum Poll {
    Seeded,
    Evaluated { changes: usize, fired: usize },
    Skipped,
}

/// A polling session.
pub struct Listener<'a> {
    source: &'a dyn RecordSource,
    store: &'a SnapshotStore,
    notifier: &'a dyn Notifier,
    clock: &'a dyn Clock,
    settings: Settings,
    collections: Vec<Collection>,
    rules_modified: Option<SystemTime>,
    last_success: HashMap<String, Timestamp>,
    started: Timestamp,
}

impl<'a> Listener<'a> {
    /// Start a session. The rules file must be readable.
    pub fn new(
        source: &'a dyn RecordSource,
        store: &'a SnapshotStore,
        notifier: &'a dyn Notifier,
        clock: &'a dyn Clock,
        settings: Settings,
    ) -> Result<Self, ListenerError> {
        let rules_modified = modified(&settings.rules_path).ok();
        let file = read_rules(&settings.rules_path)?;
        let collections = collections(&file);
        for collection in &collections {
            info!(collection = %collection.id, rules = collection.rules.len(), "watching");
        }

        Ok(Self {
            source,
            store,
            notifier,
            clock,
            started: clock.now().timestamp(),
            settings,
            collections,
            rules_modified,
            last_success: HashMap::new(),
        })
    }

    /// Replace the rule set if the rules file changed since it was last read.
    ///
    /// A file that fails to read or parse leaves the current rules in place.
    pub fn reload_rules_if_changed(&mut self) {
        let path = &self.settings.rules_path;
        let current = match modified(path) {
            Ok(time) => time,
            Err(error) => {
                warn!(path = %path.display(), %error, "cannot stat rules file, keeping current rules");
                return;
            }
        };
        if self.rules_modified == Some(current) {
            return;
        }

        match read_rules(path) {
            Ok(file) => {
                self.collections = collections(&file);
                info!(collections = self.collections.len(), "rules reloaded");
            }
            Err(error) => warn!(%error, "keeping current rules"),
        }
        self.rules_modified = Some(current);
    }

    /// Poll until `shutdown` is set. Returns early only on a fatal error.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<(), ListenerError> {
        while !shutdown.load(Ordering::SeqCst) {
            self.run_cycle()?;

            let mut remaining = self.settings.poll_interval;
            while !remaining.is_zero() && !shutdown.load(Ordering::SeqCst) {
                let step = remaining.min(SLEEP_STEP);
                thread::sleep(step);
                remaining = remaining.saturating_sub(step);
            }
        }
        info!("shutdown requested");
        Ok(())
    }

    /// Run one cycle over every watched collection.
    pub fn run_cycle(&mut self) -> Result<CycleSummary, ListenerError> {
        self.reload_rules_if_changed();

        let mut summary = CycleSummary::default();
        let mut succeeded = Vec::new();
        for collection in &self.collections {
            let started = self.clock.now().timestamp();
            summary.collections += 1;
            match self.poll(collection)? {
                Poll::Skipped => summary.skipped += 1,
                Poll::Seeded => succeeded.push((collection.id.clone(), started)),
                Poll::Evaluated { changes, fired } => {
                    summary.changes += changes;
                    summary.fired += fired;
                    succeeded.push((collection.id.clone(), started));
                }
            }
        }
        self.last_success.extend(succeeded);

        info!(
            collections = summary.collections,
            skipped = summary.skipped,
            changes = summary.changes,
            fired = summary.fired,
            "cycle complete"
        );
        Ok(summary)
    }

    fn poll(&self, collection: &Collection) -> Result<Poll, ListenerError> {
        let id = collection.id.as_str();
        let seeding = !self.store.exists(id);

        let previous = if seeding {
            Vec::new()
        } else {
            match self.store.load(id) {
                Ok(records) => records,
                Err(StoreError::Json(error)) => {
                    let aside = self.store.quarantine(id)?;
                    error!(
                        collection = %id, %error, moved_to = %aside.display(),
                        "snapshot unreadable, reseeding next cycle"
                    );
                    return Ok(Poll::Skipped);
                }
                Err(error) => {
                    error!(collection = %id, %error, "failed to load snapshot, skipping");
                    return Ok(Poll::Skipped);
                }
            }
        };

        let filter = self.query_filter(collection, seeding);
        let filter_properties = collection.filter_properties();

        let records = match self
            .source
            .query(id, filter_properties.as_deref(), filter.as_ref())
        {
            Ok(records) => records,
            Err(error) => {
                error!(collection = %id, %error, "query failed, keeping previous snapshot");
                return Ok(Poll::Skipped);
            }
        };

        if seeding {
            let merged = self.store.merge(id, records)?;
            info!(collection = %id, records = merged.len(), "seeded snapshot");
            return Ok(Poll::Seeded);
        }

        let active = collection.active_properties();
        let changes = diff(&previous, &records, &active);
        debug!(collection = %id, records = records.len(), changes = changes.len(), "diffed");

        let ctx = Context {
            source: self.source,
            clock: self.clock,
        };
        let mut fired = 0;
        for (key, change) in &changes {
            for rule in &collection.rules {
                if !evaluate(&rule.trigger, key, change, &ctx) {
                    continue;
                }
                let Outcome { delivered, failed } =
                    dispatch(&rule.actions, key, change, self.notifier);
                info!(collection = %id, rule = %rule.uid, record = %key, delivered, failed, "rule fired");
                fired += 1;
            }
        }

        self.store.merge(id, records)?;
        Ok(Poll::Evaluated {
            changes: changes.len(),
            fired,
        })
    }

    /// The query filter covering every rule of a collection.
    ///
    /// Each rule contributes its own content filter, or the lookback window
    /// when it has none. While seeding there is no lookback window, so a rule
    /// without a filter means fetching everything.
    fn query_filter(&self, collection: &Collection, seeding: bool) -> Option<Value> {
        let lookback = (!seeding).then(|| self.lookback_filter(&collection.id));
        if collection.rules.is_empty() {
            return lookback;
        }

        let mut filters: Vec<Value> = Vec::new();
        for rule in &collection.rules {
            let filter = match (&rule.content_filter, &lookback) {
                (Some(filter), _) | (None, Some(filter)) => filter,
                (None, None) => return None,
            };
            if !filters.contains(filter) {
                filters.push(filter.clone());
            }
        }
        combine_filters(filters)
    }

    /// Records edited since the last successful poll, with padding.
    fn lookback_filter(&self, collection: &str) -> Value {
        let since = match self.last_success.get(collection) {
            Some(last) => last
                .checked_sub(self.settings.lookback_padding)
                .unwrap_or(*last),
            None => self
                .started
                .checked_sub(self.settings.initial_lookback)
                .unwrap_or(self.started),
        };
        json!({
            "timestamp": "last_edited_time",
            "last_edited_time": {"on_or_after": since.to_string()},
        })
    }
}

/// One filter is used as is; several are `or`ed.
fn combine_filters(mut filters: Vec<Value>) -> Option<Value> {
    match filters.len() {
        0 => None,
        1 => filters.pop(),
        _ => Some(json!({ "or": filters })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::fs::File;

    use jiff::Zoned;
    use tempfile::TempDir;

    use crate::dispatch::tests::{RecordingNotifier, Sent};
    use crate::model::{ChangeSet, Record};
    use crate::source::ApiError;

    const COLLECTION: &str = "db1";

    /// One call to [`FakeSource::query`].
    #[derive(Debug, Clone, PartialEq)]
    struct Query {
        filter_properties: Option<Vec<String>>,
        filter: Option<Value>,
    }

    /// Serves queued query results in order.
    #[derive(Default)]
    struct FakeSource {
        responses: RefCell<VecDeque<Result<Vec<Record>, ApiError>>>,
        queries: RefCell<Vec<Query>>,
    }

    impl FakeSource {
        fn respond(&self, response: Result<Vec<Record>, ApiError>) {
            self.responses.borrow_mut().push_back(response);
        }
    }

    impl RecordSource for FakeSource {
        fn query(
            &self,
            _collection: &str,
            filter_properties: Option<&[String]>,
            content_filter: Option<&Value>,
        ) -> Result<Vec<Record>, ApiError> {
            self.queries.borrow_mut().push(Query {
                filter_properties: filter_properties.map(<[String]>::to_vec),
                filter: content_filter.cloned(),
            });
            self.responses
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        fn property_items(&self, _: &str, _: &str) -> Result<Vec<Value>, ApiError> {
            Ok(Vec::new())
        }

        fn update_record(&self, _: &str, _: &Value) -> Result<(), ApiError> {
            Ok(())
        }
    }

    struct FixedClock(Zoned);

    impl Clock for FixedClock {
        fn now(&self) -> Zoned {
            self.0.clone()
        }
    }

    fn clock() -> FixedClock {
        FixedClock("2026-10-14T12:00:00+00:00[UTC]".parse().unwrap())
    }

    fn record(id: &str, status: &str) -> Record {
        Record {
            id: id.to_string(),
            created_time: None,
            last_edited_time: None,
            properties: serde_json::from_value(json!({
                "Status": {"id": "st", "type": "select", "select": {"name": status}},
            }))
            .unwrap(),
        }
    }

    /// Temp directory holding the rules file and the store.
    struct Fixture {
        dir: TempDir,
        store: SnapshotStore,
    }

    impl Fixture {
        fn new(rules: &Value) -> Self {
            let dir = TempDir::new().unwrap();
            let store = SnapshotStore::new(dir.path().join("storage")).unwrap();
            let fixture = Self { dir, store };
            fixture.write_rules(rules, SystemTime::UNIX_EPOCH + Duration::from_secs(1));
            fixture
        }

        fn rules_path(&self) -> PathBuf {
            self.dir.path().join("rules.json")
        }

        fn write_rules(&self, rules: &Value, modified: SystemTime) {
            fs::write(self.rules_path(), rules.to_string()).unwrap();
            File::options()
                .write(true)
                .open(self.rules_path())
                .unwrap()
                .set_modified(modified)
                .unwrap();
        }

        fn settings(&self) -> Settings {
            Settings {
                rules_path: self.rules_path(),
                poll_interval: Duration::ZERO,
                initial_lookback: SignedDuration::from_mins(45),
                lookback_padding: SignedDuration::from_mins(10),
            }
        }
    }

    fn in_progress_rules() -> Value {
        json!({ COLLECTION: [{
            "uid": "r1",
            "trigger": {"property": "Status", "select": {"equals": "In Progress"}},
            "action": {"webhook": ["http://x"]}
        }]})
    }

    #[test]
    fn status_change_fires_webhook_once_and_merges_snapshot() {
        let fixture = Fixture::new(&in_progress_rules());
        fixture
            .store
            .save(COLLECTION, &[record("r-1", "Queued"), record("r-2", "Queued")])
            .unwrap();

        let source = FakeSource::default();
        source.respond(Ok(vec![record("r-1", "In Progress")]));
        let notifier = RecordingNotifier::default();
        let clock = clock();
        let mut listener =
            Listener::new(&source, &fixture.store, &notifier, &clock, fixture.settings()).unwrap();

        let summary = listener.run_cycle().unwrap();
        assert_eq!(summary.changes, 1);
        assert_eq!(summary.fired, 1);

        let expected = ChangeSet::PropertyChanged {
            old: [("Status".to_string(), record("r1", "Queued").properties["Status"].clone())].into(),
            new: [("Status".to_string(), record("r1", "In Progress").properties["Status"].clone())]
                .into(),
        };
        assert_eq!(
            *notifier.sent.borrow(),
            [Sent::Webhook {
                url: "http://x".into(),
                payload: json!({ "r1": expected }),
            }]
        );
        assert_eq!(
            fixture.store.load(COLLECTION).unwrap(),
            [record("r-1", "In Progress"), record("r-2", "Queued")]
        );
    }

    #[test]
    fn first_poll_seeds_store_without_firing() {
        let rules = json!({ COLLECTION: [{
            "trigger": {"created": {}},
            "action": {"webhook": ["http://x"]}
        }]});
        let fixture = Fixture::new(&rules);
        let source = FakeSource::default();
        source.respond(Ok(vec![record("r-1", "Queued"), record("r-2", "Done")]));
        let notifier = RecordingNotifier::default();
        let clock = clock();
        let mut listener =
            Listener::new(&source, &fixture.store, &notifier, &clock, fixture.settings()).unwrap();

        let summary = listener.run_cycle().unwrap();
        assert_eq!(summary.fired, 0);
        assert!(notifier.sent.borrow().is_empty());
        assert_eq!(
            fixture.store.load(COLLECTION).unwrap(),
            [record("r-1", "Queued"), record("r-2", "Done")]
        );
        // Seeding fetches everything, not just recent edits.
        assert_eq!(source.queries.borrow()[0].filter, None);
    }

    #[test]
    fn new_record_after_seeding_fires_created_rule() {
        let rules = json!({ COLLECTION: [{
            "trigger": {"created": {}},
            "action": {"subprocess": ["/bin/job"]}
        }]});
        let fixture = Fixture::new(&rules);
        let source = FakeSource::default();
        source.respond(Ok(vec![record("r-1", "Queued")]));
        source.respond(Ok(vec![record("r-2", "Queued")]));
        let notifier = RecordingNotifier::default();
        let clock = clock();
        let mut listener =
            Listener::new(&source, &fixture.store, &notifier, &clock, fixture.settings()).unwrap();

        listener.run_cycle().unwrap();
        listener.run_cycle().unwrap();

        assert_eq!(
            *notifier.sent.borrow(),
            [Sent::Subprocess {
                script: PathBuf::from("/bin/job"),
                record_id: "r2".into(),
            }]
        );
    }

    #[test]
    fn failed_query_keeps_snapshot_and_lookback() {
        let fixture = Fixture::new(&in_progress_rules());
        fixture.store.save(COLLECTION, &[record("r-1", "Queued")]).unwrap();

        let source = FakeSource::default();
        source.respond(Err(ApiError::Transport {
            url: "http://store".into(),
            message: "connection refused".into(),
        }));
        let notifier = RecordingNotifier::default();
        let clock = clock();
        let mut listener =
            Listener::new(&source, &fixture.store, &notifier, &clock, fixture.settings()).unwrap();

        let summary = listener.run_cycle().unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(fixture.store.load(COLLECTION).unwrap(), [record("r-1", "Queued")]);

        listener.run_cycle().unwrap();
        let queries = source.queries.borrow();
        assert_eq!(queries[0].filter, queries[1].filter);
    }

    #[test]
    fn lookback_starts_before_process_start_then_follows_last_success() {
        let fixture = Fixture::new(&in_progress_rules());
        fixture.store.save(COLLECTION, &[]).unwrap();

        let source = FakeSource::default();
        let notifier = RecordingNotifier::default();
        let clock = clock();
        let mut listener =
            Listener::new(&source, &fixture.store, &notifier, &clock, fixture.settings()).unwrap();

        listener.run_cycle().unwrap();
        listener.run_cycle().unwrap();

        let since = |q: &Query| q.filter.as_ref().unwrap()["last_edited_time"]["on_or_after"].clone();
        let queries = source.queries.borrow();
        assert_eq!(queries[0].filter.as_ref().unwrap()["timestamp"], "last_edited_time");
        assert_eq!(since(&queries[0]), "2026-10-14T11:15:00Z");
        assert_eq!(since(&queries[1]), "2026-10-14T11:50:00Z");
    }

    #[test]
    fn rule_filters_replace_lookback() {
        let rules = json!({ COLLECTION: [
            {
                "filter_properties": ["st"],
                "content_filter": {"property": "Status", "select": {"equals": "Queued"}},
                "trigger": {"property": "Status", "select": {"equals": "Done"}}
            },
            {
                "filter_properties": ["st", "due"],
                "content_filter": {"property": "Status", "select": {"equals": "Done"}},
                "trigger": {"property": "Status", "select": {"equals": "Done"}}
            }
        ]});
        let fixture = Fixture::new(&rules);
        fixture.store.save(COLLECTION, &[]).unwrap();

        let source = FakeSource::default();
        let notifier = RecordingNotifier::default();
        let clock = clock();
        let mut listener =
            Listener::new(&source, &fixture.store, &notifier, &clock, fixture.settings()).unwrap();
        listener.run_cycle().unwrap();

        assert_eq!(
            source.queries.borrow()[0],
            Query {
                filter_properties: Some(vec!["st".into(), "due".into()]),
                filter: Some(json!({"or": [
                    {"property": "Status", "select": {"equals": "Queued"}},
                    {"property": "Status", "select": {"equals": "Done"}}
                ]})),
            }
        );
    }

    #[test]
    fn single_rule_filter_is_used_as_is() {
        let filter = json!({"property": "Status", "select": {"equals": "Queued"}});
        assert_eq!(combine_filters(vec![filter.clone()]), Some(filter));
        assert_eq!(combine_filters(Vec::new()), None);
    }

    fn mixed_filter_rules() -> Value {
        json!({ COLLECTION: [
            {
                "content_filter": {"property": "Status", "select": {"equals": "Queued"}},
                "trigger": {"property": "Status", "select": {"equals": "Queued"}}
            },
            {
                "trigger": {"property": "Status", "select": {"equals": "Done"}},
                "action": {"webhook": ["http://done"]}
            }
        ]})
    }

    #[test]
    fn unfiltered_rule_keeps_lookback_beside_filtered_rule() {
        let fixture = Fixture::new(&mixed_filter_rules());
        fixture.store.save(COLLECTION, &[record("r-1", "Queued")]).unwrap();

        let source = FakeSource::default();
        source.respond(Ok(vec![record("r-1", "Done")]));
        let notifier = RecordingNotifier::default();
        let clock = clock();
        let mut listener =
            Listener::new(&source, &fixture.store, &notifier, &clock, fixture.settings()).unwrap();
        listener.run_cycle().unwrap();

        assert_eq!(
            source.queries.borrow()[0].filter,
            Some(json!({"or": [
                {"property": "Status", "select": {"equals": "Queued"}},
                {
                    "timestamp": "last_edited_time",
                    "last_edited_time": {"on_or_after": "2026-10-14T11:15:00Z"}
                }
            ]}))
        );
        assert_eq!(notifier.sent.borrow().len(), 1);
    }

    #[test]
    fn seeding_with_an_unfiltered_rule_fetches_everything() {
        let fixture = Fixture::new(&mixed_filter_rules());
        let source = FakeSource::default();
        let notifier = RecordingNotifier::default();
        let clock = clock();
        let mut listener =
            Listener::new(&source, &fixture.store, &notifier, &clock, fixture.settings()).unwrap();
        listener.run_cycle().unwrap();

        assert_eq!(source.queries.borrow()[0].filter, None);
    }

    #[test]
    fn corrupt_snapshot_is_set_aside_and_reseeded() {
        let rules = json!({
            COLLECTION: [{"trigger": {"created": {}}, "action": {"webhook": ["http://x"]}}],
            "db2": [{"trigger": {"created": {}}, "action": {"webhook": ["http://y"]}}]
        });
        let fixture = Fixture::new(&rules);
        fixture.store.save("db2", &[]).unwrap();
        fs::write(fixture.dir.path().join("storage").join("db1.json"), "not json").unwrap();

        let source = FakeSource::default();
        source.respond(Ok(vec![record("r-2", "Queued")]));
        source.respond(Ok(vec![record("r-1", "Queued")]));
        let notifier = RecordingNotifier::default();
        let clock = clock();
        let mut listener =
            Listener::new(&source, &fixture.store, &notifier, &clock, fixture.settings()).unwrap();

        // db1 is skipped without a query; db2 is still polled.
        let summary = listener.run_cycle().unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(source.queries.borrow().len(), 1);
        assert_eq!(notifier.sent.borrow().len(), 1);
        assert!(!fixture.store.exists(COLLECTION));
        assert!(fixture.dir.path().join("storage").join("db1.json.corrupt").is_file());

        // The next cycle reseeds db1 without firing.
        listener.run_cycle().unwrap();
        assert_eq!(source.queries.borrow()[1].filter, None);
        assert_eq!(fixture.store.load(COLLECTION).unwrap(), [record("r-1", "Queued")]);
        assert_eq!(notifier.sent.borrow().len(), 1);
    }

    #[test]
    fn failed_store_write_is_fatal() {
        let fixture = Fixture::new(&in_progress_rules());
        fs::create_dir(fixture.dir.path().join("storage").join("db1.json.tmp")).unwrap();

        let source = FakeSource::default();
        source.respond(Ok(vec![record("r-1", "Queued")]));
        let notifier = RecordingNotifier::default();
        let clock = clock();
        let mut listener =
            Listener::new(&source, &fixture.store, &notifier, &clock, fixture.settings()).unwrap();

        assert!(matches!(listener.run_cycle(), Err(ListenerError::Store(_))));
    }

    #[test]
    fn rules_reload_when_file_changes() {
        let fixture = Fixture::new(&in_progress_rules());
        fixture.store.save(COLLECTION, &[record("r-1", "Queued")]).unwrap();

        let source = FakeSource::default();
        source.respond(Ok(vec![record("r-1", "Done")]));
        let notifier = RecordingNotifier::default();
        let clock = clock();
        let mut listener =
            Listener::new(&source, &fixture.store, &notifier, &clock, fixture.settings()).unwrap();

        let done = json!({ COLLECTION: [{
            "trigger": {"property": "Status", "select": {"equals": "Done"}},
            "action": {"webhook": ["http://done"]}
        }]});
        fixture.write_rules(&done, SystemTime::UNIX_EPOCH + Duration::from_secs(2));

        listener.run_cycle().unwrap();
        let sent = notifier.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0], Sent::Webhook { url, .. } if url == "http://done"));
    }

    #[test]
    fn broken_reload_keeps_current_rules() {
        let fixture = Fixture::new(&in_progress_rules());
        fixture.store.save(COLLECTION, &[record("r-1", "Queued")]).unwrap();

        let source = FakeSource::default();
        source.respond(Ok(vec![record("r-1", "In Progress")]));
        let notifier = RecordingNotifier::default();
        let clock = clock();
        let mut listener =
            Listener::new(&source, &fixture.store, &notifier, &clock, fixture.settings()).unwrap();

        fs::write(fixture.rules_path(), "{ not json").unwrap();
        File::options()
            .write(true)
            .open(fixture.rules_path())
            .unwrap()
            .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(2))
            .unwrap();

        listener.run_cycle().unwrap();
        assert_eq!(notifier.sent.borrow().len(), 1);
    }

    #[test]
    fn unreadable_initial_rules_are_fatal() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();
        let settings = Settings {
            rules_path: dir.path().join("missing.json"),
            poll_interval: Duration::ZERO,
            initial_lookback: SignedDuration::ZERO,
            lookback_padding: SignedDuration::ZERO,
        };
        let source = FakeSource::default();
        let notifier = RecordingNotifier::default();
        let clock = clock();

        assert!(matches!(
            Listener::new(&source, &store, &notifier, &clock, settings),
            Err(ListenerError::Rules { .. })
        ));
    }

    #[test]
    fn run_returns_once_shutdown_is_set() {
        let fixture = Fixture::new(&in_progress_rules());
        let source = FakeSource::default();
        let notifier = RecordingNotifier::default();
        let clock = clock();
        let mut listener =
            Listener::new(&source, &fixture.store, &notifier, &clock, fixture.settings()).unwrap();

        listener.run(&AtomicBool::new(true)).unwrap();
        assert!(source.queries.borrow().is_empty());
    }
}
