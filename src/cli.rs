//! CLI interface for pagewatch.
//!
//! `pagewatch run` is the long-running listener. The other commands are
//! one-shot helpers for authoring rules and for action scripts:
//!
//! - `pagewatch check` validates the rules file.
//! - `pagewatch rule add` appends a rule.
//! - `pagewatch update` writes properties back to a record.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::dispatch::{Notifier, SystemNotifier, alert_operator};
use crate::evaluate::SystemClock;
use crate::health::{Heartbeat, Monitor, State};
use crate::listener::{Listener, Settings, read_rules};
use crate::model::{ActionSpec, EmailAction, RuleConfig, RuleFile, TriggerNode, collections, normalize_id};
use crate::source::{NotionClient, RecordSource};
use crate::storage::SnapshotStore;

/// pagewatch: poll a record store and act on changes.
#[derive(Debug, Parser)]
#[command(name = "pagewatch", after_long_help = USAGE_HELP)]
pub struct Cli {
    /// Config file to use instead of `~/.pagewatch/config.toml`.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

const USAGE_HELP: &str = r#"Getting started
  1. pagewatch rule add 1a2b3c... --trigger '{"property": "Status", "select": {"equals": "In Progress"}}' \
       --webhook https://hooks.example.com/order
  2. pagewatch check
  3. pagewatch run

The first poll of a collection only records what exists; rules fire from the
second poll on."#;

const DEFAULT_SUBJECT: &str = "pagewatch rule fired";

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Poll every watched collection until interrupted.
    Run {
        /// Run a single cycle and exit.
        #[arg(long)]
        once: bool,
    },

    /// Validate the rules file and show what each rule watches.
    Check,

    /// Manage rules.
    Rule {
        #[command(subcommand)]
        command: RuleCommand,
    },

    /// Overwrite properties on a record.
    ///
    /// `properties` is a JSON object in the record store's property format.
    Update { record: String, properties: String },
}

#[derive(Debug, Subcommand)]
pub enum RuleCommand {
    /// Append a rule for a collection.
    Add {
        /// Collection id, with or without dashes.
        collection: String,

        /// Trigger expression as JSON.
        #[arg(long)]
        trigger: String,

        /// Rule id. Generated when omitted.
        #[arg(long)]
        uid: Option<String>,

        /// Webhook URL to POST to. Can be specified multiple times.
        #[arg(long)]
        webhook: Vec<String>,

        /// Script to run with the record id. Can be specified multiple times.
        #[arg(long)]
        subprocess: Vec<PathBuf>,

        /// Email recipient. Can be specified multiple times.
        #[arg(long = "email")]
        email_to: Vec<String>,

        /// Subject line for `--email`.
        #[arg(long, requires = "email_to")]
        subject: Option<String>,

        /// Property id to fetch. Can be specified multiple times.
        #[arg(long = "filter-property")]
        filter_properties: Vec<String>,

        /// Query filter as JSON, limiting which records are fetched.
        #[arg(long)]
        content_filter: Option<String>,
    },
}

/// Run the CLI command, returning an error message on failure.
pub fn run(cli: Cli, config: &Config) -> Result<(), String> {
    match cli.command {
        Command::Run { once } => cmd_run(config, once),
        Command::Check => cmd_check(&config.rules_path),
        Command::Rule { command } => match command {
            RuleCommand::Add {
                collection,
                trigger,
                uid,
                webhook,
                subprocess,
                email_to,
                subject,
                filter_properties,
                content_filter,
            } => {
                let email = if email_to.is_empty() {
                    Vec::new()
                } else {
                    vec![EmailAction {
                        to: email_to,
                        subject: subject.unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
                        body: None,
                    }]
                };
                let rule = RuleConfig {
                    uid: uid.or_else(|| Some(Uuid::new_v4().to_string())),
                    filter_properties,
                    content_filter: content_filter.as_deref().map(parse_json).transpose()?,
                    trigger: parse_json(&trigger)?,
                    action: ActionSpec {
                        webhook,
                        subprocess,
                        email,
                    },
                };
                let uid = cmd_rule_add(&config.rules_path, &collection, rule)?;
                println!("{uid}");
                Ok(())
            }
        },
        Command::Update { record, properties } => {
            let client = NotionClient::new(config).map_err(|e| e.to_string())?;
            let properties = parse_json(&properties)?;
            client
                .update_record(&record, &properties)
                .map_err(|e| e.to_string())
        }
    }
}

fn parse_json(input: &str) -> Result<Value, String> {
    serde_json::from_str(input).map_err(|e| format!("invalid JSON: {e}"))
}

/// Run the listener, reporting the outcome to the health monitor.
fn cmd_run(config: &Config, once: bool) -> Result<(), String> {
    let monitor = Monitor::new(config);
    let notifier = SystemNotifier::new(config);

    let outcome = listen(config, &notifier, &monitor, once);
    report(outcome, &monitor, &notifier, config.operator_email.as_deref())
}

/// Report how the listener ended. A fatal error also alerts the operator,
/// when one is configured.
fn report(
    outcome: Result<(), String>,
    monitor: &dyn Heartbeat,
    notifier: &dyn Notifier,
    operator: Option<&str>,
) -> Result<(), String> {
    match outcome {
        Ok(()) => {
            monitor.ping(State::Complete, None);
            Ok(())
        }
        Err(message) => {
            error!(%message, "listener stopped");
            monitor.ping(State::Fail, Some(&message));
            if let Some(operator) = operator {
                alert_operator(notifier, operator, &message);
            }
            Err(message)
        }
    }
}

fn listen(
    config: &Config,
    notifier: &SystemNotifier,
    monitor: &dyn Heartbeat,
    once: bool,
) -> Result<(), String> {
    let client = NotionClient::new(config).map_err(|e| e.to_string())?;
    let store = SnapshotStore::new(&config.storage_dir).map_err(|e| e.to_string())?;
    let clock = SystemClock;

    let mut listener = Listener::new(
        &client,
        &store,
        notifier,
        &clock,
        Settings::from_config(config),
    )
    .map_err(|e| e.to_string())?;

    monitor.ping(State::Run, None);
    info!(rules = %config.rules_path.display(), "listener started");

    if once {
        listener.run_cycle().map_err(|e| e.to_string())?;
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .map_err(|e| format!("failed to install signal handler: {e}"))?;

    listener.run(&shutdown).map_err(|e| e.to_string())
}

/// Print every collection's rules. Fails if any trigger is invalid.
fn cmd_check(rules_path: &Path) -> Result<(), String> {
    let file = read_rules(rules_path).map_err(|e| e.to_string())?;
    let mut invalid = 0;

    for collection in collections(&file) {
        println!("{}", collection.id);
        for rule in &collection.rules {
            let active = rule.active_properties();
            println!("  {}  watches: {}", rule.uid, active.join(", "));
            for problem in rule.trigger.problems() {
                println!("    invalid: {problem}");
                invalid += 1;
            }
            if rule.actions.is_empty() {
                println!("    note: no actions");
            }
        }
    }

    if invalid > 0 {
        return Err(format!("{invalid} invalid trigger node(s)"));
    }
    Ok(())
}

/// Append `rule` to the rules file under `collection` and return its uid.
///
/// A missing rules file is created.
fn cmd_rule_add(rules_path: &Path, collection: &str, rule: RuleConfig) -> Result<String, String> {
    let problems = TriggerNode::parse(&rule.trigger)
        .problems()
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    if !problems.is_empty() {
        return Err(format!("invalid trigger: {}", problems.join("; ")));
    }

    let mut file: RuleFile = match fs::read_to_string(rules_path) {
        Ok(json) => serde_json::from_str(&json)
            .map_err(|e| format!("invalid rules at {}: {e}", rules_path.display()))?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => RuleFile::new(),
        Err(e) => return Err(format!("failed to read {}: {e}", rules_path.display())),
    };

    // Append to an existing entry for the collection, however its id is written.
    let wanted = normalize_id(collection);
    let key = file
        .keys()
        .find(|k| normalize_id(k) == wanted)
        .cloned()
        .unwrap_or_else(|| collection.to_string());

    let uid = rule.uid.clone().unwrap_or_default();
    file.entry(key).or_default().push(rule);

    if let Some(parent) = rules_path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(&file).map_err(|e| e.to_string())?;
    fs::write(rules_path, json)
        .map_err(|e| format!("failed to write {}: {e}", rules_path.display()))?;

    Ok(uid)
}
