//! Rules: what to watch for in a collection and what to do when it happens.
//!
//! The rules file is a JSON object keyed by collection id:
//!
//! ```text
//! { "<collection_id>": [
//!     { "uid": "...",
//!       "filter_properties": ["<property_id>", ...],
//!       "content_filter": { ... },
//!       "trigger": { ... },
//!       "action": { "webhook": [...], "subprocess": [...], "email": [...] } } ] }
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::record::normalize_id;
use super::trigger::TriggerNode;

/// The rules file as written on disk, keyed by collection id.
pub type RuleFile = BTreeMap<String, Vec<RuleConfig>>;

/// One rule entry as written on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Property ids to request from the store. Narrowing only, never required.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter_properties: Vec<String>,

    /// A store query filter limiting which records are fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_filter: Option<Value>,

    pub trigger: Value,

    #[serde(default)]
    pub action: ActionSpec,
}

/// Side effects to fire when a rule's trigger matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub webhook: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subprocess: Vec<PathBuf>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub email: Vec<EmailAction>,
}

impl ActionSpec {
    pub fn is_empty(&self) -> bool {
        self.webhook.is_empty() && self.subprocess.is_empty() && self.email.is_empty()
    }
}

/// An email to send when a rule fires. The change payload is appended to the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailAction {
    pub to: Vec<String>,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// A parsed rule, immutable for the duration of a poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub uid: String,
    pub trigger: TriggerNode,
    pub actions: ActionSpec,
    pub filter_properties: Vec<String>,
    pub content_filter: Option<Value>,
}

impl Rule {
    /// Parse a rule entry. `index` stands in for a missing uid.
    pub fn from_config(config: &RuleConfig, index: usize) -> Self {
        Self {
            uid: config
                .uid
                .clone()
                .unwrap_or_else(|| format!("rule-{index}")),
            trigger: TriggerNode::parse(&config.trigger),
            actions: config.action.clone(),
            filter_properties: config.filter_properties.clone(),
            content_filter: config.content_filter.clone(),
        }
    }

    /// Property names this rule's trigger reads.
    pub fn active_properties(&self) -> Vec<&str> {
        self.trigger.property_names()
    }
}

/// The rules watching one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    /// Normalized collection id.
    pub id: String,
    pub rules: Vec<Rule>,
}

impl Collection {
    /// Union of active properties across every rule, first occurrence order.
    pub fn active_properties(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for rule in &self.rules {
            for name in rule.active_properties() {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        names
    }

    /// Union of requested property ids, or `None` to fetch every property.
    pub fn filter_properties(&self) -> Option<Vec<String>> {
        let mut ids: Vec<String> = Vec::new();
        for id in self.rules.iter().flat_map(|r| &r.filter_properties) {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        (!ids.is_empty()).then_some(ids)
    }
}

/// Parse every collection in a rules file.
///
/// Collections are keyed by normalized id; entries for the same collection
/// written with and without dashes are combined.
pub fn collections(file: &RuleFile) -> Vec<Collection> {
    let mut merged: BTreeMap<String, Vec<Rule>> = BTreeMap::new();
    for (id, configs) in file {
        let rules = merged.entry(normalize_id(id)).or_default();
        for config in configs {
            let index = rules.len();
            rules.push(Rule::from_config(config, index));
        }
    }
    merged
        .into_iter()
        .map(|(id, rules)| Collection { id, rules })
        .collect()
}
