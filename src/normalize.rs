//! Property normalization: reduce a typed property to a comparable value.
//!
//! Every kind maps onto a small set of shapes that comparators understand.
//! Relations truncated at the store's page limit are completed with one
//! follow-up fetch, so comparators never see a partial list.

use serde_json::Value;

use crate::model::{DateValue, FormulaValue, Property, PropertyValue, RollupValue, TextRun};
use crate::source::{ApiError, RecordSource};

/// Text runs are formatting splits of one string, so they join without a separator.
pub const TEXT_RUN_DELIMITER: &str = "";

/// A property value reduced to something a comparator can work with.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// No value: an unset select, a null number, a date without a start.
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
    /// An ISO-8601 date or timestamp string, parsed at comparison time.
    Date(String),
    List(Vec<String>),
    /// Raw rollup array elements, reachable only through quantifiers.
    Array(Vec<Value>),
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("relation has more entries but the property id is unknown")]
    MissingPropertyId,

    #[error("relation follow-up fetch failed: {0}")]
    FollowUp(#[from] ApiError),

    #[error("relation follow-up returned an item without an id: {0}")]
    FollowUpItem(Value),
}

/// Where to fetch the remainder of a truncated property.
pub struct Lookup<'a> {
    pub source: &'a dyn RecordSource,
    pub record_id: &'a str,
}

impl Property {
    /// Normalize this property, completing truncated relations through `lookup`.
    pub fn normalize(&self, lookup: &Lookup<'_>) -> Result<Normalized, NormalizeError> {
        match &self.value {
            PropertyValue::Relation {
                ids,
                has_more: true,
            } => {
                let property_id = self.id.as_deref().ok_or(NormalizeError::MissingPropertyId)?;
                let mut all: Vec<String> = ids.iter().map(|r| r.id.clone()).collect();
                for id in fetch_relation_ids(lookup, property_id)? {
                    if !all.contains(&id) {
                        all.push(id);
                    }
                }
                Ok(Normalized::List(all))
            }
            value => Ok(value.normalize_inline()),
        }
    }
}

fn fetch_relation_ids(lookup: &Lookup<'_>, property_id: &str) -> Result<Vec<String>, NormalizeError> {
    let items = lookup.source.property_items(lookup.record_id, property_id)?;
    items
        .into_iter()
        .map(|item| match item.pointer("/relation/id").and_then(Value::as_str) {
            Some(id) => Ok(id.to_string()),
            None => Err(NormalizeError::FollowUpItem(item)),
        })
        .collect()
}

impl PropertyValue {
    /// Normalize using only the data at hand.
    fn normalize_inline(&self) -> Normalized {
        match self {
            Self::Checkbox(checked) => Normalized::Bool(*checked),
            Self::Number(number) => number.map_or(Normalized::Empty, Normalized::Number),
            Self::Select(option) | Self::Status(option) => option
                .as_ref()
                .map_or(Normalized::Empty, |o| Normalized::Text(o.name.clone())),
            Self::Date(date) => normalize_date(date.as_ref()),
            Self::Files(files) => {
                Normalized::List(files.iter().map(|f| f.url().to_string()).collect())
            }
            Self::MultiSelect(options) => {
                Normalized::List(options.iter().map(|o| o.name.clone()).collect())
            }
            Self::Relation { ids, .. } => {
                Normalized::List(ids.iter().map(|r| r.id.clone()).collect())
            }
            Self::People(people) => Normalized::List(people.iter().map(|p| p.id.clone()).collect()),
            Self::RichText(runs) | Self::Title(runs) => Normalized::Text(join_runs(runs)),
            Self::Formula(formula) => match formula {
                FormulaValue::String(s) => s.clone().map_or(Normalized::Empty, Normalized::Text),
                FormulaValue::Number(n) => n.map_or(Normalized::Empty, Normalized::Number),
                FormulaValue::Boolean(b) => b.map_or(Normalized::Empty, Normalized::Bool),
                FormulaValue::Date(date) => normalize_date(date.as_ref()),
            },
            Self::Rollup(rollup) => match rollup {
                RollupValue::Number(n) => n.map_or(Normalized::Empty, Normalized::Number),
                RollupValue::Date(date) => normalize_date(date.as_ref()),
                RollupValue::Array(items) => Normalized::Array(items.clone()),
            },
            Self::LastEditedBy(user) => Normalized::Text(user.id.clone()),
        }
    }
}

fn normalize_date(date: Option<&DateValue>) -> Normalized {
    date.and_then(|d| d.start.clone())
        .map_or(Normalized::Empty, Normalized::Date)
}

fn join_runs(runs: &[TextRun]) -> String {
    runs.iter()
        .map(|run| run.plain_text.as_str())
        .collect::<Vec<_>>()
        .join(TEXT_RUN_DELIMITER)
}
