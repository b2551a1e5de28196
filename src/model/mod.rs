//! Core data model for pagewatch.
//!
//! These types describe what is watched and what is computed:
//! records and their properties, the change sets between two snapshots,
//! and the rules whose triggers are evaluated against those change sets.

mod change;
mod property;
mod record;
mod rule;
mod trigger;

pub use change::{ChangeSet, Changes};
pub use property::{
    DateValue, DecodeError, FormulaType, FormulaValue, Property, PropertyKind, PropertyValue,
    RollupValue, TextRun,
};
pub use record::{Record, normalize_id};
pub use rule::{ActionSpec, Collection, EmailAction, RuleConfig, RuleFile, collections};
pub use trigger::{Comparison, Condition, Operator, Quantifier, RollupCondition, TriggerNode};
