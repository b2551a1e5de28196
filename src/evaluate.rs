//! Trigger evaluation: resolve a rule's expression tree against a change set.
//!
//! Evaluation is a pure recursive walk. Anything that cannot be decided with
//! confidence (an invalid node, an undecodable property, an operand of the
//! wrong type) is logged and evaluates to `false`.

use jiff::Zoned;
use serde_json::Value;
use tracing::warn;

use crate::compare::{CompareError, compare};
use crate::model::{
    ChangeSet, Comparison, Condition, DecodeError, Property, PropertyKind,
    PropertyValue, Quantifier, RollupCondition, RollupValue, TriggerNode,
};
use crate::normalize::{Lookup, NormalizeError};
use crate::source::RecordSource;

/// Source of the evaluation time used by relative date comparators.
pub trait Clock {
    fn now(&self) -> Zoned;
}

/// The system clock in the system time zone.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Zoned {
        Zoned::now()
    }
}

/// Collaborators a predicate may need while it is evaluated.
pub struct Context<'a> {
    pub source: &'a dyn RecordSource,
    pub clock: &'a dyn Clock,
}

#[derive(Debug, thiserror::Error)]
enum PredicateError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Compare(#[from] CompareError),

    #[error("condition expects a {expected} property, found {found}")]
    KindMismatch {
        expected: PropertyKind,
        found: PropertyKind,
    },

    #[error("condition expects a {expected} formula, found {found}")]
    FormulaMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("rollup condition does not match the rollup's {found} result")]
    RollupMismatch { found: &'static str },
}

/// Evaluate `node` against the change set of one record.
pub fn evaluate(node: &TriggerNode, record_id: &str, change: &ChangeSet, ctx: &Context<'_>) -> bool {
    match node {
        TriggerNode::And(children) => children
            .iter()
            .all(|child| evaluate(child, record_id, change, ctx)),
        TriggerNode::Or(children) => children
            .iter()
            .any(|child| evaluate(child, record_id, change, ctx)),
        TriggerNode::Created => matches!(change, ChangeSet::NewPage(_)),
        TriggerNode::Property {
            property,
            condition,
        } => evaluate_property(property, condition, record_id, change, ctx),
        TriggerNode::Invalid(reason) => {
            warn!(record = record_id, %reason, "invalid trigger node");
            false
        }
    }
}

/// True iff `property` is among the changed properties and satisfies `condition`.
fn evaluate_property(
    property: &str,
    condition: &Condition,
    record_id: &str,
    change: &ChangeSet,
    ctx: &Context<'_>,
) -> bool {
    match check_property(property, condition, record_id, change, ctx) {
        Ok(matched) => matched,
        Err(error) => {
            warn!(record = record_id, property, %error, "predicate failed closed");
            false
        }
    }
}

fn check_property(
    property: &str,
    condition: &Condition,
    record_id: &str,
    change: &ChangeSet,
    ctx: &Context<'_>,
) -> Result<bool, PredicateError> {
    let ChangeSet::PropertyChanged { new, .. } = change else {
        return Ok(false);
    };
    let Some(raw) = new.get(property) else {
        return Ok(false);
    };
    check_condition(property, condition, raw, record_id, ctx)
}

fn check_condition(
    property: &str,
    condition: &Condition,
    raw: &Value,
    record_id: &str,
    ctx: &Context<'_>,
) -> Result<bool, PredicateError> {
    let decoded = Property::decode(raw)?;

    match condition {
        Condition::Simple { kind, comparison } => {
            let found = decoded.value.kind();
            if found != *kind {
                return Err(PredicateError::KindMismatch {
                    expected: *kind,
                    found,
                });
            }
            apply(comparison, &decoded, record_id, ctx)
        }
        Condition::Formula { result, comparison } => {
            let PropertyValue::Formula(formula) = &decoded.value else {
                return Err(PredicateError::KindMismatch {
                    expected: PropertyKind::Formula,
                    found: decoded.value.kind(),
                });
            };
            if formula.result_type() != *result {
                return Err(PredicateError::FormulaMismatch {
                    expected: result.condition_key(),
                    found: formula.result_type().as_str(),
                });
            }
            apply(comparison, &decoded, record_id, ctx)
        }
        Condition::Rollup(rollup) => {
            let PropertyValue::Rollup(value) = &decoded.value else {
                return Err(PredicateError::KindMismatch {
                    expected: PropertyKind::Rollup,
                    found: decoded.value.kind(),
                });
            };
            match (rollup, value) {
                (RollupCondition::Number(comparison), RollupValue::Number(_))
                | (RollupCondition::Date(comparison), RollupValue::Date(_)) => {
                    apply(comparison, &decoded, record_id, ctx)
                }
                (RollupCondition::Quantified { quantifier, inner }, RollupValue::Array(items)) => {
                    quantify(*quantifier, items, |item| {
                        let element = ChangeSet::single(property, item.clone());
                        check_property(property, inner, record_id, &element, ctx)
                    })
                }
                (_, value) => Err(PredicateError::RollupMismatch {
                    found: rollup_name(value),
                }),
            }
        }
    }
}

fn apply(
    comparison: &Comparison,
    property: &Property,
    record_id: &str,
    ctx: &Context<'_>,
) -> Result<bool, PredicateError> {
    let lookup = Lookup {
        source: ctx.source,
        record_id,
    };
    let normalized = property.normalize(&lookup)?;
    Ok(compare(
        comparison.operator,
        &normalized,
        &comparison.operand,
        &ctx.clock.now(),
    )?)
}

/// Reduce per-element results with `quantifier`.
///
/// Every element is checked; one that cannot be evaluated fails the whole
/// predicate. `every` over an empty array is false.
fn quantify(
    quantifier: Quantifier,
    items: &[Value],
    mut matches: impl FnMut(&Value) -> Result<bool, PredicateError>,
) -> Result<bool, PredicateError> {
    let mut matched = 0;
    for item in items {
        if matches(item)? {
            matched += 1;
        }
    }
    Ok(match quantifier {
        Quantifier::Any => matched > 0,
        Quantifier::Every => !items.is_empty() && matched == items.len(),
        Quantifier::None => matched == 0,
    })
}

fn rollup_name(value: &RollupValue) -> &'static str {
    match value {
        RollupValue::Number(_) => "number",
        RollupValue::Date(_) => "date",
        RollupValue::Array(_) => "array",
    }
}
