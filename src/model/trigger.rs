//! Trigger expressions: the boolean rule language.
//!
//! The grammar mirrors the record store's own query-filter objects so rules
//! can be written the same way filters are:
//!
//! ```text
//! { "and": [ <node>, ... ] }
//! { "or":  [ <node>, ... ] }
//! { "created": {} }
//! { "property": "Status", "select":  { "equals": "In Progress" } }
//! { "property": "Due",    "formula": { "date": { "next_week": {} } } }
//! { "property": "Jobs",   "rollup":  { "any": { "checkbox": { "equals": true } } } }
//! ```
//!
//! Parsing never fails as a whole. A malformed node becomes
//! [`TriggerNode::Invalid`] in place, which evaluates to `false`, so one bad
//! branch cannot make a rule fire.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use super::property::{FormulaType, PropertyKind};

/// A node of a trigger expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerNode {
    And(Vec<TriggerNode>),
    Or(Vec<TriggerNode>),

    /// Matches records absent from the previous snapshot.
    Created,

    /// Matches when the named property changed and satisfies the condition.
    Property {
        property: String,
        condition: Condition,
    },

    /// A node that could not be parsed, with the reason.
    Invalid(String),
}

/// The condition a property predicate applies, selected by property kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Simple {
        kind: PropertyKind,
        comparison: Comparison,
    },
    Formula {
        result: FormulaType,
        comparison: Comparison,
    },
    Rollup(RollupCondition),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RollupCondition {
    Number(Comparison),
    Date(Comparison),

    /// Applies `inner` to each array element and reduces.
    Quantified {
        quantifier: Quantifier,
        inner: Box<Condition>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    Any,
    Every,
    None,
}

impl Quantifier {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "any" => Some(Self::Any),
            "every" => Some(Self::Every),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

/// One comparator and its configured operand.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub operator: Operator,
    pub operand: Value,
}

/// Comparator names accepted in conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    DoesNotEqual,
    Contains,
    DoesNotContain,
    StartsWith,
    EndsWith,
    IsEmpty,
    IsNotEmpty,
    LessThan,
    GreaterThan,
    LessThanOrEqualTo,
    GreaterThanOrEqualTo,
    Before,
    After,
    OnOrBefore,
    OnOrAfter,
    PastWeek,
    PastMonth,
    PastYear,
    NextWeek,
    NextMonth,
    NextYear,
    ThisWeek,
}

impl Operator {
    pub const ALL: [Self; 23] = [
        Self::Equals,
        Self::DoesNotEqual,
        Self::Contains,
        Self::DoesNotContain,
        Self::StartsWith,
        Self::EndsWith,
        Self::IsEmpty,
        Self::IsNotEmpty,
        Self::LessThan,
        Self::GreaterThan,
        Self::LessThanOrEqualTo,
        Self::GreaterThanOrEqualTo,
        Self::Before,
        Self::After,
        Self::OnOrBefore,
        Self::OnOrAfter,
        Self::PastWeek,
        Self::PastMonth,
        Self::PastYear,
        Self::NextWeek,
        Self::NextMonth,
        Self::NextYear,
        Self::ThisWeek,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::DoesNotEqual => "does_not_equal",
            Self::Contains => "contains",
            Self::DoesNotContain => "does_not_contain",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::IsEmpty => "is_empty",
            Self::IsNotEmpty => "is_not_empty",
            Self::LessThan => "less_than",
            Self::GreaterThan => "greater_than",
            Self::LessThanOrEqualTo => "less_than_or_equal_to",
            Self::GreaterThanOrEqualTo => "greater_than_or_equal_to",
            Self::Before => "before",
            Self::After => "after",
            Self::OnOrBefore => "on_or_before",
            Self::OnOrAfter => "on_or_after",
            Self::PastWeek => "past_week",
            Self::PastMonth => "past_month",
            Self::PastYear => "past_year",
            Self::NextWeek => "next_week",
            Self::NextMonth => "next_month",
            Self::NextYear => "next_year",
            Self::ThisWeek => "this_week",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| format!("unknown comparator `{s}`"))
    }
}

impl TriggerNode {
    /// Parse a trigger from its JSON form.
    pub fn parse(raw: &Value) -> Self {
        let Some(object) = raw.as_object() else {
            return Self::Invalid(format!("trigger node must be an object, got {raw}"));
        };

        if let Some(children) = object.get("and") {
            return parse_children(children, "and").map_or_else(Self::Invalid, Self::And);
        }
        if let Some(children) = object.get("or") {
            return parse_children(children, "or").map_or_else(Self::Invalid, Self::Or);
        }
        if object.contains_key("created") {
            return Self::Created;
        }
        if let Some(property) = object.get("property") {
            return parse_property(property, object).unwrap_or_else(Self::Invalid);
        }

        let keys: Vec<&str> = object.keys().map(String::as_str).collect();
        Self::Invalid(format!("unrecognized trigger node with keys {keys:?}"))
    }

    /// Property names referenced anywhere in the tree, first occurrence order.
    pub fn property_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_property_names(&mut names);
        names
    }

    fn collect_property_names<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Self::And(children) | Self::Or(children) => {
                for child in children {
                    child.collect_property_names(names);
                }
            }
            Self::Property { property, .. } => {
                if !names.contains(&property.as_str()) {
                    names.push(property);
                }
            }
            Self::Created | Self::Invalid(_) => {}
        }
    }

    /// Reasons for every invalid node in the tree.
    pub fn problems(&self) -> Vec<&str> {
        match self {
            Self::And(children) | Self::Or(children) => {
                children.iter().flat_map(TriggerNode::problems).collect()
            }
            Self::Invalid(reason) => vec![reason.as_str()],
            Self::Created | Self::Property { .. } => Vec::new(),
        }
    }
}

fn parse_children(raw: &Value, key: &str) -> Result<Vec<TriggerNode>, String> {
    let children = raw
        .as_array()
        .ok_or_else(|| format!("`{key}` must hold an array of trigger nodes"))?;
    if children.is_empty() {
        return Err(format!("`{key}` needs at least one trigger node"));
    }
    Ok(children.iter().map(TriggerNode::parse).collect())
}

fn parse_property(name: &Value, object: &Map<String, Value>) -> Result<TriggerNode, String> {
    let property = name
        .as_str()
        .ok_or_else(|| format!("`property` must be a string, got {name}"))?
        .to_string();

    let (kind, condition) = single_entry(object, &["property"])
        .map_err(|e| format!("property `{property}`: {e}"))?;
    let kind: PropertyKind = kind
        .parse()
        .map_err(|e| format!("property `{property}`: {e}"))?;
    let condition =
        Condition::parse(kind, condition).map_err(|e| format!("property `{property}`: {e}"))?;

    Ok(TriggerNode::Property {
        property,
        condition,
    })
}

impl Condition {
    fn parse(kind: PropertyKind, raw: &Value) -> Result<Self, String> {
        match kind {
            PropertyKind::Formula => {
                let (key, comparison) = single_entry(as_object(raw, "formula")?, &[])?;
                let result = FormulaType::from_condition_key(key)
                    .ok_or_else(|| format!("unknown formula result type `{key}`"))?;
                Ok(Self::Formula {
                    result,
                    comparison: Comparison::parse(comparison)?,
                })
            }
            PropertyKind::Rollup => {
                let (key, inner) = single_entry(as_object(raw, "rollup")?, &[])?;
                let rollup = match key {
                    "number" => RollupCondition::Number(Comparison::parse(inner)?),
                    "date" => RollupCondition::Date(Comparison::parse(inner)?),
                    _ => {
                        let quantifier = Quantifier::from_key(key).ok_or_else(|| {
                            format!(
                                "rollup condition `{key}` needs one of number, date, any, every, none"
                            )
                        })?;
                        let (kind, condition) = single_entry(as_object(inner, key)?, &[])?;
                        let kind: PropertyKind = kind.parse().map_err(|e| format!("{e}"))?;
                        RollupCondition::Quantified {
                            quantifier,
                            inner: Box::new(Self::parse(kind, condition)?),
                        }
                    }
                };
                Ok(Self::Rollup(rollup))
            }
            _ => Ok(Self::Simple {
                kind,
                comparison: Comparison::parse(raw)?,
            }),
        }
    }
}

impl Comparison {
    fn parse(raw: &Value) -> Result<Self, String> {
        let (operator, operand) = single_entry(as_object(raw, "condition")?, &[])?;
        Ok(Self {
            operator: operator.parse()?,
            operand: operand.clone(),
        })
    }
}

fn as_object<'a>(raw: &'a Value, what: &str) -> Result<&'a Map<String, Value>, String> {
    raw.as_object()
        .ok_or_else(|| format!("{what} must be an object, got {raw}"))
}

/// The one entry of `object` whose key is not in `skip`.
fn single_entry<'a>(
    object: &'a Map<String, Value>,
    skip: &[&str],
) -> Result<(&'a str, &'a Value), String> {
    let mut entries = object
        .iter()
        .filter(|(key, _)| !skip.contains(&key.as_str()));

    match (entries.next(), entries.next()) {
        (Some((key, value)), None) => Ok((key.as_str(), value)),
        (None, _) => Err("missing condition".to_string()),
        (Some(_), Some(_)) => {
            let keys: Vec<&str> = object
                .keys()
                .map(String::as_str)
                .filter(|k| !skip.contains(k))
                .collect();
            Err(format!("ambiguous condition with keys {keys:?}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn parses_select_predicate() {
        let node = TriggerNode::parse(&json!({"property": "Status", "select": {"equals": "In Progress"}}));
        assert_eq!(
            node,
            TriggerNode::Property {
                property: "Status".into(),
                condition: Condition::Simple {
                    kind: PropertyKind::Select,
                    comparison: Comparison {
                        operator: Operator::Equals,
                        operand: json!("In Progress"),
                    },
                },
            }
        );
    }

    #[test]
    fn parses_nested_boolean_tree() {
        let node = TriggerNode::parse(&json!({"and": [
            {"created": {}},
            {"or": [
                {"property": "A", "checkbox": {"equals": true}},
                {"property": "B", "number": {"greater_than": 3}}
            ]}
        ]}));

        let TriggerNode::And(children) = &node else {
            panic!("expected and");
        };
        assert_eq!(children[0], TriggerNode::Created);
        assert!(matches!(&children[1], TriggerNode::Or(inner) if inner.len() == 2));
        assert!(node.problems().is_empty());
    }

    #[test]
    fn parses_formula_by_result_type() {
        let node = TriggerNode::parse(&json!({"property": "Due", "formula": {"date": {"next_week": {}}}}));
        assert!(matches!(
            node,
            TriggerNode::Property {
                condition: Condition::Formula {
                    result: FormulaType::Date,
                    comparison: Comparison { operator: Operator::NextWeek, .. },
                },
                ..
            }
        ));
    }

    #[test]
    fn parses_quantified_rollup() {
        let node = TriggerNode::parse(&json!({"property": "Jobs", "rollup": {"every": {"select": {"equals": "Done"}}}}));
        let TriggerNode::Property {
            condition: Condition::Rollup(RollupCondition::Quantified { quantifier, inner }),
            ..
        } = node
        else {
            panic!("expected quantified rollup");
        };
        assert_eq!(quantifier, Quantifier::Every);
        assert!(matches!(*inner, Condition::Simple { kind: PropertyKind::Select, .. }));
    }

    #[test]
    fn direct_rollup_equality_is_invalid() {
        let node = TriggerNode::parse(&json!({"property": "Jobs", "rollup": {"equals": 3}}));
        assert!(matches!(node, TriggerNode::Invalid(_)));
    }

    #[test]
    fn unknown_comparator_is_invalid() {
        let node = TriggerNode::parse(&json!({"property": "A", "select": {"matches": "x"}}));
        assert!(matches!(node, TriggerNode::Invalid(reason) if reason.contains("matches")));
    }

    #[test]
    fn ambiguous_condition_is_invalid() {
        let node = TriggerNode::parse(&json!({"property": "A", "select": {"equals": "x", "contains": "y"}}));
        assert!(matches!(node, TriggerNode::Invalid(_)));
    }

    #[test]
    fn invalid_child_does_not_invalidate_siblings() {
        let node = TriggerNode::parse(&json!({"or": [{"bogus": 1}, {"created": {}}]}));
        let TriggerNode::Or(children) = &node else {
            panic!("expected or");
        };
        assert!(matches!(children[0], TriggerNode::Invalid(_)));
        assert_eq!(children[1], TriggerNode::Created);
        assert_eq!(node.problems().len(), 1);
    }

    #[test]
    fn empty_group_is_invalid() {
        assert!(matches!(TriggerNode::parse(&json!({"and": []})), TriggerNode::Invalid(_)));
        assert!(matches!(TriggerNode::parse(&json!({"or": {}})), TriggerNode::Invalid(_)));
    }

    #[test]
    fn property_names_are_unique_and_ordered() {
        let node = TriggerNode::parse(&json!({"and": [
            {"property": "B", "checkbox": {"equals": true}},
            {"or": [
                {"property": "A", "checkbox": {"equals": true}},
                {"property": "B", "checkbox": {"equals": false}}
            ]}
        ]}));
        assert_eq!(node.property_names(), ["B", "A"]);
    }
}
