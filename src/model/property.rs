//! Property values: the typed payloads carried by every record.
//!
//! The record store encodes each property as an object whose `type` tag names
//! a sibling key holding the payload:
//!
//! ```text
//! { "id": "a%3Bc", "type": "select", "select": { "name": "Queued" } }
//! ```
//!
//! Snapshots keep the raw JSON so diffing stays a structural comparison.
//! Decoding into [`PropertyValue`] happens lazily, one property at a time,
//! so a single corrupt property never poisons the rest of the record.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Errors raised while decoding a raw property value.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("property value is not an object")]
    NotAnObject,

    #[error("missing `type` tag")]
    MissingType,

    #[error("missing `{0}` payload")]
    MissingPayload(String),

    #[error("unsupported property kind: {0}")]
    UnsupportedKind(String),

    #[error("malformed `{kind}` payload: {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The kind tag of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Checkbox,
    Number,
    Select,
    Status,
    Date,
    Files,
    MultiSelect,
    Relation,
    People,
    RichText,
    Title,
    Formula,
    Rollup,
    LastEditedBy,
}

impl PropertyKind {
    pub const ALL: [Self; 14] = [
        Self::Checkbox,
        Self::Number,
        Self::Select,
        Self::Status,
        Self::Date,
        Self::Files,
        Self::MultiSelect,
        Self::Relation,
        Self::People,
        Self::RichText,
        Self::Title,
        Self::Formula,
        Self::Rollup,
        Self::LastEditedBy,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Checkbox => "checkbox",
            Self::Number => "number",
            Self::Select => "select",
            Self::Status => "status",
            Self::Date => "date",
            Self::Files => "files",
            Self::MultiSelect => "multi_select",
            Self::Relation => "relation",
            Self::People => "people",
            Self::RichText => "rich_text",
            Self::Title => "title",
            Self::Formula => "formula",
            Self::Rollup => "rollup",
            Self::LastEditedBy => "last_edited_by",
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| DecodeError::UnsupportedKind(s.to_string()))
    }
}

/// A select or status option.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SelectOption {
    pub name: String,
}

/// A date or date range. Only `start` takes part in comparisons.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DateValue {
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Link {
    pub url: String,
}

/// An attached file, either hosted by the record store or linked externally.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileRef {
    External { external: Link },
    File { file: Link },
}

impl FileRef {
    pub fn url(&self) -> &str {
        match self {
            Self::External { external } => &external.url,
            Self::File { file } => &file.url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RelationRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// One formatted run of rich text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TextRun {
    #[serde(default)]
    pub plain_text: String,
}

/// The declared result type of a formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormulaType {
    String,
    Number,
    Boolean,
    Date,
}

impl FormulaType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
        }
    }

    /// Key used for this result type in trigger conditions.
    pub fn condition_key(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "checkbox",
            Self::Date => "date",
        }
    }

    pub fn from_condition_key(key: &str) -> Option<Self> {
        match key {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "checkbox" => Some(Self::Boolean),
            "date" => Some(Self::Date),
            _ => None,
        }
    }
}

/// A formula result. The payload type varies per record.
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaValue {
    String(Option<String>),
    Number(Option<f64>),
    Boolean(Option<bool>),
    Date(Option<DateValue>),
}

impl FormulaValue {
    pub fn result_type(&self) -> FormulaType {
        match self {
            Self::String(_) => FormulaType::String,
            Self::Number(_) => FormulaType::Number,
            Self::Boolean(_) => FormulaType::Boolean,
            Self::Date(_) => FormulaType::Date,
        }
    }
}

/// A rollup result.
///
/// Array elements stay raw: each one is itself a tagged property value
/// and is decoded only when a quantified condition walks it.
#[derive(Debug, Clone, PartialEq)]
pub enum RollupValue {
    Number(Option<f64>),
    Date(Option<DateValue>),
    Array(Vec<Value>),
}

/// A decoded property payload, one variant per kind.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Checkbox(bool),
    Number(Option<f64>),
    Select(Option<SelectOption>),
    Status(Option<SelectOption>),
    Date(Option<DateValue>),
    Files(Vec<FileRef>),
    MultiSelect(Vec<SelectOption>),
    /// `has_more` is set when the store truncated the list at its page limit.
    Relation {
        ids: Vec<RelationRef>,
        has_more: bool,
    },
    People(Vec<User>),
    RichText(Vec<TextRun>),
    Title(Vec<TextRun>),
    Formula(FormulaValue),
    Rollup(RollupValue),
    LastEditedBy(User),
}

/// A decoded property together with its store-assigned id.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    /// Absent on synthesized values such as rollup array elements.
    pub id: Option<String>,
    pub value: PropertyValue,
}

impl Property {
    /// Decode a raw tagged property value.
    pub fn decode(raw: &Value) -> Result<Self, DecodeError> {
        let id = raw.get("id").and_then(Value::as_str).map(String::from);
        let value = PropertyValue::decode(raw)?;
        Ok(Self { id, value })
    }
}

impl PropertyValue {
    /// Decode a raw tagged property value, ignoring its id.
    pub fn decode(raw: &Value) -> Result<Self, DecodeError> {
        let (tag, payload) = split_tagged(raw)?;
        let kind: PropertyKind = tag.parse()?;

        let value = match kind {
            PropertyKind::Checkbox => Self::Checkbox(payload_as(tag, payload)?),
            PropertyKind::Number => Self::Number(payload_as(tag, payload)?),
            PropertyKind::Select => Self::Select(payload_as(tag, payload)?),
            PropertyKind::Status => Self::Status(payload_as(tag, payload)?),
            PropertyKind::Date => Self::Date(payload_as(tag, payload)?),
            PropertyKind::Files => Self::Files(payload_as(tag, payload)?),
            PropertyKind::MultiSelect => Self::MultiSelect(payload_as(tag, payload)?),
            PropertyKind::Relation => Self::Relation {
                ids: payload_as(tag, payload)?,
                has_more: raw.get("has_more").and_then(Value::as_bool).unwrap_or(false),
            },
            PropertyKind::People => Self::People(payload_as(tag, payload)?),
            PropertyKind::RichText => Self::RichText(payload_as(tag, payload)?),
            PropertyKind::Title => Self::Title(payload_as(tag, payload)?),
            PropertyKind::Formula => Self::Formula(decode_formula(payload)?),
            PropertyKind::Rollup => Self::Rollup(decode_rollup(payload)?),
            PropertyKind::LastEditedBy => Self::LastEditedBy(payload_as(tag, payload)?),
        };

        Ok(value)
    }

    pub fn kind(&self) -> PropertyKind {
        match self {
            Self::Checkbox(_) => PropertyKind::Checkbox,
            Self::Number(_) => PropertyKind::Number,
            Self::Select(_) => PropertyKind::Select,
            Self::Status(_) => PropertyKind::Status,
            Self::Date(_) => PropertyKind::Date,
            Self::Files(_) => PropertyKind::Files,
            Self::MultiSelect(_) => PropertyKind::MultiSelect,
            Self::Relation { .. } => PropertyKind::Relation,
            Self::People(_) => PropertyKind::People,
            Self::RichText(_) => PropertyKind::RichText,
            Self::Title(_) => PropertyKind::Title,
            Self::Formula(_) => PropertyKind::Formula,
            Self::Rollup(_) => PropertyKind::Rollup,
            Self::LastEditedBy(_) => PropertyKind::LastEditedBy,
        }
    }
}

fn decode_formula(payload: &Value) -> Result<FormulaValue, DecodeError> {
    let (tag, inner) = split_tagged(payload)?;
    match tag {
        "string" => Ok(FormulaValue::String(payload_as(tag, inner)?)),
        "number" => Ok(FormulaValue::Number(payload_as(tag, inner)?)),
        "boolean" => Ok(FormulaValue::Boolean(payload_as(tag, inner)?)),
        "date" => Ok(FormulaValue::Date(payload_as(tag, inner)?)),
        other => Err(DecodeError::UnsupportedKind(format!("formula.{other}"))),
    }
}

fn decode_rollup(payload: &Value) -> Result<RollupValue, DecodeError> {
    let (tag, inner) = split_tagged(payload)?;
    match tag {
        "number" => Ok(RollupValue::Number(payload_as(tag, inner)?)),
        "date" => Ok(RollupValue::Date(payload_as(tag, inner)?)),
        "array" => Ok(RollupValue::Array(payload_as(tag, inner)?)),
        other => Err(DecodeError::UnsupportedKind(format!("rollup.{other}"))),
    }
}

/// Split `{ "type": t, t: payload }` into `(t, payload)`.
fn split_tagged(raw: &Value) -> Result<(&str, &Value), DecodeError> {
    let object = raw.as_object().ok_or(DecodeError::NotAnObject)?;
    let tag = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?;
    let payload = object
        .get(tag)
        .ok_or_else(|| DecodeError::MissingPayload(tag.to_string()))?;
    Ok((tag, payload))
}

fn payload_as<T: DeserializeOwned>(kind: &str, payload: &Value) -> Result<T, DecodeError> {
    T::deserialize(payload).map_err(|source| DecodeError::Malformed {
        kind: kind.to_string(),
        source,
    })
}
