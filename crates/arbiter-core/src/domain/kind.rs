//! Decision kinds (variants).
//!
//! Each kind owns its intrinsic validation, the way raw input is coerced into
//! an [`Answer`] (console text or a JSON primitive), presentation data, and
//! the serialize/deserialize projections used by the answer store.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::answer::Answer;
use super::errors::ParseError;
use super::units::{Quantity, Unit};

const TRUE_WORDS: &[&str] = &["y", "yes", "j", "ja", "true", "1"];
const FALSE_WORDS: &[&str] = &["n", "no", "nein", "false", "0"];

/// One selectable item of a choice decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceItem {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ChoiceItem {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: None,
        }
    }

    pub fn labeled(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: Some(label.into()),
        }
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.value)
    }
}

/// Presentation row for list-like decisions: `(index, item, label)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyRow {
    pub key: usize,
    pub value: String,
    pub label: String,
}

/// Coarse kind tag exposed over the remote protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KindTag {
    Bool,
    Numeric,
    List,
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecisionKind {
    Bool,
    Numeric { unit: Unit },
    Choice { items: Vec<ChoiceItem> },
    Text { min_length: usize },
    Identifiers,
}

impl DecisionKind {
    pub fn choice<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DecisionKind::Choice {
            items: items.into_iter().map(ChoiceItem::new).collect(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DecisionKind::Bool => "bool",
            DecisionKind::Numeric { .. } => "numeric",
            DecisionKind::Choice { .. } => "choice",
            DecisionKind::Text { .. } => "text",
            DecisionKind::Identifiers => "identifiers",
        }
    }

    pub fn tag(&self) -> KindTag {
        match self {
            DecisionKind::Bool => KindTag::Bool,
            DecisionKind::Numeric { .. } => KindTag::Numeric,
            DecisionKind::Choice { .. } => KindTag::List,
            DecisionKind::Text { .. } | DecisionKind::Identifiers => KindTag::Unknown,
        }
    }

    /// The only possible answer, for choice decisions with exactly one item.
    pub fn single_choice(&self) -> Option<Answer> {
        match self {
            DecisionKind::Choice { items } if items.len() == 1 => {
                Some(Answer::Choice(items[0].value.clone()))
            }
            _ => None,
        }
    }

    /// Intrinsic validation.
    ///
    /// Returns the answer in canonical form (numeric answers converted into
    /// the declared unit) or the reason it was rejected.
    pub fn normalize(&self, answer: Answer) -> Result<Answer, String> {
        match (self, answer) {
            (DecisionKind::Bool, Answer::Bool(b)) => Ok(Answer::Bool(b)),
            (DecisionKind::Numeric { unit }, Answer::Quantity(q)) => {
                let converted = q
                    .to(unit)
                    .ok_or_else(|| format!("'{}' is not convertible to '{unit}'", q.unit))?;
                if !converted.magnitude.is_finite() {
                    return Err(format!("{} is not a finite number", converted.magnitude));
                }
                Ok(Answer::Quantity(converted))
            }
            (DecisionKind::Choice { items }, Answer::Choice(value)) => {
                if items.iter().any(|item| item.value == value) {
                    Ok(Answer::Choice(value))
                } else {
                    Err(format!("'{value}' is not one of the offered choices"))
                }
            }
            (DecisionKind::Text { min_length }, Answer::Text(text)) => {
                if text.chars().count() >= *min_length {
                    Ok(Answer::Text(text))
                } else {
                    Err(format!("needs at least {min_length} characters"))
                }
            }
            (DecisionKind::Identifiers, Answer::Identifiers(ids)) => {
                if ids.is_empty() {
                    return Err("needs at least one identifier".to_string());
                }
                if ids.iter().any(|id| id.trim().is_empty()) {
                    return Err("identifiers must not be blank".to_string());
                }
                Ok(Answer::Identifiers(ids))
            }
            (kind, other) => Err(format!("expected a {} answer, got {other:?}", kind.name())),
        }
    }

    pub fn render_question(&self, question: &str) -> String {
        match self {
            DecisionKind::Numeric { unit } if !unit.is_dimensionless() => {
                format!("{question} in [{unit}]")
            }
            _ => question.to_string(),
        }
    }

    pub fn body(&self) -> Option<Vec<BodyRow>> {
        match self {
            DecisionKind::Choice { items } => Some(
                items
                    .iter()
                    .enumerate()
                    .map(|(key, item)| BodyRow {
                        key,
                        value: item.value.clone(),
                        label: item.label().to_string(),
                    })
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Coerce one line of console text.
    pub fn parse_text(&self, raw: &str) -> Result<Answer, ParseError> {
        let text = raw.trim();
        match self {
            DecisionKind::Bool => {
                let lower = text.to_lowercase();
                if TRUE_WORDS.contains(&lower.as_str()) {
                    Ok(Answer::Bool(true))
                } else if FALSE_WORDS.contains(&lower.as_str()) {
                    Ok(Answer::Bool(false))
                } else {
                    Err(ParseError::invalid(raw, "expected y/n"))
                }
            }
            DecisionKind::Numeric { unit } => {
                let mut parts = text.splitn(2, char::is_whitespace);
                let number = parts.next().unwrap_or_default().replace(',', ".");
                let magnitude: f64 = number
                    .parse()
                    .map_err(|_| ParseError::invalid(raw, "expected a number"))?;
                let given = match parts.next().map(str::trim) {
                    Some(symbol) if !symbol.is_empty() => symbol
                        .parse::<Unit>()
                        .map_err(|e| ParseError::invalid(raw, e.to_string()))?,
                    _ => unit.clone(),
                };
                Ok(Answer::Quantity(Quantity::new(magnitude, given)))
            }
            DecisionKind::Choice { items } => {
                if let Ok(index) = text.parse::<usize>() {
                    return items
                        .get(index)
                        .map(|item| Answer::Choice(item.value.clone()))
                        .ok_or_else(|| ParseError::invalid(raw, "index out of range"));
                }
                items
                    .iter()
                    .find(|item| item.value == text)
                    .map(|item| Answer::Choice(item.value.clone()))
                    .ok_or_else(|| ParseError::invalid(raw, "expected an index from the list"))
            }
            DecisionKind::Text { .. } => Ok(Answer::Text(text.to_string())),
            DecisionKind::Identifiers => Ok(Answer::Identifiers(split_identifiers(text))),
        }
    }

    /// Coerce a JSON primitive sent by a remote client or a script.
    pub fn parse_json(&self, raw: &Value) -> Result<Answer, ParseError> {
        let unsupported = ParseError::Unsupported { kind: self.name() };
        match (self, raw) {
            (DecisionKind::Bool, Value::Bool(b)) => Ok(Answer::Bool(*b)),
            (DecisionKind::Numeric { unit }, Value::Number(n)) => {
                let magnitude = n.as_f64().ok_or(unsupported)?;
                Ok(Answer::Quantity(Quantity::new(magnitude, unit.clone())))
            }
            (DecisionKind::Numeric { .. }, Value::Object(_)) => {
                serde_json::from_value::<Quantity>(raw.clone())
                    .map(Answer::Quantity)
                    .map_err(|e| ParseError::invalid(raw.to_string(), e.to_string()))
            }
            (DecisionKind::Choice { .. }, Value::String(s)) => Ok(Answer::Choice(s.clone())),
            (DecisionKind::Choice { items }, Value::Number(n)) => {
                let index = n.as_u64().ok_or(unsupported)?;
                usize::try_from(index)
                    .ok()
                    .and_then(|i| items.get(i))
                    .map(|item| Answer::Choice(item.value.clone()))
                    .ok_or_else(|| ParseError::invalid(raw.to_string(), "index out of range"))
            }
            (DecisionKind::Text { .. }, Value::String(s)) => Ok(Answer::Text(s.clone())),
            (DecisionKind::Identifiers, Value::String(s)) => {
                Ok(Answer::Identifiers(split_identifiers(s)))
            }
            (DecisionKind::Identifiers, Value::Array(values)) => values
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<BTreeSet<String>>>()
                .map(Answer::Identifiers)
                .ok_or(unsupported),
            _ => Err(unsupported),
        }
    }

    /// Minimal JSON-safe representation of an answer.
    pub fn serialize_answer(&self, answer: &Answer) -> Value {
        match answer {
            Answer::Bool(b) => Value::Bool(*b),
            Answer::Quantity(q) => json!({ "value": q.magnitude, "unit": q.unit.name() }),
            Answer::Choice(s) | Answer::Text(s) => Value::String(s.clone()),
            Answer::Identifiers(ids) => Value::Array(ids.iter().cloned().map(Value::String).collect()),
        }
    }

    /// Rebuild an answer from its stored representation.
    ///
    /// Bare numbers are read in the declared unit (older answer files
    /// stored magnitudes only).
    pub fn deserialize_answer(&self, stored: &Value) -> Result<Answer, ParseError> {
        self.parse_json(stored)
    }
}

fn split_identifiers(raw: &str) -> BTreeSet<String> {
    raw.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}
