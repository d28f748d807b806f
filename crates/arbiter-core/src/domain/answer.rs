//! Answer model: the typed value a decision resolves to.

use std::collections::BTreeSet;
use std::fmt;

use super::units::Quantity;

/// A resolved decision value.
///
/// The variant always matches the decision kind that accepted it; the kind
/// owns parsing and validation, this type only carries the value.
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    Bool(bool),
    Quantity(Quantity),
    Choice(String),
    Text(String),
    Identifiers(BTreeSet<String>),
}

impl Answer {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Answer::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_quantity(&self) -> Option<&Quantity> {
        match self {
            Answer::Quantity(q) => Some(q),
            _ => None,
        }
    }

    /// Choice or free text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Answer::Choice(s) | Answer::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_identifiers(&self) -> Option<&BTreeSet<String>> {
        match self {
            Answer::Identifiers(ids) => Some(ids),
            _ => None,
        }
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Answer::Bool(b) => write!(f, "{b}"),
            Answer::Quantity(q) => write!(f, "{q}"),
            Answer::Choice(s) | Answer::Text(s) => f.write_str(s),
            Answer::Identifiers(ids) => {
                let joined: Vec<&str> = ids.iter().map(String::as_str).collect();
                write!(f, "{{{}}}", joined.join(", "))
            }
        }
    }
}

impl From<bool> for Answer {
    fn from(value: bool) -> Self {
        Answer::Bool(value)
    }
}

impl From<Quantity> for Answer {
    fn from(value: Quantity) -> Self {
        Answer::Quantity(value)
    }
}
