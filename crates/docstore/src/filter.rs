//! Declarative row predicates.
//!
//! Backends with native predicate support translate a [`Filter`]; others
//! call [`Filter::evaluate`] per record.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::Record;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    Eq { field: String, value: Value },
    Ne { field: String, value: Value },
    Gt { field: String, value: Value },
    Ge { field: String, value: Value },
    Lt { field: String, value: Value },
    Le { field: String, value: Value },
    HasField(String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ge {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Le {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn has_field(field: impl Into<String>) -> Self {
        Filter::HasField(field.into())
    }

    pub fn negate(self) -> Self {
        Filter::Not(Box::new(self))
    }

    /// Object-match form: every field of `template` must be equal.
    pub fn matching(template: &Record) -> Self {
        Filter::And(
            template
                .iter()
                .map(|(field, value)| Filter::eq(field.clone(), value.clone()))
                .collect(),
        )
    }

    pub fn evaluate(&self, record: &Record) -> bool {
        match self {
            Filter::Eq { field, value } => record.get(field) == Some(value),
            Filter::Ne { field, value } => record.get(field) != Some(value),
            Filter::Gt { field, value } => {
                compare_field(record, field, value) == Some(Ordering::Greater)
            }
            Filter::Ge { field, value } => matches!(
                compare_field(record, field, value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Filter::Lt { field, value } => {
                compare_field(record, field, value) == Some(Ordering::Less)
            }
            Filter::Le { field, value } => matches!(
                compare_field(record, field, value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Filter::HasField(field) => record.contains_key(field),
            Filter::And(filters) => filters.iter().all(|f| f.evaluate(record)),
            Filter::Or(filters) => filters.iter().any(|f| f.evaluate(record)),
            Filter::Not(filter) => !filter.evaluate(record),
        }
    }
}

/// The record with the greatest value of `field`. Records without the field
/// are skipped; on ties or incomparable values the earliest record wins.
pub fn max_by_field<'a>(
    records: impl IntoIterator<Item = &'a Record>,
    field: &str,
) -> Option<&'a Record> {
    let mut best: Option<(&'a Record, &'a Value)> = None;
    for record in records {
        let Some(value) = record.get(field) else {
            continue;
        };
        match best {
            Some((_, current)) if compare_values(value, current) != Some(Ordering::Greater) => {}
            _ => best = Some((record, value)),
        }
    }
    best.map(|(record, _)| record)
}

fn compare_field(record: &Record, field: &str, value: &Value) -> Option<Ordering> {
    record.get(field).and_then(|stored| compare_values(stored, value))
}

/// Order two JSON values of the same kind. Mixed kinds, nulls, arrays and
/// objects are incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
