//! Field classification.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::model::Document;

/// True when a field slot carries no value. Falsy values (`0`, `""`,
/// `false`, empty arrays and objects) are values.
pub fn is_absent(value: &Option<Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

/// Names of the fields in `document` that carry no value.
pub fn absent_fields(document: &Document) -> BTreeSet<String> {
    document
        .iter()
        .filter(|(_, value)| is_absent(value))
        .map(|(field, _)| field.clone())
        .collect()
}

/// Names of the fields in `document` that carry a value.
pub fn present_fields(document: &Document) -> BTreeSet<String> {
    document
        .iter()
        .filter(|(_, value)| !is_absent(value))
        .map(|(field, _)| field.clone())
        .collect()
}
