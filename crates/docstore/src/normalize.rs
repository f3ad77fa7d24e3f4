//! Write payload normalization.
//!
//! `replace` overwrites the whole stored record, so an absent field is
//! dropped from the payload and the store never sees a placeholder.
//! `update` merges field by field, so an absent field has to be sent as an
//! explicit null or the stored value would survive the write.

use serde_json::Value;

use crate::classify::is_absent;
use crate::model::{Document, Payload, Record, WriteMode};

/// Payload for a `replace` write: absent fields removed.
pub fn for_replace(document: &Document) -> Record {
    document
        .iter()
        .filter(|(_, value)| !is_absent(value))
        .filter_map(|(field, value)| value.clone().map(|value| (field.clone(), value)))
        .collect()
}

/// Payload for an `update` write: absent fields set to null.
pub fn for_update(document: &Document) -> Record {
    document
        .iter()
        .map(|(field, value)| (field.clone(), value.clone().unwrap_or(Value::Null)))
        .collect()
}

/// Normalize every document of `payload` for `mode`, keeping batch order.
pub fn normalize(mode: WriteMode, payload: &Payload) -> Vec<Record> {
    let transform = match mode {
        WriteMode::Replace => for_replace,
        WriteMode::Update => for_update,
    };
    payload.documents().iter().map(transform).collect()
}
