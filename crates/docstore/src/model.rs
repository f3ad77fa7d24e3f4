use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

/// A stored record as the store sees it.
pub type Record = Map<String, Value>;

/// A caller-supplied document.
///
/// Each field is either present with a value or absent. `None` and JSON
/// `null` both mean absent; deserializing `{"note": null}` yields an absent
/// `note` field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(BTreeMap<String, Option<Value>>);

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Document::set`].
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Builder form of [`Document::set_absent`].
    pub fn with_absent(mut self, field: impl Into<String>) -> Self {
        self.set_absent(field);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), Some(value.into()));
    }

    /// Keep the field but mark it as carrying no value.
    pub fn set_absent(&mut self, field: impl Into<String>) {
        self.0.insert(field.into(), None);
    }

    pub fn get(&self, field: &str) -> Option<&Option<Value>> {
        self.0.get(field)
    }

    pub fn contains_field(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Option<Value>)> {
        self.0.iter()
    }

    /// Convert a JSON object into a document. Returns `None` for any other
    /// JSON shape.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self::from(map)),
            _ => None,
        }
    }
}

impl From<Record> for Document {
    fn from(record: Record) -> Self {
        Self(
            record
                .into_iter()
                .map(|(field, value)| (field, Some(value)))
                .collect(),
        )
    }
}

impl FromIterator<(String, Option<Value>)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Option<Value>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Write payload, chosen by the caller as one document or a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Single(Document),
    Batch(Vec<Document>),
}

impl Payload {
    /// An empty payload is a document with no fields or a batch with no
    /// elements.
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Single(document) => document.is_empty(),
            Payload::Batch(documents) => documents.is_empty(),
        }
    }

    pub fn documents(&self) -> &[Document] {
        match self {
            Payload::Single(document) => std::slice::from_ref(document),
            Payload::Batch(documents) => documents,
        }
    }
}

impl From<Document> for Payload {
    fn from(document: Document) -> Self {
        Payload::Single(document)
    }
}

impl From<Vec<Document>> for Payload {
    fn from(documents: Vec<Document>) -> Self {
        Payload::Batch(documents)
    }
}

/// Conflict-resolution mode for inserts whose primary key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Overwrite the whole stored record.
    Replace,
    /// Merge the written fields into the stored record.
    Update,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Replace => "replace",
            WriteMode::Update => "update",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options forwarded with an insert request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOptions {
    pub conflict: WriteMode,
    pub return_changes: bool,
}

impl InsertOptions {
    pub fn new(conflict: WriteMode) -> Self {
        Self {
            conflict,
            return_changes: true,
        }
    }
}

/// Reply from an insert request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteResult {
    pub inserted: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub errors: usize,
    pub first_error: Option<String>,
    /// Primary keys the store generated for records written without one.
    #[serde(default)]
    pub generated_keys: Vec<Value>,
    #[serde(default)]
    pub changes: Vec<ChangeEvent>,
}

/// A single delta on a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub old_val: Option<Record>,
    pub new_val: Option<Record>,
}

impl ChangeEvent {
    pub fn kind(&self) -> ChangeKind {
        match (&self.old_val, &self.new_val) {
            (None, _) => ChangeKind::Insert,
            (Some(_), Some(_)) => ChangeKind::Update,
            (Some(_), None) => ChangeKind::Delete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Result of a single provisioning step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisioningOutcome {
    DbCreated,
    DbExists,
    TableCreated,
    TableExists,
}

impl ProvisioningOutcome {
    pub fn created(&self) -> bool {
        matches!(
            self,
            ProvisioningOutcome::DbCreated | ProvisioningOutcome::TableCreated
        )
    }
}

impl fmt::Display for ProvisioningOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProvisioningOutcome::DbCreated => "DB_CREATED",
            ProvisioningOutcome::DbExists => "DB_EXISTS",
            ProvisioningOutcome::TableCreated => "TABLE_CREATED",
            ProvisioningOutcome::TableExists => "TABLE_EXISTS",
        };
        f.write_str(label)
    }
}

/// How one index-create request settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    Created,
    /// The store refused the create because the index exists. Reported on
    /// its own so callers decide whether that counts as success.
    AlreadyExists,
    Failed(StoreError),
}

impl IndexOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, IndexOutcome::Failed(_))
    }
}

/// Settlement record for a single index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSettlement {
    pub index: String,
    pub outcome: IndexOutcome,
}
