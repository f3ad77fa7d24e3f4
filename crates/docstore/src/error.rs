use thiserror::Error;

use crate::model::WriteMode;

/// Result type for store capability operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for data service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors surfaced by a document store backend.
///
/// The `*Exists` variants are reported by create requests that hit
/// pre-existing state. Provisioning converts them into existing-state
/// outcomes instead of failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("database already exists: {0}")]
    DatabaseExists(String),

    #[error("table already exists: {db}.{table}")]
    TableExists { db: String, table: String },

    #[error("index already exists: {index} on {table}")]
    IndexExists { table: String, index: String },

    #[error("database not found: {0}")]
    DatabaseNotFound(String),

    #[error("table not found: {db}.{table}")]
    TableNotFound { db: String, table: String },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// True when the error only reports that the target already exists.
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            StoreError::DatabaseExists(_)
                | StoreError::TableExists { .. }
                | StoreError::IndexExists { .. }
        )
    }
}

/// Errors returned by the data service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The model configuration is missing its database or table name.
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// A write was handed an empty document or an empty batch.
    #[error("{mode} - the document is empty")]
    EmptyDocument { mode: WriteMode },

    /// Store failures are forwarded unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Some index creations failed while others settled.
    #[error("index creation failed for: {}", failed.join(", "))]
    PartialIndexFailure { failed: Vec<String> },

    /// A table operation ran before provisioning succeeded on this service.
    #[error("table {db}.{table} has not been provisioned")]
    NotProvisioned { db: String, table: String },

    #[error("configuration error: {0}")]
    Config(String),
}
