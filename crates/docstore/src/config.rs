//! Model configuration for a data service.
//!
//! A model names one table (database, table, primary key, secondary
//! indices) plus the connection options handed to the store connector.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, ServiceResult};

/// Table binding for one data service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Database name. Empty means unset.
    pub db: String,

    /// Table name. Empty means unset.
    pub table: String,

    /// Primary key field, only used when the table is created.
    pub primary_key: String,

    /// Secondary indices to ensure, in request order.
    pub indices: Vec<String>,

    /// Passed through to the store connector.
    pub connection: ConnectionOptions,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            db: String::new(),
            table: String::new(),
            primary_key: "id".to_string(),
            indices: Vec::new(),
            connection: ConnectionOptions::default(),
        }
    }
}

impl ModelConfig {
    pub fn new(db: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    pub fn with_indices<I, S>(mut self, indices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indices = indices.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_connection(mut self, connection: ConnectionOptions) -> Self {
        self.connection = connection;
        self
    }

    /// Reject models that cannot be provisioned.
    pub fn validate(&self) -> ServiceResult<()> {
        if self.db.is_empty() || self.table.is_empty() {
            return Err(ServiceError::InvalidModel(format!(
                "db and table are required (db={:?}, table={:?})",
                self.db, self.table
            )));
        }
        Ok(())
    }

    /// Parse a model from TOML text.
    pub fn from_toml_str(contents: &str) -> ServiceResult<Self> {
        toml::from_str(contents).map_err(|e| ServiceError::Config(e.to_string()))
    }

    /// Load a model from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ServiceResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ServiceError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&contents)
    }
}

/// Connection parameters for the store. Not inspected by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    pub host: String,
    pub port: u16,
    /// Maximum pooled connections.
    pub pool_max: u32,
    /// Ask the driver for cursors instead of fully buffered results.
    pub cursor: bool,
    pub auth_key: Option<String>,
    /// CA certificate for TLS connections.
    pub ca_cert: Option<PathBuf>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 28015,
            pool_max: 100,
            cursor: true,
            auth_key: None,
            ca_cert: None,
        }
    }
}
