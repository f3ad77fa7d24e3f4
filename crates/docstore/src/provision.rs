//! Idempotent schema provisioning.
//!
//! Provisioning walks `NO_DB -> DB_EXISTS -> NO_TABLE -> TABLE_EXISTS` as a
//! pipeline of independent steps, then fans out index creation. Existing
//! state is never an error: a create request that loses a race against a
//! concurrent provisioner resolves to the existing-state outcome.

use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::config::ModelConfig;
use crate::error::{ServiceError, ServiceResult, StoreError, StoreResult};
use crate::model::{IndexOutcome, IndexSettlement, ProvisioningOutcome};
use crate::traits::DocumentStore;

/// Everything a successful provisioning run settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub database: ProvisioningOutcome,
    pub table: ProvisioningOutcome,
    /// One entry per requested index, in request order.
    pub indices: Vec<IndexSettlement>,
}

impl ProvisionReport {
    /// Indices whose creation failed for a reason other than existing.
    pub fn failed_indices(&self) -> Vec<&IndexSettlement> {
        self.indices
            .iter()
            .filter(|settlement| settlement.outcome.is_failed())
            .collect()
    }

    /// Indices the store reported as already present.
    pub fn existing_indices(&self) -> Vec<&str> {
        self.indices
            .iter()
            .filter(|settlement| settlement.outcome == IndexOutcome::AlreadyExists)
            .map(|settlement| settlement.index.as_str())
            .collect()
    }

    /// True when every requested index exists, whether created now or before.
    pub fn is_fully_settled(&self) -> bool {
        self.indices
            .iter()
            .all(|settlement| !settlement.outcome.is_failed())
    }

    /// Turn index failures into [`ServiceError::PartialIndexFailure`].
    pub fn into_strict(self) -> ServiceResult<Self> {
        if self.is_fully_settled() {
            return Ok(self);
        }
        Err(ServiceError::PartialIndexFailure {
            failed: self
                .failed_indices()
                .into_iter()
                .map(|settlement| settlement.index.clone())
                .collect(),
        })
    }
}

/// Provisioning steps for one model against one store.
pub struct Provisioner<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    model: &'a ModelConfig,
}

impl<'a, S: DocumentStore + ?Sized> Provisioner<'a, S> {
    pub fn new(store: &'a S, model: &'a ModelConfig) -> Self {
        Self { store, model }
    }

    /// Create the database unless it exists.
    #[instrument(skip(self), fields(db = %self.model.db))]
    pub async fn ensure_database(&self) -> StoreResult<ProvisioningOutcome> {
        let db = &self.model.db;
        if self.store.db_exists(db).await? {
            debug!("database exists");
            return Ok(ProvisioningOutcome::DbExists);
        }

        match self.store.db_create(db).await {
            Ok(()) => {
                info!("database created");
                Ok(ProvisioningOutcome::DbCreated)
            }
            Err(StoreError::DatabaseExists(_)) => {
                debug!("database created concurrently");
                Ok(ProvisioningOutcome::DbExists)
            }
            Err(err) => Err(err),
        }
    }

    /// Ensure the database, then create the table unless it exists.
    ///
    /// Returns the database outcome and the table outcome.
    #[instrument(skip(self), fields(db = %self.model.db, table = %self.model.table))]
    pub async fn ensure_table(&self) -> StoreResult<(ProvisioningOutcome, ProvisioningOutcome)> {
        let database = self.ensure_database().await?;
        let ModelConfig {
            db,
            table,
            primary_key,
            ..
        } = self.model;

        if self.store.table_exists(db, table).await? {
            debug!("table exists");
            return Ok((database, ProvisioningOutcome::TableExists));
        }

        match self.store.table_create(db, table, primary_key).await {
            Ok(()) => {
                info!(primary_key = %primary_key, "table created");
                Ok((database, ProvisioningOutcome::TableCreated))
            }
            Err(StoreError::TableExists { .. }) => {
                debug!("table created concurrently");
                Ok((database, ProvisioningOutcome::TableExists))
            }
            Err(err) => Err(err),
        }
    }

    /// Issue every index create concurrently and wait for all of them.
    ///
    /// Never stops at the first failure; the result has one settlement per
    /// requested index, in request order.
    #[instrument(skip(self), fields(db = %self.model.db, table = %self.model.table))]
    pub async fn ensure_indices(&self, indices: &[String]) -> Vec<IndexSettlement> {
        let ModelConfig { db, table, .. } = self.model;
        let requests = indices.iter().map(|index| async move {
            let outcome = match self.store.index_create(db, table, index).await {
                Ok(()) => {
                    info!(index = %index, "index created");
                    IndexOutcome::Created
                }
                Err(StoreError::IndexExists { .. }) => {
                    debug!(index = %index, "index exists");
                    IndexOutcome::AlreadyExists
                }
                Err(err) => {
                    warn!(index = %index, error = %err, "index creation failed");
                    IndexOutcome::Failed(err)
                }
            };
            IndexSettlement {
                index: index.clone(),
                outcome,
            }
        });

        join_all(requests).await
    }

    /// Provision database, table and indices for the model.
    pub async fn create_db_and_table(&self) -> ServiceResult<ProvisionReport> {
        self.model.validate()?;

        let (database, table) = self.ensure_table().await?;
        let indices = self.ensure_indices(&self.model.indices).await;

        Ok(ProvisionReport {
            database,
            table,
            indices,
        })
    }
}
