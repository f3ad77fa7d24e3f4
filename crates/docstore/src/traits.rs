use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::config::ConnectionOptions;
use crate::filter::Filter;
use crate::model::{ChangeEvent, InsertOptions, Record, WriteResult};
use crate::StoreResult;

/// Live, unbounded feed of table changes. Dropping it unsubscribes.
pub type ChangeStream = BoxStream<'static, StoreResult<ChangeEvent>>;

/// Capability interface of a document store backend.
///
/// Every request names its database and table explicitly; the backend owns
/// pooling, wire protocol and retries.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Names of all databases.
    async fn db_list(&self) -> StoreResult<Vec<String>>;

    /// Create a database. Fails with `DatabaseExists` when it is present.
    async fn db_create(&self, db: &str) -> StoreResult<()>;

    /// Names of all tables in `db`.
    async fn table_list(&self, db: &str) -> StoreResult<Vec<String>>;

    /// Create a table keyed by `primary_key`. Fails with `TableExists` when
    /// it is present.
    async fn table_create(&self, db: &str, table: &str, primary_key: &str) -> StoreResult<()>;

    /// Create a secondary index on the field of the same name. Fails with
    /// `IndexExists` when it is present.
    async fn index_create(&self, db: &str, table: &str, index: &str) -> StoreResult<()>;

    /// Insert records, resolving primary key conflicts per `options`.
    async fn insert(
        &self,
        db: &str,
        table: &str,
        records: Vec<Record>,
        options: InsertOptions,
    ) -> StoreResult<WriteResult>;

    /// Point lookup by primary key.
    async fn get(&self, db: &str, table: &str, key: &Value) -> StoreResult<Option<Record>>;

    /// Batch lookup by primary key. Yields one record per requested key
    /// that exists, in request order, so a repeated key repeats its record.
    async fn get_all(&self, db: &str, table: &str, keys: &[Value]) -> StoreResult<Vec<Record>>;

    /// Full table scan.
    async fn scan(&self, db: &str, table: &str) -> StoreResult<Vec<Record>>;

    /// Records matching `filter`.
    async fn filter(&self, db: &str, table: &str, filter: &Filter) -> StoreResult<Vec<Record>>;

    /// Record holding the greatest value of `field`, if any record has it.
    async fn max_by(&self, db: &str, table: &str, field: &str) -> StoreResult<Option<Record>>;

    /// Subscribe to the table's change feed.
    async fn changes(&self, db: &str, table: &str) -> StoreResult<ChangeStream>;

    async fn db_exists(&self, db: &str) -> StoreResult<bool> {
        Ok(self.db_list().await?.iter().any(|name| name == db))
    }

    async fn table_exists(&self, db: &str, table: &str) -> StoreResult<bool> {
        Ok(self.table_list(db).await?.iter().any(|name| name == table))
    }
}

/// Backends that can be opened from [`ConnectionOptions`].
#[async_trait]
pub trait StoreConnector: DocumentStore + Sized {
    async fn connect(options: &ConnectionOptions) -> StoreResult<Self>;
}
