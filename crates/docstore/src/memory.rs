//! In-memory reference implementation of [`DocumentStore`].
//!
//! Deterministic and test-friendly: records keep insertion order, conflicts
//! follow `replace`/`update` semantics, and every table carries a broadcast
//! change feed. Production deployments use a networked backend.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::ConnectionOptions;
use crate::filter::{max_by_field, Filter};
use crate::model::{ChangeEvent, InsertOptions, Record, WriteMode, WriteResult};
use crate::traits::{ChangeStream, DocumentStore, StoreConnector};
use crate::{StoreError, StoreResult};

const FEED_CAPACITY: usize = 1024;

/// In-memory document store.
pub struct InMemoryDocumentStore {
    databases: RwLock<BTreeMap<String, Database>>,
    connection: ConnectionOptions,
    faults: Mutex<Faults>,
    requests: AtomicUsize,
}

#[derive(Default)]
struct Database {
    tables: BTreeMap<String, Table>,
}

struct Table {
    primary_key: String,
    indices: BTreeSet<String>,
    records: Vec<Record>,
    feed: broadcast::Sender<ChangeEvent>,
}

impl Table {
    fn new(primary_key: &str) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            primary_key: primary_key.to_string(),
            indices: BTreeSet::new(),
            records: Vec::new(),
            feed,
        }
    }

    fn position(&self, key: &Value) -> Option<usize> {
        self.records
            .iter()
            .position(|record| record.get(&self.primary_key) == Some(key))
    }

    fn publish(&self, change: ChangeEvent) {
        // no subscribers is fine
        let _ = self.feed.send(change);
    }
}

#[derive(Default)]
struct Faults {
    next_request: Option<StoreError>,
    indices: HashMap<String, StoreError>,
    hide_next_db_list: bool,
    hide_next_table_list: bool,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::with_connection(ConnectionOptions::default())
    }

    /// Create a store that remembers the options it was opened with.
    pub fn with_connection(connection: ConnectionOptions) -> Self {
        Self {
            databases: RwLock::new(BTreeMap::new()),
            connection,
            faults: Mutex::new(Faults::default()),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn connection(&self) -> &ConnectionOptions {
        &self.connection
    }

    /// Number of requests served so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Fail the next request of any kind with `error`.
    #[cfg(any(test, feature = "test-util"))]
    pub fn fail_next_request(&self, error: StoreError) -> StoreResult<()> {
        self.faults()?.next_request = Some(error);
        Ok(())
    }

    /// Fail the next create of `index` with `error`.
    #[cfg(any(test, feature = "test-util"))]
    pub fn fail_next_index(&self, index: impl Into<String>, error: StoreError) -> StoreResult<()> {
        self.faults()?.indices.insert(index.into(), error);
        Ok(())
    }

    /// Make the next `db_list` report no databases, as a concurrent
    /// provisioner racing this one would observe.
    #[cfg(any(test, feature = "test-util"))]
    pub fn hide_next_db_list(&self) -> StoreResult<()> {
        self.faults()?.hide_next_db_list = true;
        Ok(())
    }

    /// Make the next `table_list` report no tables.
    #[cfg(any(test, feature = "test-util"))]
    pub fn hide_next_table_list(&self) -> StoreResult<()> {
        self.faults()?.hide_next_table_list = true;
        Ok(())
    }

    /// Secondary indices defined on a table.
    pub fn indices(&self, db: &str, table: &str) -> StoreResult<Vec<String>> {
        let guard = self.read()?;
        Ok(table_ref(&guard, db, table)?.indices.iter().cloned().collect())
    }

    /// Delete a record by primary key, publishing a delete change.
    pub fn remove(&self, db: &str, table: &str, key: &Value) -> StoreResult<Option<Record>> {
        self.begin()?;
        let mut guard = self.write()?;
        let table = table_mut(&mut guard, db, table)?;
        let Some(position) = table.position(key) else {
            return Ok(None);
        };
        let removed = table.records.remove(position);
        table.publish(ChangeEvent {
            old_val: Some(removed.clone()),
            new_val: None,
        });
        Ok(Some(removed))
    }

    fn begin(&self) -> StoreResult<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let mut faults = self.faults()?;
        match faults.next_request.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn faults(&self) -> StoreResult<std::sync::MutexGuard<'_, Faults>> {
        self.faults
            .lock()
            .map_err(|_| StoreError::Backend("fault lock poisoned".to_string()))
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, BTreeMap<String, Database>>> {
        self.databases
            .read()
            .map_err(|_| StoreError::Backend("catalog lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, BTreeMap<String, Database>>> {
        self.databases
            .write()
            .map_err(|_| StoreError::Backend("catalog lock poisoned".to_string()))
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

fn table_ref<'a>(
    databases: &'a BTreeMap<String, Database>,
    db: &str,
    table: &str,
) -> StoreResult<&'a Table> {
    databases
        .get(db)
        .ok_or_else(|| StoreError::DatabaseNotFound(db.to_string()))?
        .tables
        .get(table)
        .ok_or_else(|| StoreError::TableNotFound {
            db: db.to_string(),
            table: table.to_string(),
        })
}

fn table_mut<'a>(
    databases: &'a mut BTreeMap<String, Database>,
    db: &str,
    table: &str,
) -> StoreResult<&'a mut Table> {
    databases
        .get_mut(db)
        .ok_or_else(|| StoreError::DatabaseNotFound(db.to_string()))?
        .tables
        .get_mut(table)
        .ok_or_else(|| StoreError::TableNotFound {
            db: db.to_string(),
            table: table.to_string(),
        })
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn db_list(&self) -> StoreResult<Vec<String>> {
        self.begin()?;
        if std::mem::take(&mut self.faults()?.hide_next_db_list) {
            return Ok(Vec::new());
        }
        Ok(self.read()?.keys().cloned().collect())
    }

    async fn db_create(&self, db: &str) -> StoreResult<()> {
        self.begin()?;
        let mut guard = self.write()?;
        if guard.contains_key(db) {
            return Err(StoreError::DatabaseExists(db.to_string()));
        }
        guard.insert(db.to_string(), Database::default());
        Ok(())
    }

    async fn table_list(&self, db: &str) -> StoreResult<Vec<String>> {
        self.begin()?;
        let hidden = std::mem::take(&mut self.faults()?.hide_next_table_list);
        let guard = self.read()?;
        let database = guard
            .get(db)
            .ok_or_else(|| StoreError::DatabaseNotFound(db.to_string()))?;
        if hidden {
            return Ok(Vec::new());
        }
        Ok(database.tables.keys().cloned().collect())
    }

    async fn table_create(&self, db: &str, table: &str, primary_key: &str) -> StoreResult<()> {
        self.begin()?;
        let mut guard = self.write()?;
        let database = guard
            .get_mut(db)
            .ok_or_else(|| StoreError::DatabaseNotFound(db.to_string()))?;
        if database.tables.contains_key(table) {
            return Err(StoreError::TableExists {
                db: db.to_string(),
                table: table.to_string(),
            });
        }
        database
            .tables
            .insert(table.to_string(), Table::new(primary_key));
        Ok(())
    }

    async fn index_create(&self, db: &str, table: &str, index: &str) -> StoreResult<()> {
        self.begin()?;
        if let Some(error) = self.faults()?.indices.remove(index) {
            return Err(error);
        }
        let mut guard = self.write()?;
        let target = table_mut(&mut guard, db, table)?;
        if !target.indices.insert(index.to_string()) {
            return Err(StoreError::IndexExists {
                table: table.to_string(),
                index: index.to_string(),
            });
        }
        Ok(())
    }

    async fn insert(
        &self,
        db: &str,
        table: &str,
        records: Vec<Record>,
        options: InsertOptions,
    ) -> StoreResult<WriteResult> {
        self.begin()?;
        let mut guard = self.write()?;
        let target = table_mut(&mut guard, db, table)?;
        let mut result = WriteResult::default();

        for mut record in records {
            let existing = record
                .get(&target.primary_key)
                .filter(|key| !key.is_null())
                .cloned();
            let key = match existing {
                Some(key) => key,
                None => {
                    let key = Value::String(Uuid::new_v4().to_string());
                    record.insert(target.primary_key.clone(), key.clone());
                    result.generated_keys.push(key.clone());
                    key
                }
            };

            let change = match target.position(&key) {
                Some(position) => {
                    let old = target.records[position].clone();
                    let new = match options.conflict {
                        WriteMode::Replace => record,
                        WriteMode::Update => {
                            let mut merged = old.clone();
                            merged.extend(record);
                            merged
                        }
                    };
                    if new == old {
                        result.unchanged += 1;
                        continue;
                    }
                    result.replaced += 1;
                    target.records[position] = new.clone();
                    ChangeEvent {
                        old_val: Some(old),
                        new_val: Some(new),
                    }
                }
                None => {
                    result.inserted += 1;
                    target.records.push(record.clone());
                    ChangeEvent {
                        old_val: None,
                        new_val: Some(record),
                    }
                }
            };

            target.publish(change.clone());
            if options.return_changes {
                result.changes.push(change);
            }
        }

        Ok(result)
    }

    async fn get(&self, db: &str, table: &str, key: &Value) -> StoreResult<Option<Record>> {
        self.begin()?;
        let guard = self.read()?;
        let target = table_ref(&guard, db, table)?;
        Ok(target
            .position(key)
            .map(|position| target.records[position].clone()))
    }

    async fn get_all(&self, db: &str, table: &str, keys: &[Value]) -> StoreResult<Vec<Record>> {
        self.begin()?;
        let guard = self.read()?;
        let target = table_ref(&guard, db, table)?;
        Ok(keys
            .iter()
            .filter_map(|key| target.position(key))
            .map(|position| target.records[position].clone())
            .collect())
    }

    async fn scan(&self, db: &str, table: &str) -> StoreResult<Vec<Record>> {
        self.begin()?;
        let guard = self.read()?;
        Ok(table_ref(&guard, db, table)?.records.clone())
    }

    async fn filter(&self, db: &str, table: &str, filter: &Filter) -> StoreResult<Vec<Record>> {
        self.begin()?;
        let guard = self.read()?;
        Ok(table_ref(&guard, db, table)?
            .records
            .iter()
            .filter(|record| filter.evaluate(record))
            .cloned()
            .collect())
    }

    async fn max_by(&self, db: &str, table: &str, field: &str) -> StoreResult<Option<Record>> {
        self.begin()?;
        let guard = self.read()?;
        let records = &table_ref(&guard, db, table)?.records;
        Ok(max_by_field(records, field).cloned())
    }

    async fn changes(&self, db: &str, table: &str) -> StoreResult<ChangeStream> {
        self.begin()?;
        let receiver = table_ref(&*self.read()?, db, table)?.feed.subscribe();

        let feed = stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(change) => Some((Ok(change), receiver)),
                Err(broadcast::error::RecvError::Lagged(missed)) => Some((
                    Err(StoreError::Backend(format!(
                        "change feed lagged, {missed} events dropped"
                    ))),
                    receiver,
                )),
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });
        Ok(feed.boxed())
    }
}

#[async_trait]
impl StoreConnector for InMemoryDocumentStore {
    async fn connect(options: &ConnectionOptions) -> StoreResult<Self> {
        Ok(Self::with_connection(options.clone()))
    }
}
