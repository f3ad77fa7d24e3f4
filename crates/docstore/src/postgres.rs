//! PostgreSQL adapter for the document store capability.
//!
//! Databases map to schemas and tables to `(key TEXT, doc JSONB)` relations.
//! Each schema carries a `docstore_tables` catalog recording the primary key
//! field of every table. Secondary indices are expression indices on
//! `doc -> 'field'`. Change feeds use `LISTEN`/`NOTIFY`, so a change whose
//! JSON exceeds the NOTIFY payload limit fails its write.
//!
//! Predicate filtering and max-by run as deterministic in-Rust evaluation over
//! the table scan, matching the in-memory store's ordering rules.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgListener, PgPool, PgPoolOptions, PgSslMode};
use sqlx::Row;
use uuid::Uuid;

use crate::config::ConnectionOptions;
use crate::filter::{max_by_field, Filter};
use crate::model::{ChangeEvent, InsertOptions, Record, WriteMode, WriteResult};
use crate::traits::{ChangeStream, DocumentStore, StoreConnector};
use crate::{StoreError, StoreResult};

const CATALOG: &str = "docstore_tables";

const DUPLICATE_SCHEMA: &str = "42P06";
const DUPLICATE_TABLE: &str = "42P07";
const UNIQUE_VIOLATION: &str = "23505";
const INVALID_SCHEMA_NAME: &str = "3F000";
const UNDEFINED_TABLE: &str = "42P01";

/// PostgreSQL-backed document store.
#[derive(Clone)]
pub struct PostgresDocumentStore {
    pool: PgPool,
}

impl PostgresDocumentStore {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        Self::connect_with_options(database_url, 10).await
    }

    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(format!("failed to connect postgres: {e}")))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn primary_key(&self, db: &str, table: &str) -> StoreResult<String> {
        let row = sqlx::query(&format!(
            "SELECT primary_key FROM {}.{CATALOG} WHERE name = $1",
            quote_ident(db)
        ))
        .bind(table)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_missing(e, db, table))?;

        match row {
            Some(row) => row.try_get("primary_key").map_err(backend),
            None => Err(StoreError::TableNotFound {
                db: db.to_string(),
                table: table.to_string(),
            }),
        }
    }

    async fn select_docs(&self, db: &str, table: &str, sql_tail: &str) -> StoreResult<Vec<Record>> {
        let rows = sqlx::query(&format!(
            "SELECT doc FROM {} {sql_tail}",
            qualified(db, table)
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_missing(e, db, table))?;
        rows.into_iter().map(row_to_record).collect()
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn db_list(&self) -> StoreResult<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT table_schema AS name
              FROM information_schema.tables
             WHERE table_name = $1
            "#,
        )
        .bind(CATALOG)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter()
            .map(|row| row.try_get("name").map_err(backend))
            .collect()
    }

    /// Schemas created elsewhere get their catalog added, and only a schema
    /// that already holds one reports `DatabaseExists`.
    async fn db_create(&self, db: &str) -> StoreResult<()> {
        let exists = |e: sqlx::Error| match sql_state(&e).as_deref() {
            Some(DUPLICATE_SCHEMA | DUPLICATE_TABLE | UNIQUE_VIOLATION) => {
                StoreError::DatabaseExists(db.to_string())
            }
            _ => backend(e),
        };

        let mut tx = self.pool.begin().await.map_err(backend)?;
        for statement in schema_statements(db) {
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(exists)?;
        }
        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn table_list(&self, db: &str) -> StoreResult<Vec<String>> {
        let rows = sqlx::query(&format!(
            "SELECT name FROM {}.{CATALOG} ORDER BY name",
            quote_ident(db)
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| match sql_state(&e).as_deref() {
            Some(INVALID_SCHEMA_NAME | UNDEFINED_TABLE) => {
                StoreError::DatabaseNotFound(db.to_string())
            }
            _ => backend(e),
        })?;

        rows.into_iter()
            .map(|row| row.try_get("name").map_err(backend))
            .collect()
    }

    async fn table_create(&self, db: &str, table: &str, primary_key: &str) -> StoreResult<()> {
        let exists = || StoreError::TableExists {
            db: db.to_string(),
            table: table.to_string(),
        };

        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query(&format!(
            "INSERT INTO {}.{CATALOG} (name, primary_key) VALUES ($1, $2)",
            quote_ident(db)
        ))
        .bind(table)
        .bind(primary_key)
        .execute(&mut *tx)
        .await
        .map_err(|e| match sql_state(&e).as_deref() {
            Some(UNIQUE_VIOLATION) => exists(),
            Some(INVALID_SCHEMA_NAME | UNDEFINED_TABLE) => {
                StoreError::DatabaseNotFound(db.to_string())
            }
            _ => backend(e),
        })?;
        sqlx::query(&format!(
            "CREATE TABLE {} (key TEXT PRIMARY KEY, doc JSONB NOT NULL, seq BIGSERIAL)",
            qualified(db, table)
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| match sql_state(&e).as_deref() {
            Some(DUPLICATE_TABLE) => exists(),
            _ => backend(e),
        })?;
        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn index_create(&self, db: &str, table: &str, index: &str) -> StoreResult<()> {
        sqlx::query(&format!(
            "CREATE INDEX {} ON {} ((doc -> {}))",
            quote_ident(&format!("{table}__{index}")),
            qualified(db, table),
            quote_literal(index)
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| match sql_state(&e).as_deref() {
            Some(DUPLICATE_TABLE) => StoreError::IndexExists {
                table: table.to_string(),
                index: index.to_string(),
            },
            _ => map_missing(e, db, table),
        })?;
        Ok(())
    }

    async fn insert(
        &self,
        db: &str,
        table: &str,
        records: Vec<Record>,
        options: InsertOptions,
    ) -> StoreResult<WriteResult> {
        let primary_key = self.primary_key(db, table).await?;
        let target = qualified(db, table);
        let channel = channel(db, table);
        let mut result = WriteResult::default();
        let mut tx = self.pool.begin().await.map_err(backend)?;

        for mut record in records {
            let existing = record
                .get(&primary_key)
                .filter(|key| !key.is_null())
                .cloned();
            let key = match existing {
                Some(key) => key,
                None => {
                    let key = Value::String(Uuid::new_v4().to_string());
                    record.insert(primary_key.clone(), key.clone());
                    result.generated_keys.push(key.clone());
                    key
                }
            };
            let key_text = key_text(&key)?;

            let old = sqlx::query(&format!("SELECT doc FROM {target} WHERE key = $1 FOR UPDATE"))
                .bind(&key_text)
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend)?
                .map(row_to_record)
                .transpose()?;

            let new = match (&old, options.conflict) {
                (Some(old), WriteMode::Update) => {
                    let mut merged = old.clone();
                    merged.extend(record);
                    merged
                }
                _ => record,
            };
            if old.as_ref() == Some(&new) {
                result.unchanged += 1;
                continue;
            }
            match old {
                Some(_) => result.replaced += 1,
                None => result.inserted += 1,
            }

            sqlx::query(&format!(
                r#"
                INSERT INTO {target} (key, doc) VALUES ($1, $2)
                ON CONFLICT (key) DO UPDATE SET doc = EXCLUDED.doc
                "#
            ))
            .bind(&key_text)
            .bind(Value::Object(new.clone()))
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

            let change = ChangeEvent {
                old_val: old,
                new_val: Some(new),
            };
            let payload = serde_json::to_string(&change)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            sqlx::query("SELECT pg_notify($1, $2)")
                .bind(&channel)
                .bind(payload)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;

            if options.return_changes {
                result.changes.push(change);
            }
        }

        tx.commit().await.map_err(backend)?;
        Ok(result)
    }

    async fn get(&self, db: &str, table: &str, key: &Value) -> StoreResult<Option<Record>> {
        sqlx::query(&format!(
            "SELECT doc FROM {} WHERE key = $1",
            qualified(db, table)
        ))
        .bind(key_text(key)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_missing(e, db, table))?
        .map(row_to_record)
        .transpose()
    }

    async fn get_all(&self, db: &str, table: &str, keys: &[Value]) -> StoreResult<Vec<Record>> {
        let keys = keys.iter().map(key_text).collect::<StoreResult<Vec<_>>>()?;
        let rows = sqlx::query(&format!(
            "SELECT key, doc FROM {} WHERE key = ANY($1)",
            qualified(db, table)
        ))
        .bind(&keys)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_missing(e, db, table))?;

        let mut found = HashMap::with_capacity(rows.len());
        for row in rows {
            let key: String = row.try_get("key").map_err(backend)?;
            found.insert(key, row_to_record(row)?);
        }
        Ok(keys.iter().filter_map(|key| found.get(key).cloned()).collect())
    }

    async fn scan(&self, db: &str, table: &str) -> StoreResult<Vec<Record>> {
        self.select_docs(db, table, "ORDER BY seq").await
    }

    async fn filter(&self, db: &str, table: &str, filter: &Filter) -> StoreResult<Vec<Record>> {
        let records = self.scan(db, table).await?;
        Ok(records
            .into_iter()
            .filter(|record| filter.evaluate(record))
            .collect())
    }

    async fn max_by(&self, db: &str, table: &str, field: &str) -> StoreResult<Option<Record>> {
        let records = self.scan(db, table).await?;
        Ok(max_by_field(&records, field).cloned())
    }

    async fn changes(&self, db: &str, table: &str) -> StoreResult<ChangeStream> {
        self.primary_key(db, table).await?;

        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        listener.listen(&channel(db, table)).await.map_err(backend)?;

        let feed = listener.into_stream().map(|notification| {
            let notification = notification.map_err(|e| StoreError::Connection(e.to_string()))?;
            serde_json::from_str::<ChangeEvent>(notification.payload())
                .map_err(|e| StoreError::Serialization(e.to_string()))
        });
        Ok(feed.boxed())
    }
}

#[async_trait]
impl StoreConnector for PostgresDocumentStore {
    /// User and database name come from the standard `PG*` environment.
    async fn connect(options: &ConnectionOptions) -> StoreResult<Self> {
        let mut connect = PgConnectOptions::new()
            .host(&options.host)
            .port(options.port);
        if let Some(password) = &options.auth_key {
            connect = connect.password(password);
        }
        if let Some(ca_cert) = &options.ca_cert {
            connect = connect.ssl_mode(PgSslMode::VerifyFull).ssl_root_cert(ca_cert);
        }

        let pool = PgPoolOptions::new()
            .max_connections(options.pool_max)
            .connect_with(connect)
            .await
            .map_err(|e| StoreError::Connection(format!("failed to connect postgres: {e}")))?;
        Ok(Self { pool })
    }
}

fn row_to_record(row: sqlx::postgres::PgRow) -> StoreResult<Record> {
    match row.try_get::<Value, _>("doc").map_err(backend)? {
        Value::Object(record) => Ok(record),
        other => Err(StoreError::Serialization(format!(
            "stored document is not an object: {other}"
        ))),
    }
}

fn key_text(key: &Value) -> StoreResult<String> {
    serde_json::to_string(key).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn schema_statements(db: &str) -> [String; 2] {
    [
        format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(db)),
        format!(
            "CREATE TABLE {}.{CATALOG} (name TEXT PRIMARY KEY, primary_key TEXT NOT NULL)",
            quote_ident(db)
        ),
    ]
}

/// Notification channel of a table. Fixed length, since Postgres rejects
/// channel names of `NAMEDATALEN` (64) bytes or more.
fn channel(db: &str, table: &str) -> String {
    let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, qualified(db, table).as_bytes());
    format!("docstore_{}", id.simple())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn qualified(db: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(db), quote_ident(table))
}

fn sql_state(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|code| code.into_owned()),
        _ => None,
    }
}

fn map_missing(err: sqlx::Error, db: &str, table: &str) -> StoreError {
    match sql_state(&err).as_deref() {
        Some(INVALID_SCHEMA_NAME) => StoreError::DatabaseNotFound(db.to_string()),
        Some(UNDEFINED_TABLE) => StoreError::TableNotFound {
            db: db.to_string(),
            table: table.to_string(),
        },
        _ => backend(err),
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => StoreError::Query(db_err.message().to_string()),
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut => {
            StoreError::Connection(err.to_string())
        }
        other => StoreError::Backend(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_and_literals_are_escaped() {
        assert_eq!(quote_ident("app"), "\"app\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("o'clock"), "'o''clock'");
        assert_eq!(qualified("app", "alerts"), "\"app\".\"alerts\"");
    }

    #[test]
    fn existing_schema_still_gets_a_catalog() {
        let [schema, catalog] = schema_statements("public");
        assert_eq!(schema, "CREATE SCHEMA IF NOT EXISTS \"public\"");
        assert!(catalog.starts_with("CREATE TABLE \"public\".docstore_tables "));
        assert!(!catalog.contains("IF NOT EXISTS"));
    }

    #[test]
    fn channel_names_stay_under_the_identifier_limit() {
        let long = "x".repeat(63);
        let name = channel(&long, &long);
        assert!(name.len() < 64);
        assert_eq!(name.len(), channel("app", "alerts").len());
        assert_eq!(channel("app", "alerts"), channel("app", "alerts"));
        assert_ne!(channel("app", "alerts"), channel("app", "alert"));
        assert_ne!(channel("a.b", "c"), channel("a", "b.c"));
    }

    #[test]
    fn keys_are_canonical_json() {
        assert_eq!(key_text(&Value::from("1")).unwrap(), "\"1\"");
        assert_eq!(key_text(&Value::from(1)).unwrap(), "1");
    }
}
