//! Data service bound to one table.

use std::sync::{Arc, OnceLock};

use serde_json::Value;
use tracing::{debug, info};

use crate::config::ModelConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::filter::Filter;
use crate::model::{InsertOptions, Payload, Record, WriteMode, WriteResult};
use crate::normalize::normalize;
use crate::provision::{ProvisionReport, Provisioner};
use crate::traits::{ChangeStream, DocumentStore, StoreConnector};

/// Provisioning, writes, reads and change feed for a single table.
///
/// The model is owned by the service and never changes after construction.
/// Table reads and writes are refused until [`DataService::create_db_and_table`]
/// has succeeded on this instance.
pub struct DataService<S: DocumentStore> {
    model: Arc<ModelConfig>,
    store: Arc<S>,
    ready: OnceLock<()>,
}

impl<S: DocumentStore> DataService<S> {
    pub fn new(model: ModelConfig, store: Arc<S>) -> Self {
        Self {
            model: Arc::new(model),
            store,
            ready: OnceLock::new(),
        }
    }

    /// Open the store from the model's connection options.
    pub async fn connect(model: ModelConfig) -> ServiceResult<Self>
    where
        S: StoreConnector,
    {
        let store = S::connect(&model.connection).await?;
        Ok(Self::new(model, Arc::new(store)))
    }

    pub fn config(&self) -> &ModelConfig {
        &self.model
    }

    /// The underlying store handle, for requests this service does not cover.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn provisioner(&self) -> Provisioner<'_, S> {
        Provisioner::new(self.store.as_ref(), &self.model)
    }

    /// Ensure database, table and indices exist, then open the table for use.
    pub async fn create_db_and_table(&self) -> ServiceResult<ProvisionReport> {
        let report = self.provisioner().create_db_and_table().await?;
        if self.ready.set(()).is_ok() {
            info!(
                db = %self.model.db,
                table = %self.model.table,
                database = %report.database,
                table_outcome = %report.table,
                "table ready"
            );
        }
        Ok(report)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.get().is_some()
    }

    /// Normalize `payload` for `mode` and insert it with the matching
    /// conflict resolution.
    pub async fn write(
        &self,
        mode: WriteMode,
        payload: impl Into<Payload>,
    ) -> ServiceResult<WriteResult> {
        let payload = payload.into();
        if payload.is_empty() {
            return Err(ServiceError::EmptyDocument { mode });
        }
        let (db, table) = self.table()?;

        let records = normalize(mode, &payload);
        debug!(db, table, %mode, count = records.len(), "writing documents");
        let result = self
            .store
            .insert(db, table, records, InsertOptions::new(mode))
            .await?;
        Ok(result)
    }

    pub async fn replace(&self, payload: impl Into<Payload>) -> ServiceResult<WriteResult> {
        self.write(WriteMode::Replace, payload).await
    }

    pub async fn update(&self, payload: impl Into<Payload>) -> ServiceResult<WriteResult> {
        self.write(WriteMode::Update, payload).await
    }

    pub async fn find_by_id(&self, id: &Value) -> ServiceResult<Option<Record>> {
        let (db, table) = self.table()?;
        Ok(self.store.get(db, table, id).await?)
    }

    /// Records for `ids`, in the order the ids were given. Ids without a
    /// record are skipped and a repeated id yields its record again.
    pub async fn find_by_ids(&self, ids: &[Value]) -> ServiceResult<Vec<Record>> {
        let (db, table) = self.table()?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.store.get_all(db, table, ids).await?)
    }

    /// Every record of the table.
    pub async fn find_all(&self) -> ServiceResult<Vec<Record>> {
        let (db, table) = self.table()?;
        Ok(self.store.scan(db, table).await?)
    }

    pub async fn find_by_filter(&self, filter: &Filter) -> ServiceResult<Vec<Record>> {
        let (db, table) = self.table()?;
        Ok(self.store.filter(db, table, filter).await?)
    }

    /// The greatest value of `field`, as a record holding only that field.
    pub async fn find_max_by(&self, field: &str) -> ServiceResult<Option<Record>> {
        let (db, table) = self.table()?;
        let Some(mut record) = self.store.max_by(db, table, field).await? else {
            return Ok(None);
        };
        Ok(record.remove(field).map(|value| {
            let mut projected = Record::new();
            projected.insert(field.to_string(), value);
            projected
        }))
    }

    /// Live change feed for the table. Runs until dropped or until the
    /// store closes it.
    pub async fn subscribe_changes(&self) -> ServiceResult<ChangeStream> {
        let (db, table) = self.table()?;
        debug!(db, table, "subscribing to changes");
        Ok(self.store.changes(db, table).await?)
    }

    fn table(&self) -> ServiceResult<(&str, &str)> {
        if !self.is_ready() {
            return Err(ServiceError::NotProvisioned {
                db: self.model.db.clone(),
                table: self.model.table.clone(),
            });
        }
        Ok((&self.model.db, &self.model.table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDocumentStore;
    use crate::model::Document;
    use serde_json::json;

    fn service() -> DataService<InMemoryDocumentStore> {
        DataService::new(
            ModelConfig::new("app", "alerts").with_indices(["severity"]),
            Arc::new(InMemoryDocumentStore::new()),
        )
    }

    async fn ready_service() -> DataService<InMemoryDocumentStore> {
        let service = service();
        service.create_db_and_table().await.unwrap();
        service
    }

    #[tokio::test]
    async fn empty_payloads_never_reach_the_store() {
        let service = service();

        let single = service.write(WriteMode::Replace, Document::new()).await;
        assert!(matches!(
            single,
            Err(ServiceError::EmptyDocument {
                mode: WriteMode::Replace
            })
        ));
        let batch = service.write(WriteMode::Update, Vec::<Document>::new()).await;
        assert!(matches!(
            batch,
            Err(ServiceError::EmptyDocument {
                mode: WriteMode::Update
            })
        ));
        assert_eq!(service.store().request_count(), 0);
    }

    #[tokio::test]
    async fn table_operations_require_provisioning() {
        let service = service();
        assert!(!service.is_ready());

        let result = service.find_by_id(&json!("1")).await;
        assert!(matches!(result, Err(ServiceError::NotProvisioned { .. })));
        let result = service.replace(Document::new().with("id", "1")).await;
        assert!(matches!(result, Err(ServiceError::NotProvisioned { .. })));
        assert!(matches!(
            service.subscribe_changes().await,
            Err(ServiceError::NotProvisioned { .. })
        ));
        assert_eq!(service.store().request_count(), 0);
    }

    #[tokio::test]
    async fn failed_provisioning_leaves_service_closed() {
        let service = service();
        service
            .store()
            .fail_next_request(crate::StoreError::Connection("refused".to_string()))
            .unwrap();

        assert!(service.create_db_and_table().await.is_err());
        assert!(!service.is_ready());
    }

    #[tokio::test]
    async fn find_by_ids_follows_caller_order() {
        let service = ready_service().await;
        service
            .replace(vec![
                Document::new().with("id", "a"),
                Document::new().with("id", "b"),
                Document::new().with("id", "c"),
            ])
            .await
            .unwrap();

        let found = service
            .find_by_ids(&[json!("c"), json!("missing"), json!("a"), json!("c")])
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|record| record["id"].clone()).collect();
        assert_eq!(ids, vec![json!("c"), json!("a"), json!("c")]);

        assert!(service.find_by_ids(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn find_by_ids_uses_the_table_key_not_the_configured_one() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let owner = DataService::new(
            ModelConfig::new("app", "users").with_primary_key("email"),
            store.clone(),
        );
        owner.create_db_and_table().await.unwrap();
        owner
            .replace(Document::new().with("email", "a@x").with("name", "A"))
            .await
            .unwrap();

        let reader = DataService::new(ModelConfig::new("app", "users"), store);
        let report = reader.create_db_and_table().await.unwrap();
        assert_eq!(report.table, crate::ProvisioningOutcome::TableExists);

        assert!(reader.find_by_id(&json!("a@x")).await.unwrap().is_some());
        let found = reader.find_by_ids(&[json!("a@x")]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["name"], json!("A"));
    }

    #[tokio::test]
    async fn partial_index_failure_keeps_table_usable() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store
            .fail_next_index("host", crate::StoreError::Query("unsupported".to_string()))
            .unwrap();
        let service = DataService::new(
            ModelConfig::new("app", "alerts").with_indices(["severity", "host", "created_at"]),
            store.clone(),
        );

        let report = service.create_db_and_table().await.unwrap();
        assert!(service.is_ready());
        assert_eq!(report.failed_indices().len(), 1);
        assert_eq!(report.failed_indices()[0].index, "host");
        assert_eq!(
            store.indices("app", "alerts").unwrap(),
            vec!["created_at", "severity"]
        );
        service
            .replace(Document::new().with("id", "1").with("host", "a"))
            .await
            .unwrap();

        match report.into_strict() {
            Err(ServiceError::PartialIndexFailure { failed }) => assert_eq!(failed, vec!["host"]),
            other => panic!("expected partial index failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn find_max_by_projects_the_field() {
        let service = ready_service().await;
        assert!(service.find_max_by("seq").await.unwrap().is_none());

        service
            .replace(vec![
                Document::new().with("id", "1").with("seq", 3).with("body", "x"),
                Document::new().with("id", "2").with("seq", 11).with("body", "y"),
            ])
            .await
            .unwrap();

        let max = service.find_max_by("seq").await.unwrap().unwrap();
        assert_eq!(Value::Object(max), json!({"seq": 11}));
    }

    #[tokio::test]
    async fn find_by_id_on_missing_key_is_none() {
        let service = ready_service().await;
        assert!(service.find_by_id(&json!("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn connect_passes_connection_options_through() {
        let mut model = ModelConfig::new("app", "alerts");
        model.connection.port = 29015;
        model.connection.cursor = false;

        let service = DataService::<InMemoryDocumentStore>::connect(model)
            .await
            .unwrap();
        assert_eq!(service.store().connection().port, 29015);
        assert!(!service.store().connection().cursor);
    }
}
