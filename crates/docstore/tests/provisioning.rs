use std::sync::Arc;

use docstore::memory::InMemoryDocumentStore;
use docstore::{
    DataService, DocumentStore, IndexOutcome, ModelConfig, ProvisioningOutcome, ServiceError,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn alerts_model() -> ModelConfig {
    ModelConfig::new("app", "alerts").with_indices(["severity"])
}

#[tokio::test]
async fn provisioning_twice_converges() {
    init_tracing();
    let store = Arc::new(InMemoryDocumentStore::new());
    let service = DataService::new(alerts_model(), store.clone());

    let first = service.create_db_and_table().await.unwrap();
    assert_eq!(first.database, ProvisioningOutcome::DbCreated);
    assert_eq!(first.table, ProvisioningOutcome::TableCreated);
    assert_eq!(first.indices.len(), 1);
    assert_eq!(first.indices[0].outcome, IndexOutcome::Created);

    let second = service.create_db_and_table().await.unwrap();
    assert_eq!(second.database, ProvisioningOutcome::DbExists);
    assert_eq!(second.table, ProvisioningOutcome::TableExists);
    assert_eq!(second.indices[0].outcome, IndexOutcome::AlreadyExists);
    assert!(second.is_fully_settled());
    assert!(second.clone().into_strict().is_ok());
    assert_eq!(second.existing_indices(), vec!["severity"]);
}

#[tokio::test]
async fn second_service_adopts_the_existing_table() {
    init_tracing();
    let store = Arc::new(InMemoryDocumentStore::new());
    let first = DataService::new(alerts_model(), store.clone());
    let second = DataService::new(alerts_model(), store.clone());

    let (a, b) = tokio::join!(first.create_db_and_table(), second.create_db_and_table());
    let (a, b) = (a.unwrap(), b.unwrap());

    let tables_created = [a.table, b.table]
        .iter()
        .filter(|outcome| **outcome == ProvisioningOutcome::TableCreated)
        .count();
    assert_eq!(tables_created, 1);
    assert!(store.table_exists("app", "alerts").await.unwrap());
}

#[tokio::test]
async fn missing_table_name_is_rejected_before_the_store() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let service = DataService::new(ModelConfig::new("app", ""), store.clone());

    let result = service.create_db_and_table().await;
    assert!(matches!(result, Err(ServiceError::InvalidModel(_))));
    assert_eq!(store.request_count(), 0);
    assert!(!service.is_ready());
}

#[tokio::test]
async fn mixed_index_settlement_reports_every_index() {
    init_tracing();
    let store = Arc::new(InMemoryDocumentStore::new());
    let service = DataService::new(
        ModelConfig::new("app", "alerts").with_indices(["a", "b"]),
        store.clone(),
    );
    service.provisioner().ensure_table().await.unwrap();
    store.index_create("app", "alerts", "a").await.unwrap();

    let report = service.create_db_and_table().await.unwrap();

    assert_eq!(report.indices.len(), 2);
    assert_eq!(report.indices[0].index, "a");
    assert_eq!(report.indices[0].outcome, IndexOutcome::AlreadyExists);
    assert_eq!(report.indices[1].index, "b");
    assert_eq!(report.indices[1].outcome, IndexOutcome::Created);
}

#[tokio::test]
async fn empty_index_list_is_a_no_op() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let service = DataService::new(ModelConfig::new("app", "alerts"), store.clone());

    let report = service.create_db_and_table().await.unwrap();
    assert!(report.indices.is_empty());
    assert!(store.indices("app", "alerts").unwrap().is_empty());
}

#[tokio::test]
async fn model_is_captured_at_construction() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let mut model = alerts_model();
    let service = DataService::new(model.clone(), store);

    model.table = "other".to_string();
    model.indices.clear();

    assert_eq!(service.config().table, "alerts");
    assert_eq!(service.config().indices, vec!["severity"]);
}
