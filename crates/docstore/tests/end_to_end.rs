use std::sync::Arc;

use futures::StreamExt;
use serde_json::{json, Value};

use docstore::memory::InMemoryDocumentStore;
use docstore::{
    ChangeKind, DataService, Document, Filter, IndexOutcome, ModelConfig, Payload, ServiceError,
    WriteMode,
};

async fn alerts_service() -> DataService<InMemoryDocumentStore> {
    let model = ModelConfig::new("app", "alerts")
        .with_primary_key("id")
        .with_indices(["severity"]);
    DataService::new(model, Arc::new(InMemoryDocumentStore::new()))
}

#[tokio::test]
async fn replace_then_update_clears_only_the_absent_field() {
    let service = alerts_service().await;

    let report = service.create_db_and_table().await.unwrap();
    assert!(report.table.created());
    assert_eq!(report.indices.len(), 1);
    assert_eq!(report.indices[0].outcome, IndexOutcome::Created);

    let replaced = service
        .replace(
            Document::new()
                .with("id", "1")
                .with("severity", "high")
                .with_absent("note"),
        )
        .await
        .unwrap();
    assert_eq!(replaced.inserted, 1);
    let stored = service.find_by_id(&json!("1")).await.unwrap().unwrap();
    assert!(!stored.contains_key("note"));

    service
        .replace(
            Document::new()
                .with("id", "1")
                .with("severity", "high")
                .with("note", "investigating"),
        )
        .await
        .unwrap();

    let updated = service
        .update(Document::new().with("id", "1").with_absent("note"))
        .await
        .unwrap();
    assert_eq!(updated.replaced, 1);
    assert_eq!(updated.changes.len(), 1);
    assert_eq!(
        updated.changes[0].old_val.as_ref().unwrap()["note"],
        json!("investigating")
    );

    let stored = service.find_by_id(&json!("1")).await.unwrap().unwrap();
    assert_eq!(
        Value::Object(stored),
        json!({"id": "1", "severity": "high", "note": null})
    );
}

#[tokio::test]
async fn replace_drops_fields_missing_from_the_new_document() {
    let service = alerts_service().await;
    service.create_db_and_table().await.unwrap();

    service
        .write(
            WriteMode::Replace,
            Document::new().with("id", "1").with("severity", "high").with("host", "a"),
        )
        .await
        .unwrap();
    service
        .write(
            WriteMode::Replace,
            Document::new().with("id", "1").with("severity", "low").with_absent("host"),
        )
        .await
        .unwrap();

    let stored = service.find_by_id(&json!("1")).await.unwrap().unwrap();
    assert_eq!(Value::Object(stored), json!({"id": "1", "severity": "low"}));
}

#[tokio::test]
async fn batch_writes_and_reads() {
    let service = alerts_service().await;
    service.create_db_and_table().await.unwrap();

    let batch = Payload::Batch(vec![
        Document::new().with("id", "1").with("severity", 3).with("host", "a"),
        Document::new().with("id", "2").with("severity", 7).with_absent("host"),
        Document::new().with("id", "3").with("severity", 5).with("host", "b"),
    ]);
    let result = service.write(WriteMode::Replace, batch).await.unwrap();
    assert_eq!(result.inserted, 3);
    assert_eq!(result.changes.len(), 3);

    let all = service.find_all().await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(!all[1].contains_key("host"));

    let severe = service
        .find_by_filter(&Filter::ge("severity", 5))
        .await
        .unwrap();
    let ids: Vec<_> = severe.iter().map(|record| record["id"].clone()).collect();
    assert_eq!(ids, vec![json!("2"), json!("3")]);

    let hosted = service
        .find_by_filter(&Filter::has_field("host"))
        .await
        .unwrap();
    assert_eq!(hosted.len(), 2);

    let max = service.find_max_by("severity").await.unwrap().unwrap();
    assert_eq!(Value::Object(max), json!({"severity": 7}));

    let picked = service
        .find_by_ids(&[json!("3"), json!("1")])
        .await
        .unwrap();
    assert_eq!(picked[0]["id"], json!("3"));
    assert_eq!(picked[1]["id"], json!("1"));
}

#[tokio::test]
async fn empty_writes_are_rejected() {
    let service = alerts_service().await;
    service.create_db_and_table().await.unwrap();

    let result = service.replace(Document::new()).await;
    assert!(matches!(result, Err(ServiceError::EmptyDocument { .. })));
    let result = service.update(Vec::<Document>::new()).await;
    assert!(matches!(result, Err(ServiceError::EmptyDocument { .. })));
    assert!(service.find_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn change_feed_follows_writes() {
    let service = alerts_service().await;
    service.create_db_and_table().await.unwrap();
    let mut changes = service.subscribe_changes().await.unwrap();

    service
        .replace(Document::new().with("id", "1").with("severity", "high"))
        .await
        .unwrap();
    service
        .update(Document::new().with("id", "1").with("severity", "low"))
        .await
        .unwrap();
    service
        .store()
        .remove("app", "alerts", &json!("1"))
        .unwrap();

    let insert = changes.next().await.unwrap().unwrap();
    assert_eq!(insert.kind(), ChangeKind::Insert);
    assert_eq!(insert.new_val.unwrap()["severity"], json!("high"));

    let update = changes.next().await.unwrap().unwrap();
    assert_eq!(update.kind(), ChangeKind::Update);
    assert_eq!(update.old_val.unwrap()["severity"], json!("high"));
    assert_eq!(update.new_val.unwrap()["severity"], json!("low"));

    let delete = changes.next().await.unwrap().unwrap();
    assert_eq!(delete.kind(), ChangeKind::Delete);
}

#[tokio::test]
async fn documents_decoded_from_json_treat_null_as_absent() {
    let service = alerts_service().await;
    service.create_db_and_table().await.unwrap();

    let document: Document =
        serde_json::from_value(json!({"id": "9", "severity": 0, "note": null})).unwrap();
    service.replace(document.clone()).await.unwrap();
    let stored = service.find_by_id(&json!("9")).await.unwrap().unwrap();
    assert_eq!(Value::Object(stored), json!({"id": "9", "severity": 0}));

    service.update(document).await.unwrap();
    let stored = service.find_by_id(&json!("9")).await.unwrap().unwrap();
    assert_eq!(
        Value::Object(stored),
        json!({"id": "9", "severity": 0, "note": null})
    );
}
