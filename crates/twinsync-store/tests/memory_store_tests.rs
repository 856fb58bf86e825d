//! Behaviour of the in-memory backend through the `EntityStore` trait

use serde_json::json;
use std::sync::Arc;
use twinsync_model::PatchOperation;
use twinsync_store::{
    CallCounts, ConcurrencyToken, EntityQuery, EntitySnapshot, EntityStore, InMemoryEntityStore,
    StoreError,
};

fn plant() -> InMemoryEntityStore {
    let store = InMemoryEntityStore::new();
    store.insert_entity(
        EntitySnapshot::new("line-1", "dtmi:plant:line;1").with_property("equipmentID", "Line1"),
    );
    store.insert_entity(
        EntitySnapshot::new("motor-1", "dtmi:plant:sensor;1")
            .with_property("ID", "Motor")
            .with_property("OPCUANodeValue", 0.0),
    );
    store.insert_entity(EntitySnapshot::new("pump-1", "dtmi:plant:sensor;1").with_property("ID", "Pump"));
    store.insert_entity(EntitySnapshot::new("blank-1", "dtmi:plant:sensor;1").with_property("ID", ""));
    store.add_relationship("line-1", "contains", "motor-1");
    store.add_relationship("line-1", "contains", "pump-1");
    store.add_relationship("line-1", "contains", "blank-1");
    store.add_relationship("line-1", "feeds", "pump-1");
    store
}

#[tokio::test]
async fn get_and_update_through_trait_object() {
    let memory = Arc::new(plant());
    let store: Arc<dyn EntityStore> = memory.clone();

    let before = store.get_entity("motor-1").await.unwrap();
    assert_eq!(before.etag.as_deref(), Some("W/\"1\""));

    let patch = vec![
        PatchOperation::replace("OPCUANodeValue", json!(7.5)),
        PatchOperation::add("Unit", json!("kW")),
    ];
    store
        .update_entity("motor-1", &patch, &ConcurrencyToken::Any)
        .await
        .unwrap();

    let after = memory.entity("motor-1").unwrap();
    assert_eq!(after.property("OPCUANodeValue"), Some(&json!(7.5)));
    assert_eq!(after.property("Unit"), Some(&json!("kW")));
    assert_eq!(after.etag.as_deref(), Some("W/\"2\""));

    assert_eq!(
        memory.calls(),
        CallCounts {
            get_entity: 1,
            update_entity: 1,
            ..CallCounts::default()
        }
    );
}

#[tokio::test]
async fn stale_etag_is_refused() {
    let store = plant();
    let snapshot = store.get_entity("motor-1").await.unwrap();
    let token = ConcurrencyToken::Match(snapshot.etag.clone().unwrap());
    let patch = vec![PatchOperation::replace("OPCUANodeValue", json!(1))];

    store.update_entity("motor-1", &patch, &token).await.unwrap();
    let err = store.update_entity("motor-1", &patch, &token).await.unwrap_err();
    assert!(matches!(err, StoreError::PreconditionFailed { id } if id == "motor-1"));
}

#[tokio::test]
async fn unknown_entity_is_not_found() {
    let store = plant();
    assert!(store.get_entity("ghost").await.unwrap_err().is_not_found());
    let patch = vec![PatchOperation::add("a", json!(1))];
    assert!(store
        .update_entity("ghost", &patch, &ConcurrencyToken::Any)
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn queries_follow_properties_and_relationships() {
    let store = plant();

    let parents = store
        .query(&EntityQuery::by_property("equipmentID", "Line1"))
        .await
        .unwrap();
    assert_eq!(parents.len(), 1);
    assert_eq!(parents[0].id, "line-1");

    let children = store
        .query(&EntityQuery::related("line-1", "contains").with_required_field("ID"))
        .await
        .unwrap();
    let ids: Vec<&str> = children.iter().map(|child| child.id.as_str()).collect();
    assert_eq!(ids, vec!["motor-1", "pump-1"]);

    let all = store
        .query(&EntityQuery::related("line-1", "contains"))
        .await
        .unwrap();
    assert_eq!(all.len(), 3);

    assert_eq!(store.calls().query, 3);
}

#[tokio::test]
async fn model_listing_can_be_made_to_fail() {
    let store = InMemoryEntityStore::new();
    store.insert_model("dtmi:a;1", "{}");
    store.insert_model("dtmi:a;1", r#"{"@id": "dtmi:a;1"}"#);
    assert_eq!(store.model_documents().await.unwrap().len(), 1);

    store.fail_model_documents(true);
    assert!(matches!(
        store.model_documents().await,
        Err(StoreError::Http { status: 503, .. })
    ));
    assert_eq!(store.calls().model_documents, 2);
}
