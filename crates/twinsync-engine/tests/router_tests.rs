//! Record routing in both processing modes

use serde_json::json;
use std::sync::Arc;
use twinsync_engine::{
    EngineConfig, ProcessingMode, RecordOutcome, SkipReason, TwinUpdater, UpdateError,
};
use twinsync_model::{PatchSummary, UpdateRecord};
use twinsync_store::{EntitySnapshot, EntityStore, InMemoryEntityStore, StoreError};

const SENSOR: &str = "dtmi:plant:sensor;1";

fn sensor_model() -> String {
    json!({
        "@id": SENSOR,
        "@type": "Interface",
        "contents": [
            { "@type": "Property", "name": "temperature" },
            { "@type": "Property", "name": "humidity" },
        ],
    })
    .to_string()
}

fn sensor_plant() -> Arc<InMemoryEntityStore> {
    let store = Arc::new(InMemoryEntityStore::new());
    store.insert_model(SENSOR, sensor_model());
    store.insert_entity(EntitySnapshot::new("T1", SENSOR).with_property("temperature", 20));
    store.insert_entity(EntitySnapshot::new("T3", SENSOR));
    store
}

fn updater(store: &Arc<InMemoryEntityStore>, config: EngineConfig) -> TwinUpdater {
    let shared: Arc<dyn EntityStore> = store.clone();
    TwinUpdater::new(shared, config)
}

#[tokio::test]
async fn direct_update_replaces_declared_property_only() {
    let store = sensor_plant();
    let updater = updater(&store, EngineConfig::default());

    let record =
        UpdateRecord::from_json(r#"{"id":"T1","temperature":42,"unknownField":"x"}"#).unwrap();
    let outcome = updater.process_record(record).await.unwrap();
    assert_eq!(
        outcome,
        RecordOutcome::Applied {
            entities: vec!["T1".to_string()],
            summary: PatchSummary { added: 0, replaced: 1 },
        }
    );

    let twin = store.entity("T1").unwrap();
    assert_eq!(twin.property("temperature"), Some(&json!(42)));
    assert!(!twin.has_property("unknownField"));
    assert!(!twin.has_property("humidity"));
}

#[tokio::test]
async fn direct_update_adds_missing_properties() {
    let store = sensor_plant();
    let updater = updater(&store, EngineConfig::default());

    let record = UpdateRecord::from_json(r#"{"id":"T3","humidity":0.4,"temperature":18}"#).unwrap();
    let outcome = updater.process_record(record).await.unwrap();
    assert!(matches!(
        outcome,
        RecordOutcome::Applied { summary: PatchSummary { added: 2, replaced: 0 }, .. }
    ));
    assert_eq!(store.entity("T3").unwrap().property("humidity"), Some(&json!(0.4)));
}

#[tokio::test]
async fn record_without_declared_fields_sends_nothing() {
    let store = sensor_plant();
    let updater = updater(&store, EngineConfig::default());

    let record = UpdateRecord::from_json(r#"{"id":"T1","color":"red"}"#).unwrap();
    let outcome = updater.process_record(record).await.unwrap();
    assert_eq!(
        outcome,
        RecordOutcome::Applied {
            entities: Vec::new(),
            summary: PatchSummary::default(),
        }
    );
    assert_eq!(store.calls().update_entity, 0);
}

#[tokio::test]
async fn missing_identifier_is_skipped() {
    let store = sensor_plant();
    let updater = updater(&store, EngineConfig::default().with_id_field("twinId"));

    let record = UpdateRecord::from_json(r#"{"id":"T1","temperature":1}"#).unwrap();
    let outcome = updater.process_record(record).await.unwrap();
    assert_eq!(
        outcome,
        RecordOutcome::Skipped(SkipReason::MissingIdentifier {
            field: "twinId".to_string()
        })
    );
    assert_eq!(store.calls().get_entity, 0);
}

#[tokio::test]
async fn blank_identifier_is_skipped_as_empty() {
    let store = sensor_plant();
    let updater = updater(&store, EngineConfig::default());

    for text in [
        r#"{"id":"","temperature":1}"#,
        r#"{"id":null,"temperature":1}"#,
        r#"{"id":{"nested":"T1"},"temperature":1}"#,
    ] {
        let record = UpdateRecord::from_json(text).unwrap();
        let outcome = updater.process_record(record).await.unwrap();
        assert_eq!(
            outcome,
            RecordOutcome::Skipped(SkipReason::EmptyIdentifier {
                field: "id".to_string()
            }),
            "{text}"
        );
    }
    assert_eq!(
        SkipReason::EmptyIdentifier { field: "id".to_string() }.to_string(),
        "record field id is empty"
    );
    assert_eq!(store.calls().get_entity, 0);
}

#[tokio::test]
async fn failing_record_does_not_stop_the_batch() {
    let store = sensor_plant();
    let updater = updater(&store, EngineConfig::default());

    let batch = [
        r#"{"id":"T1","temperature":30}"#,
        r#"{"id":"ghost","temperature":31}"#,
        r#"{"id":"T3","temperature":32}"#,
    ];
    let err = updater.process_batch(batch).await.unwrap_err();

    assert_eq!(err.failures.len(), 1);
    assert_eq!(err.failures[0].index, 1);
    assert!(matches!(
        err.failures[0].error,
        UpdateError::Store(StoreError::NotFound { ref id }) if id == "ghost"
    ));
    assert_eq!(err.to_string(), "record 1: entity ghost not found");
    assert_eq!(err.report.records, 3);
    assert_eq!(err.report.updated_records, 2);
    assert_eq!(err.report.failed, 1);

    assert_eq!(store.entity("T1").unwrap().property("temperature"), Some(&json!(30)));
    assert_eq!(store.entity("T3").unwrap().property("temperature"), Some(&json!(32)));
}

#[tokio::test]
async fn undecodable_records_are_skipped_not_failed() {
    let store = sensor_plant();
    let updater = updater(&store, EngineConfig::default());

    let report = updater
        .process_batch(vec![
            "{ truncated".to_string(),
            "[1, 2]".to_string(),
            r#"{"temperature": 5}"#.to_string(),
            r#"{"id":"T1","temperature":5}"#.to_string(),
        ])
        .await
        .unwrap();

    assert_eq!(report.records, 4);
    assert_eq!(report.skipped, 3);
    assert_eq!(report.updated_records, 1);
    assert_eq!(report.entities_updated, 1);
    assert_eq!(report.operations, PatchSummary { added: 0, replaced: 1 });
}

#[tokio::test]
async fn unknown_schema_fails_the_record() {
    let store = sensor_plant();
    store.insert_entity(EntitySnapshot::new("X1", "dtmi:plant:unknown;1"));
    let updater = updater(&store, EngineConfig::default());

    let record = UpdateRecord::from_json(r#"{"id":"X1","temperature":1}"#).unwrap();
    assert!(matches!(
        updater.process_record(record).await,
        Err(UpdateError::SchemaNotFound { .. })
    ));
}

// ============================================================================
// Via-child mode
// ============================================================================

fn line_plant() -> Arc<InMemoryEntityStore> {
    let store = Arc::new(InMemoryEntityStore::new());
    store.insert_entity(
        EntitySnapshot::new("L1", "dtmi:plant:line;1").with_property("equipmentID", "Line1"),
    );
    store.insert_entity(
        EntitySnapshot::new("C42", "dtmi:plant:node;1")
            .with_property("ID", "Motor")
            .with_property("OPCUANodeValue", 0.0),
    );
    store.insert_entity(EntitySnapshot::new("C43", "dtmi:plant:node;1").with_property("ID", "Pump"));
    store.add_relationship("L1", "contains", "C42");
    store.add_relationship("L1", "contains", "C43");
    store
}

fn child_config() -> EngineConfig {
    EngineConfig::default().with_mode(ProcessingMode::ByChildRelation)
}

#[tokio::test]
async fn child_value_lands_in_fixed_field() {
    let store = line_plant();
    let updater = updater(&store, child_config());

    let record = UpdateRecord::from_json(r#"{"id":"Line1","Motor":7.5}"#).unwrap();
    let outcome = updater.process_record(record).await.unwrap();
    assert_eq!(
        outcome,
        RecordOutcome::Applied {
            entities: vec!["C42".to_string()],
            summary: PatchSummary { added: 0, replaced: 1 },
        }
    );
    assert_eq!(
        store.entity("C42").unwrap().property("OPCUANodeValue"),
        Some(&json!(7.5))
    );
}

#[tokio::test]
async fn each_field_updates_its_own_child() {
    let store = line_plant();
    let updater = updater(&store, child_config());

    let record = UpdateRecord::from_json(r#"{"id":"Line1","Motor":1,"pump":2}"#).unwrap();
    let outcome = updater.process_record(record).await.unwrap();
    assert_eq!(
        outcome,
        RecordOutcome::Applied {
            entities: vec!["C42".to_string(), "C43".to_string()],
            summary: PatchSummary { added: 1, replaced: 1 },
        }
    );
    assert_eq!(store.entity("C43").unwrap().property("OPCUANodeValue"), Some(&json!(2)));
    assert_eq!(store.calls().query, 2);
    assert_eq!(store.calls().model_documents, 0);
}

#[tokio::test]
async fn earlier_children_stay_updated_when_a_later_one_fails() {
    let store = line_plant();
    let updater = updater(&store, child_config());

    let record = UpdateRecord::from_json(r#"{"id":"Line1","Motor":3,"Turbine":4}"#).unwrap();
    let err = updater.process_record(record).await.unwrap_err();
    assert!(matches!(err, UpdateError::ChildNotFound { ref child_role, .. } if child_role == "Turbine"));
    assert_eq!(store.entity("C42").unwrap().property("OPCUANodeValue"), Some(&json!(3)));
}
