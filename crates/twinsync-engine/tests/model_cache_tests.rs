//! Model cache: cache-aside refresh, single-flight, failure isolation

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use twinsync_engine::{ModelCache, UpdateError};
use twinsync_model::{PropertyKind, SchemaError};
use twinsync_store::{EntityStore, InMemoryEntityStore};

fn interface(id: &str, extends: Option<&str>, contents: serde_json::Value) -> String {
    let mut doc = json!({
        "@context": "dtmi:dtdl:context;2",
        "@id": id,
        "@type": "Interface",
        "contents": contents,
    });
    if let Some(parent) = extends {
        doc["extends"] = json!(parent);
    }
    doc.to_string()
}

fn seeded_store() -> InMemoryEntityStore {
    let store = InMemoryEntityStore::new();
    store.insert_model(
        "dtmi:plant:base;1",
        interface(
            "dtmi:plant:base;1",
            None,
            json!([
                { "@type": "Property", "name": "serial" },
                { "@type": "Property", "name": "temperature" },
            ]),
        ),
    );
    store.insert_model(
        "dtmi:plant:sensor;1",
        interface(
            "dtmi:plant:sensor;1",
            Some("dtmi:plant:base;1"),
            json!([
                { "@type": "Property", "name": "humidity" },
                { "@type": "Telemetry", "name": "temperature" },
            ]),
        ),
    );
    store
}

fn cache_over(store: &Arc<InMemoryEntityStore>) -> ModelCache {
    let shared: Arc<dyn EntityStore> = store.clone();
    ModelCache::new(shared)
}

#[tokio::test]
async fn miss_refreshes_then_hits_from_memory() {
    let store = Arc::new(seeded_store());
    let cache = cache_over(&store);
    assert!(cache.is_empty());

    let sensor = cache.get_schema("dtmi:plant:sensor;1").await.unwrap();
    let names: Vec<&str> = sensor.properties().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["humidity", "temperature", "serial"]);
    assert_eq!(sensor.get("temperature").unwrap().kind, PropertyKind::Other);
    assert!(!sensor.declares_property("temperature"));

    // Parent was resolved by the same refresh.
    let base = cache.get_schema("dtmi:plant:base;1").await.unwrap();
    assert!(base.declares_property("temperature"));

    assert_eq!(store.calls().model_documents, 1);
    assert_eq!(cache.refresh_count(), 1);
    assert_eq!(cache.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_misses_share_one_refresh() {
    let store = Arc::new(seeded_store().with_latency(Duration::from_millis(50)));
    let cache = Arc::new(cache_over(&store));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_schema("dtmi:plant:sensor;1").await })
        })
        .collect();

    let mut schemas = Vec::new();
    for task in tasks {
        schemas.push(task.await.unwrap().unwrap());
    }

    assert_eq!(store.calls().model_documents, 1);
    assert!(schemas.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
}

#[tokio::test]
async fn unknown_schema_is_not_found_after_refresh() {
    let store = Arc::new(seeded_store());
    let cache = cache_over(&store);

    let err = cache.get_schema("dtmi:plant:ghost;1").await.unwrap_err();
    assert!(matches!(err, UpdateError::SchemaNotFound { schema_id } if schema_id == "dtmi:plant:ghost;1"));
    assert_eq!(store.calls().model_documents, 1);

    // Known models are served without another refresh.
    cache.get_schema("dtmi:plant:sensor;1").await.unwrap();
    assert_eq!(store.calls().model_documents, 1);
}

#[tokio::test]
async fn broken_model_does_not_poison_the_refresh() {
    let store = Arc::new(seeded_store());
    store.insert_model(
        "dtmi:plant:orphan;1",
        interface(
            "dtmi:plant:orphan;1",
            Some("dtmi:plant:missing;1"),
            json!([{ "@type": "Property", "name": "x" }]),
        ),
    );
    store.insert_model("dtmi:plant:garbage;1", "{ not json");
    let cache = cache_over(&store);

    let err = cache.get_schema("dtmi:plant:orphan;1").await.unwrap_err();
    assert!(matches!(
        err,
        UpdateError::Schema(SchemaError::Unresolved { ref referenced, .. })
            if referenced == "dtmi:plant:missing;1"
    ));
    assert!(matches!(
        cache.get_schema("dtmi:plant:garbage;1").await,
        Err(UpdateError::Schema(ref err)) if err.is_parse_error()
    ));
    assert!(cache.cached("dtmi:plant:sensor;1").is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_models_are_answered_from_memory() {
    let store = Arc::new(seeded_store().with_latency(Duration::from_millis(25)));
    store.insert_model(
        "dtmi:plant:orphan;1",
        interface(
            "dtmi:plant:orphan;1",
            Some("dtmi:plant:missing;1"),
            json!([{ "@type": "Property", "name": "x" }]),
        ),
    );
    let cache = Arc::new(cache_over(&store));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_schema("dtmi:plant:orphan;1").await })
        })
        .collect();
    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.unwrap());
    }
    for _ in 0..5 {
        outcomes.push(cache.get_schema("dtmi:plant:orphan;1").await);
    }

    assert_eq!(outcomes.len(), 13);
    for outcome in outcomes {
        assert!(matches!(
            outcome,
            Err(UpdateError::Schema(SchemaError::Unresolved { .. }))
        ));
    }
    assert_eq!(store.calls().model_documents, 1);
    assert_eq!(cache.refresh_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_unknown_lookups_share_one_refresh() {
    let store = Arc::new(seeded_store().with_latency(Duration::from_millis(25)));
    let cache = Arc::new(cache_over(&store));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_schema("dtmi:plant:ghost;1").await })
        })
        .collect();
    for task in tasks {
        assert!(matches!(
            task.await.unwrap(),
            Err(UpdateError::SchemaNotFound { .. })
        ));
    }

    assert_eq!(store.calls().model_documents, 1);
}

#[tokio::test]
async fn store_failure_leaves_cache_untouched() {
    let store = Arc::new(seeded_store());
    let cache = cache_over(&store);

    store.fail_model_documents(true);
    assert!(matches!(
        cache.get_schema("dtmi:plant:sensor;1").await,
        Err(UpdateError::Store(_))
    ));
    assert!(cache.is_empty());
    assert_eq!(cache.refresh_count(), 0);

    store.fail_model_documents(false);
    assert!(cache.get_schema("dtmi:plant:sensor;1").await.is_ok());
    assert_eq!(store.calls().model_documents, 2);
}

#[tokio::test]
async fn cycles_surface_as_schema_errors() {
    let store = Arc::new(InMemoryEntityStore::new());
    store.insert_model(
        "dtmi:a;1",
        interface("dtmi:a;1", Some("dtmi:b;1"), json!([])),
    );
    store.insert_model(
        "dtmi:b;1",
        interface("dtmi:b;1", Some("dtmi:a;1"), json!([])),
    );
    let cache = cache_over(&store);

    let err = cache.get_schema("dtmi:a;1").await.unwrap_err();
    assert!(matches!(err, UpdateError::Schema(SchemaError::Cycle { .. })));
}
