//! Cache-aside model cache
//!
//! Flattened schemas keyed by schema id. A miss triggers a full refresh of
//! every model the store knows; concurrent misses collapse onto a single
//! refresh behind one gate, and the whole table is swapped in at once.

use crate::error::UpdateError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use twinsync_model::{SchemaDefinition, SchemaError, SchemaId, SchemaResolver};
use twinsync_store::EntityStore;

/// Outcome of one refresh: every model that resolved, and why the others
/// did not.
#[derive(Debug, Default)]
struct ModelSnapshot {
    models: HashMap<SchemaId, Arc<SchemaDefinition>>,
    failures: HashMap<SchemaId, SchemaError>,
}

impl ModelSnapshot {
    fn lookup(&self, schema_id: &str) -> Option<Result<Arc<SchemaDefinition>, UpdateError>> {
        if let Some(schema) = self.models.get(schema_id) {
            return Some(Ok(Arc::clone(schema)));
        }
        self.failures
            .get(schema_id)
            .map(|err| Err(UpdateError::Schema(err.clone())))
    }
}

pub struct ModelCache {
    store: Arc<dyn EntityStore>,
    snapshot: RwLock<Arc<ModelSnapshot>>,
    refresh_gate: Mutex<()>,
    refreshes: AtomicU64,
}

impl ModelCache {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self {
            store,
            snapshot: RwLock::new(Arc::new(ModelSnapshot::default())),
            refresh_gate: Mutex::new(()),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Flattened schema for `schema_id`, refreshing from the store on a miss.
    ///
    /// A model that failed to resolve in the current table is reported from
    /// memory, like a resolved one.
    pub async fn get_schema(&self, schema_id: &str) -> Result<Arc<SchemaDefinition>, UpdateError> {
        let seen = self.refresh_count();
        if let Some(outcome) = self.current().lookup(schema_id) {
            return outcome;
        }

        tracing::warn!(schema_id, "model cache miss");
        let _gate = self.refresh_gate.lock().await;

        // A refresh that finished while we waited already answers this miss.
        if let Some(outcome) = self.current().lookup(schema_id) {
            return outcome;
        }
        if self.refresh_count() == seen {
            self.refresh().await?;
        }

        match self.current().lookup(schema_id) {
            Some(outcome) => outcome,
            None => Err(UpdateError::SchemaNotFound {
                schema_id: schema_id.to_string(),
            }),
        }
    }

    /// Cached schema, if the last refresh resolved it. Never touches the
    /// store.
    pub fn cached(&self, schema_id: &str) -> Option<Arc<SchemaDefinition>> {
        self.snapshot.read().models.get(schema_id).cloned()
    }

    /// Number of completed refreshes.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn current(&self) -> Arc<ModelSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Rebuild the whole table from the store. Callers hold the gate.
    #[tracing::instrument(name = "model_refresh", skip_all)]
    async fn refresh(&self) -> Result<(), UpdateError> {
        let started = Instant::now();
        let documents = self.store.model_documents().await?;

        let mut resolver = SchemaResolver::new();
        let mut failures = HashMap::new();
        for document in &documents {
            if let Err(err) = resolver.add_text(&document.definition) {
                tracing::warn!(model = %document.id, error = %err, "skipping unparseable model");
                failures.insert(document.id.clone(), err);
            }
        }

        let mut models = HashMap::new();
        for (schema_id, outcome) in resolver.resolve_all() {
            match outcome {
                Ok(schema) => {
                    models.insert(schema_id, schema);
                }
                Err(err) => {
                    tracing::warn!(model = %schema_id, error = %err, "model failed to resolve");
                    failures.insert(schema_id, err);
                }
            }
        }

        let (resolved, failed) = (models.len(), failures.len());
        *self.snapshot.write() = Arc::new(ModelSnapshot { models, failures });
        self.refreshes.fetch_add(1, Ordering::SeqCst);

        tracing::info!(
            documents = documents.len(),
            resolved,
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "model cache refreshed"
        );
        Ok(())
    }
}
