//! In-memory entity store
//!
//! Holds entities, relationships and model documents behind one lock and
//! counts every capability call, so tests can assert how often the engine
//! reached the store.

use crate::entity::{ConcurrencyToken, EntitySnapshot, StoredModel};
use crate::error::StoreError;
use crate::query::EntityQuery;
use crate::EntityStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use twinsync_model::{property_from_pointer, scalar_text, PatchOp, PatchOperation};

/// Capability calls observed so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get_entity: usize,
    pub update_entity: usize,
    pub model_documents: usize,
    pub query: usize,
}

#[derive(Debug)]
struct StoredEntity {
    snapshot: EntitySnapshot,
    version: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    entities: BTreeMap<String, StoredEntity>,
    /// source id -> (relationship name, target id), in insertion order
    relationships: BTreeMap<String, Vec<(String, String)>>,
    models: Vec<StoredModel>,
}

#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    state: RwLock<MemoryState>,
    latency: Option<Duration>,
    fail_models: AtomicBool,
    get_calls: AtomicUsize,
    update_calls: AtomicUsize,
    model_calls: AtomicUsize,
    query_calls: AtomicUsize,
}

fn etag_for(version: u64) -> String {
    format!("W/\"{version}\"")
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every capability call by `latency`, widening race windows.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Insert or overwrite an entity. Its etag is reset to version 1.
    pub fn insert_entity(&self, mut snapshot: EntitySnapshot) {
        snapshot.etag = Some(etag_for(1));
        self.state.write().entities.insert(
            snapshot.id.clone(),
            StoredEntity {
                snapshot,
                version: 1,
            },
        );
    }

    pub fn add_relationship(&self, source_id: &str, relationship: &str, target_id: &str) {
        self.state
            .write()
            .relationships
            .entry(source_id.to_string())
            .or_default()
            .push((relationship.to_string(), target_id.to_string()));
    }

    pub fn insert_model(&self, id: impl Into<String>, definition: impl Into<String>) {
        let model = StoredModel::new(id, definition);
        let mut state = self.state.write();
        state.models.retain(|existing| existing.id != model.id);
        state.models.push(model);
    }

    /// Make subsequent `model_documents` calls fail (or succeed again).
    pub fn fail_model_documents(&self, fail: bool) {
        self.fail_models.store(fail, Ordering::SeqCst);
    }

    /// Current state of an entity, without counting a call.
    pub fn entity(&self, id: &str) -> Option<EntitySnapshot> {
        self.state
            .read()
            .entities
            .get(id)
            .map(|stored| stored.snapshot.clone())
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            get_entity: self.get_calls.load(Ordering::SeqCst),
            update_entity: self.update_calls.load(Ordering::SeqCst),
            model_documents: self.model_calls.load(Ordering::SeqCst),
            query: self.query_calls.load(Ordering::SeqCst),
        }
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn matches(&self, state: &MemoryState, query: &EntityQuery) -> Vec<EntitySnapshot> {
        match query {
            EntityQuery::ByProperty { field, value } => state
                .entities
                .values()
                .filter(|stored| {
                    stored
                        .snapshot
                        .property(field)
                        .and_then(scalar_text)
                        .is_some_and(|text| &text == value)
                })
                .map(|stored| stored.snapshot.clone())
                .collect(),
            EntityQuery::Related {
                source_id,
                relationship,
                require_field,
            } => state
                .relationships
                .get(source_id)
                .into_iter()
                .flatten()
                .filter(|(name, _)| name == relationship)
                .filter_map(|(_, target)| state.entities.get(target))
                .filter(|stored| match require_field {
                    Some(field) => stored
                        .snapshot
                        .property(field)
                        .and_then(scalar_text)
                        .is_some(),
                    None => true,
                })
                .map(|stored| stored.snapshot.clone())
                .collect(),
        }
    }
}

fn apply_patch(
    snapshot: &mut EntitySnapshot,
    patch: &[PatchOperation],
) -> Result<(), StoreError> {
    let rejected = |message: String| StoreError::Rejected {
        id: snapshot.id.clone(),
        message,
    };
    let mut properties = snapshot.properties.clone();
    for operation in patch {
        let name = property_from_pointer(&operation.path)
            .ok_or_else(|| rejected(format!("unsupported path {}", operation.path)))?;
        match operation.op {
            PatchOp::Add => {
                properties.insert(name, operation.value.clone());
            }
            PatchOp::Replace => match properties.get_mut(&name) {
                Some(slot) => *slot = operation.value.clone(),
                None => {
                    return Err(rejected(format!(
                        "cannot replace missing property {name}"
                    )))
                }
            },
        }
    }
    snapshot.properties = properties;
    Ok(())
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn get_entity(&self, id: &str) -> Result<EntitySnapshot, StoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        self.entity(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    async fn update_entity(
        &self,
        id: &str,
        patch: &[PatchOperation],
        token: &ConcurrencyToken,
    ) -> Result<(), StoreError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let mut state = self.state.write();
        let stored = state
            .entities
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        if let ConcurrencyToken::Match(expected) = token {
            if stored.snapshot.etag.as_deref() != Some(expected.as_str()) {
                return Err(StoreError::PreconditionFailed { id: id.to_string() });
            }
        }
        apply_patch(&mut stored.snapshot, patch)?;
        stored.version += 1;
        stored.snapshot.etag = Some(etag_for(stored.version));
        Ok(())
    }

    async fn model_documents(&self) -> Result<Vec<StoredModel>, StoreError> {
        self.model_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if self.fail_models.load(Ordering::SeqCst) {
            return Err(StoreError::Http {
                status: 503,
                body: "model listing unavailable".into(),
            });
        }
        Ok(self.state.read().models.clone())
    }

    async fn query(&self, query: &EntityQuery) -> Result<Vec<EntitySnapshot>, StoreError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        let state = self.state.read();
        Ok(self.matches(&state, query))
    }
}
