//! Graph relationship cache
//!
//! Maps `(parent business key, child role)` to the store id of the child
//! entity. A miss populates every sibling of the parent from one query pair:
//! the parent by its business key, then everything it `contains`.

use crate::config::GraphShape;
use crate::error::UpdateError;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use twinsync_model::scalar_text;
use twinsync_store::{EntityQuery, EntityStore};

/// Case-insensitive cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationshipKey {
    business_key: String,
    child_role: String,
}

impl RelationshipKey {
    pub fn new(business_key: &str, child_role: &str) -> Self {
        Self {
            business_key: business_key.to_lowercase(),
            child_role: child_role.to_lowercase(),
        }
    }

    pub fn business_key(&self) -> &str {
        &self.business_key
    }

    pub fn child_role(&self) -> &str {
        &self.child_role
    }
}

pub struct RelationshipCache {
    store: Arc<dyn EntityStore>,
    shape: GraphShape,
    entries: DashMap<RelationshipKey, String>,
    population_gate: Mutex<()>,
    populations: AtomicU64,
}

impl RelationshipCache {
    pub fn new(store: Arc<dyn EntityStore>, shape: GraphShape) -> Self {
        Self {
            store,
            shape,
            entries: DashMap::new(),
            population_gate: Mutex::new(()),
            populations: AtomicU64::new(0),
        }
    }

    /// Store id of the child playing `child_role` under the parent whose
    /// business key is `business_key`.
    pub async fn resolve_child(
        &self,
        business_key: &str,
        child_role: &str,
    ) -> Result<String, UpdateError> {
        let key = RelationshipKey::new(business_key, child_role);
        if let Some(child_id) = self.cached(&key) {
            return Ok(child_id);
        }

        tracing::warn!(business_key, child_role, "relationship cache miss");
        let _gate = self.population_gate.lock().await;
        if let Some(child_id) = self.cached(&key) {
            return Ok(child_id);
        }

        self.populate(business_key).await?;

        self.cached(&key).ok_or_else(|| UpdateError::ChildNotFound {
            business_key: business_key.to_string(),
            child_role: child_role.to_string(),
        })
    }

    pub fn cached(&self, key: &RelationshipKey) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Number of parent populations performed.
    pub fn population_count(&self) -> u64 {
        self.populations.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[tracing::instrument(name = "relationship_population", skip(self))]
    async fn populate(&self, business_key: &str) -> Result<(), UpdateError> {
        let started = Instant::now();

        let parents = self
            .store
            .query(&EntityQuery::by_property(
                &self.shape.parent_key_field,
                business_key,
            ))
            .await?;
        let parent = match parents.as_slice() {
            [parent] => parent,
            _ => {
                return Err(UpdateError::AmbiguousParent {
                    field: self.shape.parent_key_field.clone(),
                    business_key: business_key.to_string(),
                    matches: parents.len(),
                })
            }
        };

        let children = self
            .store
            .query(
                &EntityQuery::related(&parent.id, &self.shape.relationship)
                    .with_required_field(&self.shape.child_key_field),
            )
            .await?;
        self.populations.fetch_add(1, Ordering::SeqCst);

        if children.is_empty() {
            tracing::warn!(parent = %parent.id, "parent has no children");
            return Ok(());
        }

        let mut inserted = 0usize;
        for child in &children {
            let Some(role) = child
                .property(&self.shape.child_key_field)
                .and_then(scalar_text)
            else {
                continue;
            };
            self.entries
                .insert(RelationshipKey::new(business_key, &role), child.id.clone());
            inserted += 1;
        }

        tracing::info!(
            parent = %parent.id,
            children = inserted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "relationships populated"
        );
        Ok(())
    }
}
