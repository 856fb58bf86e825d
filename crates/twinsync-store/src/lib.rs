//! Twinsync Entity Store
//!
//! The reconciliation engine consumes four primitives of the entity store
//! and nothing else:
//!
//! ```text
//! ┌──────────────────────┐        ┌─────────────────────────────┐
//! │  twinsync-engine     │        │  EntityStore                │
//! │                      │        │                             │
//! │  model cache    ─────┼──────► │  model_documents()          │
//! │  relationships  ─────┼──────► │  query(EntityQuery)         │
//! │  router         ─────┼──────► │  get_entity(id)             │
//! │                 ─────┼──────► │  update_entity(id, patch)   │
//! └──────────────────────┘        └──────────────┬──────────────┘
//!                                                │
//!                              ┌─────────────────┴─────────────────┐
//!                              ▼                                   ▼
//!                     HttpEntityStore                    InMemoryEntityStore
//!                  (Digital Twins REST API)             (tests, local runs)
//! ```

pub mod entity;
pub mod error;
pub mod http;
pub mod memory;
pub mod query;

pub use entity::{ConcurrencyToken, EntitySnapshot, StoredModel};
pub use error::StoreError;
pub use http::{HttpEntityStore, HttpStoreConfig};
pub use memory::{CallCounts, InMemoryEntityStore};
pub use query::EntityQuery;

use async_trait::async_trait;
use twinsync_model::PatchOperation;

// ============================================================================
// Entity Store Interface
// ============================================================================

/// Read/write/query primitives of the twin graph.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Current snapshot of one entity.
    async fn get_entity(&self, id: &str) -> Result<EntitySnapshot, StoreError>;

    /// Apply add/replace operations to one entity.
    async fn update_entity(
        &self,
        id: &str,
        patch: &[PatchOperation],
        token: &ConcurrencyToken,
    ) -> Result<(), StoreError>;

    /// Every model document the store knows, with its raw definition.
    async fn model_documents(&self) -> Result<Vec<StoredModel>, StoreError>;

    /// Entities matching `query`.
    async fn query(&self, query: &EntityQuery) -> Result<Vec<EntitySnapshot>, StoreError>;
}
