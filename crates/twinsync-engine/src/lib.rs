//! Twinsync Reconciliation Engine
//!
//! Turns flat update records into minimal add/replace patches against the
//! twin graph:
//!
//! ```text
//! record ──► TwinUpdater ──┬─ ByIdentifier ──► get_entity ─► ModelCache ─► build_patch ─► update_entity
//!                          │
//!                          └─ ByChildRelation ─► RelationshipCache ─► get_entity ─► build_child_patch ─► update_entity
//! ```
//!
//! Both caches are process-lifetime, shared through `Arc`, and fill
//! themselves on a miss behind a single gate each, so concurrent workers
//! trigger one store round-trip per miss rather than one per worker.

pub mod config;
pub mod error;
pub mod model_cache;
pub mod patch;
pub mod relationship_cache;
pub mod router;

pub use config::{ConfigError, EngineConfig, GraphShape, ProcessingMode};
pub use error::{BatchError, RecordFailure, SkipReason, UpdateError};
pub use model_cache::ModelCache;
pub use patch::{build_child_patch, build_patch};
pub use relationship_cache::{RelationshipCache, RelationshipKey};
pub use router::{BatchReport, RecordOutcome, TwinUpdater};
