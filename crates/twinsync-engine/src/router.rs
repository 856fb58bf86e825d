//! Request router
//!
//! Dispatches each record of a batch to direct or via-child processing.
//! Records are handled one after another; a failing record is collected and
//! never stops the rest of the batch.

use crate::config::{EngineConfig, ProcessingMode};
use crate::error::{BatchError, RecordFailure, SkipReason, UpdateError};
use crate::model_cache::ModelCache;
use crate::patch::{build_child_patch, build_patch};
use crate::relationship_cache::RelationshipCache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use twinsync_model::{PatchSummary, UpdateRecord};
use twinsync_store::{ConcurrencyToken, EntityStore};

// ============================================================================
// Outcomes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Patches were sent to `entities` (empty when nothing needed writing).
    Applied {
        entities: Vec<String>,
        summary: PatchSummary,
    },
    Skipped(SkipReason),
}

/// Tally of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub records: usize,
    pub updated_records: usize,
    pub skipped: usize,
    pub failed: usize,
    pub entities_updated: usize,
    pub operations: PatchSummary,
}

impl BatchReport {
    fn record(&mut self, outcome: &RecordOutcome) {
        match outcome {
            RecordOutcome::Applied { entities, summary } => {
                if !entities.is_empty() {
                    self.updated_records += 1;
                }
                self.entities_updated += entities.len();
                self.operations.merge(*summary);
            }
            RecordOutcome::Skipped(_) => self.skipped += 1,
        }
    }

    pub fn merge(&mut self, other: &BatchReport) {
        self.records += other.records;
        self.updated_records += other.updated_records;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.entities_updated += other.entities_updated;
        self.operations.merge(other.operations);
    }
}

// ============================================================================
// Router
// ============================================================================

/// Applies update records to the entity store. Cheap to share: the caches
/// are `Arc`s and may be shared with other updaters.
pub struct TwinUpdater {
    store: Arc<dyn EntityStore>,
    models: Arc<ModelCache>,
    relationships: Arc<RelationshipCache>,
    config: EngineConfig,
}

impl TwinUpdater {
    /// Updater with its own, empty caches.
    pub fn new(store: Arc<dyn EntityStore>, config: EngineConfig) -> Self {
        let models = Arc::new(ModelCache::new(Arc::clone(&store)));
        let relationships = Arc::new(RelationshipCache::new(
            Arc::clone(&store),
            config.graph_shape(),
        ));
        Self::with_caches(store, models, relationships, config)
    }

    /// Updater sharing caches with other workers.
    pub fn with_caches(
        store: Arc<dyn EntityStore>,
        models: Arc<ModelCache>,
        relationships: Arc<RelationshipCache>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            models,
            relationships,
            config,
        }
    }

    pub fn models(&self) -> &Arc<ModelCache> {
        &self.models
    }

    pub fn relationships(&self) -> &Arc<RelationshipCache> {
        &self.relationships
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Process raw JSON records in order. Undecodable records and records
    /// without an identifier are skipped; every other failure is collected
    /// and returned together once the batch is done.
    pub async fn process_batch<I>(&self, inputs: I) -> Result<BatchReport, BatchError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut report = BatchReport::default();
        let mut failures = Vec::new();

        for (index, input) in inputs.into_iter().enumerate() {
            report.records += 1;
            let outcome = match UpdateRecord::from_json(input.as_ref()) {
                Ok(record) => self.process_record(record).await,
                Err(err) => {
                    tracing::warn!(index, error = %err, "skipping undecodable record");
                    Ok(RecordOutcome::Skipped(SkipReason::Deserialization(
                        err.to_string(),
                    )))
                }
            };
            match outcome {
                Ok(outcome) => report.record(&outcome),
                Err(error) => {
                    tracing::warn!(index, error = %error, "record failed");
                    report.failed += 1;
                    failures.push(RecordFailure { index, error });
                }
            }
        }

        tracing::info!(
            records = report.records,
            updated = report.updated_records,
            skipped = report.skipped,
            failed = report.failed,
            added = report.operations.added,
            replaced = report.operations.replaced,
            "batch processed"
        );

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(BatchError { report, failures })
        }
    }

    /// Process one decoded record according to the configured mode.
    pub async fn process_record(&self, record: UpdateRecord) -> Result<RecordOutcome, UpdateError> {
        let field = &self.config.id_field;
        let Some(identifier) = record.identifier(field) else {
            let reason = if record.contains(field) {
                SkipReason::EmptyIdentifier { field: field.clone() }
            } else {
                SkipReason::MissingIdentifier { field: field.clone() }
            };
            tracing::warn!(field = %field, reason = %reason, "skipping record without identifier");
            return Ok(RecordOutcome::Skipped(reason));
        };

        match self.config.mode {
            ProcessingMode::ByIdentifier => self.update_direct(&identifier, &record).await,
            ProcessingMode::ByChildRelation => self.update_children(&identifier, record).await,
        }
    }

    async fn update_direct(
        &self,
        entity_id: &str,
        record: &UpdateRecord,
    ) -> Result<RecordOutcome, UpdateError> {
        let snapshot = self.store.get_entity(entity_id).await?;
        let schema = self.models.get_schema(&snapshot.schema_id).await?;
        let patch = build_patch(&schema, &snapshot.property_names(), record);
        let summary = PatchSummary::of(&patch);

        if patch.is_empty() {
            tracing::debug!(entity = entity_id, "no declared properties to update");
            return Ok(RecordOutcome::Applied {
                entities: Vec::new(),
                summary,
            });
        }

        self.store
            .update_entity(entity_id, &patch, &ConcurrencyToken::Any)
            .await?;
        tracing::info!(
            entity = entity_id,
            schema_id = %snapshot.schema_id,
            added = summary.added,
            replaced = summary.replaced,
            "entity updated"
        );
        Ok(RecordOutcome::Applied {
            entities: vec![entity_id.to_string()],
            summary,
        })
    }

    /// Children are written one at a time; the first failure ends the record
    /// and leaves earlier children updated.
    async fn update_children(
        &self,
        business_key: &str,
        mut record: UpdateRecord,
    ) -> Result<RecordOutcome, UpdateError> {
        record.remove(&self.config.id_field);

        let mut entities = Vec::new();
        let mut summary = PatchSummary::default();
        for (child_role, value) in record {
            let child_id = self
                .relationships
                .resolve_child(business_key, &child_role)
                .await?;
            let child = self.store.get_entity(&child_id).await?;
            let operation =
                build_child_patch(&child.property_names(), &self.config.child_value_field, value);
            let applied = PatchSummary::of(std::slice::from_ref(&operation));

            self.store
                .update_entity(&child_id, &[operation], &ConcurrencyToken::Any)
                .await?;
            tracing::info!(
                parent = business_key,
                child_role = %child_role,
                entity = %child_id,
                added = applied.added,
                replaced = applied.replaced,
                "child updated"
            );
            summary.merge(applied);
            entities.push(child_id);
        }

        Ok(RecordOutcome::Applied { entities, summary })
    }
}
