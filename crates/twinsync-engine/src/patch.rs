//! Patch builder
//!
//! Pure functions from (schema, current property names, update) to the
//! add/replace operations that bring the entity up to date.

use serde_json::Value;
use std::collections::HashSet;
use twinsync_model::{PatchOperation, SchemaDefinition, UpdateRecord};

/// One operation per `Property` of `schema` that `update` carries, in schema
/// order. `Replace` when the entity already has the property, `Add`
/// otherwise. Fields the schema does not declare as properties are ignored.
pub fn build_patch(
    schema: &SchemaDefinition,
    current: &HashSet<String>,
    update: &UpdateRecord,
) -> Vec<PatchOperation> {
    schema
        .reconcilable()
        .filter_map(|descriptor| {
            update.get(&descriptor.name).map(|value| {
                PatchOperation::upsert(
                    current.contains(&descriptor.name),
                    &descriptor.name,
                    value.clone(),
                )
            })
        })
        .collect()
}

/// Single write of `value` into the child's fixed value field.
pub fn build_child_patch(current: &HashSet<String>, field: &str, value: Value) -> PatchOperation {
    PatchOperation::upsert(current.contains(field), field, value)
}
