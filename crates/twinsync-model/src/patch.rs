//! Property patch operations
//!
//! Serialized as JSON Patch (RFC 6902) entries, which is what the entity
//! store accepts: `{"op": "replace", "path": "/temperature", "value": 42}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    pub value: Value,
}

impl PatchOperation {
    pub fn add(property: &str, value: Value) -> Self {
        Self {
            op: PatchOp::Add,
            path: pointer_for(property),
            value,
        }
    }

    pub fn replace(property: &str, value: Value) -> Self {
        Self {
            op: PatchOp::Replace,
            path: pointer_for(property),
            value,
        }
    }

    /// `Replace` when the property already exists on the entity, `Add`
    /// otherwise.
    pub fn upsert(present: bool, property: &str, value: Value) -> Self {
        if present {
            Self::replace(property, value)
        } else {
            Self::add(property, value)
        }
    }

    pub fn property(&self) -> Option<String> {
        property_from_pointer(&self.path)
    }
}

/// JSON pointer addressing a top-level property.
pub fn pointer_for(property: &str) -> String {
    format!("/{}", property.replace('~', "~0").replace('/', "~1"))
}

/// Inverse of [`pointer_for`]; `None` for anything but a single-segment
/// pointer.
pub fn property_from_pointer(path: &str) -> Option<String> {
    let segment = path.strip_prefix('/')?;
    if segment.contains('/') {
        return None;
    }
    Some(segment.replace("~1", "/").replace("~0", "~"))
}

/// Operation counts of one patch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSummary {
    pub added: usize,
    pub replaced: usize,
}

impl PatchSummary {
    pub fn of(operations: &[PatchOperation]) -> Self {
        operations
            .iter()
            .fold(Self::default(), |mut summary, operation| {
                match operation.op {
                    PatchOp::Add => summary.added += 1,
                    PatchOp::Replace => summary.replaced += 1,
                }
                summary
            })
    }

    pub fn total(&self) -> usize {
        self.added + self.replaced
    }

    pub fn merge(&mut self, other: PatchSummary) {
        self.added += other.added;
        self.replaced += other.replaced;
    }
}
