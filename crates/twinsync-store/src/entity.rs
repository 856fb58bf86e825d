use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// One entity as read from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: String,
    /// Model the entity declares; empty when the store did not report one.
    pub schema_id: String,
    pub etag: Option<String>,
    pub properties: Map<String, Value>,
}

impl EntitySnapshot {
    pub fn new(id: impl Into<String>, schema_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            schema_id: schema_id.into(),
            etag: None,
            properties: Map::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn property_names(&self) -> HashSet<String> {
        self.properties.keys().cloned().collect()
    }
}

/// Optimistic-concurrency guard sent with an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConcurrencyToken {
    /// Overwrite unconditionally (last writer wins).
    Any,
    /// Only apply if the entity still carries this etag.
    Match(String),
}

impl ConcurrencyToken {
    /// Value of the `If-Match` header.
    pub fn if_match(&self) -> &str {
        match self {
            Self::Any => "*",
            Self::Match(etag) => etag,
        }
    }
}

/// A model document as stored: its id and raw definition text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredModel {
    pub id: String,
    pub definition: String,
}

impl StoredModel {
    pub fn new(id: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            definition: definition.into(),
        }
    }
}
