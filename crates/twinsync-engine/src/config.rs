//! Engine configuration
//!
//! Loaded from a JSON config file or from `TWINSYNC_*` environment
//! variables. Every field has a default, so an empty environment yields a
//! working direct-mode configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Processing Mode
// ============================================================================

/// How a record is mapped onto entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingMode {
    /// The identifier field names the target entity; remaining fields are
    /// properties of that entity.
    #[default]
    ByIdentifier,
    /// The identifier field names a parent by business key; remaining fields
    /// are child roles whose value lands in the child's fixed value field.
    ByChildRelation,
}

impl FromStr for ProcessingMode {
    type Err = ConfigError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let normalized = text.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "" | "byidentifier" | "by-identifier" | "by_identifier" => Ok(Self::ByIdentifier),
            "bychildrelation" | "by-child-relation" | "by_child_relation" => {
                Ok(Self::ByChildRelation)
            }
            _ => Err(ConfigError::Invalid(format!(
                "unknown processing mode {text:?} (expected ByIdentifier or ByChildRelation)"
            ))),
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByIdentifier => f.write_str("ByIdentifier"),
            Self::ByChildRelation => f.write_str("ByChildRelation"),
        }
    }
}

// ============================================================================
// Graph Shape
// ============================================================================

/// Names used to walk from a parent business key to its children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphShape {
    pub parent_key_field: String,
    pub child_key_field: String,
    pub relationship: String,
}

// ============================================================================
// Engine Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mode: ProcessingMode,
    /// Record field naming the target entity (or parent business key).
    pub id_field: String,
    /// Child property written in via-child mode.
    pub child_value_field: String,
    pub parent_key_field: String,
    pub child_key_field: String,
    pub relationship: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ProcessingMode::ByIdentifier,
            id_field: "id".to_string(),
            child_value_field: "OPCUANodeValue".to_string(),
            parent_key_field: "equipmentID".to_string(),
            child_key_field: "ID".to_string(),
            relationship: "contains".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn with_mode(mut self, mode: ProcessingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(mode) = lookup("TWINSYNC_MODE") {
            config.mode = mode.parse()?;
        }
        let text_fields: [(&str, &mut String); 5] = [
            ("TWINSYNC_ID_FIELD", &mut config.id_field),
            ("TWINSYNC_CHILD_VALUE_FIELD", &mut config.child_value_field),
            ("TWINSYNC_PARENT_KEY_FIELD", &mut config.parent_key_field),
            ("TWINSYNC_CHILD_KEY_FIELD", &mut config.child_key_field),
            ("TWINSYNC_RELATIONSHIP", &mut config.relationship),
        ];
        for (name, slot) in text_fields {
            if let Some(value) = lookup(name).filter(|value| !value.trim().is_empty()) {
                *slot = value.trim().to_string();
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("id_field", &self.id_field),
            ("child_value_field", &self.child_value_field),
            ("parent_key_field", &self.parent_key_field),
            ("child_key_field", &self.child_key_field),
            ("relationship", &self.relationship),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{name} must not be empty")));
            }
        }
        Ok(())
    }

    pub fn graph_shape(&self) -> GraphShape {
        GraphShape {
            parent_key_field: self.parent_key_field.clone(),
            child_key_field: self.child_key_field.clone(),
            relationship: self.relationship.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
