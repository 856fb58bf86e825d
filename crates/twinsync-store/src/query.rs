//! Entity queries
//!
//! The engine needs exactly two graph lookups: entities whose business-key
//! property equals a value, and the targets of a named relationship from one
//! source entity. Backends either evaluate [`EntityQuery`] directly
//! (in-memory) or render it to the store's query language.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityQuery {
    /// Entities whose `field` equals `value`.
    ByProperty { field: String, value: String },
    /// Targets of `relationship` from `source_id`, optionally restricted to
    /// targets carrying a non-empty `require_field`.
    Related {
        source_id: String,
        relationship: String,
        require_field: Option<String>,
    },
}

impl EntityQuery {
    pub fn by_property(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::ByProperty {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn related(source_id: impl Into<String>, relationship: impl Into<String>) -> Self {
        Self::Related {
            source_id: source_id.into(),
            relationship: relationship.into(),
            require_field: None,
        }
    }

    /// Restrict a `Related` query to targets with a non-empty `field`.
    /// No effect on `ByProperty`.
    pub fn with_required_field(self, field: impl Into<String>) -> Self {
        match self {
            Self::Related {
                source_id,
                relationship,
                ..
            } => Self::Related {
                source_id,
                relationship,
                require_field: Some(field.into()),
            },
            other => other,
        }
    }

    /// Render in the Digital Twins query language.
    pub fn to_query_text(&self) -> String {
        match self {
            Self::ByProperty { field, value } => format!(
                "SELECT T FROM DIGITALTWINS T WHERE {} = {}",
                field_ref("T", field),
                quote_literal(value)
            ),
            Self::Related {
                source_id,
                relationship,
                require_field,
            } => {
                let mut text = format!(
                    "SELECT CT FROM DIGITALTWINS T JOIN CT RELATED {} WHERE T.$dtId = {}",
                    field_ref("T", relationship),
                    quote_literal(source_id)
                );
                if let Some(field) = require_field {
                    let target = field_ref("CT", field);
                    text.push_str(&format!(" AND IS_DEFINED({target}) AND {target} != ''"));
                }
                text
            }
        }
    }
}

impl fmt::Display for EntityQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query_text())
    }
}

/// Single-quoted string literal with backslashes and quotes escaped.
pub fn quote_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        match ch {
            '\\' => quoted.push_str("\\\\"),
            '\'' => quoted.push_str("\\'"),
            _ => quoted.push(ch),
        }
    }
    quoted.push('\'');
    quoted
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '$' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn field_ref(alias: &str, name: &str) -> String {
    if is_plain_identifier(name) {
        format!("{alias}.{name}")
    } else {
        format!("{alias}[{}]", quote_literal(name))
    }
}
