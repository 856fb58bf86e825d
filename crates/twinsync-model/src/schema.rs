//! Model documents and flattened schemas
//!
//! Model documents follow the Digital Twins Definition Language interface
//! shape. Only what reconciliation needs is kept: the interface id, its
//! `extends` references, and the name and kind of every content element.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

pub type SchemaId = String;

// ============================================================================
// Flattened Schema
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyKind {
    /// Writable property; the only kind that takes part in reconciliation.
    Property,
    /// Telemetry, commands, relationships, components.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub kind: PropertyKind,
}

impl PropertyDescriptor {
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn property(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Property)
    }

    pub fn other(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Other)
    }

    pub fn is_property(&self) -> bool {
        self.kind == PropertyKind::Property
    }
}

/// A model flattened across its whole inheritance chain.
///
/// Property names are unique: [`SchemaDefinition::new`] keeps the first
/// declaration of a name, so callers list the most specific declarations
/// first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    schema_id: SchemaId,
    properties: Vec<PropertyDescriptor>,
}

impl SchemaDefinition {
    pub fn new(
        schema_id: impl Into<SchemaId>,
        properties: impl IntoIterator<Item = PropertyDescriptor>,
    ) -> Self {
        let mut seen = HashSet::new();
        let properties = properties
            .into_iter()
            .filter(|descriptor| seen.insert(descriptor.name.clone()))
            .collect();
        Self {
            schema_id: schema_id.into(),
            properties,
        }
    }

    pub fn schema_id(&self) -> &str {
        &self.schema_id
    }

    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    /// Descriptors of kind [`PropertyKind::Property`], in schema order.
    pub fn reconcilable(&self) -> impl Iterator<Item = &PropertyDescriptor> + '_ {
        self.properties.iter().filter(|descriptor| descriptor.is_property())
    }

    pub fn get(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|descriptor| descriptor.name == name)
    }

    pub fn declares_property(&self, name: &str) -> bool {
        self.get(name).is_some_and(PropertyDescriptor::is_property)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("invalid model document {}: {message}", display_id(.schema_id))]
    Parse {
        schema_id: Option<SchemaId>,
        message: String,
    },
    #[error("inheritance cycle: {}", .chain.join(" -> "))]
    Cycle { chain: Vec<SchemaId> },
    #[error("model {referenced} could not be resolved{}", extended_by(.referenced_by))]
    Unresolved {
        referenced: SchemaId,
        referenced_by: Option<SchemaId>,
    },
}

impl SchemaError {
    pub fn parse(schema_id: Option<&str>, message: impl Into<String>) -> Self {
        Self::Parse {
            schema_id: schema_id.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn unresolved(referenced: &str, referenced_by: Option<&str>) -> Self {
        Self::Unresolved {
            referenced: referenced.to_string(),
            referenced_by: referenced_by.map(str::to_string),
        }
    }

    /// Malformed documents and inheritance cycles; everything that is wrong
    /// with the documents themselves rather than with their availability.
    pub fn is_parse_error(&self) -> bool {
        matches!(self, Self::Parse { .. } | Self::Cycle { .. })
    }
}

fn display_id(schema_id: &Option<SchemaId>) -> &str {
    schema_id.as_deref().unwrap_or("<unknown>")
}

fn extended_by(referenced_by: &Option<SchemaId>) -> String {
    referenced_by
        .as_ref()
        .map(|by| format!(" (extended by {by})"))
        .unwrap_or_default()
}

// ============================================================================
// Model Documents
// ============================================================================

/// One interface as declared, before inheritance is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDocument {
    pub id: SchemaId,
    /// Referenced parents, in declaration order.
    pub extends: Vec<SchemaId>,
    /// Local content elements, in declaration order.
    pub contents: Vec<PropertyDescriptor>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedModels {
    /// Top-level interfaces of the text, in order.
    pub roots: Vec<SchemaId>,
    /// Every interface found, inline `extends` definitions included.
    pub documents: Vec<ModelDocument>,
}

/// Parse a model document: a single interface object or an array of them.
pub fn parse_models(text: &str) -> Result<ParsedModels, SchemaError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|err| SchemaError::parse(None, format!("not valid JSON: {err}")))?;

    let mut parsed = ParsedModels::default();
    match &value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(SchemaError::parse(None, "document contains no interfaces"));
            }
            for item in items {
                let id = parse_interface(item, &mut parsed.documents)?;
                parsed.roots.push(id);
            }
        }
        Value::Object(_) => {
            let id = parse_interface(&value, &mut parsed.documents)?;
            parsed.roots.push(id);
        }
        other => {
            return Err(SchemaError::parse(
                None,
                format!("expected an interface object, found {}", json_kind(other)),
            ))
        }
    }
    Ok(parsed)
}

fn parse_interface(value: &Value, out: &mut Vec<ModelDocument>) -> Result<SchemaId, SchemaError> {
    let object = value.as_object().ok_or_else(|| {
        SchemaError::parse(
            None,
            format!("expected an interface object, found {}", json_kind(value)),
        )
    })?;

    let id = match object.get("@id") {
        Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
        _ => return Err(SchemaError::parse(None, "interface is missing `@id`")),
    };

    let types = type_tags(object.get("@type")).ok_or_else(|| {
        SchemaError::parse(Some(&id), "`@type` must be a string or an array of strings")
    })?;
    if !types.contains(&"Interface") {
        return Err(SchemaError::parse(Some(&id), "`@type` must include `Interface`"));
    }

    let extends = match object.get("extends") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| extends_ref(&id, item, out))
            .collect::<Result<Vec<_>, _>>()?,
        Some(item) => vec![extends_ref(&id, item, out)?],
    };

    let contents = match object.get("contents") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => parse_contents(&id, items)?,
        Some(other) => {
            return Err(SchemaError::parse(
                Some(&id),
                format!("`contents` must be an array, found {}", json_kind(other)),
            ))
        }
    };

    out.push(ModelDocument {
        id: id.clone(),
        extends,
        contents,
    });
    Ok(id)
}

fn extends_ref(
    owner: &str,
    item: &Value,
    out: &mut Vec<ModelDocument>,
) -> Result<SchemaId, SchemaError> {
    match item {
        Value::String(reference) if !reference.trim().is_empty() => Ok(reference.clone()),
        Value::Object(_) => parse_interface(item, out),
        _ => Err(SchemaError::parse(
            Some(owner),
            "`extends` entries must be interface ids or inline interfaces",
        )),
    }
}

fn parse_contents(owner: &str, items: &[Value]) -> Result<Vec<PropertyDescriptor>, SchemaError> {
    let mut seen = HashSet::new();
    let mut contents = Vec::with_capacity(items.len());

    for item in items {
        let element = item.as_object().ok_or_else(|| {
            SchemaError::parse(Some(owner), "content elements must be objects")
        })?;

        let name = match element.get("name") {
            Some(Value::String(name)) if !name.is_empty() => name.clone(),
            _ => {
                return Err(SchemaError::parse(
                    Some(owner),
                    "content element is missing `name`",
                ))
            }
        };

        let tags = type_tags(element.get("@type"))
            .filter(|tags| !tags.is_empty())
            .ok_or_else(|| {
                SchemaError::parse(Some(owner), format!("content `{name}` has no valid `@type`"))
            })?;
        let kind = if tags.contains(&"Property") {
            PropertyKind::Property
        } else {
            PropertyKind::Other
        };

        if !seen.insert(name.clone()) {
            return Err(SchemaError::parse(
                Some(owner),
                format!("`{name}` is declared more than once"),
            ));
        }
        contents.push(PropertyDescriptor::new(name, kind));
    }

    Ok(contents)
}

/// `@type` as a list of tags; `None` when it is neither a string nor an
/// array of strings.
fn type_tags(value: Option<&Value>) -> Option<Vec<&str>> {
    match value {
        None => Some(Vec::new()),
        Some(Value::String(tag)) => Some(vec![tag.as_str()]),
        Some(Value::Array(items)) => items.iter().map(Value::as_str).collect(),
        Some(_) => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
