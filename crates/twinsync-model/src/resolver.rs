//! Inheritance flattening
//!
//! [`SchemaResolver`] holds a catalog of parsed model documents and a memo
//! table of flattened definitions. Resolution walks `extends` edges with an
//! explicit stack, so deep hierarchies never recurse and a model that
//! reaches itself is reported as [`SchemaError::Cycle`].
//!
//! Flattened order: local contents first (declaration order), then each
//! parent's flattened properties in `extends` order. A local declaration
//! overrides any inherited one of the same name. Two parents contributing
//! the same name is accepted when both agree on its kind (diamond
//! inheritance) and rejected otherwise.

use crate::schema::{
    parse_models, ModelDocument, PropertyDescriptor, PropertyKind, SchemaDefinition, SchemaError,
    SchemaId,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct SchemaResolver {
    documents: HashMap<SchemaId, ModelDocument>,
    resolved: HashMap<SchemaId, Arc<SchemaDefinition>>,
}

struct Frame {
    id: SchemaId,
    next_parent: usize,
}

impl SchemaResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `text` and register every interface it declares. Returns the
    /// ids of its top-level interfaces.
    pub fn add_text(&mut self, text: &str) -> Result<Vec<SchemaId>, SchemaError> {
        let parsed = parse_models(text)?;
        for document in parsed.documents {
            self.add_document(document);
        }
        Ok(parsed.roots)
    }

    /// Register (or replace) one document. Replacing drops every memoized
    /// definition, since any of them may inherit from it.
    pub fn add_document(&mut self, document: ModelDocument) {
        if self.documents.contains_key(&document.id) {
            self.resolved.clear();
        }
        self.documents.insert(document.id.clone(), document);
    }

    pub fn contains(&self, schema_id: &str) -> bool {
        self.documents.contains_key(schema_id)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Ids referenced through `extends` that are not in the catalog.
    pub fn missing_references(&self) -> Vec<(SchemaId, SchemaId)> {
        let mut missing: Vec<(SchemaId, SchemaId)> = self
            .documents
            .values()
            .flat_map(|doc| {
                doc.extends
                    .iter()
                    .filter(|parent| !self.documents.contains_key(*parent))
                    .map(|parent| (parent.clone(), doc.id.clone()))
            })
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }

    /// Flattened definition of `schema_id`, memoized.
    pub fn resolve(&mut self, schema_id: &str) -> Result<Arc<SchemaDefinition>, SchemaError> {
        if let Some(done) = self.resolved.get(schema_id) {
            return Ok(Arc::clone(done));
        }
        if !self.documents.contains_key(schema_id) {
            return Err(SchemaError::unresolved(schema_id, None));
        }

        let mut stack = vec![Frame {
            id: schema_id.to_string(),
            next_parent: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            let document = &self.documents[&frame.id];

            if let Some(parent) = document.extends.get(frame.next_parent) {
                frame.next_parent += 1;
                if self.resolved.contains_key(parent) {
                    continue;
                }
                if let Some(start) = stack.iter().position(|open| &open.id == parent) {
                    let mut chain: Vec<SchemaId> =
                        stack[start..].iter().map(|open| open.id.clone()).collect();
                    chain.push(parent.clone());
                    return Err(SchemaError::Cycle { chain });
                }
                if !self.documents.contains_key(parent) {
                    return Err(SchemaError::unresolved(parent, Some(&document.id)));
                }
                let parent = parent.clone();
                stack.push(Frame {
                    id: parent,
                    next_parent: 0,
                });
                continue;
            }

            let definition = self.flatten(document)?;
            let id = document.id.clone();
            stack.pop();
            self.resolved.insert(id, Arc::new(definition));
        }

        Ok(Arc::clone(&self.resolved[schema_id]))
    }

    /// Resolve every registered document. Failures are reported per model;
    /// one broken model does not prevent the others from resolving.
    pub fn resolve_all(
        &mut self,
    ) -> BTreeMap<SchemaId, Result<Arc<SchemaDefinition>, SchemaError>> {
        let ids: Vec<SchemaId> = self.documents.keys().cloned().collect();
        ids.into_iter()
            .map(|id| {
                let outcome = self.resolve(&id);
                (id, outcome)
            })
            .collect()
    }

    /// All parents of `document` must already be memoized.
    fn flatten(&self, document: &ModelDocument) -> Result<SchemaDefinition, SchemaError> {
        let local: HashSet<&str> = document.contents.iter().map(|p| p.name.as_str()).collect();
        let mut inherited: HashMap<&str, PropertyKind> = HashMap::new();
        let mut properties: Vec<PropertyDescriptor> = document.contents.clone();

        for parent_id in &document.extends {
            let parent = &self.resolved[parent_id];
            for descriptor in parent.properties() {
                let name = descriptor.name.as_str();
                if local.contains(name) {
                    continue;
                }
                match inherited.get(name) {
                    Some(kind) if *kind == descriptor.kind => {}
                    Some(_) => {
                        return Err(SchemaError::parse(
                            Some(&document.id),
                            format!("`{name}` is inherited with conflicting kinds"),
                        ))
                    }
                    None => {
                        inherited.insert(name, descriptor.kind);
                        properties.push(descriptor.clone());
                    }
                }
            }
        }

        Ok(SchemaDefinition::new(document.id.clone(), properties))
    }
}

/// Flatten the model in `root_text`, fetching referenced models through
/// `lookup` as they are discovered.
///
/// `lookup` is consulted once per missing id; `None` means the model cannot
/// be found.
pub fn resolve_schema<F>(root_text: &str, mut lookup: F) -> Result<SchemaDefinition, SchemaError>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut resolver = SchemaResolver::new();
    let roots = resolver.add_text(root_text)?;
    let root = match roots.as_slice() {
        [root] => root.clone(),
        _ => {
            return Err(SchemaError::parse(
                None,
                format!("expected exactly one root interface, found {}", roots.len()),
            ))
        }
    };

    let mut pending = resolver.missing_references();
    while let Some((referenced, referenced_by)) = pending.pop() {
        if resolver.contains(&referenced) {
            continue;
        }
        let text = lookup(&referenced)
            .ok_or_else(|| SchemaError::unresolved(&referenced, Some(&referenced_by)))?;
        resolver.add_text(&text)?;
        if !resolver.contains(&referenced) {
            return Err(SchemaError::parse(
                Some(&referenced),
                "document returned for this id does not declare it",
            ));
        }
        pending = resolver.missing_references();
    }

    let definition = resolver.resolve(&root)?;
    Ok(Arc::unwrap_or_clone(definition))
}
