//! Twinsync data model
//!
//! Everything the reconciliation engine reasons about, independent of any
//! entity store:
//!
//! - `schema`: model documents (DTDL-style interfaces) and the flattened
//!   [`SchemaDefinition`] built from them
//! - `resolver`: inheritance flattening over a catalog of model documents
//! - `record`: the untyped [`UpdateRecord`] carried by inbound messages
//! - `patch`: the add/replace [`PatchOperation`]s sent back to the store

pub mod patch;
pub mod record;
pub mod resolver;
pub mod schema;

pub use patch::{pointer_for, property_from_pointer, PatchOp, PatchOperation, PatchSummary};
pub use record::{scalar_text, RecordError, UpdateRecord};
pub use resolver::{resolve_schema, SchemaResolver};
pub use schema::{
    parse_models, ModelDocument, ParsedModels, PropertyDescriptor, PropertyKind,
    SchemaDefinition, SchemaError, SchemaId,
};
