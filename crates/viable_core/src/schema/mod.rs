//! Schema descriptors and the single validator that interprets them.
//!
//! # Responsibility
//! - Register every historical document shape as data.
//! - Decide membership of raw payloads in those shapes.
//!
//! # Invariants
//! - Adding a schema version means adding one descriptor and one migration
//!   step; the validator itself never branches on version numbers.

pub mod descriptor;
pub mod validate;

pub use descriptor::{
    current, descriptor_for, descriptors, NodeAddressing, SchemaDescriptor, SCHEMA_VERSION,
};
pub use validate::{is_valid, validate, ValidationError};

use crate::model::document::Document;

/// Validates a typed document against the current descriptor.
///
/// Typed values can still break referential invariants (dangling ids,
/// `part_of` cycles), so writers may check before handing a document to
/// the store.
pub fn validate_document(document: &Document) -> Result<(), ValidationError> {
    match serde_json::to_value(document) {
        Ok(payload) => validate(&payload, current()),
        Err(_) => Err(ValidationError::NotAnObject),
    }
}
