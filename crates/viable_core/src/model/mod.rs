//! Typed domain model for the current schema version.
//!
//! # Responsibility
//! - Define the canonical in-memory `Document` handed out by the store.
//! - Keep wire naming (camelCase fields, fixed enum strings) in one place.
//!
//! # Invariants
//! - The store only hands out documents that passed the current schema
//!   validator, or the seed.
//! - The store never mutates a `Document` in place.

pub mod document;
