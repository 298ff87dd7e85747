//! Persistent state store for the viable self-regulation tool.
//! This crate owns the on-disk document of record and every schema version it
//! has ever had.

pub mod config;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod persist;
pub mod schema;
pub mod store;

pub use config::{ConfigError, LoggingConfig, StoreConfig};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use migrate::{detect_level, migrate_to_current, MigrateError, Migrated};
pub use model::document::Document;
pub use schema::{validate, validate_document, SchemaDescriptor, ValidationError, SCHEMA_VERSION};
pub use store::{
    seed_document, Inspection, LoadOutcome, LoadReport, RecoveryKind, Revision, Store, StoreError,
    StoreResult,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
