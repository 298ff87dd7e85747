//! Store façade over the document of record.
//!
//! # Responsibility
//! - Compose parse, migrate, validate and persist into `load` and `save`.
//! - Own the seed document handed out when no trustworthy state exists.
//!
//! # Invariants
//! - `load` never fails outwardly; every failure folds into quarantine + seed.
//! - `save` surfaces lock contention and I/O failures; the lock is released
//!   on every exit path.
//! - The primary file is only ever replaced by an atomic rename.
//!
//! # See also
//! - `crate::migrate` for version detection.
//! - `crate::persist` for lock, atomic write and quarantine primitives.

pub mod seed;

pub use seed::seed_document;

use crate::config::{StoreConfig, DEFAULT_STALE_LOCK_AFTER};
use crate::migrate::{current_level, migrate_to_current, MigrateError, Migrated};
use crate::model::document::Document;
use crate::persist::{
    self, atomic_write, list_quarantined, parent_dir_of, quarantine, LockFile, LockMarker,
    PersistError,
};
use crate::schema::descriptor::SCHEMA_VERSION;
use crate::schema::validate_document;
use log::{error, info, warn};
use sha2::{Digest, Sha256};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    /// Bytes are not well-formed JSON.
    Parse(serde_json::Error),
    /// Well-formed JSON that no schema version accepts.
    SchemaMismatch(MigrateError),
    LockContention {
        lock_path: PathBuf,
        owner: Option<LockMarker>,
    },
    Io {
        op: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    /// The primary file changed since the caller's revision was taken.
    StaleRevision { path: PathBuf },
    /// Only current-version documents can be written.
    VersionMismatch { found: u32, expected: u32 },
    Serialize(serde_json::Error),
}

impl StoreError {
    pub fn is_referential(&self) -> bool {
        matches!(self, Self::SchemaMismatch(err) if err.is_referential())
    }

    /// Whether retrying the same call later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockContention { .. })
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Parse(_) => "parse_failure",
            Self::SchemaMismatch(err) if err.is_referential() => "referential_integrity",
            Self::SchemaMismatch(err) if err.is_defect() => "migration_defect",
            Self::SchemaMismatch(_) => "schema_mismatch",
            Self::LockContention { .. } => "lock_contention",
            Self::Io { .. } => "io_failure",
            Self::StaleRevision { .. } => "stale_revision",
            Self::VersionMismatch { .. } => "version_mismatch",
            Self::Serialize(_) => "serialize_failure",
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "state file is not valid JSON: {err}"),
            Self::SchemaMismatch(err) => write!(f, "{err}"),
            Self::LockContention { lock_path, owner } => match owner {
                Some(marker) => write!(
                    f,
                    "another writer holds `{}` (owner {}, pid {}, since {})",
                    lock_path.display(),
                    marker.owner_id,
                    marker.pid,
                    marker.created_at
                ),
                None => write!(f, "another writer holds `{}`", lock_path.display()),
            },
            Self::Io { op, path, source } => {
                write!(f, "{op} failed for `{}`: {source}", path.display())
            }
            Self::StaleRevision { path } => write!(
                f,
                "`{}` changed since it was loaded; reload and retry",
                path.display()
            ),
            Self::VersionMismatch { found, expected } => write!(
                f,
                "refusing to save schemaVersion {found}; only {expected} can be written"
            ),
            Self::Serialize(err) => write!(f, "failed to serialize document: {err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) | Self::Serialize(err) => Some(err),
            Self::SchemaMismatch(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            Self::LockContention { .. }
            | Self::StaleRevision { .. }
            | Self::VersionMismatch { .. } => None,
        }
    }
}

impl From<PersistError> for StoreError {
    fn from(value: PersistError) -> Self {
        match value {
            PersistError::LockHeld { lock_path, owner } => {
                Self::LockContention { lock_path, owner }
            }
            PersistError::Io { op, path, source } => Self::Io { op, path, source },
        }
    }
}

impl From<MigrateError> for StoreError {
    fn from(value: MigrateError) -> Self {
        Self::SchemaMismatch(value)
    }
}

/// Content fingerprint of the primary file as observed at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Revision {
    /// No primary file existed.
    Absent,
    /// Lowercase hex SHA-256 of the file bytes.
    Sha256(String),
}

impl Revision {
    pub fn of(bytes: &[u8]) -> Self {
        Self::Sha256(format!("{:x}", Sha256::digest(bytes)))
    }
}

impl Display for Revision {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Sha256(digest) => write!(f, "sha256:{digest}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryKind {
    Unreadable,
    ParseFailure,
    SchemaMismatch,
    ReferentialIntegrity,
    MigrationDefect,
}

impl RecoveryKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::Unreadable => "unreadable",
            Self::ParseFailure => "parse_failure",
            Self::SchemaMismatch => "schema_mismatch",
            Self::ReferentialIntegrity => "referential_integrity",
            Self::MigrationDefect => "migration_defect",
        }
    }

    fn of(err: &StoreError) -> Self {
        match err {
            StoreError::Parse(_) => Self::ParseFailure,
            StoreError::SchemaMismatch(err) if err.is_referential() => Self::ReferentialIntegrity,
            StoreError::SchemaMismatch(err) if err.is_defect() => Self::MigrationDefect,
            StoreError::SchemaMismatch(_) => Self::SchemaMismatch,
            _ => Self::Unreadable,
        }
    }
}

/// How `load` arrived at the document it returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No primary file; the seed was returned and nothing was written.
    Seeded,
    /// The file already matched the current version.
    Loaded { from_level: usize },
    /// The file was upgraded in memory from an older version.
    Migrated { from_level: usize },
    /// The file was unusable and replaced by the seed.
    Recovered {
        kind: RecoveryKind,
        quarantined_to: Option<PathBuf>,
    },
}

impl LoadOutcome {
    pub fn is_recovered(&self) -> bool {
        matches!(self, Self::Recovered { .. })
    }
}

impl Display for LoadOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Seeded => write!(f, "seeded (no state file)"),
            Self::Loaded { from_level } => write!(f, "loaded at level {from_level}"),
            Self::Migrated { from_level } => {
                write!(f, "migrated from level {from_level} to {}", current_level())
            }
            Self::Recovered {
                kind,
                quarantined_to: Some(path),
            } => write!(
                f,
                "recovered from {}; original moved to `{}`",
                kind.code(),
                path.display()
            ),
            Self::Recovered {
                kind,
                quarantined_to: None,
            } => write!(f, "recovered from {}; quarantine failed", kind.code()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub document: Document,
    pub outcome: LoadOutcome,
    /// Revision of the primary file after the load; pass it to
    /// `Store::save_if_unchanged`.
    pub revision: Revision,
}

/// Read-only diagnosis of the primary file.
#[derive(Debug)]
pub enum Inspection {
    Absent,
    Unparsable(serde_json::Error),
    Invalid(MigrateError),
    Valid {
        from_level: usize,
        entity_count: usize,
        revision: Revision,
    },
}

impl Inspection {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Absent | Self::Valid { .. })
    }
}

/// Paths and lock policy for one document of record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Store {
    path: PathBuf,
    lock_path: PathBuf,
    stale_lock_after: Option<Duration>,
}

impl Store {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            path: config.state_path(),
            lock_path: config.lock_path(),
            stale_lock_after: config.stale_lock_after,
        }
    }

    /// Store for an explicit file path; the lock is `<path>.lock`.
    pub fn open_at(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_path),
            stale_lock_after: Some(DEFAULT_STALE_LOCK_AFTER),
        }
    }

    pub fn with_stale_lock_after(mut self, stale_lock_after: Option<Duration>) -> Self {
        self.stale_lock_after = stale_lock_after;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Returns the current document, falling back to the seed.
    pub fn load(&self) -> Document {
        self.load_with_report().document
    }

    /// Same as [`Store::load`], also reporting how the document was obtained.
    ///
    /// # Side effects
    /// - Moves an unusable primary file to a quarantine sibling.
    /// - Emits a `store_load` event with outcome and duration.
    pub fn load_with_report(&self) -> LoadReport {
        let started_at = Instant::now();

        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(
                    "event=store_load module=store status=ok outcome=seeded path={} duration_ms={}",
                    self.path.display(),
                    started_at.elapsed().as_millis()
                );
                return LoadReport {
                    document: seed_document(),
                    outcome: LoadOutcome::Seeded,
                    revision: Revision::Absent,
                };
            }
            Err(err) => {
                error!(
                    "event=store_load module=store status=error path={} error_code=read_failed \
                     error={}",
                    self.path.display(),
                    err
                );
                return self.recover(RecoveryKind::Unreadable, None, started_at);
            }
        };

        match decode_document(&bytes) {
            Ok(Migrated {
                from_level,
                document,
            }) => {
                let outcome = if from_level == current_level() {
                    LoadOutcome::Loaded { from_level }
                } else {
                    LoadOutcome::Migrated { from_level }
                };
                info!(
                    "event=store_load module=store status=ok outcome={} from_level={} entities={} \
                     duration_ms={}",
                    if from_level == current_level() { "loaded" } else { "migrated" },
                    from_level,
                    document.entity_count(),
                    started_at.elapsed().as_millis()
                );
                LoadReport {
                    document,
                    outcome,
                    revision: Revision::of(&bytes),
                }
            }
            Err(err) => {
                warn!(
                    "event=store_load module=store status=error path={} error_code={} error={}",
                    self.path.display(),
                    err.code(),
                    err
                );
                self.recover(RecoveryKind::of(&err), Some(&bytes), started_at)
            }
        }
    }

    fn recover(
        &self,
        kind: RecoveryKind,
        bytes: Option<&[u8]>,
        started_at: Instant,
    ) -> LoadReport {
        let quarantined_to = quarantine(&self.path);
        // A file that could not be moved aside is still on disk.
        let revision = match (&quarantined_to, bytes) {
            (None, Some(bytes)) => Revision::of(bytes),
            _ => Revision::Absent,
        };
        warn!(
            "event=store_load module=store status=recovered reason={} quarantine={} duration_ms={}",
            kind.code(),
            quarantined_to
                .as_ref()
                .map_or_else(|| "none".to_string(), |path| path.display().to_string()),
            started_at.elapsed().as_millis()
        );
        LoadReport {
            document: seed_document(),
            outcome: LoadOutcome::Recovered {
                kind,
                quarantined_to,
            },
            revision,
        }
    }

    /// Writes `document` as the new document of record.
    ///
    /// Concurrent writers race on the lock; across successive writers the
    /// last successful rename wins.
    ///
    /// # Errors
    /// - `StoreError::VersionMismatch` for a non-current document.
    /// - `StoreError::SchemaMismatch` for a document the next `load` would
    ///   reject, such as one with a dangling hard reference.
    /// - `StoreError::LockContention` when another writer holds the lock.
    /// - `StoreError::Io` when creating the directory or writing fails.
    pub fn save(&self, document: &Document) -> StoreResult<Revision> {
        self.write(document, None)
    }

    /// Like [`Store::save`], but only if the primary file still matches
    /// `expected`.
    ///
    /// # Errors
    /// Everything [`Store::save`] returns, plus `StoreError::StaleRevision`
    /// when the file on disk changed since `expected` was observed.
    pub fn save_if_unchanged(
        &self,
        document: &Document,
        expected: &Revision,
    ) -> StoreResult<Revision> {
        self.write(document, Some(expected))
    }

    fn write(&self, document: &Document, expected: Option<&Revision>) -> StoreResult<Revision> {
        let started_at = Instant::now();
        let result = self.write_locked(document, expected);
        match &result {
            Ok(_) => info!(
                "event=store_save module=store status=ok checked={} entities={} duration_ms={}",
                expected.is_some(),
                document.entity_count(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=store_save module=store status=error checked={} duration_ms={} \
                 error_code={} error={}",
                expected.is_some(),
                started_at.elapsed().as_millis(),
                err.code(),
                err
            ),
        }
        result
    }

    fn write_locked(
        &self,
        document: &Document,
        expected: Option<&Revision>,
    ) -> StoreResult<Revision> {
        if document.schema_version != SCHEMA_VERSION {
            return Err(StoreError::VersionMismatch {
                found: document.schema_version,
                expected: SCHEMA_VERSION,
            });
        }
        validate_document(document)
            .map_err(|err| StoreError::SchemaMismatch(MigrateError::NoMatchingSchema(err)))?;
        let bytes = serde_json::to_vec_pretty(document).map_err(StoreError::Serialize)?;

        for dir in [parent_dir_of(&self.path), parent_dir_of(&self.lock_path)] {
            fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
                op: "create_dir",
                path: dir.clone(),
                source,
            })?;
        }

        let lock = LockFile::acquire(&self.lock_path, self.stale_lock_after)?;
        if let Some(expected) = expected {
            let observed = self.current_revision()?;
            if observed != *expected {
                return Err(StoreError::StaleRevision {
                    path: self.path.clone(),
                });
            }
        }
        atomic_write(&self.path, &bytes)?;
        lock.release();

        Ok(Revision::of(&bytes))
    }

    fn current_revision(&self) -> StoreResult<Revision> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Revision::of(&bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Revision::Absent),
            Err(source) => Err(StoreError::Io {
                op: "read",
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Diagnoses the primary file without quarantining or writing anything.
    ///
    /// # Errors
    /// Returns `StoreError::Io` when the file exists but cannot be read.
    pub fn inspect(&self) -> StoreResult<Inspection> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Inspection::Absent),
            Err(source) => {
                return Err(StoreError::Io {
                    op: "read",
                    path: self.path.clone(),
                    source,
                })
            }
        };

        Ok(match decode_document(&bytes) {
            Ok(migrated) => Inspection::Valid {
                from_level: migrated.from_level,
                entity_count: migrated.document.entity_count(),
                revision: Revision::of(&bytes),
            },
            Err(StoreError::Parse(err)) => Inspection::Unparsable(err),
            Err(StoreError::SchemaMismatch(err)) => Inspection::Invalid(err),
            Err(other) => return Err(other),
        })
    }

    /// Quarantine files left next to the primary file, oldest first.
    pub fn quarantined(&self) -> Vec<PathBuf> {
        list_quarantined(&self.path)
    }

    /// Removes the lock file regardless of owner.
    ///
    /// Returns `false` when no lock was present.
    pub fn break_lock(&self) -> StoreResult<bool> {
        Ok(persist::break_lock(&self.lock_path)?)
    }
}

/// Parses raw bytes and brings them to the current version.
fn decode_document(bytes: &[u8]) -> StoreResult<Migrated> {
    let payload: serde_json::Value = serde_json::from_slice(bytes).map_err(StoreError::Parse)?;
    Ok(migrate_to_current(payload)?)
}

#[cfg(test)]
mod tests {
    use super::{LoadOutcome, RecoveryKind, Revision, Store, StoreError};
    use crate::schema::descriptor::SCHEMA_VERSION;
use crate::schema::validate_document;
    use crate::store::seed_document;

    #[test]
    fn revision_is_lowercase_hex_sha256() {
        let Revision::Sha256(digest) = Revision::of(b"abc") else {
            panic!("expected digest");
        };
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn open_at_derives_lock_path() {
        let store = Store::open_at("/data/state.json");
        assert_eq!(store.lock_path(), std::path::Path::new("/data/state.json.lock"));
    }

    #[test]
    fn save_rejects_non_current_documents() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_at(dir.path().join("state.json"));
        let mut document = seed_document();
        document.schema_version = SCHEMA_VERSION - 1;

        let err = store.save(&document).unwrap_err();
        assert!(matches!(err, StoreError::VersionMismatch { .. }));
        assert!(!store.path().exists());
        assert!(!store.lock_path().exists());
    }

    #[test]
    fn unreadable_directory_entry_is_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::create_dir(&path).unwrap();

        let report = Store::open_at(&path).load_with_report();
        assert_eq!(report.document, seed_document());
        match report.outcome {
            LoadOutcome::Recovered { kind, quarantined_to } => {
                assert_eq!(kind, RecoveryKind::Unreadable);
                assert!(quarantined_to.is_some());
            }
            other => panic!("unexpected outcome: {other}"),
        }
        assert!(!path.exists());
    }
}
