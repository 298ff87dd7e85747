//! Filesystem primitives for crash-safe, cross-process persistence.
//!
//! # Responsibility
//! - Exclusive-create lock files with forensic markers.
//! - Temp-file-then-rename writes.
//! - Best-effort quarantine of unreadable files.
//!
//! # Invariants
//! - A reader of the target path sees either the old or the new bytes.
//! - Lock acquisition never waits.
//! - Quarantine never fails outwardly.

pub mod atomic;
pub mod lock;
pub mod quarantine;

pub use atomic::atomic_write;
pub use lock::{break_lock, read_marker, LockFile, LockMarker};
pub use quarantine::{list_quarantined, quarantine, quarantine_path_for};

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};

pub type PersistResult<T> = Result<T, PersistError>;

#[derive(Debug)]
pub enum PersistError {
    /// Another writer holds the lock file.
    LockHeld {
        lock_path: PathBuf,
        owner: Option<LockMarker>,
    },
    Io {
        op: &'static str,
        path: PathBuf,
        source: io::Error,
    },
}

impl PersistError {
    pub(crate) fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

impl Display for PersistError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LockHeld { lock_path, owner } => match owner {
                Some(marker) => write!(
                    f,
                    "lock `{}` is held by owner {} (pid {}) since {}",
                    lock_path.display(),
                    marker.owner_id,
                    marker.pid,
                    marker.created_at
                ),
                None => write!(f, "lock `{}` is held", lock_path.display()),
            },
            Self::Io { op, path, source } => {
                write!(f, "{op} failed for `{}`: {source}", path.display())
            }
        }
    }
}

impl Error for PersistError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::LockHeld { .. } => None,
            Self::Io { source, .. } => Some(source),
        }
    }
}

/// File name of `path` as UTF-8, falling back to a fixed stem.
pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string())
}

/// Directory that holds `path`; `.` for bare file names.
pub(crate) fn parent_dir_of(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
