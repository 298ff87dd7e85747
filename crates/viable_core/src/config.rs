//! Store and logging configuration.
//!
//! # Responsibility
//! - Resolve the state directory, state file name and lock policy.
//! - Resolve logging level and directory.
//!
//! # Invariants
//! - Resolution never reads or writes the filesystem.
//! - `file_name` is a single path component.

use crate::logging::{default_log_level, normalize_level};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_HOME: &str = "VIABLE_HOME";
pub const ENV_MODE: &str = "VIABLE_ENV";
pub const ENV_STATE_FILE: &str = "VIABLE_STATE_FILE";
pub const ENV_STALE_LOCK_SECS: &str = "VIABLE_STALE_LOCK_SECS";
pub const ENV_LOG_LEVEL: &str = "VIABLE_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "VIABLE_LOG_DIR";

pub const STATE_FILE_NAME: &str = "state.json";
pub const DEV_STATE_FILE_NAME: &str = "state.dev.json";
pub const DEFAULT_STALE_LOCK_AFTER: Duration = Duration::from_secs(10 * 60);

const DEFAULT_HOME_DIR_NAME: &str = ".viable";
const LOG_DIR_NAME: &str = "logs";
const LOCK_SUFFIX: &str = ".lock";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidFileName(String),
    InvalidStaleLockSecs(String),
    InvalidLogLevel(String),
    EmptyPath(&'static str),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidFileName(value) => {
                write!(f, "state file name must be a single file name, got `{value}`")
            }
            Self::InvalidStaleLockSecs(value) => write!(
                f,
                "{ENV_STALE_LOCK_SECS} must be a whole number of seconds, got `{value}`"
            ),
            Self::InvalidLogLevel(value) => write!(
                f,
                "unsupported log level `{value}`; expected trace|debug|info|warn|error"
            ),
            Self::EmptyPath(name) => write!(f, "{name} must not be empty"),
        }
    }
}

impl Error for ConfigError {}

/// Where the document of record lives and how its lock behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub base_dir: PathBuf,
    pub file_name: String,
    /// Locks older than this are broken on acquisition; `None` never breaks.
    pub stale_lock_after: Option<Duration>,
}

impl StoreConfig {
    /// Creates a config with the default stale-lock policy.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidFileName` when `file_name` is not a
    /// single path component.
    pub fn new(
        base_dir: impl Into<PathBuf>,
        file_name: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let file_name = validate_file_name(file_name.into())?;
        Ok(Self {
            base_dir: base_dir.into(),
            file_name,
            stale_lock_after: Some(DEFAULT_STALE_LOCK_AFTER),
        })
    }

    /// Splits a full state path into directory and file name.
    pub fn for_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| ConfigError::InvalidFileName(path.display().to_string()))?;
        let base_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self::new(base_dir, file_name)
    }

    pub fn with_stale_lock_after(mut self, stale_lock_after: Option<Duration>) -> Self {
        self.stale_lock_after = stale_lock_after;
        self
    }

    /// Resolves configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves configuration from an arbitrary variable lookup.
    ///
    /// Only `VIABLE_*` keys go through `lookup`:
    /// - `VIABLE_HOME`: base directory (default [`default_base_dir`]).
    /// - `VIABLE_ENV`: `development`/`dev` selects the development file.
    /// - `VIABLE_STATE_FILE`: explicit file name, wins over `VIABLE_ENV`.
    /// - `VIABLE_STALE_LOCK_SECS`: stale-lock threshold, `0` disables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_dir = non_blank(lookup(ENV_HOME))
            .map(PathBuf::from)
            .unwrap_or_else(default_base_dir);

        let file_name = match non_blank(lookup(ENV_STATE_FILE)) {
            Some(name) => name,
            None if is_development(lookup(ENV_MODE).as_deref()) => {
                DEV_STATE_FILE_NAME.to_string()
            }
            None => STATE_FILE_NAME.to_string(),
        };

        let stale_lock_after = match non_blank(lookup(ENV_STALE_LOCK_SECS)) {
            None => Some(DEFAULT_STALE_LOCK_AFTER),
            Some(raw) => match raw.parse::<u64>() {
                Ok(0) => None,
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => return Err(ConfigError::InvalidStaleLockSecs(raw)),
            },
        };

        Ok(Self::new(base_dir, file_name)?.with_stale_lock_after(stale_lock_after))
    }

    /// Full path of the document of record.
    pub fn state_path(&self) -> PathBuf {
        self.base_dir.join(&self.file_name)
    }

    /// Lock file guarding writes to `state_path()`.
    pub fn lock_path(&self) -> PathBuf {
        self.base_dir.join(format!("{}{LOCK_SUFFIX}", self.file_name))
    }
}

/// Logging level and file directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: &'static str,
    pub log_dir: PathBuf,
}

impl LoggingConfig {
    pub fn new(level: &str, log_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let level = normalize_level(level)
            .ok_or_else(|| ConfigError::InvalidLogLevel(level.to_string()))?;
        let log_dir = log_dir.into();
        if log_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath("log_dir"));
        }
        Ok(Self { level, log_dir })
    }

    pub fn from_env(store: &StoreConfig) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok(), store)
    }

    /// `VIABLE_LOG_LEVEL` (default per build mode) and `VIABLE_LOG_DIR`
    /// (default `<base_dir>/logs`).
    pub fn from_lookup<F>(lookup: F, store: &StoreConfig) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let level = non_blank(lookup(ENV_LOG_LEVEL))
            .unwrap_or_else(|| default_log_level().to_string());
        let log_dir = non_blank(lookup(ENV_LOG_DIR))
            .map(PathBuf::from)
            .unwrap_or_else(|| store.base_dir.join(LOG_DIR_NAME));
        Self::new(&level, log_dir)
    }
}

/// `.viable` under the platform home directory (`dirs::home_dir`), or under
/// the working directory when the platform reports no home.
pub fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_HOME_DIR_NAME)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn is_development(mode: Option<&str>) -> bool {
    matches!(
        mode.map(|raw| raw.trim().to_ascii_lowercase()).as_deref(),
        Some("development" | "dev")
    )
}

fn validate_file_name(file_name: String) -> Result<String, ConfigError> {
    let trimmed = file_name.trim();
    let single_component = !trimmed.is_empty()
        && trimmed != "."
        && trimmed != ".."
        && !trimmed.contains(['/', '\\']);
    if single_component {
        Ok(trimmed.to_string())
    } else {
        Err(ConfigError::InvalidFileName(file_name))
    }
}
