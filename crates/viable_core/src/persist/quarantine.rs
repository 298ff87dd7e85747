//! Corrupt-file quarantine.
//!
//! # Invariants
//! - Quarantine renames, never deletes; the original bytes stay recoverable.
//! - Failures are logged and swallowed so recovery can always proceed.
//! - An existing quarantine file is never overwritten.

use super::{file_name_of, parent_dir_of};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{error, warn};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

const MAX_NAME_ATTEMPTS: u32 = 100;

/// Moves `path` aside to a timestamped sibling.
///
/// Returns the quarantine path on success, `None` when the file could not
/// be moved (already gone, permissions, ...).
pub fn quarantine(path: &Path) -> Option<PathBuf> {
    let base = quarantine_path_for(path, Utc::now());
    let destination = (0..MAX_NAME_ATTEMPTS)
        .map(|attempt| with_attempt_suffix(&base, attempt))
        .find(|candidate| !candidate.exists());

    let Some(destination) = destination else {
        error!(
            "event=quarantine module=persist status=error path={} error_code=name_exhausted",
            path.display()
        );
        return None;
    };

    match fs::rename(path, &destination) {
        Ok(()) => {
            warn!(
                "event=quarantine module=persist status=ok path={} quarantine={}",
                path.display(),
                destination.display()
            );
            Some(destination)
        }
        Err(err) => {
            error!(
                "event=quarantine module=persist status=error path={} error={}",
                path.display(),
                err
            );
            None
        }
    }
}

/// `<name>.corrupt-<RFC 3339 UTC, ':' and '.' replaced by '-'>` next to `path`.
pub fn quarantine_path_for(path: &Path, at: DateTime<Utc>) -> PathBuf {
    let stamp = at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    parent_dir_of(path).join(format!("{}.corrupt-{stamp}", file_name_of(path)))
}

fn with_attempt_suffix(base: &Path, attempt: u32) -> PathBuf {
    if attempt == 0 {
        return base.to_path_buf();
    }
    let mut name = base.as_os_str().to_os_string();
    name.push(format!("-{attempt}"));
    PathBuf::from(name)
}

/// Quarantine siblings of `path`, oldest first.
pub fn list_quarantined(path: &Path) -> Vec<PathBuf> {
    let pattern = format!(
        r"^{}\.corrupt-\d{{4}}-\d{{2}}-\d{{2}}T\d{{2}}-\d{{2}}-\d{{2}}-\d{{3}}Z(-\d+)?$",
        regex::escape(&file_name_of(path))
    );
    let Ok(matcher) = Regex::new(&pattern) else {
        return Vec::new();
    };
    let Ok(entries) = fs::read_dir(parent_dir_of(path)) else {
        return Vec::new();
    };

    let mut found: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|entry| matcher.is_match(&entry.file_name().to_string_lossy()))
        .map(|entry| entry.path())
        .collect();
    found.sort();
    found
}

#[cfg(test)]
mod tests {
    use super::{list_quarantined, quarantine, quarantine_path_for};
    use chrono::{TimeZone, Utc};
    use std::path::Path;

    #[test]
    fn quarantine_name_replaces_colons_and_dots() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 17, 5, 42).unwrap();
        let path = quarantine_path_for(Path::new("/data/state.json"), at);
        assert_eq!(
            path,
            Path::new("/data/state.json.corrupt-2024-03-09T17-05-42-000Z")
        );
    }

    #[test]
    fn quarantine_moves_bytes_and_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        std::fs::write(&path, b"first").unwrap();
        let first = quarantine(&path).expect("first quarantine");
        std::fs::write(&path, b"second").unwrap();
        let second = quarantine(&path).expect("second quarantine");

        assert_ne!(first, second);
        assert!(!path.exists());
        assert_eq!(std::fs::read(&first).unwrap(), b"first");
        assert_eq!(std::fs::read(&second).unwrap(), b"second");
        assert_eq!(list_quarantined(&path).len(), 2);
    }

    #[test]
    fn quarantine_of_missing_file_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(quarantine(&dir.path().join("absent.json")), None);
    }

    #[test]
    fn listing_ignores_unrelated_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(dir.path().join("state.json.lock"), b"{}").unwrap();
        let name = "other.json.corrupt-2024-03-09T17-05-42-000Z";
        std::fs::write(dir.path().join(name), b"").unwrap();
        let name = "state.json.corrupt-2024-03-09T17-05-42-000Z";
        std::fs::write(dir.path().join(name), b"").unwrap();

        let listed = list_quarantined(&path);
        assert_eq!(listed.len(), 1);
        assert!(listed[0].ends_with("state.json.corrupt-2024-03-09T17-05-42-000Z"));
    }
}
