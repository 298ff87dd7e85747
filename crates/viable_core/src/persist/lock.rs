//! Exclusive-create lock file.
//!
//! # Invariants
//! - Acquisition is `O_CREAT | O_EXCL`: it succeeds or fails immediately.
//! - A held `LockFile` deletes its file on drop, on every exit path.
//! - A held `LockFile` deletes the file only while it still carries its own
//!   marker.
//! - A lock older than the caller's stale threshold is broken at most once
//!   per acquisition. Breaking renames the file aside first, so only the
//!   exact file judged stale is ever deleted.

use super::{PersistError, PersistResult};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Forensic payload written into the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockMarker {
    pub owner_id: String,
    pub pid: u32,
    pub created_at: String,
}

impl LockMarker {
    fn for_current_process() -> Self {
        Self {
            owner_id: Uuid::new_v4().to_string(),
            pid: std::process::id(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Age of the marker, or `None` when its timestamp is unreadable or in
    /// the future.
    pub fn age(&self) -> Option<Duration> {
        let created = DateTime::parse_from_rfc3339(&self.created_at).ok()?;
        (Utc::now() - created.with_timezone(&Utc)).to_std().ok()
    }
}

/// Held lock; released when dropped.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    marker: LockMarker,
}

impl LockFile {
    /// Creates `path` exclusively.
    ///
    /// `stale_after` enables breaking a lock whose marker is older than the
    /// given age; `None` never breaks locks.
    ///
    /// # Errors
    /// - `PersistError::LockHeld` when another owner holds a fresh lock.
    /// - `PersistError::Io` for any other filesystem failure.
    pub fn acquire(path: &Path, stale_after: Option<Duration>) -> PersistResult<Self> {
        let marker = LockMarker::for_current_process();
        match create_exclusive(path, &marker) {
            Ok(()) => return Ok(Self::held(path, marker)),
            Err(err) if err.kind() != io::ErrorKind::AlreadyExists => {
                return Err(PersistError::io("lock_create", path, err));
            }
            Err(_) => {}
        }

        let observed = read_marker(path);
        if let Some(threshold) = stale_after {
            if is_stale(path, observed.as_ref(), threshold)
                && break_if_unchanged(path, &observed, threshold)
            {
                warn!(
                    "event=lock_break module=persist status=ok path={} stale_owner={} \
                     threshold_secs={}",
                    path.display(),
                    observed
                        .as_ref()
                        .map_or("unknown", |marker| marker.owner_id.as_str()),
                    threshold.as_secs()
                );
                match create_exclusive(path, &marker) {
                    Ok(()) => return Ok(Self::held(path, marker)),
                    Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                        return Err(PersistError::LockHeld {
                            lock_path: path.to_path_buf(),
                            owner: read_marker(path),
                        });
                    }
                    Err(err) => return Err(PersistError::io("lock_create", path, err)),
                }
            }
        }

        Err(PersistError::LockHeld {
            lock_path: path.to_path_buf(),
            owner: observed,
        })
    }

    fn held(path: &Path, marker: LockMarker) -> Self {
        debug!(
            "event=lock_acquire module=persist status=ok path={} owner={}",
            path.display(),
            marker.owner_id
        );
        Self {
            path: path.to_path_buf(),
            marker,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn marker(&self) -> &LockMarker {
        &self.marker
    }

    /// Releases the lock now instead of at end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if read_marker(&self.path).as_ref() != Some(&self.marker) {
            warn!(
                "event=lock_release module=persist status=error path={} \
                 error_code=lock_taken_over",
                self.path.display()
            );
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(
                "event=lock_release module=persist status=ok path={}",
                self.path.display()
            ),
            Err(err) => warn!(
                "event=lock_release module=persist status=error path={} error={}",
                self.path.display(),
                err
            ),
        }
    }
}

/// Reads the marker of an existing lock file, if it is parseable.
pub fn read_marker(path: &Path) -> Option<LockMarker> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Removes a lock file regardless of its owner.
///
/// Returns `Ok(false)` when there was no lock to remove.
pub fn break_lock(path: &Path) -> PersistResult<bool> {
    let owner = read_marker(path);
    match fs::remove_file(path) {
        Ok(()) => {
            info!(
                "event=lock_break module=persist status=ok path={} owner={} mode=manual",
                path.display(),
                owner
                    .as_ref()
                    .map_or("unknown", |marker| marker.owner_id.as_str())
            );
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(PersistError::io("lock_break", path, err)),
    }
}

fn create_exclusive(path: &Path, marker: &LockMarker) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let written = serde_json::to_vec(marker)
        .map_err(io::Error::from)
        .and_then(|bytes| file.write_all(&bytes))
        .and_then(|()| file.sync_all());
    if let Err(err) = written {
        drop(file);
        let _ = fs::remove_file(path);
        return Err(err);
    }
    Ok(())
}

fn is_stale(path: &Path, marker: Option<&LockMarker>, threshold: Duration) -> bool {
    let age = match marker {
        Some(marker) => marker.age(),
        // Unreadable marker: fall back to the file's own mtime.
        None => fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok()),
    };
    age.is_some_and(|age| age >= threshold)
}

/// Moves the lock at `path` aside and deletes it if it still carries
/// `observed` and is still stale. A lock that changed in the meantime is
/// linked back into place.
///
/// Returns whether `path` is now free for a fresh `create_exclusive`.
fn break_if_unchanged(path: &Path, observed: &Option<LockMarker>, threshold: Duration) -> bool {
    let aside = aside_path_for(path);
    match fs::rename(path, &aside) {
        Ok(()) => {}
        // Someone else already removed it; the retry decides who wins.
        Err(err) if err.kind() == io::ErrorKind::NotFound => return true,
        Err(err) => {
            warn!(
                "event=lock_break module=persist status=error path={} error={}",
                path.display(),
                err
            );
            return false;
        }
    }

    if read_marker(&aside) == *observed && is_stale(&aside, observed.as_ref(), threshold) {
        if let Err(err) = fs::remove_file(&aside) {
            warn!(
                "event=lock_break module=persist status=error path={} error={}",
                aside.display(),
                err
            );
        }
        return true;
    }

    // A fresh lock replaced the stale one; put it back without clobbering.
    let restored = match fs::hard_link(&aside, path) {
        Ok(()) => fs::remove_file(&aside),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            warn!(
                "event=lock_restore module=persist status=error path={} error_code=lock_replaced",
                path.display()
            );
            fs::remove_file(&aside)
        }
        // No hard links on this filesystem.
        Err(_) => fs::rename(&aside, path),
    };
    if let Err(err) = restored {
        warn!(
            "event=lock_restore module=persist status=error path={} error={}",
            path.display(),
            err
        );
    }
    false
}

/// `<lock>.stale-<token>` next to the lock file.
fn aside_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".stale-{}", Uuid::new_v4().simple()));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::{break_if_unchanged, break_lock, read_marker, LockFile, LockMarker};
    use crate::persist::PersistError;
    use std::time::Duration;

    #[test]
    fn second_acquire_fails_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json.lock");

        let held = LockFile::acquire(&path, None).unwrap();
        let marker = read_marker(&path).expect("marker should be written");
        assert_eq!(&marker, held.marker());
        assert_eq!(marker.pid, std::process::id());

        let err = LockFile::acquire(&path, None).unwrap_err();
        match err {
            PersistError::LockHeld { owner, .. } => assert_eq!(owner, Some(marker)),
            other => panic!("unexpected error: {other}"),
        }

        held.release();
        assert!(!path.exists());
        LockFile::acquire(&path, None).unwrap();
    }

    #[test]
    fn fresh_lock_is_not_broken() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json.lock");
        let _held = LockFile::acquire(&path, None).unwrap();

        let err = LockFile::acquire(&path, Some(Duration::from_secs(600))).unwrap_err();
        assert!(matches!(err, PersistError::LockHeld { .. }));
    }

    #[test]
    fn stale_marker_is_broken_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json.lock");
        let stale = LockMarker {
            owner_id: "crashed-owner".to_string(),
            pid: 1,
            created_at: "2001-01-01T00:00:00.000Z".to_string(),
        };
        std::fs::write(&path, serde_json::to_vec(&stale).unwrap()).unwrap();
        assert!(stale.age().unwrap() > Duration::from_secs(60));

        let held = LockFile::acquire(&path, Some(Duration::from_secs(60))).unwrap();
        assert_ne!(held.marker().owner_id, "crashed-owner");
    }

    #[test]
    fn break_lock_reports_absence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json.lock");
        assert!(!break_lock(&path).unwrap());

        let held = LockFile::acquire(&path, None).unwrap();
        assert!(break_lock(&path).unwrap());
        drop(held);
        assert!(!path.exists());
    }

    const THRESHOLD: Duration = Duration::from_secs(60);

    fn marker(owner_id: &str) -> LockMarker {
        LockMarker {
            owner_id: owner_id.to_string(),
            pid: 7,
            created_at: "2001-01-01T00:00:00.000Z".to_string(),
        }
    }

    fn stale_leftovers(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().contains(".stale-"))
            .count()
    }

    #[test]
    fn break_deletes_only_the_observed_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json.lock");
        let observed = marker("crashed-owner");
        std::fs::write(&path, serde_json::to_vec(&observed).unwrap()).unwrap();

        assert!(break_if_unchanged(&path, &Some(observed), THRESHOLD));
        assert!(!path.exists());
        assert_eq!(stale_leftovers(dir.path()), 0);
    }

    #[test]
    fn break_restores_a_lock_that_changed_since_it_was_observed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json.lock");
        let replacement = marker("new-owner");
        std::fs::write(&path, serde_json::to_vec(&replacement).unwrap()).unwrap();

        assert!(!break_if_unchanged(&path, &Some(marker("crashed-owner")), THRESHOLD));
        assert_eq!(read_marker(&path), Some(replacement));
        assert_eq!(stale_leftovers(dir.path()), 0);
    }

    #[test]
    fn break_of_a_vanished_lock_lets_the_retry_decide() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json.lock");
        assert!(break_if_unchanged(&path, &Some(marker("crashed-owner")), THRESHOLD));
        assert!(!path.exists());
    }

    #[test]
    fn drop_keeps_a_lock_file_whose_marker_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json.lock");
        let held = LockFile::acquire(&path, None).unwrap();

        // Another writer broke our lock and is between create and marker write.
        std::fs::write(&path, b"").unwrap();
        drop(held);

        assert!(path.exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"");
    }

    #[test]
    fn drop_keeps_a_lock_file_taken_over_by_another_owner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json.lock");
        let held = LockFile::acquire(&path, None).unwrap();

        let other = marker("other-owner");
        std::fs::write(&path, serde_json::to_vec(&other).unwrap()).unwrap();
        drop(held);

        assert_eq!(read_marker(&path), Some(other));
    }

    #[test]
    fn break_restores_a_fresh_lock_with_an_unreadable_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json.lock");
        // A new writer created the file but has not written its marker yet.
        std::fs::write(&path, b"").unwrap();

        assert!(!break_if_unchanged(&path, &None, THRESHOLD));
        assert!(path.exists());
        assert_eq!(stale_leftovers(dir.path()), 0);
    }
}
