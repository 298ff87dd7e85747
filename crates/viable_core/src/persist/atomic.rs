//! Temp-file-then-rename writes.

use super::{file_name_of, parent_dir_of, PersistError, PersistResult};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Replaces `target` with `bytes` so that readers never observe a partial file.
///
/// The temporary file is created next to `target` (same filesystem, so the
/// rename is atomic) as `.<name>.<random>.tmp`.
///
/// # Errors
/// Returns `PersistError::Io` naming the step that failed. The temporary
/// file is removed on failure; `target` is left untouched.
pub fn atomic_write(target: &Path, bytes: &[u8]) -> PersistResult<()> {
    let dir = parent_dir_of(target);
    let mut temp = temp_file_in(&dir, target)
        .map_err(|err| PersistError::io("temp_create", &dir, err))?;
    temp.write_all(bytes)
        .map_err(|err| PersistError::io("temp_write", temp.path(), err))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| PersistError::io("temp_sync", temp.path(), err))?;
    temp.persist(target)
        .map_err(|err| PersistError::io("rename", target, err.error))?;

    sync_parent_dir(&dir);
    Ok(())
}

fn temp_file_in(dir: &Path, target: &Path) -> std::io::Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(&format!(".{}.", file_name_of(target)))
        .suffix(".tmp")
        .tempfile_in(dir)
}

#[cfg(unix)]
fn sync_parent_dir(dir: &Path) {
    if let Ok(dir) = fs::File::open(dir) {
        let _ = dir.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::{atomic_write, temp_file_in};

    #[test]
    fn replaces_existing_content_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("state.json");
        std::fs::write(&target, b"old").unwrap();

        atomic_write(&target, b"new").unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"new");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn temp_files_are_hidden_siblings_of_the_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("state.json");

        let first = temp_file_in(dir.path(), &target).unwrap();
        let second = temp_file_in(dir.path(), &target).unwrap();
        assert_ne!(first.path(), second.path());
        assert_eq!(first.path().parent(), Some(dir.path()));

        let name = first.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".state.json."), "unexpected name: {name}");
        assert!(name.ends_with(".tmp"), "unexpected name: {name}");
    }

    #[test]
    fn failed_write_leaves_target_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("missing-dir").join("state.json");

        let err = atomic_write(&target, b"new").unwrap_err();
        assert!(err.to_string().contains("temp_create"), "unexpected error: {err}");
        assert!(!target.exists());
    }

    #[test]
    fn failed_rename_removes_the_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory cannot be replaced by a file.
        let target = dir.path().join("state.json");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("inner"), b"x").unwrap();

        let err = atomic_write(&target, b"new").unwrap_err();
        assert!(err.to_string().contains("rename"), "unexpected error: {err}");
        assert!(target.is_dir());
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
