use std::ffi::OsString;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::logger::Logger;

/// Suffix for files that could not be deleted because they were locked.
pub const LEFTOVER_SUFFIX: &str = ".updater_leftover";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Absent,
    Deleted,
    /// Deletion failed; the file was renamed aside for a later sweep.
    RenamedAside(PathBuf),
}

#[must_use]
pub fn leftover_path(path: &Path) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(LEFTOVER_SUFFIX);
    PathBuf::from(raw)
}

/// Delete `path`, falling back to renaming it to `<path>.updater_leftover`
/// when the file is in use.
///
/// # Errors
/// Returns the rename error when neither deletion nor renaming succeeds.
pub fn safe_delete(path: &Path, logger: &dyn Logger) -> std::io::Result<DeleteOutcome> {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => return Ok(DeleteOutcome::Absent),
        Ok(_) => {}
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Ok(DeleteOutcome::Absent);
        }
        Err(error) => return Err(error),
    }

    match std::fs::remove_file(path) {
        Ok(()) => Ok(DeleteOutcome::Deleted),
        Err(error) => {
            crate::log_warn!(
                logger,
                "Failed to delete {}, renaming it for later removal: {error}",
                path.display()
            );
            let aside = leftover_path(path);
            match std::fs::rename(path, &aside) {
                Ok(()) => Ok(DeleteOutcome::RenamedAside(aside)),
                Err(rename_error) => {
                    crate::log_error!(
                        logger,
                        "Failed to delete and rename {}: {rename_error}",
                        path.display()
                    );
                    Err(rename_error)
                }
            }
        }
    }
}

/// Remove every `*.updater_leftover` file below `root`. Returns how many
/// were deleted; files still locked are left for the next sweep.
pub fn sweep_leftovers(root: &Path, logger: &dyn Logger) -> usize {
    if !root.is_dir() {
        return 0;
    }

    let mut removed = 0;
    for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file()
            || !entry.file_name().to_string_lossy().ends_with(LEFTOVER_SUFFIX)
        {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                crate::log_debug!(logger, "Deleted leftover file {}", entry.path().display());
                removed += 1;
            }
            Err(error) => {
                crate::log_warn!(
                    logger,
                    "Leftover file {} is still in use: {error}",
                    entry.path().display()
                );
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::{DeleteOutcome, LEFTOVER_SUFFIX, leftover_path, safe_delete, sweep_leftovers};
    use crate::logger::NoOpLogger;

    #[test]
    fn safe_delete_removes_files_and_tolerates_missing_ones() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let file = temp_dir.path().join("old.dll");
        std::fs::write(&file, "x").expect("file should be written");

        assert_eq!(safe_delete(&file, &NoOpLogger).expect("delete"), DeleteOutcome::Deleted);
        assert!(!file.exists());
        assert_eq!(safe_delete(&file, &NoOpLogger).expect("delete"), DeleteOutcome::Absent);
    }

    #[test]
    fn safe_delete_leaves_directories_alone() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let dir = temp_dir.path().join("plugins");
        std::fs::create_dir(&dir).expect("dir should be created");

        assert_eq!(safe_delete(&dir, &NoOpLogger).expect("delete"), DeleteOutcome::Absent);
        assert!(dir.is_dir());
    }

    #[test]
    fn sweep_removes_nested_leftovers_only() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let nested = temp_dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("dirs should be created");
        let leftover = leftover_path(&nested.join("Forge.dll"));
        std::fs::write(&leftover, "x").expect("leftover should be written");
        std::fs::write(temp_dir.path().join("keep.dll"), "x").expect("file should be written");

        assert!(leftover.to_string_lossy().ends_with(LEFTOVER_SUFFIX));
        assert_eq!(sweep_leftovers(temp_dir.path(), &NoOpLogger), 1);
        assert!(!leftover.exists());
        assert!(temp_dir.path().join("keep.dll").exists());
    }

    #[test]
    fn sweep_of_missing_root_is_a_noop() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        assert_eq!(sweep_leftovers(&temp_dir.path().join("missing"), &NoOpLogger), 0);
    }
}
