use std::path::PathBuf;
use thiserror::Error;

const APP_DIR_NAME: &str = "upkeep";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AppPathsError {
    #[error("Could not determine config directory")]
    ConfigDirUnavailable,
    #[error("Could not determine state directory")]
    StateDirUnavailable,
}

/// Per-user locations of the upkeep driver itself. Installations keep their
/// download cache and install records next to the working directory instead.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Holds `settings.json`.
    pub config_dir: PathBuf,
    /// Holds the log file and the single-instance lock.
    pub state_dir: PathBuf,
}

impl AppPaths {
    /// Resolve the platform directories. The state directory falls back to
    /// the local data directory where the platform has no state directory
    /// (macOS and Windows).
    ///
    /// # Errors
    /// Returns an error when the platform reports no config or data
    /// directory for the current user.
    pub fn new() -> Result<Self, AppPathsError> {
        let config_dir = dirs::config_dir().ok_or(AppPathsError::ConfigDirUnavailable)?;
        let state_dir = dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .ok_or(AppPathsError::StateDirUnavailable)?;
        Ok(Self {
            config_dir: config_dir.join(APP_DIR_NAME),
            state_dir: state_dir.join(APP_DIR_NAME),
        })
    }

    #[must_use]
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config_dir: root.join("config"),
            state_dir: root.join("state"),
        }
    }

    #[must_use]
    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("settings.json")
    }

    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.state_dir.join("upkeep.log")
    }

    #[must_use]
    pub fn instance_lock_file(&self) -> PathBuf {
        self.state_dir.join("instance.lock")
    }

    /// # Errors
    /// Returns an error if either directory cannot be created.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(&self.state_dir)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::AppPaths;

    #[test]
    fn driver_files_live_in_config_and_state_dirs() {
        let paths = AppPaths::rooted_at("/tmp/upkeep-root");

        assert!(paths.settings_file().ends_with(Path::new("config").join("settings.json")));
        assert!(paths.log_file().ends_with(Path::new("state").join("upkeep.log")));
        assert_eq!(
            paths.instance_lock_file().parent(),
            Some(paths.state_dir.as_path())
        );
    }

    #[test]
    fn ensure_dirs_creates_both_directories() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let paths = AppPaths::rooted_at(temp_dir.path().join("home"));

        paths
            .ensure_dirs()
            .expect("ensure_dirs should create application directories");

        assert!(paths.config_dir.is_dir());
        assert!(paths.state_dir.is_dir());
    }
}
