//! Persistent per-resource install records.
//!
//! A record is written before an install touches the target directory and
//! removed once every entry has been written. A record that survives, or
//! one marked failed, flags the resource as broken so the next sync
//! reinstalls it even when the versions already match.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use upkeep_manifest::Version;

use crate::logger::Logger;

const RECORD_SUFFIX: &str = ".install.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStatus {
    InProgress,
    Failed,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallState {
    pub id: String,
    pub version: Version,
    pub status: InstallStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub failed_entries: usize,
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("{context} {path}: {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{context} {path}: {source}")]
    Json {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StateError {
    fn io(context: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.to_path_buf(),
            source,
        }
    }

    fn json(context: &'static str, path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            context,
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstallStateStore {
    dir: PathBuf,
}

impl InstallStateStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ids are encoded into the file name one byte at a time. ASCII
    /// alphanumerics, `-` and `.` pass through; every other byte, `_`
    /// included, becomes `_XX`, so distinct ids never share a record.
    #[must_use]
    pub fn record_path(&self, id: &str) -> PathBuf {
        let mut safe = String::with_capacity(id.len());
        for byte in id.bytes() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.') {
                safe.push(char::from(byte));
            } else {
                let _ = write!(safe, "_{byte:02X}");
            }
        }
        self.dir.join(format!("{safe}{RECORD_SUFFIX}"))
    }

    /// # Errors
    /// Returns an error when an existing record cannot be read or parsed.
    pub fn read(&self, id: &str) -> Result<Option<InstallState>, StateError> {
        let path = self.record_path(id);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(StateError::io("failed to read install state", &path, error)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|error| StateError::json("failed to parse install state", &path, error))
    }

    /// Whether the last install of `id` did not finish. Unreadable records
    /// count as broken.
    #[must_use]
    pub fn is_broken(&self, id: &str) -> bool {
        match self.read(id) {
            Ok(Some(state)) => state.status != InstallStatus::Complete,
            Ok(None) => false,
            Err(_) => true,
        }
    }

    /// Record that an install of `id@version` is starting.
    ///
    /// # Errors
    /// Returns an error when the record cannot be written.
    pub fn begin(
        &self,
        id: &str,
        version: &Version,
        logger: &dyn Logger,
    ) -> Result<InstallState, StateError> {
        match self.read(id) {
            Ok(Some(previous)) if previous.status != InstallStatus::Complete => {
                crate::log_warn!(
                    logger,
                    "Previous install of {id} {} did not complete ({:?}), reapplying all files",
                    previous.version,
                    previous.status
                );
            }
            Ok(_) => {}
            Err(error) => {
                crate::log_warn!(logger, "Ignoring unreadable install state: {error}");
            }
        }

        let state = InstallState {
            id: id.to_string(),
            version: *version,
            status: InstallStatus::InProgress,
            started_at: Utc::now(),
            failed_entries: 0,
        };
        self.write(&state)?;
        Ok(state)
    }

    /// Keep the record, marking it failed so the next sync retries.
    ///
    /// # Errors
    /// Returns an error when the record cannot be written.
    pub fn fail(&self, state: &InstallState, failed_entries: usize) -> Result<(), StateError> {
        let failed = InstallState {
            status: InstallStatus::Failed,
            failed_entries,
            ..state.clone()
        };
        self.write(&failed)
    }

    /// # Errors
    /// Returns an error when the record exists but cannot be removed.
    pub fn finish(&self, id: &str) -> Result<(), StateError> {
        let path = self.record_path(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(StateError::io("failed to remove install state", &path, error)),
        }
    }

    fn write(&self, state: &InstallState) -> Result<(), StateError> {
        let path = self.record_path(&state.id);
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|error| StateError::json("failed to serialize install state", &path, error))?;
        upkeep_platform::write_atomic(&path, &bytes)
            .map_err(|error| StateError::io("failed to write install state", &path, error))
    }
}
