use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("Invalid version format, found {input:?}, expected Major.Minor.Patch with optional *")]
    InvalidFormat { input: String },

    #[error("Cannot compare {left} against wildcard version {right}")]
    UnsupportedComparison { left: String, right: String },
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest{}: {source}", describe_origin(.origin.as_deref()))]
    Parse {
        origin: Option<PathBuf>,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize manifest {id}: {source}")]
    Serialize {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write manifest {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ManifestError {
    pub(crate) fn read(path: &Path, source: std::io::Error) -> Self {
        Self::Read {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn parse(origin: Option<&Path>, source: serde_json::Error) -> Self {
        Self::Parse {
            origin: origin.map(Path::to_path_buf),
            source,
        }
    }

    pub(crate) fn write(path: &Path, source: std::io::Error) -> Self {
        Self::Write {
            path: path.to_path_buf(),
            source,
        }
    }
}

fn describe_origin(origin: Option<&Path>) -> String {
    origin.map_or_else(String::new, |path| format!(" {}", path.display()))
}
