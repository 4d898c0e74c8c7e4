use std::path::{Path, PathBuf};

use thiserror::Error;
use upkeep_core::DeltaError;
use upkeep_manifest::{ManifestError, VersionError};
use upkeep_platform::AppPathsError;

use crate::single_instance::AcquireError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to resolve application paths: {0}")]
    Paths(#[from] AppPathsError),
    #[error(transparent)]
    Instance(#[from] AcquireError),
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("invalid version: {0}")]
    Version(#[from] VersionError),
    #[error("failed to compute delta: {0}")]
    Delta(#[from] DeltaError),
    #[error("{context} {path}: {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no store files given")]
    NoStores,
}

impl AppError {
    pub fn io(context: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.to_path_buf(),
            source,
        }
    }
}
