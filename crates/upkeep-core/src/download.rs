use std::io::Read;
use std::path::{Component, Path, PathBuf};

use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::sync::mpsc;
use upkeep_manifest::{Descriptor, Manifest, Version};
use upkeep_platform::ResourceLocation;

use crate::config::UpdaterContext;
use crate::delta::DeltaError;
use crate::fetch::{self, FetchError};

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadCompletion {
    Success,
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    Progress(f32),
    Completed(DownloadCompletion),
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("manifest {id} has no asset uri")]
    InvalidManifest { id: String },
    #[error("source manifest {source_id} does not describe {target_id}")]
    MismatchedResource { source_id: String, target_id: String },
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("download of {id} failed after {attempts} attempt(s): {reason}")]
    DownloadFailed {
        id: String,
        attempts: usize,
        reason: String,
    },
}

/// Why a single attempt failed; every variant is retried.
#[derive(Debug, Error)]
enum AttemptError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("failed to apply delta patch: {0}")]
    Delta(#[from] DeltaError),
    #[error("{context} {path}: {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("downloaded archive is corrupt: {0}")]
    Corrupt(#[from] zip::result::ZipError),
    #[error("checksum mismatch, expected {expected}, found {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("verification task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl AttemptError {
    fn io(context: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.to_path_buf(),
            source,
        }
    }
}

struct DeltaPlan {
    location: ResourceLocation,
    base: PathBuf,
    patch: PathBuf,
}

/// Fetches the archive for `target`, preferring a delta patch from `source`
/// when one is published and the base archive is still cached.
pub struct ResourceDownloader<M: Descriptor = Manifest> {
    source: Option<M>,
    target: M,
    asset: ResourceLocation,
    ctx: UpdaterContext,
}

impl<M: Descriptor> ResourceDownloader<M> {
    /// # Errors
    /// Returns [`DownloadError::InvalidManifest`] when `target` has no asset
    /// URI and [`DownloadError::MismatchedResource`] when `source` describes
    /// a different resource.
    pub fn new(source: Option<M>, target: M, ctx: UpdaterContext) -> Result<Self, DownloadError> {
        let uri = target
            .assets()
            .map(|assets| assets.uri.trim())
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| DownloadError::InvalidManifest {
                id: target.id().to_string(),
            })?;
        let asset = ResourceLocation::parse(uri);

        if let Some(source) = &source
            && source.id() != target.id()
        {
            return Err(DownloadError::MismatchedResource {
                source_id: source.id().to_string(),
                target_id: target.id().to_string(),
            });
        }

        Ok(Self {
            source,
            target,
            asset,
            ctx,
        })
    }

    /// Cache path of the target archive.
    #[must_use]
    pub fn archive_path(&self) -> PathBuf {
        self.ctx.config.download_dir.join(cache_file_name(&format!(
            "{}.{}.zip",
            self.target.id(),
            self.target.version()
        )))
    }

    fn patch_path(&self, from: &Version) -> PathBuf {
        self.ctx.config.download_dir.join(cache_file_name(&format!(
            "{}.{}.zip.{from}.delta",
            self.target.id(),
            self.target.version()
        )))
    }

    /// Download, verify and return the path of the archive.
    ///
    /// # Errors
    /// Returns [`DownloadError::DownloadFailed`] once every attempt failed.
    pub async fn download(
        &self,
        progress: mpsc::UnboundedSender<DownloadEvent>,
    ) -> Result<PathBuf, DownloadError> {
        let logger = &*self.ctx.logger;
        let download_dir = &self.ctx.config.download_dir;
        if let Err(source) = tokio::fs::create_dir_all(download_dir).await {
            let _ = progress.send(DownloadEvent::Completed(DownloadCompletion::Failed(
                source.to_string(),
            )));
            return Err(DownloadError::Io {
                context: "failed to create download directory",
                source,
            });
        }

        let archive = self.archive_path();
        let attempts = self.ctx.config.download_attempts();
        let mut last_error = String::new();

        for attempt in 0..attempts {
            let delay = self.ctx.config.retry_delay(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match self.attempt(&archive, &progress).await {
                Ok(()) => {
                    crate::log_info!(
                        logger,
                        "Downloaded {} {} to {}",
                        self.target.id(),
                        self.target.version(),
                        archive.display()
                    );
                    let _ = progress.send(DownloadEvent::Completed(DownloadCompletion::Success));
                    return Ok(archive);
                }
                Err(error) => {
                    crate::log_warn!(
                        logger,
                        "Download attempt {}/{attempts} for {} failed: {error}",
                        attempt + 1,
                        self.target.id()
                    );
                    remove_quietly(&archive);
                    last_error = error.to_string();
                }
            }
        }

        let _ = progress.send(DownloadEvent::Completed(DownloadCompletion::Failed(
            last_error.clone(),
        )));
        Err(DownloadError::DownloadFailed {
            id: self.target.id().to_string(),
            attempts,
            reason: last_error,
        })
    }

    async fn attempt(
        &self,
        archive: &Path,
        progress: &mpsc::UnboundedSender<DownloadEvent>,
    ) -> Result<(), AttemptError> {
        let report = |fraction: f32| {
            let _ = progress.send(DownloadEvent::Progress(fraction));
        };

        match self.delta_plan().await {
            Some(plan) => {
                crate::log_info!(
                    self.ctx.logger,
                    "Using delta patch {} for {}",
                    plan.location,
                    self.target.id()
                );
                if let Err(error) =
                    fetch::fetch_to_file(&self.ctx.client, &plan.location, &plan.patch, report).await
                {
                    remove_quietly(&plan.patch);
                    return Err(error.into());
                }
                self.apply_delta(&plan, archive).await?;
            }
            None => {
                fetch::fetch_to_file(&self.ctx.client, &self.asset, archive, report).await?;
            }
        }

        self.verify(archive).await
    }

    async fn delta_plan(&self) -> Option<DeltaPlan> {
        let logger = &*self.ctx.logger;
        let source = self.source.as_ref()?;
        let patch = self.target.assets()?.delta_patch_for(source.version())?;

        let Some(base) = self.cached_base(&patch.source_file_name) else {
            crate::log_warn!(
                logger,
                "Delta base name {:?} of {} is not a plain file name, downloading in full",
                patch.source_file_name,
                self.target.id()
            );
            return None;
        };
        if !base.is_file() {
            crate::log_debug!(
                logger,
                "Delta base {} is missing, downloading {} in full",
                base.display(),
                self.target.id()
            );
            return None;
        }

        let location = ResourceLocation::parse(&patch.delta_uri);
        if !fetch::probe(&self.ctx.client, &location).await {
            crate::log_debug!(
                logger,
                "Delta patch {location} is unavailable, downloading {} in full",
                self.target.id()
            );
            return None;
        }

        Some(DeltaPlan {
            location,
            base,
            patch: self.patch_path(source.version()),
        })
    }

    /// The base archive lives directly in the download cache; anything but
    /// a bare file name is refused since the base is renamed and deleted.
    fn cached_base(&self, file_name: &str) -> Option<PathBuf> {
        let normalized = file_name.replace('\\', "/");
        let mut components = Path::new(&normalized).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => Some(self.ctx.config.download_dir.join(name)),
            _ => None,
        }
    }

    /// The base is moved aside first so a failed apply leaves no stale base
    /// behind; the next attempt then falls back to a full download.
    async fn apply_delta(&self, plan: &DeltaPlan, archive: &Path) -> Result<(), AttemptError> {
        let old = append_extension(&plan.base, "old");
        tokio::fs::rename(&plan.base, &old)
            .await
            .map_err(|error| AttemptError::io("failed to move delta base aside", &plan.base, error))?;

        let codec = self.ctx.delta.clone();
        let (old_path, patch_path, archive_path) =
            (old.clone(), plan.patch.clone(), archive.to_path_buf());
        let applied = tokio::task::spawn_blocking(move || -> Result<(), AttemptError> {
            let base = std::fs::read(&old_path)
                .map_err(|error| AttemptError::io("failed to read delta base", &old_path, error))?;
            let patch = std::fs::read(&patch_path)
                .map_err(|error| AttemptError::io("failed to read delta patch", &patch_path, error))?;
            let output = codec.apply(&base, &patch)?;
            std::fs::write(&archive_path, output).map_err(|error| {
                AttemptError::io("failed to write patched archive", &archive_path, error)
            })
        })
        .await
        .map_err(AttemptError::from)
        .and_then(|result| result);

        remove_quietly(&plan.patch);
        remove_quietly(&old);
        applied
    }

    async fn verify(&self, archive: &Path) -> Result<(), AttemptError> {
        let path = archive.to_path_buf();
        let actual = tokio::task::spawn_blocking(move || -> Result<String, AttemptError> {
            let file = std::fs::File::open(&path)
                .map_err(|error| AttemptError::io("failed to open archive", &path, error))?;
            zip::ZipArchive::new(file)?;
            sha1_file(&path).map_err(|error| AttemptError::io("failed to hash archive", &path, error))
        })
        .await??;

        let logger = &*self.ctx.logger;
        let sidecar = self.asset.with_suffix(".sha1");
        match fetch::fetch_checksum(&self.ctx.client, &sidecar).await {
            Ok(Some(expected)) if expected.eq_ignore_ascii_case(&actual) => {
                crate::log_debug!(logger, "Checksum verified for {}", self.target.id());
                Ok(())
            }
            Ok(Some(expected)) => Err(AttemptError::ChecksumMismatch { expected, actual }),
            Ok(None) => {
                crate::log_debug!(logger, "No checksum published at {sidecar}");
                Ok(())
            }
            Err(error) => {
                crate::log_warn!(logger, "Could not fetch checksum {sidecar}, skipping verification: {error}");
                Ok(())
            }
        }
    }
}

/// Lowercase hex SHA-1 of a file.
///
/// # Errors
/// Returns an error when the file cannot be read.
pub fn sha1_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buffer = [0_u8; 8192];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

fn cache_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn append_extension(path: &Path, extension: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(".");
    raw.push(extension);
    PathBuf::from(raw)
}

fn remove_quietly(path: &Path) {
    let _ = std::fs::remove_file(path);
}
