use std::fmt;
use std::path::PathBuf;

use futures_util::Stream;
use thiserror::Error;
use tokio::sync::mpsc;
use upkeep_manifest::{Descriptor, Manifest};
use upkeep_platform::ResourceLocation;

use crate::config::UpdaterContext;
use crate::download::{DownloadError, DownloadEvent, ResourceDownloader};
use crate::updater::{ResourceUpdater, UpdateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Download,
    Unpack,
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Download => f.write_str("Download"),
            Self::Unpack => f.write_str("Unpack"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineProgress {
    pub step: PipelineStep,
    pub fraction: f32,
}

impl PipelineProgress {
    #[must_use]
    pub fn download(fraction: f32) -> Self {
        Self {
            step: PipelineStep::Download,
            fraction,
        }
    }

    #[must_use]
    pub fn unpack(fraction: f32) -> Self {
        Self {
            step: PipelineStep::Unpack,
            fraction,
        }
    }
}

impl fmt::Display for PipelineProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:.2}%", self.step, f64::from(self.fraction) * 100.0)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("manifest {id} has no asset uri")]
    MissingAsset { id: String },
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Update(#[from] UpdateError),
    #[error("{context}: {source}")]
    Task {
        context: &'static str,
        #[source]
        source: tokio::task::JoinError,
    },
}

type PipelineItem = Result<PipelineProgress, PipelineError>;

/// Download (for remote assets) followed by install, as one progress
/// stream.
pub struct UpdatePipeline<M: Descriptor = Manifest> {
    source: Option<M>,
    target: M,
    target_dir: PathBuf,
    clear_residual_files: Option<bool>,
    ctx: UpdaterContext,
}

impl<M: Descriptor> UpdatePipeline<M> {
    #[must_use]
    pub fn new(
        source: Option<M>,
        target: M,
        target_dir: impl Into<PathBuf>,
        ctx: UpdaterContext,
    ) -> Self {
        Self {
            source,
            target,
            target_dir: target_dir.into(),
            clear_residual_files: None,
            ctx,
        }
    }

    /// Override the residual-pruning decision otherwise taken from the
    /// manifest and process default.
    #[must_use]
    pub fn with_clear_residual_files(mut self, clear: bool) -> Self {
        self.clear_residual_files = Some(clear);
        self
    }

    /// Start the pipeline on the current tokio runtime. Progress arrives in
    /// order; an error is the last item.
    pub fn run(self) -> impl Stream<Item = PipelineItem> + Send + 'static {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(self.drive(tx));
        futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
    }

    async fn drive(self, tx: mpsc::UnboundedSender<PipelineItem>) {
        let logger = self.ctx.logger.clone();
        let id = self.target.id().to_string();
        if let Err(error) = self.execute(&tx).await {
            crate::log_error!(logger, "Update of {id} failed: {error}");
            let _ = tx.send(Err(error));
        }
    }

    async fn execute(self, tx: &mpsc::UnboundedSender<PipelineItem>) -> Result<(), PipelineError> {
        let uri = self
            .target
            .assets()
            .map(|assets| assets.uri.trim().to_string())
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| PipelineError::MissingAsset {
                id: self.target.id().to_string(),
            })?;

        let archive = match ResourceLocation::parse(&uri) {
            ResourceLocation::Remote(_) => {
                let downloader =
                    ResourceDownloader::new(self.source, self.target.clone(), self.ctx.clone())?;
                let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
                let download =
                    tokio::spawn(async move { downloader.download(progress_tx).await });

                while let Some(event) = progress_rx.recv().await {
                    if let DownloadEvent::Progress(fraction) = event {
                        let _ = tx.send(Ok(PipelineProgress::download(fraction)));
                    }
                }

                download.await.map_err(|source| PipelineError::Task {
                    context: "download task failed",
                    source,
                })??
            }
            ResourceLocation::Local(path) => self.ctx.config.resolve(&path),
        };

        let mut updater = ResourceUpdater::new(self.target, archive, self.target_dir, self.ctx);
        if let Some(clear) = self.clear_residual_files {
            updater = updater.with_clear_residual_files(clear);
        }

        let unpack_tx = tx.clone();
        tokio::task::spawn_blocking(move || {
            updater.run(|fraction| {
                let _ = unpack_tx.send(Ok(PipelineProgress::unpack(fraction)));
            })
        })
        .await
        .map_err(|source| PipelineError::Task {
            context: "install task failed",
            source,
        })??;

        Ok(())
    }
}
