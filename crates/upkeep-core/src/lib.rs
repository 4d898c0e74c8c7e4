//! Update engine for upkeep installations.
//!
//! This crate holds everything between a store file and files on disk:
//! - Local manifest scanning, feed ingestion and the update diff.
//! - Artifact download with delta patches, checksum verification and retry.
//! - Archive installation with action scripts, residual pruning and
//!   crash-safe install records.
//! - The per-resource pipeline and installation-wide update stream.

pub mod actions;
mod cleanup;
mod config;
pub mod delta;
mod download;
mod embedded;
mod fetch;
mod ignore;
mod installation;
pub mod logger;
mod pipeline;
mod state;
mod store;
mod updater;

/// Safe deletion with rename fallback and the leftover sweep.
pub use cleanup::{DeleteOutcome, LEFTOVER_SUFFIX, safe_delete, sweep_leftovers};
/// Process-wide settings and the dependency bundle handed to components.
pub use config::{UpdaterConfig, UpdaterContext};
/// Pluggable binary delta codec and its stock implementation.
pub use delta::{BlockDelta, DeltaCodec, DeltaError};
/// Artifact downloader, its progress events and the SHA-1 helper used for
/// sidecars.
pub use download::{
    DownloadCompletion, DownloadError, DownloadEvent, ResourceDownloader, sha1_file,
};
/// Manifests carried inside binary resources.
pub use embedded::{EMBEDDED_EXTENSIONS, EmbeddedManifestReader, ZipEmbeddedReader};
/// Reading feeds, archives and checksum sidecars over HTTP or from disk.
pub use fetch::{FetchError, fetch_bytes, fetch_checksum, fetch_to_file, probe};
pub use ignore::IgnoreRules;
/// Store files and the installation-wide update stream.
pub use installation::{
    InstallationConfig, InstallationError, ManifestFeed, StoreInstallation, UpdateProgress,
};
pub use logger::{BufferLogger, LogFacade, LogLevel, LogLine, Logger, NoOpLogger};
/// Download-then-install composition for one resource.
pub use pipeline::{PipelineError, PipelineProgress, PipelineStep, UpdatePipeline};
/// Persistent install records marking broken installs.
pub use state::{InstallState, InstallStateStore, InstallStatus, StateError};
/// Manifest collections and the update diff.
pub use store::{Incompatibility, MAX_SCAN_DEPTH, ManifestStore};
/// Archive installation into a target directory.
pub use updater::{ResourceUpdater, UpdateError, UpdateReport, resolve_clear_residual_files};

pub use upkeep_manifest as manifest;
