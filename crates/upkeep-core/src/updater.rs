use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use thiserror::Error;
use upkeep_manifest::{Descriptor, MANIFEST_FILE_NAME, Manifest};
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::actions::{self, ACTION_SCRIPT_NAME};
use crate::cleanup::{DeleteOutcome, LEFTOVER_SUFFIX, safe_delete};
use crate::config::UpdaterContext;
use crate::ignore::IgnoreRules;
use crate::state::{InstallStateStore, StateError};

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Zip {
        context: &'static str,
        #[source]
        source: zip::result::ZipError,
    },
    #[error(transparent)]
    State(#[from] StateError),
    #[error("{failed} of {total} entries of {id} could not be installed")]
    PartialInstall {
        id: String,
        failed: usize,
        total: usize,
    },
}

impl UpdateError {
    fn io_with_path(context: &'static str, path: &Path, source: &std::io::Error) -> Self {
        Self::Io {
            context,
            source: std::io::Error::new(source.kind(), format!("{}: {source}", path.display())),
        }
    }

    fn zip(context: &'static str, source: zip::result::ZipError) -> Self {
        Self::Zip { context, source }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub extracted: usize,
    pub kept: usize,
    pub residuals_removed: usize,
    pub actions_run: usize,
}

/// Whether residual files get pruned: the manifest decides, then the
/// installation's `keep_residual_files`, then the process default.
#[must_use]
pub fn resolve_clear_residual_files(
    manifest: Option<bool>,
    keep_residual_files: Option<bool>,
    default: bool,
) -> bool {
    manifest
        .or_else(|| keep_residual_files.map(|keep| !keep))
        .unwrap_or(default)
}

enum EntryOutcome {
    Extracted,
    Kept,
    Skipped,
}

/// Installs one archive into a target directory.
pub struct ResourceUpdater<M: Descriptor = Manifest> {
    manifest: M,
    archive: PathBuf,
    target_dir: PathBuf,
    clear_residual_files: bool,
    ctx: UpdaterContext,
}

impl<M: Descriptor> ResourceUpdater<M> {
    #[must_use]
    pub fn new(
        manifest: M,
        archive: impl Into<PathBuf>,
        target_dir: impl Into<PathBuf>,
        ctx: UpdaterContext,
    ) -> Self {
        let clear_residual_files = resolve_clear_residual_files(
            manifest.clear_residual_files(),
            None,
            ctx.config.default_clear_residual_files,
        );
        Self {
            manifest,
            archive: archive.into(),
            target_dir: target_dir.into(),
            clear_residual_files,
            ctx,
        }
    }

    #[must_use]
    pub fn with_clear_residual_files(mut self, clear: bool) -> Self {
        self.clear_residual_files = clear;
        self
    }

    /// Run the install. `on_progress` sees `0.0` before extraction and
    /// `1.0` after a fully successful run.
    ///
    /// # Errors
    /// Returns [`UpdateError::PartialInstall`] when any entry failed; the
    /// install record is then left marked failed.
    pub fn run(&self, mut on_progress: impl FnMut(f32)) -> Result<UpdateReport, UpdateError> {
        let logger = &*self.ctx.logger;
        let id = self.manifest.id();
        let states = InstallStateStore::new(&self.ctx.config.state_dir);
        let state = states.begin(id, self.manifest.version(), logger)?;

        std::fs::create_dir_all(&self.target_dir).map_err(|error| {
            UpdateError::io_with_path("failed to create target directory", &self.target_dir, &error)
        })?;

        let file = File::open(&self.archive).map_err(|error| {
            UpdateError::io_with_path("failed to open archive", &self.archive, &error)
        })?;
        let mut archive = ZipArchive::new(file)
            .map_err(|error| UpdateError::zip("failed to read archive", error))?;

        let mut report = UpdateReport {
            actions_run: self.run_action_script(&mut archive),
            ..UpdateReport::default()
        };

        let ignore = IgnoreRules::new(self.manifest.ignored_entries());
        if self.clear_residual_files {
            report.residuals_removed = self.clear_residuals(&ignore);
        }

        on_progress(0.0);

        let total = archive.len();
        drop(archive);
        let failed = AtomicUsize::new(0);
        let extracted = AtomicUsize::new(0);
        let kept = AtomicUsize::new(0);

        (0..total).into_par_iter().for_each_init(
            || {
                File::open(&self.archive)
                    .map_err(zip::result::ZipError::from)
                    .and_then(ZipArchive::new)
            },
            |archive, index| {
                let outcome = match archive {
                    Ok(archive) => self.extract_entry(archive, index, &ignore),
                    Err(error) => Err(std::io::Error::other(error.to_string())),
                };
                match outcome {
                    Ok(EntryOutcome::Extracted) => {
                        extracted.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(EntryOutcome::Kept) => {
                        kept.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(EntryOutcome::Skipped) => {}
                    Err(error) => {
                        crate::log_error!(logger, "Failed to extract entry {index} of {id}: {error}");
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            },
        );

        let failed = failed.load(Ordering::Relaxed);
        if failed > 0 {
            states.fail(&state, failed)?;
            return Err(UpdateError::PartialInstall {
                id: id.to_string(),
                failed,
                total,
            });
        }

        states.finish(id)?;
        report.extracted = extracted.load(Ordering::Relaxed);
        report.kept = kept.load(Ordering::Relaxed);
        crate::log_info!(
            logger,
            "Installed {id} {} into {} ({} extracted, {} kept)",
            self.manifest.version(),
            self.target_dir.display(),
            report.extracted,
            report.kept
        );
        on_progress(1.0);
        Ok(report)
    }

    fn run_action_script(&self, archive: &mut ZipArchive<File>) -> usize {
        let logger = &*self.ctx.logger;
        let script = match archive.by_name(ACTION_SCRIPT_NAME) {
            Ok(mut entry) => {
                let mut script = String::new();
                if let Err(error) = entry.read_to_string(&mut script) {
                    crate::log_warn!(logger, "Failed to read {ACTION_SCRIPT_NAME}: {error}");
                    return 0;
                }
                script
            }
            Err(zip::result::ZipError::FileNotFound) => return 0,
            Err(error) => {
                crate::log_warn!(logger, "Failed to open {ACTION_SCRIPT_NAME}: {error}");
                return 0;
            }
        };

        crate::log_info!(logger, "Running {ACTION_SCRIPT_NAME} for {}", self.manifest.id());
        actions::run_script(&script, &self.target_dir, logger)
    }

    fn clear_residuals(&self, ignore: &IgnoreRules) -> usize {
        let logger = &*self.ctx.logger;
        let download_dir = &self.ctx.config.download_dir;
        let state_dir = &self.ctx.config.state_dir;

        let mut removed = 0;
        let walker = WalkDir::new(&self.target_dir)
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| {
                !entry.path().starts_with(download_dir) && !entry.path().starts_with(state_dir)
            });
        for entry in walker.filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.target_dir) else {
                continue;
            };
            let relative_text = relative.to_string_lossy();
            if relative_text.ends_with(LEFTOVER_SUFFIX) || ignore.is_ignored(&relative_text) {
                continue;
            }
            match safe_delete(entry.path(), logger) {
                Ok(DeleteOutcome::Deleted | DeleteOutcome::RenamedAside(_)) => {
                    crate::log_debug!(logger, "Removed residual file {}", relative.display());
                    removed += 1;
                }
                Ok(DeleteOutcome::Absent) | Err(_) => {}
            }
        }
        removed
    }

    fn extract_entry(
        &self,
        archive: &mut ZipArchive<File>,
        index: usize,
        ignore: &IgnoreRules,
    ) -> std::io::Result<EntryOutcome> {
        let logger = &*self.ctx.logger;
        let mut entry = archive.by_index(index).map_err(std::io::Error::other)?;
        let Some(relative) = entry.enclosed_name() else {
            crate::log_warn!(logger, "Skipping archive entry with unsafe path {:?}", entry.name());
            return Ok(EntryOutcome::Skipped);
        };
        let relative_text = relative.to_string_lossy().replace('\\', "/");
        if relative_text.eq_ignore_ascii_case(MANIFEST_FILE_NAME)
            || relative_text.eq_ignore_ascii_case(ACTION_SCRIPT_NAME)
        {
            return Ok(EntryOutcome::Skipped);
        }

        let out_path = self.target_dir.join(&relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            return Ok(EntryOutcome::Skipped);
        }

        if out_path.exists() && ignore.is_ignored(&relative_text) {
            crate::log_debug!(logger, "Keeping ignored file {relative_text}");
            return Ok(EntryOutcome::Kept);
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        safe_delete(&out_path, logger)?;

        let mut out_file = File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out_file)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                let _ = std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode));
            }
        }

        Ok(EntryOutcome::Extracted)
    }
}

#[cfg(test)]
mod tests {
    use super::resolve_clear_residual_files;

    #[test]
    fn manifest_setting_wins_over_installation_and_default() {
        assert!(!resolve_clear_residual_files(Some(false), Some(false), true));
        assert!(resolve_clear_residual_files(Some(true), Some(true), false));
    }

    #[test]
    fn keep_residual_files_inverts_into_clear() {
        assert!(!resolve_clear_residual_files(None, Some(true), true));
        assert!(resolve_clear_residual_files(None, Some(false), false));
    }

    #[test]
    fn default_applies_when_nothing_is_set() {
        assert!(resolve_clear_residual_files(None, None, true));
        assert!(!resolve_clear_residual_files(None, None, false));
    }
}
