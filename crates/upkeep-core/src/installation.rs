use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};

use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use upkeep_manifest::{Descriptor, MANIFEST_FILE_NAME, Manifest, PersistOutcome};

use crate::cleanup::sweep_leftovers;
use crate::config::UpdaterContext;
use crate::pipeline::{PipelineError, PipelineProgress, UpdatePipeline};
use crate::state::InstallStateStore;
use crate::store::{Incompatibility, ManifestStore};
use crate::updater::resolve_clear_residual_files;

const fn default_install_into_folders() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFeed {
    pub manifest_uri: String,
}

/// One installation as written in a store file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationConfig {
    pub name: String,
    pub installation_path: PathBuf,
    #[serde(default)]
    pub manifest_feeds: Vec<ManifestFeed>,
    #[serde(default = "default_install_into_folders")]
    pub install_into_folders: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_residual_files: Option<bool>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoreDocument {
    Many(Vec<InstallationConfig>),
    One(Box<InstallationConfig>),
}

#[derive(Debug, Error)]
pub enum InstallationError {
    #[error("failed to read store file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse store file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("store file {path} defines no installation")]
    Empty { path: PathBuf },
    #[error("failed to create installation path {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("installation {name} has not read its store state yet")]
    NotInitialized { name: String },
    #[error("{context}: {source}")]
    Task {
        context: &'static str,
        #[source]
        source: tokio::task::JoinError,
    },
}

/// What `update_all` reports for a resource.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateProgress {
    Step(PipelineProgress),
    Done,
    Failed(String),
}

impl UpdateProgress {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }
}

impl fmt::Display for UpdateProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step(progress) => progress.fmt(f),
            Self::Done => f.write_str("Done"),
            Self::Failed(reason) => write!(f, "Failed: {reason}"),
        }
    }
}

struct StoreState<M: Descriptor> {
    local: ManifestStore<M>,
    remote: ManifestStore<M>,
}

/// A configured installation bound to its local and feed manifests.
pub struct StoreInstallation<M: Descriptor = Manifest> {
    config: InstallationConfig,
    store_file: PathBuf,
    ctx: UpdaterContext,
    state: Option<StoreState<M>>,
}

impl<M: Descriptor> StoreInstallation<M> {
    /// Load the first installation of a store file.
    ///
    /// # Errors
    /// Returns an error when the file is unreadable or malformed, holds no
    /// installation, or the installation path cannot be created.
    pub fn load(path: &Path, ctx: UpdaterContext) -> Result<Self, InstallationError> {
        Self::load_all(path, ctx)?
            .into_iter()
            .next()
            .ok_or_else(|| InstallationError::Empty {
                path: path.to_path_buf(),
            })
    }

    /// Load every installation of a store file holding one object or an
    /// array of them.
    ///
    /// # Errors
    /// Same as [`Self::load`]; one bad installation fails the whole file.
    pub fn load_all(path: &Path, ctx: UpdaterContext) -> Result<Vec<Self>, InstallationError> {
        let bytes = std::fs::read(path).map_err(|source| InstallationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let document: StoreDocument =
            serde_json::from_slice(&bytes).map_err(|source| InstallationError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let configs = match document {
            StoreDocument::Many(configs) => configs,
            StoreDocument::One(config) => vec![*config],
        };
        if configs.is_empty() {
            return Err(InstallationError::Empty {
                path: path.to_path_buf(),
            });
        }

        configs
            .into_iter()
            .map(|config| Self::from_config(config, path, ctx.clone()))
            .collect()
    }

    /// Bind an already parsed configuration. Relative feed paths resolve
    /// against `store_file`'s directory.
    ///
    /// # Errors
    /// Returns an error when the installation path cannot be created.
    pub fn from_config(
        mut config: InstallationConfig,
        store_file: &Path,
        ctx: UpdaterContext,
    ) -> Result<Self, InstallationError> {
        let logger = &*ctx.logger;
        config.installation_path = ctx.config.resolve(&config.installation_path);
        if !config.installation_path.is_dir() {
            crate::log_warn!(
                logger,
                "Installation path {} does not exist, creating it",
                config.installation_path.display()
            );
            std::fs::create_dir_all(&config.installation_path).map_err(|source| {
                InstallationError::CreateDir {
                    path: config.installation_path.clone(),
                    source,
                }
            })?;
        }

        let store_dir = store_file
            .parent()
            .map_or_else(|| ctx.config.working_dir.clone(), |dir| ctx.config.resolve(dir));
        if config.manifest_feeds.is_empty() {
            crate::log_warn!(logger, "No manifest feeds configured for {}", config.name);
        }
        for feed in &mut config.manifest_feeds {
            feed.manifest_uri = upkeep_platform::resolve_against(&store_dir, &feed.manifest_uri);
        }

        Ok(Self {
            config,
            store_file: store_file.to_path_buf(),
            ctx,
            state: None,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[must_use]
    pub fn installation_path(&self) -> &Path {
        &self.config.installation_path
    }

    #[must_use]
    pub fn config(&self) -> &InstallationConfig {
        &self.config
    }

    #[must_use]
    pub fn store_file(&self) -> &Path {
        &self.store_file
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// Sweep leftovers, then scan the installation and ingest the feeds
    /// concurrently.
    ///
    /// # Errors
    /// Returns an error when the blocking scan task panics.
    pub async fn read_store_state(&mut self) -> Result<(), InstallationError> {
        let logger = self.ctx.logger.clone();
        let root = self.config.installation_path.clone();
        let feeds: Vec<String> = self
            .config
            .manifest_feeds
            .iter()
            .map(|feed| feed.manifest_uri.clone())
            .collect();

        crate::log_info!(logger, "Reading local manifests from {}", root.display());
        crate::log_info!(logger, "Ingesting {} feed(s) for {}", feeds.len(), self.config.name);

        let mut local = ManifestStore::from_context(&self.ctx);
        let scan_logger = logger.clone();
        let scan = tokio::task::spawn_blocking(move || {
            let swept = sweep_leftovers(&root, &*scan_logger);
            if swept > 0 {
                crate::log_info!(scan_logger, "Removed {swept} leftover file(s)");
            }
            local.scan_local(&[root], true, true);
            local
        });

        let mut remote = ManifestStore::from_context(&self.ctx);
        let ingest = remote.ingest_feeds(&self.ctx.client, &feeds);

        let (scanned, ()) = tokio::join!(scan, ingest);
        let local = scanned.map_err(|source| InstallationError::Task {
            context: "local manifest scan failed",
            source,
        })?;

        crate::log_debug!(
            logger,
            "{}: {} local and {} remote manifest(s)",
            self.config.name,
            local.len(),
            remote.len()
        );
        self.state = Some(StoreState { local, remote });
        Ok(())
    }

    fn state(&self) -> Result<&StoreState<M>, InstallationError> {
        self.state
            .as_ref()
            .ok_or_else(|| InstallationError::NotInitialized {
                name: self.config.name.clone(),
            })
    }

    /// # Errors
    /// Returns [`InstallationError::NotInitialized`] before
    /// [`Self::read_store_state`].
    pub fn local_manifests(&self) -> Result<&[M], InstallationError> {
        Ok(self.state()?.local.manifests())
    }

    /// # Errors
    /// Returns [`InstallationError::NotInitialized`] before
    /// [`Self::read_store_state`].
    pub fn remote_manifests(&self) -> Result<&[M], InstallationError> {
        Ok(self.state()?.remote.manifests())
    }

    /// # Errors
    /// Returns [`InstallationError::NotInitialized`] before
    /// [`Self::read_store_state`].
    pub fn local_count(&self) -> Result<usize, InstallationError> {
        Ok(self.state()?.local.len())
    }

    /// # Errors
    /// Returns [`InstallationError::NotInitialized`] before
    /// [`Self::read_store_state`].
    pub fn remote_count(&self) -> Result<usize, InstallationError> {
        Ok(self.state()?.remote.len())
    }

    /// # Errors
    /// Returns [`InstallationError::NotInitialized`] before
    /// [`Self::read_store_state`].
    pub fn manifests_to_update(&self) -> Result<Vec<(Option<M>, M)>, InstallationError> {
        let state = self.state()?;
        let states = InstallStateStore::new(&self.ctx.config.state_dir);
        Ok(state
            .local
            .check_for_updates_with(state.remote.manifests(), &states))
    }

    /// # Errors
    /// Returns [`InstallationError::NotInitialized`] before
    /// [`Self::read_store_state`].
    pub fn check_for_incompatibilities(&self) -> Result<Vec<Incompatibility<M>>, InstallationError> {
        Ok(self.state()?.local.check_for_incompatibilities())
    }

    /// `false` until the store state has been read.
    #[must_use]
    pub fn update_available(&self) -> bool {
        self.state.as_ref().is_some_and(|state| !state.remote.is_empty())
            && self
                .manifests_to_update()
                .is_ok_and(|updates| !updates.is_empty())
    }

    /// Install every pending update, one resource at a time. Each resource
    /// reports its pipeline steps and ends with `Done` or `Failed`.
    ///
    /// # Errors
    /// Returns [`InstallationError::NotInitialized`] before
    /// [`Self::read_store_state`].
    pub fn update_all(
        &self,
    ) -> Result<impl Stream<Item = (M, UpdateProgress)> + Send + use<M>, InstallationError> {
        let pending = self.manifests_to_update()?;
        let run = UpdateRun {
            pending: pending.into(),
            current: None,
            ctx: self.ctx.clone(),
            installation_path: self.config.installation_path.clone(),
            install_into_folders: self.config.install_into_folders,
            keep_residual_files: self.config.keep_residual_files,
        };
        Ok(futures_util::stream::unfold(run, |mut run| async move {
            let item = run.next_item().await?;
            Some((item, run))
        }))
    }
}

struct Running<M: Descriptor> {
    source: Option<M>,
    target: M,
    target_dir: PathBuf,
    steps: BoxStream<'static, Result<PipelineProgress, PipelineError>>,
    failure: Option<String>,
}

struct UpdateRun<M: Descriptor> {
    pending: VecDeque<(Option<M>, M)>,
    current: Option<Running<M>>,
    ctx: UpdaterContext,
    installation_path: PathBuf,
    install_into_folders: bool,
    keep_residual_files: Option<bool>,
}

impl<M: Descriptor> UpdateRun<M> {
    async fn next_item(&mut self) -> Option<(M, UpdateProgress)> {
        loop {
            if self.current.is_none() {
                let (source, target) = self.pending.pop_front()?;
                self.current = Some(self.start(source, target));
            }
            let running = self.current.as_mut()?;

            match running.steps.next().await {
                Some(Ok(progress)) => {
                    return Some((running.target.clone(), UpdateProgress::Step(progress)));
                }
                Some(Err(error)) => {
                    running.failure = Some(error.to_string());
                }
                None => {
                    let finished = self.current.take()?;
                    let outcome = match finished.failure {
                        Some(reason) => UpdateProgress::Failed(reason),
                        None => {
                            self.persist(finished.source.as_ref(), &finished.target, &finished.target_dir);
                            UpdateProgress::Done
                        }
                    };
                    return Some((finished.target, outcome));
                }
            }
        }
    }

    fn start(&self, source: Option<M>, target: M) -> Running<M> {
        let logger = &*self.ctx.logger;
        let target_dir = if self.install_into_folders {
            self.installation_path.join(target.id())
        } else {
            self.installation_path.clone()
        };

        match &source {
            Some(source) => crate::log_info!(
                logger,
                "Updating {} from {} to {} in {}",
                target.name(),
                source.version(),
                target.version(),
                target_dir.display()
            ),
            None => crate::log_info!(
                logger,
                "Installing {} {} into {}",
                target.name(),
                target.version(),
                target_dir.display()
            ),
        }

        let clear = resolve_clear_residual_files(
            target.clear_residual_files(),
            self.keep_residual_files,
            self.ctx.config.default_clear_residual_files,
        );
        let steps = UpdatePipeline::new(source.clone(), target.clone(), &target_dir, self.ctx.clone())
            .with_clear_residual_files(clear)
            .run()
            .boxed();

        Running {
            source,
            target,
            target_dir,
            steps,
            failure: None,
        }
    }

    fn persist(&self, source: Option<&M>, target: &M, target_dir: &Path) {
        let logger = &*self.ctx.logger;
        match source {
            Some(local) => {
                let mut local = local.clone();
                match local.update_from(target) {
                    Ok(PersistOutcome::Recreated) => crate::log_warn!(
                        logger,
                        "Manifest file of {} was missing and has been recreated",
                        target.id()
                    ),
                    Ok(_) => {}
                    Err(error) => crate::log_error!(
                        logger,
                        "Failed to update manifest file of {}: {error}",
                        target.id()
                    ),
                }
            }
            None if target.is_embedded() => {}
            None => {
                let path = target_dir.join(MANIFEST_FILE_NAME);
                if let Err(error) = target.save(&path) {
                    crate::log_error!(
                        logger,
                        "Failed to write manifest file of {}: {error}",
                        target.id()
                    );
                }
            }
        }
    }
}
