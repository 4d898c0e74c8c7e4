use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::future::join_all;
use upkeep_manifest::{
    CompatibilityLevel, Descriptor, MANIFEST_FILE_NAME, Manifest, Relationship,
};
use upkeep_platform::ResourceLocation;
use walkdir::WalkDir;

use crate::config::UpdaterContext;
use crate::embedded::{EmbeddedManifestReader, ZipEmbeddedReader};
use crate::fetch;
use crate::logger::{Logger, NoOpLogger};
use crate::state::InstallStateStore;

/// Manifests and binaries deeper than this below a scan root are ignored.
pub const MAX_SCAN_DEPTH: usize = 2;

/// A relationship the installed set does not satisfy.
#[derive(Debug, Clone, PartialEq)]
pub struct Incompatibility<M: Descriptor = Manifest> {
    pub manifest: M,
    pub relationship: Relationship,
    pub level: CompatibilityLevel,
}

/// Manifests of one location, unique by id once merged.
#[derive(Clone)]
pub struct ManifestStore<M: Descriptor = Manifest> {
    manifests: Vec<M>,
    logger: Arc<dyn Logger>,
    embedded: Arc<dyn EmbeddedManifestReader>,
}

impl<M: Descriptor> Default for ManifestStore<M> {
    fn default() -> Self {
        Self {
            manifests: Vec::new(),
            logger: Arc::new(NoOpLogger),
            embedded: Arc::new(ZipEmbeddedReader),
        }
    }
}

impl<M: Descriptor> std::fmt::Debug for ManifestStore<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestStore")
            .field("manifests", &self.manifests)
            .finish_non_exhaustive()
    }
}

impl<M: Descriptor> ManifestStore<M> {
    #[must_use]
    pub fn with_logger(logger: Arc<dyn Logger>) -> Self {
        Self {
            logger,
            ..Self::default()
        }
    }

    /// Empty store using the context's logger and embedded-manifest reader.
    #[must_use]
    pub fn from_context(ctx: &UpdaterContext) -> Self {
        Self {
            manifests: Vec::new(),
            logger: ctx.logger.clone(),
            embedded: ctx.embedded.clone(),
        }
    }

    /// Construct a store from a feed URL, a `.json` manifest/feed file or a
    /// directory to scan.
    pub async fn create(uri: &str, ctx: &UpdaterContext) -> Self {
        let mut store = Self::from_context(ctx);
        match ResourceLocation::parse(uri) {
            ResourceLocation::Remote(_) => {
                store.ingest_feeds(&ctx.client, &[uri.to_string()]).await;
            }
            ResourceLocation::Local(path)
                if path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("json")) =>
            {
                store.ingest_feeds(&ctx.client, &[uri.to_string()]).await;
            }
            ResourceLocation::Local(path) => {
                let path = ctx.config.resolve(&path);
                let logger = store.logger.clone();
                let embedded = store.embedded.clone();
                let scanned = tokio::task::spawn_blocking(move || {
                    let mut store = Self {
                        manifests: Vec::new(),
                        logger,
                        embedded,
                    };
                    store.scan_local(&[path], true, true);
                    store
                })
                .await;
                match scanned {
                    Ok(scanned) => store = scanned,
                    Err(error) => crate::log_error!(store.logger, "Manifest scan task failed: {error}"),
                }
            }
        }
        store
    }

    #[must_use]
    pub fn manifests(&self) -> &[M] {
        &self.manifests
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    #[must_use]
    pub fn find(&self, id: &str) -> Option<&M> {
        self.manifests.iter().find(|manifest| manifest.id() == id)
    }

    /// Add without merging; call [`Self::merge_duplicates`] afterwards.
    pub fn add(&mut self, manifest: M) {
        self.manifests.push(manifest);
    }

    pub fn extend(&mut self, manifests: impl IntoIterator<Item = M>) {
        self.manifests.extend(manifests);
    }

    /// Collapse manifests sharing an id into the highest version. A
    /// wildcard version never replaces a concrete one. The survivor keeps
    /// the position of the first occurrence.
    pub fn merge_duplicates(&mut self) {
        let mut merged: Vec<M> = Vec::with_capacity(self.manifests.len());
        for candidate in self.manifests.drain(..) {
            let Some(existing) = merged.iter_mut().find(|m| m.id() == candidate.id()) else {
                merged.push(candidate);
                continue;
            };

            let replace = match (
                existing.version().has_wildcard(),
                candidate.version().has_wildcard(),
            ) {
                (_, true) => false,
                (true, false) => true,
                (false, false) => candidate
                    .version()
                    .compare(existing.version())
                    .is_ok_and(std::cmp::Ordering::is_gt),
            };
            crate::log_debug!(
                self.logger,
                "Duplicate manifest {} ({} vs {}), keeping {}",
                candidate.id(),
                existing.version(),
                candidate.version(),
                if replace { candidate.version() } else { existing.version() }
            );
            if replace {
                *existing = candidate;
            }
        }
        self.manifests = merged;
    }

    /// Collect `manifest.json` files (and, with `include_embedded`, manifests
    /// carried inside binaries) below each of `paths`. Without `recursive`
    /// only files directly inside a root are considered.
    pub fn scan_local(&mut self, paths: &[PathBuf], recursive: bool, include_embedded: bool) {
        let max_depth = if recursive { MAX_SCAN_DEPTH } else { 1 };
        for root in paths {
            if root.is_file() {
                self.load_manifest_file(root);
                continue;
            }
            if !root.is_dir() {
                crate::log_debug!(self.logger, "Scan root {} does not exist", root.display());
                continue;
            }

            let walker = WalkDir::new(root).min_depth(1).max_depth(max_depth + 1);
            for entry in walker.into_iter().filter_map(Result::ok) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                let is_manifest = entry.file_name() == MANIFEST_FILE_NAME;
                let is_binary = include_embedded && self.embedded.handles(path);
                if !is_manifest && !is_binary {
                    continue;
                }
                if entry.depth() > max_depth {
                    crate::log_debug!(
                        self.logger,
                        "Skipping {}: deeper than {max_depth} levels below {}",
                        path.display(),
                        root.display()
                    );
                    continue;
                }

                if is_manifest {
                    self.load_manifest_file(path);
                } else {
                    self.load_embedded(path);
                }
            }
        }
        self.merge_duplicates();
    }

    fn load_manifest_file(&mut self, path: &Path) {
        let parsed = std::fs::read(path)
            .map_err(|error| error.to_string())
            .and_then(|bytes| serde_json::from_slice::<M>(&bytes).map_err(|error| error.to_string()));
        match parsed {
            Ok(mut manifest) => {
                manifest.set_manifest_path(path);
                crate::log_debug!(
                    self.logger,
                    "Found manifest {} {} at {}",
                    manifest.id(),
                    manifest.version(),
                    path.display()
                );
                self.manifests.push(manifest);
            }
            Err(error) => {
                crate::log_warn!(self.logger, "Skipping manifest {}: {error}", path.display());
            }
        }
    }

    fn load_embedded(&mut self, path: &Path) {
        let bytes = match self.embedded.read_manifest(path) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return,
            Err(error) => {
                crate::log_debug!(self.logger, "Could not inspect {}: {error}", path.display());
                return;
            }
        };
        match serde_json::from_slice::<M>(&bytes) {
            Ok(mut manifest) => {
                manifest.mark_embedded();
                crate::log_debug!(
                    self.logger,
                    "Found embedded manifest {} {} in {}",
                    manifest.id(),
                    manifest.version(),
                    path.display()
                );
                self.manifests.push(manifest);
            }
            Err(error) => {
                crate::log_warn!(
                    self.logger,
                    "Skipping embedded manifest in {}: {error}",
                    path.display()
                );
            }
        }
    }

    /// Fetch each feed and add the manifests it lists. A feed is a single
    /// manifest object or an array of them. Failing feeds are logged and
    /// skipped.
    pub async fn ingest_feeds(&mut self, client: &reqwest::Client, uris: &[String]) {
        let fetches = uris.iter().map(|uri| async move {
            let location = ResourceLocation::parse(uri);
            (uri, fetch::fetch_bytes(client, &location).await)
        });

        for (uri, fetched) in join_all(fetches).await {
            let bytes = match fetched {
                Ok(bytes) => bytes,
                Err(error) => {
                    crate::log_warn!(self.logger, "Failed to fetch feed {uri}: {error}");
                    continue;
                }
            };
            match parse_feed::<M>(&bytes) {
                Ok(manifests) => {
                    crate::log_debug!(
                        self.logger,
                        "Feed {uri} lists {} manifest(s)",
                        manifests.len()
                    );
                    self.manifests.extend(manifests);
                }
                Err(error) => {
                    crate::log_warn!(self.logger, "Failed to parse feed {uri}: {error}");
                }
            }
        }
        self.merge_duplicates();
    }

    /// Pairs of `(installed, available)` that need installing: fresh
    /// installs, version changes, and resources whose last install broke.
    #[must_use]
    pub fn check_for_updates_with(
        &self,
        remote: &[M],
        states: &InstallStateStore,
    ) -> Vec<(Option<M>, M)> {
        let mut updates = Vec::new();
        for target in remote {
            match self.find(target.id()) {
                None => updates.push((None, target.clone())),
                Some(local) if local.version() != target.version() => {
                    updates.push((Some(local.clone()), target.clone()));
                }
                Some(local) if states.is_broken(target.id()) => {
                    crate::log_info!(
                        self.logger,
                        "{} {} did not finish installing, reinstalling",
                        local.id(),
                        local.version()
                    );
                    updates.push((Some(local.clone()), target.clone()));
                }
                Some(_) => {}
            }
        }
        updates
    }

    /// Store-to-store comparison: installed manifests whose id appears in
    /// `others` with a different version. Ids unknown locally are not
    /// reported.
    #[must_use]
    pub fn check_for_version_changes(&self, others: &[&ManifestStore<M>]) -> Vec<(M, M)> {
        self.manifests
            .iter()
            .filter_map(|local| {
                let newer = others.iter().find_map(|other| other.find(local.id()))?;
                (local.version() != newer.version()).then(|| (local.clone(), newer.clone()))
            })
            .collect()
    }

    /// Relationships of stored manifests that are not satisfied by the
    /// other stored manifests.
    #[must_use]
    pub fn check_for_incompatibilities(&self) -> Vec<Incompatibility<M>> {
        let mut problems = Vec::new();
        for manifest in &self.manifests {
            for relationship in manifest.relationships() {
                let level = match self.find(&relationship.id) {
                    None if relationship.is_optional() => continue,
                    None => CompatibilityLevel::Unknown,
                    Some(target) => match relationship.compatibility.check(target.version()) {
                        Ok(level) if level.is_satisfied() => continue,
                        Ok(level) => level,
                        Err(error) => {
                            crate::log_warn!(
                                self.logger,
                                "Cannot check {} against {}: {error}",
                                manifest.id(),
                                relationship.id
                            );
                            CompatibilityLevel::Unknown
                        }
                    },
                };
                problems.push(Incompatibility {
                    manifest: manifest.clone(),
                    relationship: relationship.clone(),
                    level,
                });
            }
        }
        problems
    }
}

fn parse_feed<M: Descriptor>(bytes: &[u8]) -> Result<Vec<M>, serde_json::Error> {
    let document: serde_json::Value = serde_json::from_slice(bytes)?;
    if document.is_array() {
        serde_json::from_value(document)
    } else {
        serde_json::from_value(document).map(|manifest| vec![manifest])
    }
}
