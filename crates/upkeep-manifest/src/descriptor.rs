use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

use crate::compat::Relationship;
use crate::error::ManifestError;
use crate::manifest::{Manifest, ManifestAssets, PersistOutcome};
use crate::version::Version;

/// The view of a resource manifest the store, downloader and updater work
/// against. Implement it to carry a richer manifest type through the whole
/// pipeline; [`Manifest`] is the stock implementation.
pub trait Descriptor:
    Clone + Send + Sync + Serialize + DeserializeOwned + std::fmt::Debug + 'static
{
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn version(&self) -> &Version;
    fn assets(&self) -> Option<&ManifestAssets>;
    fn ignored_entries(&self) -> &[String];
    /// `None` defers to the installation/process default.
    fn clear_residual_files(&self) -> Option<bool>;
    fn relationships(&self) -> &[Relationship];
    fn is_embedded(&self) -> bool;
    fn mark_embedded(&mut self);
    fn manifest_path(&self) -> Option<&Path>;
    fn set_manifest_path(&mut self, path: &Path);

    /// Take over `newer`'s published data and persist it.
    ///
    /// # Errors
    /// Returns an error when the updated manifest cannot be written.
    fn update_from(&mut self, newer: &Self) -> Result<PersistOutcome, ManifestError>;

    /// # Errors
    /// Returns an error when serialization or the write fails.
    fn save(&self, path: &Path) -> Result<(), ManifestError>;
}

impl Descriptor for Manifest {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &Version {
        &self.version
    }

    fn assets(&self) -> Option<&ManifestAssets> {
        self.assets.as_ref()
    }

    fn ignored_entries(&self) -> &[String] {
        Manifest::ignored_entries(self)
    }

    fn clear_residual_files(&self) -> Option<bool> {
        self.clear_residual_files
    }

    fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    fn is_embedded(&self) -> bool {
        self.embedded
    }

    fn mark_embedded(&mut self) {
        self.embedded = true;
    }

    fn manifest_path(&self) -> Option<&Path> {
        Manifest::manifest_path(self)
    }

    fn set_manifest_path(&mut self, path: &Path) {
        Manifest::set_manifest_path(self, path);
    }

    fn update_from(&mut self, newer: &Self) -> Result<PersistOutcome, ManifestError> {
        Manifest::update_from(self, newer)
    }

    fn save(&self, path: &Path) -> Result<(), ManifestError> {
        Manifest::save(self, path)
    }
}
