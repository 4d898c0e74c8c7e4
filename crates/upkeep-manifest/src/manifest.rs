use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::compat::Relationship;
use crate::error::ManifestError;
use crate::version::Version;

/// File name manifests are stored under, both on disk and inside archives.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// A binary patch turning a cached archive of an older version into this
/// manifest's archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaPatch {
    /// Expected local base-archive file name.
    #[serde(rename = "sourceFileName")]
    pub source_file_name: String,
    #[serde(rename = "deltaURI")]
    pub delta_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestAssets {
    /// Primary artifact. `http(s)://` URIs are downloaded, anything else is
    /// treated as a local archive path.
    pub uri: String,
    /// Delta patches keyed by the version they apply to.
    #[serde(
        rename = "deltaPatchesURI",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub delta_patches: Option<BTreeMap<String, DeltaPatch>>,
}

impl ManifestAssets {
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            delta_patches: None,
        }
    }

    #[must_use]
    pub fn is_remote(&self) -> bool {
        let lower = self.uri.trim().to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }

    /// Delta patch applicable to an installation at `from`. Keys that do not
    /// parse as versions never match, and an installation already at the
    /// newest key gets no patch.
    #[must_use]
    pub fn delta_patch_for(&self, from: &Version) -> Option<&DeltaPatch> {
        let patches: Vec<(Version, &DeltaPatch)> = self
            .delta_patches
            .as_ref()?
            .iter()
            .filter_map(|(key, patch)| key.parse::<Version>().ok().map(|version| (version, patch)))
            .collect();
        let latest = patches
            .iter()
            .map(|(version, _)| *version)
            .max_by_key(|version| (version.major(), version.minor(), version.patch()))?;
        if latest == *from {
            return None;
        }
        patches
            .into_iter()
            .find_map(|(version, patch)| (version == *from).then_some(patch))
    }

    pub fn insert_delta_patch(&mut self, from: &Version, patch: DeltaPatch) {
        self.delta_patches
            .get_or_insert_with(BTreeMap::new)
            .insert(from.to_string(), patch);
    }
}

/// What [`Manifest::update_from`] did with the on-disk copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Embedded or path-less manifests are only updated in memory.
    Skipped,
    Written,
    /// The recorded path had disappeared and was written anew.
    Recreated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<ManifestAssets>,
    #[serde(
        rename = "ignoredEntries",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ignored_entries: Option<Vec<String>>,
    #[serde(
        rename = "clearResidualFiles",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub clear_residual_files: Option<bool>,
    pub version: Version,
    #[serde(rename = "type")]
    pub kind: String,
    /// Entry point binary for plugin resources.
    #[serde(rename = "entryPoint", default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    /// Extra folder added to the library search path of plugin resources.
    #[serde(
        rename = "libraryFolder",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub library_folder: Option<String>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub embedded: bool,
    /// Keys this model does not know about, re-emitted in their original
    /// order.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    #[serde(skip)]
    manifest_path: Option<PathBuf>,
}

impl Manifest {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: Version,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            assets: None,
            ignored_entries: None,
            clear_residual_files: None,
            version,
            kind: kind.into(),
            entry_point: None,
            library_folder: None,
            relationships: Vec::new(),
            embedded: false,
            extra: Map::new(),
            manifest_path: None,
        }
    }

    #[must_use]
    pub fn with_assets(mut self, assets: ManifestAssets) -> Self {
        self.assets = Some(assets);
        self
    }

    /// Parse a manifest from JSON bytes.
    ///
    /// # Errors
    /// Returns [`ManifestError::Parse`] when the bytes are not a valid
    /// manifest.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ManifestError> {
        serde_json::from_slice(bytes).map_err(|source| ManifestError::parse(None, source))
    }

    /// Read a manifest file and remember where it came from.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        let bytes = std::fs::read(path).map_err(|source| ManifestError::read(path, source))?;
        let mut manifest: Self = serde_json::from_slice(&bytes)
            .map_err(|source| ManifestError::parse(Some(path), source))?;
        manifest.manifest_path = Some(path.to_path_buf());
        Ok(manifest)
    }

    #[must_use]
    pub fn manifest_path(&self) -> Option<&Path> {
        self.manifest_path.as_deref()
    }

    pub fn set_manifest_path(&mut self, path: impl Into<PathBuf>) {
        self.manifest_path = Some(path.into());
    }

    #[must_use]
    pub fn ignored_entries(&self) -> &[String] {
        self.ignored_entries.as_deref().unwrap_or_default()
    }

    /// Pretty-printed JSON with absent optional fields omitted.
    ///
    /// # Errors
    /// Returns [`ManifestError::Serialize`] if serialization fails.
    pub fn to_json(&self) -> Result<String, ManifestError> {
        serde_json::to_string_pretty(self).map_err(|source| ManifestError::Serialize {
            id: self.id.clone(),
            source,
        })
    }

    /// Atomically write this manifest to `path`.
    ///
    /// # Errors
    /// Returns an error when serialization or the file write fails.
    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        let json = self.to_json()?;
        upkeep_platform::write_atomic(path, json.as_bytes())
            .map_err(|source| ManifestError::write(path, source))
    }

    /// Take over every field of `newer` except identity and local-origin
    /// data (`id`, `embedded`, the manifest path and unknown keys), then
    /// persist to the recorded path when there is one.
    ///
    /// # Errors
    /// Returns an error when the updated manifest cannot be written.
    pub fn update_from(&mut self, newer: &Manifest) -> Result<PersistOutcome, ManifestError> {
        self.name.clone_from(&newer.name);
        self.assets.clone_from(&newer.assets);
        self.ignored_entries.clone_from(&newer.ignored_entries);
        self.clear_residual_files = newer.clear_residual_files;
        self.version = newer.version;
        self.kind.clone_from(&newer.kind);
        self.entry_point.clone_from(&newer.entry_point);
        self.library_folder.clone_from(&newer.library_folder);
        self.relationships.clone_from(&newer.relationships);

        if self.embedded {
            return Ok(PersistOutcome::Skipped);
        }
        let Some(path) = self.manifest_path.clone() else {
            return Ok(PersistOutcome::Skipped);
        };

        let existed = path.exists();
        self.save(&path)?;
        Ok(if existed {
            PersistOutcome::Written
        } else {
            PersistOutcome::Recreated
        })
    }
}

impl PartialEq for Manifest {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.id == other.id
            && self.assets == other.assets
            && self.ignored_entries == other.ignored_entries
            && self.clear_residual_files == other.clear_residual_files
            && self.version == other.version
            && self.kind == other.kind
            && self.entry_point == other.entry_point
            && self.library_folder == other.library_folder
            && self.relationships == other.relationships
            && self.embedded == other.embedded
    }
}

impl Eq for Manifest {}

#[cfg(test)]
mod tests {
    use super::{DeltaPatch, Manifest, ManifestAssets, PersistOutcome};
    use crate::version::Version;

    fn sample() -> Manifest {
        let mut assets = ManifestAssets::new("https://example.com/assets/X.1.0.0.zip");
        assets.insert_delta_patch(
            &Version::new(0, 1, 0),
            DeltaPatch {
                source_file_name: "S4Forge.0.1.0.zip".to_string(),
                delta_uri: "https://example.com/assets/X.0.1.0.to.1.0.0.delta".to_string(),
            },
        );
        assets.insert_delta_patch(
            &Version::new(1, 0, 0),
            DeltaPatch {
                source_file_name: "S4Forge.1.0.0.zip".to_string(),
                delta_uri: "https://example.com/assets/X.1.0.0.to.next.delta".to_string(),
            },
        );
        let mut manifest =
            Manifest::new("S4Forge", "S4Forge", Version::new(1, 0, 0), "test").with_assets(assets);
        manifest.clear_residual_files = Some(false);
        manifest
    }

    #[test]
    fn json_round_trip_preserves_equality() {
        let manifest = sample();
        let json = serde_json::to_string(&manifest).expect("manifest should serialize");
        let parsed = Manifest::from_slice(json.as_bytes()).expect("manifest should parse");
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn overflow_keys_round_trip_byte_for_byte() {
        let input = r#"{
  "name": "UX-Engine",
  "id": "UXEngine",
  "assets": {
    "uri": "https://"
  },
  "clearResidualFiles": false,
  "version": "1.0.0",
  "type": "Engine",
  "relationships": [
    {
      "id": "Forge",
      "optional": false,
      "manifest": "",
      "compatibility": {
        "minimum": "1.*",
        "verified": "1.1.0",
        "maximum": "2.0.0"
      }
    }
  ],
  "embedded": true,
  "cheese": "test"
}"#;

        let manifest = Manifest::from_slice(input.as_bytes()).expect("manifest should parse");
        assert_eq!(
            manifest.extra.get("cheese").and_then(|v| v.as_str()),
            Some("test")
        );

        let output = manifest.to_json().expect("manifest should serialize");
        assert_eq!(output, input);
    }

    #[test]
    fn equality_ignores_unknown_keys_and_path() {
        let left = sample();
        let mut right = sample();
        right.extra.insert("note".to_string(), serde_json::json!(1));
        right.set_manifest_path("/somewhere/manifest.json");
        assert_eq!(left, right);

        right.relationships.push(crate::Relationship {
            id: "Forge".to_string(),
            optional: None,
            manifest_url: None,
            compatibility: crate::Compatibility::at_least(Version::new(1, 0, 0)),
        });
        assert_ne!(left, right);
    }

    #[test]
    fn delta_patch_lookup_matches_parsed_version() {
        let manifest = sample();
        let assets = manifest.assets.as_ref().expect("sample has assets");
        assert!(assets.delta_patch_for(&Version::new(0, 1, 0)).is_some());
        assert!(assets.delta_patch_for(&Version::new(0, 2, 0)).is_none());
        assert!(assets.delta_patch_for(&Version::new(1, 0, 0)).is_none());
        assert!(assets.is_remote());
        assert!(!ManifestAssets::new("C:/builds/X.zip").is_remote());
    }

    #[test]
    fn newest_delta_key_never_yields_a_patch() {
        let mut assets = ManifestAssets::new("https://example.com/X.zip");
        for (from, uri) in [("1.10.0", "a"), ("1.9.0", "b"), ("not-a-version", "c")] {
            assets.delta_patches.get_or_insert_with(Default::default).insert(
                from.to_string(),
                DeltaPatch {
                    source_file_name: format!("X.{from}.zip"),
                    delta_uri: uri.to_string(),
                },
            );
        }

        let older = assets
            .delta_patch_for(&Version::new(1, 9, 0))
            .expect("older key should have a patch");
        assert_eq!(older.delta_uri, "b");
        assert!(assets.delta_patch_for(&Version::new(1, 10, 0)).is_none());

        let mut single = ManifestAssets::new("https://example.com/X.zip");
        single.insert_delta_patch(
            &Version::new(1, 0, 0),
            DeltaPatch {
                source_file_name: "X.1.0.0.zip".to_string(),
                delta_uri: "d".to_string(),
            },
        );
        assert!(single.delta_patch_for(&Version::new(1, 0, 0)).is_none());
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let result = Manifest::from_slice(br#"{"name":"x","id":"x","type":"t"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn update_from_keeps_identity_and_persists() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let path = temp_dir.path().join("manifest.json");

        let mut local = sample();
        local.extra.insert("localOnly".to_string(), serde_json::json!(true));
        local.save(&path).expect("seed manifest should save");
        let mut local = Manifest::from_path(&path).expect("seed manifest should load");

        let mut newer = sample();
        newer.id = "Renamed".to_string();
        newer.name = "S4Forge Next".to_string();
        newer.version = Version::new(1, 1, 0);
        newer.embedded = true;

        let outcome = local.update_from(&newer).expect("update should persist");
        assert_eq!(outcome, PersistOutcome::Written);
        assert_eq!(local.id, "S4Forge");
        assert!(!local.embedded);
        assert_eq!(local.version, Version::new(1, 1, 0));

        let reloaded = Manifest::from_path(&path).expect("updated manifest should load");
        assert_eq!(reloaded.name, "S4Forge Next");
        assert_eq!(reloaded.version, Version::new(1, 1, 0));
        assert_eq!(reloaded.extra.get("localOnly"), Some(&serde_json::json!(true)));
    }

    #[test]
    fn update_from_recreates_missing_file() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let path = temp_dir.path().join("gone").join("manifest.json");
        let mut local = sample();
        local.set_manifest_path(&path);

        let outcome = local.update_from(&sample()).expect("update should write");
        assert_eq!(outcome, PersistOutcome::Recreated);
        assert!(path.is_file());
    }

    #[test]
    fn update_from_skips_embedded_manifests() {
        let mut local = sample();
        local.embedded = true;
        local.set_manifest_path("/nonexistent/manifest.json");
        let outcome = local.update_from(&sample()).expect("embedded update is in-memory");
        assert_eq!(outcome, PersistOutcome::Skipped);
    }
}
