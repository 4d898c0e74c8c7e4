use upkeep_manifest::{CompatibilityLevel, MANIFEST_FILE_NAME, Manifest, ManifestError, Version};

const PLUGIN_MANIFEST: &str = r#"{
  "name": "Forge Loader",
  "id": "S4Forge",
  "assets": {
    "uri": "https://example.invalid/S4Forge.zip",
    "deltaPatchesURI": {
      "1.0.0": {
        "sourceFileName": "S4Forge.1.0.0.zip",
        "deltaURI": "https://example.invalid/S4Forge.1.0.0.delta"
      },
      "1.1.0": {
        "sourceFileName": "S4Forge.1.1.0.zip",
        "deltaURI": "https://example.invalid/S4Forge.1.1.0.delta"
      }
    }
  },
  "ignoredEntries": ["logs/", "S4Forge.ini"],
  "version": "1.1.0",
  "type": "plugin",
  "entryPoint": "S4Forge.dll",
  "relationships": [
    {
      "id": "Settlers4",
      "compatibility": { "minimum": "2.50.*", "maximum": "2.*" }
    },
    {
      "id": "MapPack",
      "optional": true,
      "manifest": "https://example.invalid/mappack.json",
      "compatibility": { "minimum": "1.0.0" }
    }
  ],
  "homepage": "https://example.invalid/forge"
}"#;

fn v(input: &str) -> Version {
    input.parse().expect("test version should parse")
}

#[test]
fn plugin_manifest_loads_from_disk() {
    let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
    let path = temp_dir.path().join(MANIFEST_FILE_NAME);
    std::fs::write(&path, PLUGIN_MANIFEST).expect("manifest should be written");

    let manifest = Manifest::from_path(&path).expect("manifest should parse");

    assert_eq!(manifest.id, "S4Forge");
    assert_eq!(manifest.kind, "plugin");
    assert_eq!(manifest.manifest_path(), Some(path.as_path()));
    assert_eq!(manifest.ignored_entries(), ["logs/", "S4Forge.ini"]);
    assert_eq!(manifest.entry_point.as_deref(), Some("S4Forge.dll"));

    let assets = manifest.assets.as_ref().expect("assets should be present");
    assert!(assets.is_remote());
    let patch = assets
        .delta_patch_for(&v("1.0.0"))
        .expect("delta patch for 1.0.0 should exist");
    assert_eq!(patch.source_file_name, "S4Forge.1.0.0.zip");
    assert!(assets.delta_patch_for(&v("0.9.0")).is_none());
    assert!(assets.delta_patch_for(&v("1.1.0")).is_none());

    let game = &manifest.relationships[0];
    assert!(!game.is_optional());
    assert_eq!(
        game.compatibility.check(&v("2.50.1516")).ok(),
        Some(CompatibilityLevel::Compatible)
    );
    assert_eq!(
        game.compatibility.check(&v("2.49.0")).ok(),
        Some(CompatibilityLevel::IncompatibleUnder)
    );
    assert!(manifest.relationships[1].is_optional());
    assert_eq!(
        manifest.relationships[1].manifest_url.as_deref(),
        Some("https://example.invalid/mappack.json")
    );
}

#[test]
fn saved_manifest_keeps_unknown_keys() {
    let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
    let manifest = Manifest::from_slice(PLUGIN_MANIFEST.as_bytes()).expect("manifest should parse");
    let path = temp_dir.path().join("nested/dir").join(MANIFEST_FILE_NAME);
    std::fs::create_dir_all(path.parent().expect("path has a parent"))
        .expect("directory should be created");

    manifest.save(&path).expect("manifest should be saved");
    let reloaded = Manifest::from_path(&path).expect("saved manifest should parse");

    assert_eq!(reloaded, manifest);
    assert_eq!(
        reloaded.extra.get("homepage").and_then(|value| value.as_str()),
        Some("https://example.invalid/forge")
    );
}

#[test]
fn unreadable_and_malformed_files_are_reported() {
    let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
    let missing = temp_dir.path().join(MANIFEST_FILE_NAME);
    assert!(Manifest::from_path(&missing).is_err());

    std::fs::write(&missing, r#"{"id": "NoVersion", "name": "x", "type": "plugin"}"#)
        .expect("manifest should be written");
    assert!(matches!(
        Manifest::from_path(&missing),
        Err(ManifestError::Parse { .. })
    ));
}
