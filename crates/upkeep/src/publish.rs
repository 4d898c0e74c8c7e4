//! Helpers for publishers preparing a release: the manifest file, delta
//! patches between archive versions and `.sha1` sidecars.

use std::path::{Path, PathBuf};

use clap::Args;
use upkeep_core::{DeltaCodec, sha1_file};
use upkeep_manifest::{MANIFEST_FILE_NAME, Manifest, ManifestAssets, Version};

use crate::error::AppError;

#[derive(Debug, Clone, Args)]
pub struct ManifestArgs {
    #[arg(long)]
    pub id: String,
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub version: String,
    #[arg(long = "type", default_value = "plugin")]
    pub kind: String,
    #[arg(long)]
    pub asset_uri: String,
    /// Entries kept as installed; a trailing `/` marks a directory.
    #[arg(long = "ignore")]
    pub ignored_entries: Vec<String>,
    #[arg(long)]
    pub clear_residual_files: bool,
    #[arg(long)]
    pub embedded: bool,
    /// Directory `manifest.json` is written into.
    #[arg(long)]
    pub out: PathBuf,
}

pub fn write_manifest(args: &ManifestArgs) -> Result<PathBuf, AppError> {
    let version = Version::parse(&args.version)?;
    let mut manifest = Manifest::new(&args.id, &args.name, version, &args.kind)
        .with_assets(ManifestAssets::new(&args.asset_uri));
    if !args.ignored_entries.is_empty() {
        manifest.ignored_entries = Some(args.ignored_entries.clone());
    }
    if args.clear_residual_files {
        manifest.clear_residual_files = Some(true);
    }
    manifest.embedded = args.embedded;

    std::fs::create_dir_all(&args.out)
        .map_err(|error| AppError::io("failed to create output directory", &args.out, error))?;
    let path = args.out.join(MANIFEST_FILE_NAME);
    manifest.save(&path)?;
    log::info!("Wrote {} {} to {}", manifest.id, manifest.version, path.display());
    Ok(path)
}

/// Write a patch turning `base` into `target`, checked by applying it once
/// before it is written. Returns the patch size.
pub fn write_delta(
    codec: &dyn DeltaCodec,
    base: &Path,
    target: &Path,
    out: &Path,
) -> Result<u64, AppError> {
    let base_bytes =
        std::fs::read(base).map_err(|error| AppError::io("failed to read", base, error))?;
    let target_bytes =
        std::fs::read(target).map_err(|error| AppError::io("failed to read", target, error))?;

    let patch = codec.compute(&base_bytes, &target_bytes);
    codec.apply(&base_bytes, &patch)?;

    upkeep_platform::write_atomic(out, &patch)
        .map_err(|error| AppError::io("failed to write", out, error))?;
    log::info!(
        "Wrote delta {} ({} bytes for a {} byte archive)",
        out.display(),
        patch.len(),
        target_bytes.len()
    );
    Ok(patch.len() as u64)
}

/// Write `<file>.sha1` next to `file` in `sha1sum` format.
pub fn write_checksum(file: &Path) -> Result<PathBuf, AppError> {
    let digest = sha1_file(file).map_err(|error| AppError::io("failed to hash", file, error))?;
    let file_name = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut sidecar = file.as_os_str().to_owned();
    sidecar.push(".sha1");
    let sidecar = PathBuf::from(sidecar);
    std::fs::write(&sidecar, format!("{digest}  {file_name}\n"))
        .map_err(|error| AppError::io("failed to write", &sidecar, error))?;
    Ok(sidecar)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use upkeep_core::{BlockDelta, DeltaCodec};
    use upkeep_manifest::{MANIFEST_FILE_NAME, Manifest};

    use super::{ManifestArgs, write_checksum, write_delta, write_manifest};
    use crate::error::AppError;

    fn args(out: PathBuf) -> ManifestArgs {
        ManifestArgs {
            id: "S4Forge".to_string(),
            name: "Forge Loader".to_string(),
            version: "1.2.0".to_string(),
            kind: "plugin".to_string(),
            asset_uri: "https://example.invalid/S4Forge.zip".to_string(),
            ignored_entries: vec!["S4Forge.ini".to_string()],
            clear_residual_files: true,
            embedded: false,
            out,
        }
    }

    #[test]
    fn manifest_is_written_with_optional_fields() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let path = write_manifest(&args(temp_dir.path().join("release")))
            .expect("manifest should be written");

        assert_eq!(path, temp_dir.path().join("release").join(MANIFEST_FILE_NAME));
        let manifest = Manifest::from_path(&path).expect("written manifest should parse");
        assert_eq!(manifest.version.to_string(), "1.2.0");
        assert_eq!(manifest.ignored_entries(), ["S4Forge.ini"]);
        assert_eq!(manifest.clear_residual_files, Some(true));
        assert!(!manifest.embedded);
    }

    #[test]
    fn manifest_rejects_bad_version() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let mut bad = args(temp_dir.path().to_path_buf());
        bad.version = "1.*.3".to_string();

        assert!(matches!(write_manifest(&bad), Err(AppError::Version(_))));
        assert!(!temp_dir.path().join(MANIFEST_FILE_NAME).exists());
    }

    #[test]
    fn delta_reproduces_target() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let base = temp_dir.path().join("v1.zip");
        let target = temp_dir.path().join("v2.zip");
        let out = temp_dir.path().join("v2.zip.1.0.0.delta");
        let shared: Vec<u8> = (0..8_192_u32).map(|i| (i % 97) as u8).collect();
        std::fs::write(&base, [shared.as_slice(), &b"old tail"[..]].concat()).expect("base written");
        std::fs::write(&target, [shared.as_slice(), &b"new tail!"[..]].concat()).expect("target written");

        let codec = BlockDelta::default();
        let size = write_delta(&codec, &base, &target, &out).expect("delta should be written");

        let patch = std::fs::read(&out).expect("delta should be readable");
        assert_eq!(size, patch.len() as u64);
        let rebuilt = codec
            .apply(&std::fs::read(&base).expect("base readable"), &patch)
            .expect("patch should apply");
        assert_eq!(rebuilt, std::fs::read(&target).expect("target readable"));
    }

    #[test]
    fn checksum_sidecar_uses_sha1sum_format() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let file = temp_dir.path().join("empty.zip");
        std::fs::write(&file, b"").expect("file should be written");

        let sidecar = write_checksum(&file).expect("sidecar should be written");

        assert_eq!(sidecar, temp_dir.path().join("empty.zip.sha1"));
        assert_eq!(
            std::fs::read_to_string(&sidecar).expect("sidecar should be readable"),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709  empty.zip\n"
        );
    }
}
