use std::io::Read;
use std::path::Path;

use upkeep_manifest::MANIFEST_FILE_NAME;

/// Binary file extensions that may carry an embedded manifest.
pub const EMBEDDED_EXTENSIONS: &[&str] = &["dll", "asi", "so", "dylib"];

/// Extracts a `manifest.json` resource stream from a binary resource.
pub trait EmbeddedManifestReader: Send + Sync {
    /// Whether `path` is worth opening at all.
    fn handles(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                EMBEDDED_EXTENSIONS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
    }

    /// Raw manifest bytes, or `None` when the file carries no manifest.
    ///
    /// # Errors
    /// Returns an error when the file exists but cannot be read.
    fn read_manifest(&self, path: &Path) -> std::io::Result<Option<Vec<u8>>>;
}

/// Reads manifests from a zip payload appended to (or making up) the binary,
/// the layout produced by self-extracting resource bundles.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipEmbeddedReader;

impl EmbeddedManifestReader for ZipEmbeddedReader {
    fn read_manifest(&self, path: &Path) -> std::io::Result<Option<Vec<u8>>> {
        let file = std::fs::File::open(path)?;
        let Ok(mut archive) = zip::ZipArchive::new(file) else {
            return Ok(None);
        };

        let mut entry = match archive.by_name(MANIFEST_FILE_NAME) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => return Ok(None),
            Err(error) => return Err(std::io::Error::other(error)),
        };

        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;
        Ok(Some(bytes))
    }
}
