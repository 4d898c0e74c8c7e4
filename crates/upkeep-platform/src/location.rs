use std::fmt;
use std::path::{Path, PathBuf};

/// Where a manifest feed, archive, patch or checksum lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceLocation {
    Remote(String),
    Local(PathBuf),
}

impl ResourceLocation {
    /// Classify a URI string. `http://` and `https://` are remote, `file://`
    /// URIs and everything else are local paths.
    #[must_use]
    pub fn parse(uri: &str) -> Self {
        let trimmed = uri.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Self::Remote(trimmed.to_string());
        }
        if lower.starts_with("file://") {
            let path = &trimmed["file://".len()..];
            // file:///C:/x on Windows carries an extra slash before the drive.
            #[cfg(windows)]
            let path = path.strip_prefix('/').unwrap_or(path);
            return Self::Local(PathBuf::from(path));
        }
        Self::Local(PathBuf::from(trimmed))
    }

    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// Append a suffix to the location, e.g. `.sha1` for checksum sidecars.
    #[must_use]
    pub fn with_suffix(&self, suffix: &str) -> Self {
        match self {
            Self::Remote(url) => Self::Remote(format!("{url}{suffix}")),
            Self::Local(path) => {
                let mut raw = path.clone().into_os_string();
                raw.push(suffix);
                Self::Local(PathBuf::from(raw))
            }
        }
    }
}

impl fmt::Display for ResourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(url) => f.write_str(url),
            Self::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Resolve a feed/installation reference against `base`. Remote URIs and
/// absolute paths are returned unchanged.
#[must_use]
pub fn resolve_against(base: &Path, uri: &str) -> String {
    match ResourceLocation::parse(uri) {
        ResourceLocation::Remote(url) => url,
        ResourceLocation::Local(path) if path.is_absolute() => path.display().to_string(),
        ResourceLocation::Local(path) => base.join(path).display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::{ResourceLocation, resolve_against};

    #[test]
    fn parse_classifies_http_and_paths() {
        assert_eq!(
            ResourceLocation::parse("https://cdn.example.com/a.zip"),
            ResourceLocation::Remote("https://cdn.example.com/a.zip".to_string())
        );
        assert_eq!(
            ResourceLocation::parse("HTTP://cdn.example.com/a.zip"),
            ResourceLocation::Remote("HTTP://cdn.example.com/a.zip".to_string())
        );
        assert_eq!(
            ResourceLocation::parse("plugins/a.zip"),
            ResourceLocation::Local(PathBuf::from("plugins/a.zip"))
        );
    }

    #[cfg(unix)]
    #[test]
    fn parse_strips_file_scheme() {
        assert_eq!(
            ResourceLocation::parse("file:///srv/feed.json"),
            ResourceLocation::Local(PathBuf::from("/srv/feed.json"))
        );
    }

    #[test]
    fn with_suffix_appends_to_both_kinds() {
        let remote = ResourceLocation::parse("https://x/a.zip").with_suffix(".sha1");
        assert_eq!(remote.to_string(), "https://x/a.zip.sha1");

        let local = ResourceLocation::parse("a.zip").with_suffix(".sha1");
        assert_eq!(local, ResourceLocation::Local(PathBuf::from("a.zip.sha1")));
    }

    #[cfg(unix)]
    #[test]
    fn resolve_against_keeps_urls_and_absolute_paths() {
        let base = Path::new("/etc/stores");
        assert_eq!(resolve_against(base, "https://x/feed.json"), "https://x/feed.json");
        assert_eq!(resolve_against(base, "/srv/feed.json"), "/srv/feed.json");
        assert_eq!(resolve_against(base, "feed.json"), "/etc/stores/feed.json");
    }
}
