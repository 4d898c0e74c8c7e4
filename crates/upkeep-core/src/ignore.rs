use upkeep_manifest::MANIFEST_FILE_NAME;

/// Files an update must never overwrite or prune.
///
/// Rules ending in `/` match every path below that directory; other rules
/// match one file exactly. Matching is case-insensitive and treats `\` as
/// `/`. The resource's own `manifest.json` is always ignored.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    directories: Vec<String>,
    files: Vec<String>,
}

impl IgnoreRules {
    #[must_use]
    pub fn new(entries: &[String]) -> Self {
        let mut rules = Self::default();
        for entry in entries {
            let normalized = normalize(entry);
            let normalized = normalized.trim_start_matches("./");
            if normalized.is_empty() {
                continue;
            }
            if normalized.ends_with('/') {
                rules.directories.push(normalized.to_string());
            } else {
                rules.files.push(normalized.to_string());
            }
        }
        rules
    }

    /// `relative` is a path relative to the installation target directory.
    #[must_use]
    pub fn is_ignored(&self, relative: &str) -> bool {
        let path = normalize(relative);
        let path = path.trim_start_matches('/');

        if path == MANIFEST_FILE_NAME {
            return true;
        }

        self.directories.iter().any(|dir| path.starts_with(dir.as_str()))
            || self.files.iter().any(|file| path == file.as_str())
    }
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/").to_lowercase()
}
