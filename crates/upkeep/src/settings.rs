use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use upkeep_core::UpdaterConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub debug_logging: bool,
    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,
    /// Download cache; relative paths resolve against the working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
    #[serde(default = "default_retry_delays")]
    pub retry_delays_secs: Vec<u64>,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_retry_delays() -> Vec<u64> {
    vec![0, 2, 5]
}

fn default_http_timeout() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
            download_dir: None,
            retry_delays_secs: default_retry_delays(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

impl Settings {
    /// Read settings from `path`. A missing or malformed file yields the
    /// defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|error| {
                eprintln!("Ignoring malformed settings file {}: {error}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn updater_config(&self, working_dir: &Path) -> UpdaterConfig {
        let mut config = UpdaterConfig::for_working_dir(working_dir)
            .with_retry_delays(self.retry_delays_secs.clone());
        if let Some(download_dir) = &self.download_dir {
            config = config.with_download_dir(working_dir.join(download_dir));
        }
        config.http_timeout_secs = self.http_timeout_secs;
        config
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::Settings;

    #[test]
    fn empty_document_uses_defaults() {
        let settings: Settings = serde_json::from_str("{}").expect("settings should parse");

        assert_eq!(settings, Settings::default());
        assert_eq!(settings.retry_delays_secs, vec![0, 2, 5]);
        assert_eq!(settings.http_timeout_secs, 30);
        assert!(!settings.debug_logging);
    }

    #[test]
    fn load_falls_back_to_defaults() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let path = temp_dir.path().join("settings.json");
        assert_eq!(Settings::load(&path), Settings::default());

        std::fs::write(&path, "{ not json").expect("settings file should be written");
        assert_eq!(Settings::load(&path), Settings::default());

        std::fs::write(&path, r#"{"debug_logging": true, "retry_delays_secs": [1]}"#)
            .expect("settings file should be written");
        let settings = Settings::load(&path);
        assert!(settings.debug_logging);
        assert_eq!(settings.retry_delays_secs, vec![1]);
    }

    #[test]
    fn updater_config_applies_overrides() {
        let settings = Settings {
            download_dir: Some("cache".into()),
            retry_delays_secs: vec![0, 0],
            http_timeout_secs: 5,
            ..Settings::default()
        };

        let config = settings.updater_config(Path::new("/srv/game"));

        assert_eq!(config.download_dir, Path::new("/srv/game/cache"));
        assert_eq!(config.download_attempts(), 2);
        assert_eq!(config.http_timeout_secs, 5);
    }
}
