use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::delta::{BlockDelta, DeltaCodec};
use crate::embedded::{EmbeddedManifestReader, ZipEmbeddedReader};
use crate::logger::Logger;

const DOWNLOAD_DIR_NAME: &str = ".downloads";
const STATE_DIR_NAME: &str = "state";
const DEFAULT_RETRY_DELAYS_SECS: [u64; 3] = [0, 2, 5];
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Process-wide updater settings.
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// Relative installation paths resolve against this directory.
    pub working_dir: PathBuf,
    /// Cache for downloaded archives and delta patches.
    pub download_dir: PathBuf,
    /// Where install-state records live.
    pub state_dir: PathBuf,
    /// Used when neither the manifest nor the installation says whether
    /// residual files should be cleared.
    pub default_clear_residual_files: bool,
    /// One download attempt per entry, each preceded by its delay.
    pub retry_delays_secs: Vec<u64>,
    pub http_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl UpdaterConfig {
    #[must_use]
    pub fn for_working_dir(working_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        let download_dir = working_dir.join(DOWNLOAD_DIR_NAME);
        Self {
            state_dir: download_dir.join(STATE_DIR_NAME),
            download_dir,
            working_dir,
            default_clear_residual_files: true,
            retry_delays_secs: DEFAULT_RETRY_DELAYS_SECS.to_vec(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }

    /// Configuration rooted at the process working directory.
    ///
    /// # Errors
    /// Returns an error when the current directory cannot be determined.
    pub fn from_current_dir() -> std::io::Result<Self> {
        Ok(Self::for_working_dir(std::env::current_dir()?))
    }

    /// Move the download cache (and the state records inside it).
    #[must_use]
    pub fn with_download_dir(mut self, download_dir: impl Into<PathBuf>) -> Self {
        self.download_dir = download_dir.into();
        self.state_dir = self.download_dir.join(STATE_DIR_NAME);
        self
    }

    #[must_use]
    pub fn with_retry_delays(mut self, retry_delays_secs: Vec<u64>) -> Self {
        self.retry_delays_secs = retry_delays_secs;
        self
    }

    #[must_use]
    pub fn download_attempts(&self) -> usize {
        self.retry_delays_secs.len().max(1)
    }

    #[must_use]
    pub fn retry_delay(&self, attempt: usize) -> Duration {
        Duration::from_secs(self.retry_delays_secs.get(attempt).copied().unwrap_or(0))
    }

    /// Resolve a possibly relative path against the working directory.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }

    /// HTTP client with this configuration's timeouts.
    ///
    /// # Errors
    /// Returns an error when the TLS backend cannot be initialised.
    pub fn http_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.http_timeout_secs))
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .user_agent(format!("upkeep/{}", env!("CARGO_PKG_VERSION")))
            .build()
    }
}

/// Everything a sync pass needs, handed to each component explicitly.
#[derive(Clone)]
pub struct UpdaterContext {
    pub config: Arc<UpdaterConfig>,
    pub logger: Arc<dyn Logger>,
    pub client: reqwest::Client,
    pub delta: Arc<dyn DeltaCodec>,
    pub embedded: Arc<dyn EmbeddedManifestReader>,
}

impl UpdaterContext {
    /// Context with the stock delta codec and embedded-manifest reader.
    ///
    /// # Errors
    /// Returns an error when the HTTP client cannot be built.
    pub fn new(config: UpdaterConfig, logger: Arc<dyn Logger>) -> Result<Self, reqwest::Error> {
        let client = config.http_client()?;
        Ok(Self {
            config: Arc::new(config),
            logger,
            client,
            delta: Arc::new(BlockDelta::default()),
            embedded: Arc::new(ZipEmbeddedReader),
        })
    }

    #[must_use]
    pub fn with_delta_codec(mut self, codec: Arc<dyn DeltaCodec>) -> Self {
        self.delta = codec;
        self
    }

    #[must_use]
    pub fn with_embedded_reader(mut self, reader: Arc<dyn EmbeddedManifestReader>) -> Self {
        self.embedded = reader;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::UpdaterConfig;

    #[test]
    fn defaults_derive_from_working_dir() {
        let config = UpdaterConfig::for_working_dir("/opt/game");
        assert_eq!(config.download_dir, Path::new("/opt/game/.downloads"));
        assert_eq!(config.state_dir, Path::new("/opt/game/.downloads/state"));
        assert!(config.default_clear_residual_files);
        assert_eq!(config.download_attempts(), 3);
    }

    #[test]
    fn with_download_dir_moves_state_dir() {
        let config = UpdaterConfig::for_working_dir("/opt/game").with_download_dir("/var/cache/up");
        assert_eq!(config.state_dir, Path::new("/var/cache/up/state"));
    }

    #[test]
    fn retry_delays_drive_attempt_count() {
        let config = UpdaterConfig::for_working_dir("/opt/game").with_retry_delays(vec![]);
        assert_eq!(config.download_attempts(), 1);
        assert_eq!(config.retry_delay(0), Duration::ZERO);

        let config = config.with_retry_delays(vec![0, 7]);
        assert_eq!(config.download_attempts(), 2);
        assert_eq!(config.retry_delay(1), Duration::from_secs(7));
    }

    #[cfg(unix)]
    #[test]
    fn resolve_keeps_absolute_paths() {
        let config = UpdaterConfig::for_working_dir("/opt/game");
        assert_eq!(config.resolve(Path::new("plugins")), Path::new("/opt/game/plugins"));
        assert_eq!(config.resolve(Path::new("/srv/plugins")), Path::new("/srv/plugins"));
    }
}
