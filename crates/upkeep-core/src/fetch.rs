use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use upkeep_platform::ResourceLocation;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{context} {location}: {source}")]
    Http {
        context: &'static str,
        location: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{location} answered HTTP {status}")]
    Status {
        location: String,
        status: reqwest::StatusCode,
    },
    #[error("{context} {path}: {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    fn http(context: &'static str, location: &str, source: reqwest::Error) -> Self {
        Self::Http {
            context,
            location: location.to_string(),
            source,
        }
    }

    fn io(context: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether the resource simply does not exist (HTTP 404 or a missing
    /// local file).
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status == reqwest::StatusCode::NOT_FOUND,
            Self::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            Self::Http { .. } => false,
        }
    }
}

/// Read a whole resource into memory.
///
/// # Errors
/// Returns an error when the request, the status or the read fails.
pub async fn fetch_bytes(
    client: &reqwest::Client,
    location: &ResourceLocation,
) -> Result<Vec<u8>, FetchError> {
    match location {
        ResourceLocation::Remote(url) => {
            let response = client
                .get(url)
                .send()
                .await
                .map_err(|error| FetchError::http("request failed for", url, error))?;
            let response = check_status(url, response)?;
            let bytes = response
                .bytes()
                .await
                .map_err(|error| FetchError::http("failed to read body of", url, error))?;
            Ok(bytes.to_vec())
        }
        ResourceLocation::Local(path) => tokio::fs::read(path)
            .await
            .map_err(|error| FetchError::io("failed to read", path, error)),
    }
}

/// `HEAD` for remote resources, existence for local ones.
pub async fn probe(client: &reqwest::Client, location: &ResourceLocation) -> bool {
    match location {
        ResourceLocation::Remote(url) => client
            .head(url)
            .send()
            .await
            .is_ok_and(|response| response.status().is_success()),
        ResourceLocation::Local(path) => tokio::fs::metadata(path)
            .await
            .is_ok_and(|metadata| metadata.is_file()),
    }
}

/// Read a checksum sidecar. The first whitespace-separated token is the
/// digest. `Ok(None)` means no sidecar is published.
///
/// # Errors
/// Returns an error for any failure other than "not found".
pub async fn fetch_checksum(
    client: &reqwest::Client,
    location: &ResourceLocation,
) -> Result<Option<String>, FetchError> {
    match fetch_bytes(client, location).await {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes)
            .split_whitespace()
            .next()
            .map(str::to_ascii_lowercase)),
        Err(error) if error.is_not_found() => Ok(None),
        Err(error) => Err(error),
    }
}

/// Stream a resource to `dest`, reporting the transferred fraction. Returns
/// the number of bytes written.
///
/// # Errors
/// Returns an error when the transfer or the write fails. A partially
/// written `dest` is left for the caller to clean up.
pub async fn fetch_to_file(
    client: &reqwest::Client,
    location: &ResourceLocation,
    dest: &Path,
    mut on_progress: impl FnMut(f32),
) -> Result<u64, FetchError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|error| FetchError::io("failed to create directory", parent, error))?;
    }

    let url = match location {
        ResourceLocation::Remote(url) => url,
        ResourceLocation::Local(path) => {
            let copied = tokio::fs::copy(path, dest)
                .await
                .map_err(|error| FetchError::io("failed to copy", path, error))?;
            on_progress(1.0);
            return Ok(copied);
        }
    };

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|error| FetchError::http("request failed for", url, error))?;
    let response = check_status(url, response)?;

    let total = response.content_length().unwrap_or(0);
    let mut downloaded: u64 = 0;

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|error| FetchError::io("failed to create", dest, error))?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|error| FetchError::http("download stream error for", url, error))?;
        file.write_all(&chunk)
            .await
            .map_err(|error| FetchError::io("failed to write", dest, error))?;
        downloaded += chunk.len() as u64;
        if total > 0 {
            #[allow(clippy::cast_precision_loss)]
            on_progress((downloaded as f64 / total as f64).min(1.0) as f32);
        }
    }

    file.flush()
        .await
        .map_err(|error| FetchError::io("failed to flush", dest, error))?;
    if total == 0 {
        on_progress(1.0);
    }

    Ok(downloaded)
}

fn check_status(url: &str, response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(FetchError::Status {
            location: url.to_string(),
            status,
        })
    }
}
