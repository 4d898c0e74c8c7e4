#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use upkeep_core::manifest::{Manifest, ManifestAssets, Version};
use upkeep_core::{InstallStateStore, NoOpLogger, UpdaterConfig, UpdaterContext};

pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("archive directory should be created");
    }
    let file = std::fs::File::create(path).expect("archive file should be created");
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default().unix_permissions(0o644);
    for (name, data) in entries {
        if name.ends_with('/') {
            zip.add_directory(*name, options)
                .expect("directory entry should be written");
        } else {
            zip.start_file(*name, options).expect("zip entry should start");
            zip.write_all(data).expect("zip entry should be written");
        }
    }
    zip.finish().expect("zip archive should be finalized");
}

pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
    let path = temp_dir.path().join("archive.zip");
    write_zip(&path, entries);
    std::fs::read(&path).expect("archive should be readable")
}

pub fn context(working_dir: &Path) -> UpdaterContext {
    let config = UpdaterConfig::for_working_dir(working_dir).with_retry_delays(vec![0, 0, 0]);
    UpdaterContext::new(config, Arc::new(NoOpLogger)).expect("context should build")
}

pub fn manifest(id: &str, version: &str, asset_uri: &str) -> Manifest {
    Manifest::new(
        id,
        id,
        Version::parse(version).expect("version should parse"),
        "plugin",
    )
    .with_assets(ManifestAssets::new(asset_uri))
}

pub fn uri_of(path: &Path) -> String {
    path.display().to_string()
}

pub fn read(path: impl AsRef<Path>) -> String {
    std::fs::read_to_string(path.as_ref())
        .unwrap_or_else(|error| panic!("{} should be readable: {error}", path.as_ref().display()))
}

/// Minimal HTTP/1.1 responder serving fixed bodies for `GET` and `HEAD`,
/// answering 404 for everything else and recording each request line.
pub struct TestServer {
    pub base: String,
    routes: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    pub async fn start(routes: Vec<(&str, Vec<u8>)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let address = listener.local_addr().expect("listener should have an address");
        let routes: Arc<Mutex<HashMap<String, Vec<u8>>>> = Arc::new(Mutex::new(
            routes
                .into_iter()
                .map(|(path, body)| (path.to_string(), body))
                .collect(),
        ));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let served = routes.clone();
        let recorded = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let routes = served.clone();
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    let mut buffer = Vec::new();
                    let mut chunk = [0_u8; 1024];
                    while !buffer.windows(4).any(|window| window == b"\r\n\r\n") {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(read) => buffer.extend_from_slice(&chunk[..read]),
                        }
                    }
                    let head = String::from_utf8_lossy(&buffer).to_string();
                    let mut request_line = head.lines().next().unwrap_or_default().split(' ');
                    let method = request_line.next().unwrap_or_default().to_string();
                    let path = request_line.next().unwrap_or_default().to_string();
                    recorded
                        .lock()
                        .expect("request log should lock")
                        .push(format!("{method} {path}"));

                    let body = routes
                        .lock()
                        .expect("routes should lock")
                        .get(&path)
                        .cloned();
                    let response = match body {
                        Some(body) => {
                            let mut response = format!(
                                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                                body.len()
                            )
                            .into_bytes();
                            if method != "HEAD" {
                                response.extend_from_slice(&body);
                            }
                            response
                        }
                        None => b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                            .to_vec(),
                    };
                    let _ = socket.write_all(&response).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self {
            base: format!("http://{address}"),
            routes,
            requests,
        }
    }

    /// Add or replace a route after the server has started, for bodies that
    /// embed the server's own address.
    pub fn serve(&self, path: &str, body: Vec<u8>) {
        self.routes
            .lock()
            .expect("routes should lock")
            .insert(path.to_string(), body);
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("request log should lock").clone()
    }

    pub fn count(&self, request: &str) -> usize {
        self.requests()
            .iter()
            .filter(|line| line.as_str() == request)
            .count()
    }
}

pub fn state_record(working_dir: &Path, id: &str) -> PathBuf {
    InstallStateStore::new(working_dir.join(".downloads").join("state")).record_path(id)
}
