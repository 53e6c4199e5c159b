//! Fixtures shared by the unit tests: an in-process HTTP server that serves a
//! manifest and mod files, and counts what was requested.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;

use crate::config::LauncherConfig;
use crate::networking::NetworkClient;

#[derive(Default)]
struct Fixture {
    manifest: Option<String>,
    files: HashMap<String, Vec<u8>>,
    hits: HashMap<String, usize>,
}

type Shared = Arc<Mutex<Fixture>>;

pub struct TestServer {
    addr: SocketAddr,
    fixture: Shared,
}

async fn serve_manifest(State(fixture): State<Shared>) -> Response {
    let mut fixture = fixture.lock().unwrap();
    *fixture.hits.entry("manifest.json".into()).or_default() += 1;
    match fixture.manifest.clone() {
        Some(body) => body.into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn serve_file(State(fixture): State<Shared>, UrlPath(name): UrlPath<String>) -> Response {
    let mut fixture = fixture.lock().unwrap();
    *fixture.hits.entry(name.clone()).or_default() += 1;
    match fixture.files.get(&name) {
        Some(bytes) => bytes.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

impl TestServer {
    pub async fn start() -> Self {
        let fixture = Shared::default();
        let app = Router::new()
            .route("/manifest.json", get(serve_manifest))
            .route("/files/{name}", get(serve_file))
            .with_state(fixture.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, fixture }
    }

    pub fn manifest_url(&self) -> String {
        format!("http://{}/manifest.json", self.addr)
    }

    pub fn file_url(&self, name: &str) -> String {
        format!("http://{}/files/{name}", self.addr)
    }

    pub fn put_file(&self, name: &str, bytes: Vec<u8>) {
        self.fixture
            .lock()
            .unwrap()
            .files
            .insert(name.to_owned(), bytes);
    }

    pub fn set_manifest(&self, body: impl Into<String>) {
        self.fixture.lock().unwrap().manifest = Some(body.into());
    }

    /// Publish a manifest listing `names` with the digests of the stored files.
    pub fn publish(&self, names: &[&str]) {
        let files: Vec<serde_json::Value> = {
            let fixture = self.fixture.lock().unwrap();
            names
                .iter()
                .map(|name| {
                    serde_json::json!({
                        "name": name,
                        "url": self.file_url(name),
                        "hash": sha256_hex(&fixture.files[*name]),
                    })
                })
                .collect()
        };
        self.set_manifest(serde_json::json!({ "files": files }).to_string());
    }

    pub fn hits(&self, name: &str) -> usize {
        self.fixture
            .lock()
            .unwrap()
            .hits
            .get(name)
            .copied()
            .unwrap_or(0)
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn test_client() -> NetworkClient {
    NetworkClient::new(Duration::from_secs(5), Duration::from_secs(30))
}

/// Defaults pointed at `manifest_url`, reconciling into `mods_dir`.
pub fn test_config(manifest_url: &str, mods_dir: &Path) -> LauncherConfig {
    LauncherConfig {
        manifest_url: manifest_url.to_owned(),
        game_dir: mods_dir.parent().unwrap().to_path_buf(),
        mods_subdir: mods_dir.file_name().unwrap().to_string_lossy().into_owned(),
        request_timeout_secs: 5,
        download_timeout_secs: 30,
        ..LauncherConfig::default()
    }
}
