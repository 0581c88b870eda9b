//! Update backend driven by a release manifest served over HTTP.
//!
//! The manifest is a small JSON document:
//!
//! ```json
//! {
//!   "version": "1.2.0",
//!   "notes": "...",
//!   "pub_date": "2025-03-01T12:00:00Z",
//!   "url": "https://.../app.bin"
//! }
//! ```
//!
//! A check stores the newer release as the pending update, a later
//! download-and-install consumes it.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use futures::lock::Mutex;
use semver::Version;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::backend::{BackendError, UpdateBackend};
use crate::events::{BackendEvent, EventHub};
use crate::model::{DownloadProgress, UpdateInfo};

const CHUNK_SIZE: usize = 16 * 1024;

#[derive(Debug, Error)]
enum ReleaseError {
    #[error(transparent)]
    Http(#[from] Box<ureq::Error>),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("invalid version: {0}")]
    Version(#[from] semver::Error),
    #[error("invalid manifest: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<ureq::Error> for ReleaseError {
    fn from(e: ureq::Error) -> Self {
        ReleaseError::Http(Box::new(e))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseManifest {
    pub version: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub pub_date: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct ReleaseConfig {
    /// Where the release manifest is fetched from
    pub manifest_url: String,
    /// Version of the running application
    pub current_version: String,
    /// Reported environment, derived from the build when unset
    pub environment: Option<String>,
    /// Final location of the downloaded artifact
    pub install_path: PathBuf,
}

impl ReleaseConfig {
    pub fn new(manifest_url: impl Into<String>, install_path: impl Into<PathBuf>) -> Self {
        Self {
            manifest_url: manifest_url.into(),
            current_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: None,
            install_path: install_path.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingUpdate {
    version: String,
    url: String,
}

pub struct ReleaseBackend {
    config: ReleaseConfig,
    pending: Mutex<Option<PendingUpdate>>,
    hub: EventHub,
}

impl ReleaseBackend {
    pub fn new(config: ReleaseConfig) -> Self {
        Self {
            config,
            pending: Mutex::new(None),
            hub: EventHub::new(),
        }
    }

    #[instrument(skip_all, fields(manifest = %self.config.manifest_url))]
    async fn check(&self) -> Result<UpdateInfo, ReleaseError> {
        let url = self.config.manifest_url.clone();
        let manifest = tokio::task::spawn_blocking(move || fetch_manifest(&url)).await??;

        if !is_newer(&self.config.current_version, &manifest.version)? {
            info!(current = %self.config.current_version, "already up-to-date");
            return Ok(UpdateInfo::up_to_date());
        }

        info!(
            current = %self.config.current_version,
            latest = %manifest.version,
            "update available"
        );

        let info = UpdateInfo {
            version: manifest.version.clone(),
            notes: manifest.notes.clone().unwrap_or_default(),
            date: display_date(manifest.pub_date.as_deref()),
            available: true,
        };

        *self.pending.lock().await = Some(PendingUpdate {
            version: manifest.version,
            url: manifest.url,
        });

        Ok(info)
    }

    async fn install(&self, update: PendingUpdate) -> Result<u64, ReleaseError> {
        info!(version = %update.version, url = %update.url, "downloading update");

        let hub = self.hub.clone();
        let target = self.config.install_path.clone();
        let written =
            tokio::task::spawn_blocking(move || download_to(&update.url, &target, &hub)).await??;

        info!(bytes = written, path = %self.config.install_path.display(), "update installed");
        Ok(written)
    }
}

impl UpdateBackend for ReleaseBackend {
    async fn get_app_version(&self) -> Result<String, BackendError> {
        Ok(self.config.current_version.clone())
    }

    async fn get_app_environment(&self) -> Result<String, BackendError> {
        Ok(self.config.environment.clone().unwrap_or_else(default_environment))
    }

    async fn check_for_updates(&self) -> Result<UpdateInfo, BackendError> {
        self.check()
            .await
            .map_err(|e| BackendError::Rejected(format!("Failed to check for updates: {e}")))
    }

    async fn download_and_install_update(&self) -> Result<(), BackendError> {
        let update = self
            .pending
            .lock()
            .await
            .take()
            .ok_or_else(|| BackendError::Rejected("No pending update found".to_string()))?;

        self.install(update).await.map_err(|e| {
            BackendError::Rejected(format!("Failed to download and install update: {e}"))
        })?;

        self.hub.emit(BackendEvent::Finished);
        Ok(())
    }

    fn events(&self) -> &EventHub {
        &self.hub
    }
}

/// Variables consulted for the environment name, first one set wins.
const ENVIRONMENT_VARS: [&str; 2] = ["APP_ENV", "TAURI_ENV"];

/// `development` for debug builds, otherwise `APP_ENV`, `TAURI_ENV` or `production`.
pub fn default_environment() -> String {
    environment_from(cfg!(debug_assertions), |name| std::env::var(name).ok())
}

fn environment_from(debug_build: bool, var: impl Fn(&str) -> Option<String>) -> String {
    if debug_build {
        return "development".to_string();
    }
    ENVIRONMENT_VARS
        .iter()
        .find_map(|name| var(name).filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "production".to_string())
}

fn fetch_manifest(url: &str) -> Result<ReleaseManifest, ReleaseError> {
    debug!(url, "fetching release manifest");
    let body = ureq::get(url).call()?.into_string()?;
    Ok(serde_json::from_str(&body)?)
}

fn parse_version(raw: &str) -> Result<Version, semver::Error> {
    Version::parse(raw.trim().trim_start_matches('v'))
}

fn is_newer(current: &str, candidate: &str) -> Result<bool, semver::Error> {
    Ok(parse_version(candidate)? > parse_version(current)?)
}

fn display_date(raw: Option<&str>) -> String {
    match raw {
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(date) => date.with_timezone(&Utc).format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            Err(_) => raw.to_string(),
        },
        None => "Unknown".to_string(),
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    target.with_file_name(name)
}

/// Stream `url` into `target`, reporting cumulative progress on `hub`.
///
/// Bytes land in a sibling `.part` file which is renamed over `target` once complete.
fn download_to(url: &str, target: &Path, hub: &EventHub) -> Result<u64, ReleaseError> {
    let response = ureq::get(url).call()?;
    let content_length = response
        .header("Content-Length")
        .and_then(|v| v.trim().parse::<u64>().ok());

    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let partial = partial_path(target);
    let mut file = File::create(&partial)?;
    let mut reader = response.into_reader();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut downloaded = 0u64;

    let copied = (|| -> Result<(), ReleaseError> {
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            file.write_all(&buf[..n])?;
            downloaded += n as u64;
            hub.emit(BackendEvent::Progress(DownloadProgress::new(downloaded, content_length)));
        }
        file.sync_all()?;
        Ok(())
    })();

    if let Err(e) = copied {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }

    drop(file);
    fs::rename(&partial, target)?;
    Ok(downloaded)
}
