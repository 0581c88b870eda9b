//! Data exchanged between the panel and the update backend.

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// Static identity of the running application.
///
/// Fetched once when the panel mounts; both fields stay empty until then.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppIdentity {
    pub version: String,
    pub environment: String,
}

/// Result of a single update check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub version: String,
    pub notes: String,
    pub date: String,
    pub available: bool,
}

impl UpdateInfo {
    /// The answer a backend gives when the running version is current
    pub fn up_to_date() -> Self {
        Self {
            version: String::new(),
            notes: "No updates available".to_string(),
            date: String::new(),
            available: false,
        }
    }
}

/// Payload of an `updater-progress` event.
#[skip_serializing_none]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub chunk_length: u64,
    #[serde(default)]
    pub content_length: Option<u64>,
}

impl DownloadProgress {
    pub fn new(chunk_length: u64, content_length: Option<u64>) -> Self {
        Self { chunk_length, content_length }
    }

    /// Rounded percentage of `chunk_length` over `content_length`.
    ///
    /// Unknown (or zero) totals yield 0. The value is not clamped, so a
    /// backend reporting more bytes than announced produces more than 100.
    pub fn percentage(&self) -> u32 {
        match self.content_length {
            Some(total) if total > 0 => {
                (self.chunk_length as f64 / total as f64 * 100.0).round() as u32
            }
            _ => 0,
        }
    }
}

/// Percentage for an optional progress record, 0 when nothing was received yet.
pub fn progress_percentage(progress: Option<&DownloadProgress>) -> u32 {
    progress.map(DownloadProgress::percentage).unwrap_or(0)
}
