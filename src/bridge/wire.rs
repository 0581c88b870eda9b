//! Frames exchanged over the bridge, one JSON object per line.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

use crate::events::BackendEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    GetAppVersion,
    GetAppEnvironment,
    CheckForUpdates,
    DownloadAndInstallUpdate,
}

impl Command {
    pub fn name(self) -> &'static str {
        match self {
            Command::GetAppVersion => "get_app_version",
            Command::GetAppEnvironment => "get_app_environment",
            Command::CheckForUpdates => "check_for_updates",
            Command::DownloadAndInstallUpdate => "download_and_install_update",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        serde_json::from_value(Value::String(name.to_string())).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    pub command: Command,
}

/// Request as read by a host, before the command name is validated.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRequestFrame {
    pub id: u64,
    pub command: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ResponseFrame {
    pub fn ok(id: u64, result: Value) -> Self {
        Self { id, result: Some(result), error: None }
    }

    pub fn err(id: u64, error: impl Into<String>) -> Self {
        Self { id, result: None, error: Some(error.into()) }
    }

    pub fn into_result(self) -> Result<Value, String> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Anything a host may write. Responses carry an `id`, events never do.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum HostFrame {
    Response(ResponseFrame),
    Event(BackendEvent),
}
