//! Display state of the update panel.

use chrono::{DateTime, Local};

use crate::model::{progress_percentage, AppIdentity, DownloadProgress, UpdateInfo};

pub const INSTALLED_MESSAGE: &str = "Update installed successfully! The application will restart.";

/// A dismissible message shown on top of the panel. Never blocks input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub raised_at: DateTime<Local>,
}

impl Notification {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            raised_at: Local::now(),
        }
    }

    pub fn installed() -> Self {
        Self::new(INSTALLED_MESSAGE)
    }
}

/// Everything the panel renders from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PanelState {
    /// Blank until both identity requests succeed
    pub identity: AppIdentity,
    /// Last check result, replaced wholesale by each successful check
    pub update_info: Option<UpdateInfo>,
    pub checking: bool,
    pub downloading: bool,
    /// Latest progress payload of the running download
    pub progress: Option<DownloadProgress>,
    pub error: Option<String>,
    pub notification: Option<Notification>,
}

/// Which branch of the panel is showing. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelPhase {
    Idle,
    Checking,
    NoUpdateAvailable,
    UpdateAvailable,
    Downloading,
}

impl PanelState {
    /// True while either user action is waiting on the backend.
    pub fn busy(&self) -> bool {
        self.checking || self.downloading
    }

    pub fn phase(&self) -> PanelPhase {
        if self.checking {
            PanelPhase::Checking
        } else if self.downloading {
            PanelPhase::Downloading
        } else {
            match &self.update_info {
                Some(info) if info.available => PanelPhase::UpdateAvailable,
                Some(_) => PanelPhase::NoUpdateAvailable,
                None => PanelPhase::Idle,
            }
        }
    }

    pub fn progress_percentage(&self) -> u32 {
        progress_percentage(self.progress.as_ref())
    }
}
