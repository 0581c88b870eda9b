use crate::events::BackendEvent;
use crate::model::{AppIdentity, DownloadProgress, UpdateInfo};

/// Everything that can change panel state, in the order it is processed.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelMessage {
    // Startup
    IdentityLoaded(AppIdentity),

    // User actions
    CheckRequested,
    InstallRequested,
    DismissNotification,

    // Request results
    CheckCompleted(Result<UpdateInfo, String>),
    /// The download request returned. Success only means the backend took it,
    /// completion is reported by [`PanelMessage::Finished`].
    InstallSettled(Result<(), String>),

    // Backend events
    Progress(DownloadProgress),
    Finished,
}

impl From<BackendEvent> for PanelMessage {
    fn from(event: BackendEvent) -> Self {
        match event {
            BackendEvent::Progress(progress) => PanelMessage::Progress(progress),
            BackendEvent::Finished => PanelMessage::Finished,
        }
    }
}
