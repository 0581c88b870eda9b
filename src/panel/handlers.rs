//! Message handlers for the update panel.
//!
//! Each handler updates state synchronously and optionally hands back an async
//! task for the runtime to spawn. Tasks resolve to the message carrying their result.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error, info, trace};

use crate::backend::{BackendError, UpdateBackend};
use crate::model::AppIdentity;
use crate::panel::messages::PanelMessage;
use crate::panel::state::{Notification, PanelState};

/// A backend round trip whose outcome becomes the next message, if any.
pub type Task = BoxFuture<'static, Option<PanelMessage>>;

/// Result of handling a panel message
pub enum HandleResult {
    /// No task to run
    None,
    /// Spawn this task and feed its message back into the panel
    Task(Task),
}

pub fn handle_message<B: UpdateBackend>(
    msg: PanelMessage,
    state: &mut PanelState,
    backend: &Arc<B>,
) -> HandleResult {
    match msg {
        PanelMessage::IdentityLoaded(identity) => {
            debug!(
                version = %identity.version,
                environment = %identity.environment,
                "app identity loaded"
            );
            state.identity = identity;
            HandleResult::None
        }

        PanelMessage::CheckRequested => {
            if state.busy() {
                debug!(
                    checking = state.checking,
                    downloading = state.downloading,
                    "ignoring check request, an action is in progress"
                );
                return HandleResult::None;
            }

            state.checking = true;
            state.error = None;
            HandleResult::Task(check_for_updates_task(backend.clone()))
        }

        PanelMessage::CheckCompleted(result) => {
            state.checking = false;
            match result {
                Ok(info) => {
                    if info.available {
                        info!(version = %info.version, "update available");
                    } else {
                        info!("already up-to-date");
                    }
                    state.update_info = Some(info);
                }
                Err(e) => {
                    error!("failed to check for updates: {}", e);
                    state.error = Some(e);
                }
            }
            HandleResult::None
        }

        PanelMessage::InstallRequested => {
            if state.busy() {
                debug!(
                    checking = state.checking,
                    downloading = state.downloading,
                    "ignoring install request, an action is in progress"
                );
                return HandleResult::None;
            }

            state.downloading = true;
            state.error = None;
            state.progress = None;
            HandleResult::Task(download_and_install_task(backend.clone()))
        }

        PanelMessage::InstallSettled(result) => {
            match result {
                Ok(()) => debug!("install request accepted, waiting for completion"),
                Err(e) => {
                    error!("failed to start update: {}", e);
                    state.error = Some(e);
                    state.downloading = false;
                }
            }
            HandleResult::None
        }

        PanelMessage::Progress(progress) => {
            trace!(
                chunk_length = progress.chunk_length,
                content_length = ?progress.content_length,
                "download progress"
            );
            state.progress = Some(progress);
            HandleResult::None
        }

        PanelMessage::Finished => {
            info!("update installed, application will restart");
            state.downloading = false;
            state.progress = None;
            state.notification = Some(Notification::installed());
            HandleResult::None
        }

        PanelMessage::DismissNotification => {
            state.notification = None;
            HandleResult::None
        }
    }
}

/// Fetch version then environment. Failures are logged and leave the identity blank.
pub fn load_identity_task<B: UpdateBackend>(backend: Arc<B>) -> Task {
    async move {
        let identity: Result<AppIdentity, BackendError> = async {
            let version = backend.get_app_version().await?;
            let environment = backend.get_app_environment().await?;
            Ok(AppIdentity { version, environment })
        }
        .await;

        match identity {
            Ok(identity) => Some(PanelMessage::IdentityLoaded(identity)),
            Err(e) => {
                error!("failed to get app info: {}", e);
                None
            }
        }
    }
    .boxed()
}

fn check_for_updates_task<B: UpdateBackend>(backend: Arc<B>) -> Task {
    async move {
        let result = backend.check_for_updates().await.map_err(|e| e.to_string());
        Some(PanelMessage::CheckCompleted(result))
    }
    .boxed()
}

fn download_and_install_task<B: UpdateBackend>(backend: Arc<B>) -> Task {
    async move {
        let result = backend.download_and_install_update().await.map_err(|e| e.to_string());
        Some(PanelMessage::InstallSettled(result))
    }
    .boxed()
}
