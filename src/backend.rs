//! The request side of the update backend.

use std::future::Future;

use thiserror::Error;

use crate::events::EventHub;
use crate::model::UpdateInfo;

#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend answered the request with a failure message
    #[error("{0}")]
    Rejected(String),
    #[error("backend disconnected")]
    Disconnected,
    #[error("backend i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed backend frame: {0}")]
    Protocol(String),
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        BackendError::Protocol(e.to_string())
    }
}

/// An update backend: four request operations and the hub its events arrive on.
///
/// Every request is a single round trip. `download_and_install_update` may
/// resolve before or after the work finishes, completion is only ever signalled
/// through an `updater-finished` event on [`UpdateBackend::events`].
pub trait UpdateBackend: Send + Sync + 'static {
    fn get_app_version(&self) -> impl Future<Output = Result<String, BackendError>> + Send;

    fn get_app_environment(&self) -> impl Future<Output = Result<String, BackendError>> + Send;

    fn check_for_updates(&self) -> impl Future<Output = Result<UpdateInfo, BackendError>> + Send;

    fn download_and_install_update(&self) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn events(&self) -> &EventHub;
}
