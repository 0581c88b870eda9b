//! Update panel: check for and install application updates through a backend
//! reached over a request/response and event bridge.

pub mod backend;
pub mod bridge;
pub mod events;
pub mod host;
pub mod model;
pub mod panel;
pub mod release;

pub use backend::{BackendError, UpdateBackend};
pub use events::{BackendEvent, EventHub, EventKind, Subscription};
pub use model::{AppIdentity, DownloadProgress, UpdateInfo};
pub use panel::UpdatePanel;
