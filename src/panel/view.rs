//! Display model derived from [`PanelState`].
//!
//! The view decides what is visible and enabled; renderers only lay it out.

use crate::panel::state::PanelState;

pub const TITLE: &str = "Auto Updater";
pub const SECTION_TITLE: &str = "Application Updates";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonView {
    pub label: &'static str,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadView {
    /// Offered while no download is running
    Button(ButtonView),
    /// Running download. The bar only appears once a progress payload has arrived.
    InProgress { percentage: Option<u32> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultView {
    NoUpdates,
    Available {
        version: String,
        date: String,
        notes: String,
        download: DownloadView,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelView {
    pub version: String,
    pub environment: String,
    pub check_button: ButtonView,
    pub error: Option<String>,
    pub result: Option<ResultView>,
    pub notification: Option<String>,
}

impl PanelView {
    pub fn from_state(state: &PanelState) -> Self {
        let check_button = ButtonView {
            label: if state.checking { "Checking..." } else { "Check for Updates" },
            enabled: !state.busy(),
        };

        let result = state.update_info.as_ref().map(|info| {
            if !info.available {
                return ResultView::NoUpdates;
            }

            let download = if state.downloading {
                DownloadView::InProgress {
                    percentage: state.progress.as_ref().map(|_| state.progress_percentage()),
                }
            } else {
                DownloadView::Button(ButtonView {
                    label: "Download & Install Update",
                    enabled: !state.checking,
                })
            };

            ResultView::Available {
                version: info.version.clone(),
                date: info.date.clone(),
                notes: info.notes.clone(),
                download,
            }
        });

        Self {
            version: state.identity.version.clone(),
            environment: state.identity.environment.clone(),
            check_button,
            error: state.error.clone().filter(|e| !e.is_empty()),
            result,
            notification: state.notification.as_ref().map(|n| n.message.clone()),
        }
    }

    pub fn download_button(&self) -> Option<&ButtonView> {
        match &self.result {
            Some(ResultView::Available { download: DownloadView::Button(button), .. }) => {
                Some(button)
            }
            _ => None,
        }
    }
}
