//! Plain-text rendering of a [`PanelView`] for terminals.

use std::fmt::Write;

use crate::panel::view::{ButtonView, DownloadView, PanelView, ResultView, SECTION_TITLE, TITLE};

const BAR_WIDTH: usize = 30;

pub fn render(view: &PanelView) -> String {
    let mut out = String::new();
    // writing into a String cannot fail
    let _ = write_view(&mut out, view);
    out
}

fn write_view(out: &mut String, view: &PanelView) -> std::fmt::Result {
    writeln!(out, "== {TITLE} ==")?;
    writeln!(out, "Version: {}", view.version)?;
    writeln!(out, "Environment: {}", view.environment)?;
    writeln!(out)?;

    writeln!(out, "{SECTION_TITLE}")?;
    writeln!(out, "{}  (c)", button(&view.check_button))?;

    if let Some(error) = &view.error {
        writeln!(out, "Error: {error}")?;
    }

    match &view.result {
        None => {}
        Some(ResultView::NoUpdates) => {
            writeln!(out)?;
            writeln!(out, "No Updates Available")?;
            writeln!(out, "You're running the latest version!")?;
        }
        Some(ResultView::Available { version, date, notes, download }) => {
            writeln!(out)?;
            writeln!(out, "Update Available!")?;
            writeln!(out, "Version: {version}")?;
            writeln!(out, "Date: {date}")?;
            writeln!(out, "Release Notes:")?;
            for line in notes.lines() {
                writeln!(out, "    {line}")?;
            }

            match download {
                DownloadView::Button(b) => writeln!(out, "{}  (i)", button(b))?,
                DownloadView::InProgress { percentage } => {
                    writeln!(out, "Downloading update...")?;
                    if let Some(pct) = percentage {
                        writeln!(out, "{}", progress_bar(*pct))?;
                    }
                }
            }
        }
    }

    if let Some(notification) = &view.notification {
        writeln!(out)?;
        writeln!(out, "* {notification}  (d to dismiss)")?;
    }

    Ok(())
}

fn button(b: &ButtonView) -> String {
    if b.enabled {
        format!("[ {} ]", b.label)
    } else {
        format!("[ {} ] (disabled)", b.label)
    }
}

/// `[#######.......] 50%`, the fill is capped at the bar width but the number is not.
pub fn progress_bar(percentage: u32) -> String {
    let filled = (percentage.min(100) as usize * BAR_WIDTH) / 100;
    format!("[{}{}] {}%", "#".repeat(filled), ".".repeat(BAR_WIDTH - filled), percentage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DownloadProgress, UpdateInfo};
    use crate::panel::state::{Notification, PanelState};

    #[test]
    fn progress_bar_fill() {
        assert_eq!(progress_bar(0), format!("[{}] 0%", ".".repeat(30)));
        assert_eq!(progress_bar(50), format!("[{}{}] 50%", "#".repeat(15), ".".repeat(15)));
        assert_eq!(progress_bar(130), format!("[{}] 130%", "#".repeat(30)));
    }

    #[test]
    fn renders_available_update_while_downloading() {
        let state = PanelState {
            update_info: Some(UpdateInfo {
                version: "2.0.0".to_string(),
                notes: "line one\nline two".to_string(),
                date: "Unknown".to_string(),
                available: true,
            }),
            downloading: true,
            progress: Some(DownloadProgress::new(3, Some(4))),
            ..Default::default()
        };

        let text = render(&PanelView::from_state(&state));
        assert!(text.contains("[ Check for Updates ] (disabled)"));
        assert!(text.contains("Update Available!"));
        assert!(text.contains("    line two"));
        assert!(text.contains("Downloading update..."));
        assert!(text.contains("] 75%"));
        assert!(!text.contains("Download & Install Update"));
    }

    #[test]
    fn renders_error_and_notification() {
        let state = PanelState {
            error: Some("Failed to check for updates: offline".to_string()),
            notification: Some(Notification::installed()),
            ..Default::default()
        };

        let text = render(&PanelView::from_state(&state));
        assert!(text.contains("Error: Failed to check for updates: offline"));
        assert!(text.contains("* Update installed successfully! The application will restart."));
    }
}
