//! The update panel: state, message handling and the runtime that drives them.
//!
//! This module follows a message-driven architecture:
//! - `state`: what the panel shows
//! - `messages`: everything that can change it
//! - `handlers`: state transitions and backend tasks
//! - `view` / `render`: display model and its text rendering

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::backend::UpdateBackend;
use crate::events::{BackendEvent, EventKind, Subscription};

pub mod handlers;
pub mod messages;
pub mod render;
pub mod state;
pub mod view;

use handlers::{HandleResult, Task};
use messages::PanelMessage;
use state::PanelState;
use view::PanelView;

/// A mounted update panel.
///
/// All state changes go through [`UpdatePanel::process`], one message at a
/// time. Backend results and events arrive as messages on an internal queue
/// drained with [`UpdatePanel::next_message`] or [`UpdatePanel::drain`].
pub struct UpdatePanel<B: UpdateBackend> {
    backend: Arc<B>,
    state: PanelState,
    tx: mpsc::UnboundedSender<PanelMessage>,
    rx: mpsc::UnboundedReceiver<PanelMessage>,
    subscriptions: Vec<Subscription>,
}

impl<B: UpdateBackend> UpdatePanel<B> {
    /// Subscribe to backend events and start fetching the app identity.
    ///
    /// Must be called from within a tokio runtime.
    pub fn mount(backend: Arc<B>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let subscriptions = [EventKind::Progress, EventKind::Finished]
            .into_iter()
            .map(|kind| backend.events().listen(kind, forward_to(tx.clone())))
            .collect();

        let panel = Self {
            backend: backend.clone(),
            state: PanelState::default(),
            tx,
            rx,
            subscriptions,
        };

        panel.spawn(handlers::load_identity_task(backend));
        info!("update panel mounted");
        panel
    }

    pub fn state(&self) -> &PanelState {
        &self.state
    }

    pub fn view(&self) -> PanelView {
        PanelView::from_state(&self.state)
    }

    pub fn check_for_updates(&mut self) {
        self.process(PanelMessage::CheckRequested);
    }

    pub fn download_and_install(&mut self) {
        self.process(PanelMessage::InstallRequested);
    }

    pub fn dismiss_notification(&mut self) {
        self.process(PanelMessage::DismissNotification);
    }

    /// Apply one message and spawn whatever task it produces.
    pub fn process(&mut self, msg: PanelMessage) {
        match handlers::handle_message(msg, &mut self.state, &self.backend) {
            HandleResult::None => {}
            HandleResult::Task(task) => self.spawn(task),
        }
    }

    /// Wait for the next queued message. The panel keeps a sender, so this only
    /// returns `None` if the queue is closed.
    pub async fn next_message(&mut self) -> Option<PanelMessage> {
        self.rx.recv().await
    }

    /// Wait for the next message and apply it, returning a copy of what was applied.
    pub async fn process_next(&mut self) -> Option<PanelMessage> {
        let msg = self.next_message().await?;
        self.process(msg.clone());
        Some(msg)
    }

    /// Apply every message already queued without waiting. Returns how many were applied.
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(msg) = self.rx.try_recv() {
            self.process(msg);
            applied += 1;
        }
        applied
    }

    /// Release the event subscriptions and hand back the final state.
    ///
    /// Events emitted afterwards reach nothing.
    pub async fn unmount(self) -> PanelState {
        let Self { state, subscriptions, rx, .. } = self;
        for subscription in subscriptions {
            subscription.unsubscribe().await;
        }
        drop(rx);
        info!("update panel unmounted");
        state
    }

    fn spawn(&self, task: Task) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            if let Some(msg) = task.await {
                // the panel may have been unmounted in the meantime
                if tx.send(msg).is_err() {
                    debug!("panel gone, dropping task result");
                }
            }
        });
    }
}

fn forward_to(
    tx: mpsc::UnboundedSender<PanelMessage>,
) -> impl FnMut(BackendEvent) + Send + 'static {
    move |event| {
        let _ = tx.send(PanelMessage::from(event));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::testing::ScriptedBackend;
    use crate::model::{DownloadProgress, UpdateInfo};
    use crate::panel::view::ResultView;

    fn release(version: &str) -> UpdateInfo {
        UpdateInfo {
            version: version.to_string(),
            notes: format!("notes for {version}"),
            date: "2025-01-01 00:00:00 UTC".to_string(),
            available: true,
        }
    }

    /// Process messages until `done` holds, failing the test after a second.
    async fn process_until<B: UpdateBackend>(
        panel: &mut UpdatePanel<B>,
        done: impl Fn(&PanelState) -> bool,
    ) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !done(panel.state()) {
                panel.process_next().await.expect("panel queue closed");
            }
        })
        .await
        .expect("panel never reached the expected state");
    }

    /// Let spawned tasks run and apply whatever they produced.
    async fn settle<B: UpdateBackend>(panel: &mut UpdatePanel<B>) {
        for _ in 0..10 {
            tokio::task::yield_now().await;
            panel.drain();
        }
    }

    #[tokio::test]
    async fn mount_fetches_identity() {
        let mut panel = UpdatePanel::mount(Arc::new(ScriptedBackend::new()));
        process_until(&mut panel, |s| !s.identity.version.is_empty()).await;

        assert_eq!(panel.state().identity.version, "1.0.0");
        assert_eq!(panel.state().identity.environment, "test");
        assert_eq!(panel.state().error, None);
    }

    #[tokio::test]
    async fn identity_failure_stays_silent() {
        let backend = ScriptedBackend::new();
        *backend.environment.lock().unwrap() = Some(Err("no environment".to_string()));
        let mut panel = UpdatePanel::mount(Arc::new(backend));

        settle(&mut panel).await;

        assert_eq!(panel.state().identity.version, "");
        assert_eq!(panel.state().identity.environment, "");
        assert_eq!(panel.state().error, None);
    }

    #[tokio::test]
    async fn no_update_renders_no_updates_branch() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_check(Ok(UpdateInfo::up_to_date()));
        let mut panel = UpdatePanel::mount(backend);

        panel.check_for_updates();
        assert!(panel.state().checking);
        process_until(&mut panel, |s| !s.checking).await;

        let view = panel.view();
        assert_eq!(view.result, Some(ResultView::NoUpdates));
        assert_eq!(view.download_button(), None);
    }

    #[tokio::test]
    async fn available_update_offers_download() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_check(Ok(release("1.1.0")));
        let mut panel = UpdatePanel::mount(backend);

        panel.check_for_updates();
        process_until(&mut panel, |s| !s.checking).await;

        let view = panel.view();
        match &view.result {
            Some(ResultView::Available { version, notes, date, .. }) => {
                assert_eq!(version, "1.1.0");
                assert_eq!(notes, "notes for 1.1.0");
                assert_eq!(date, "2025-01-01 00:00:00 UTC");
            }
            other => panic!("unexpected result view: {other:?}"),
        }
        assert!(view.download_button().is_some());
    }

    #[tokio::test]
    async fn failed_check_shows_message_and_keeps_result() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_check(Err("Failed to check for updates: offline"));
        backend.push_check(Ok(release("1.1.0")));
        backend.push_check(Err("still offline"));
        let mut panel = UpdatePanel::mount(backend);

        panel.check_for_updates();
        process_until(&mut panel, |s| !s.checking).await;
        assert_eq!(panel.state().error.as_deref(), Some("Failed to check for updates: offline"));
        assert_eq!(panel.state().update_info, None);

        panel.check_for_updates();
        assert_eq!(panel.state().error, None);
        process_until(&mut panel, |s| !s.checking).await;

        panel.check_for_updates();
        process_until(&mut panel, |s| !s.checking).await;
        assert_eq!(panel.view().error.as_deref(), Some("still offline"));
        assert_eq!(panel.state().update_info, Some(release("1.1.0")));
    }

    #[tokio::test]
    async fn second_check_replaces_first() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_check(Ok(release("1.1.0")));
        backend.push_check(Ok(UpdateInfo::up_to_date()));
        let mut panel = UpdatePanel::mount(backend);

        panel.check_for_updates();
        process_until(&mut panel, |s| !s.checking).await;
        assert_eq!(panel.state().update_info, Some(release("1.1.0")));

        panel.check_for_updates();
        process_until(&mut panel, |s| !s.checking).await;
        assert_eq!(panel.state().update_info, Some(UpdateInfo::up_to_date()));
    }

    #[tokio::test]
    async fn completion_event_ends_download() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_check(Ok(release("1.1.0")));
        let mut panel = UpdatePanel::mount(backend.clone());

        panel.check_for_updates();
        process_until(&mut panel, |s| !s.checking).await;

        panel.download_and_install();
        assert!(panel.state().downloading);
        process_until(&mut panel, |_| *backend.install_calls.lock().unwrap() == 1).await;
        settle(&mut panel).await;
        assert!(panel.state().downloading);

        backend.hub.emit(BackendEvent::Progress(DownloadProgress::new(256, Some(1024))));
        process_until(&mut panel, |s| s.progress.is_some()).await;
        assert_eq!(panel.state().progress_percentage(), 25);

        backend.hub.emit(BackendEvent::Finished);
        process_until(&mut panel, |s| !s.downloading).await;

        assert_eq!(panel.state().progress, None);
        assert_eq!(panel.state().error, None);
        assert!(panel.view().notification.is_some());

        panel.dismiss_notification();
        assert_eq!(panel.view().notification, None);
    }

    #[tokio::test]
    async fn rejected_download_shows_error() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_install(Err("No pending update found"));
        let mut panel = UpdatePanel::mount(backend);

        panel.download_and_install();
        process_until(&mut panel, |s| !s.downloading).await;

        assert_eq!(panel.state().error.as_deref(), Some("No pending update found"));
        assert_eq!(panel.state().notification, None);
    }

    #[tokio::test]
    async fn check_is_ignored_while_downloading() {
        let backend = Arc::new(ScriptedBackend::new());
        let mut panel = UpdatePanel::mount(backend.clone());

        panel.download_and_install();
        panel.check_for_updates();
        assert!(!panel.state().checking);

        // a second install while the first is pending does not reach the backend
        panel.download_and_install();
        settle(&mut panel).await;
        assert_eq!(*backend.install_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn events_after_unmount_reach_nothing() {
        let backend = Arc::new(ScriptedBackend::new());
        let mut panel = UpdatePanel::mount(backend.clone());
        settle(&mut panel).await;
        assert_eq!(backend.hub.listener_count(), 2);

        panel.unmount().await;
        assert_eq!(backend.hub.listener_count(), 0);

        // emitting with the listeners gone neither panics nor resurrects them
        backend.hub.emit(BackendEvent::Progress(DownloadProgress::new(1, Some(2))));
        backend.hub.emit(BackendEvent::Finished);
        tokio::task::yield_now().await;
        assert_eq!(backend.hub.listener_count(), 0);

        // a remount starts clean and sees none of the earlier events
        let mut remounted = UpdatePanel::mount(backend.clone());
        settle(&mut remounted).await;
        assert_eq!(remounted.state().progress, None);
        assert_eq!(remounted.state().notification, None);
        assert_eq!(backend.hub.listener_count(), 2);
    }

    #[test]
    fn forwarding_into_a_closed_queue_is_harmless() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut forward = forward_to(tx);
        forward(BackendEvent::Progress(DownloadProgress::new(1, None)));
        drop(rx);
        forward(BackendEvent::Finished);
    }
}
