//! Client side of the JSON-lines bridge to an out-of-process backend.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::channel::oneshot;
use futures::lock::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command as ProcessCommand};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::backend::{BackendError, UpdateBackend};
use crate::events::EventHub;
use crate::model::UpdateInfo;

pub mod wire;

use wire::{Command, HostFrame, RequestFrame};

type Reply = oneshot::Sender<Result<Value, String>>;
type PendingMap = Arc<Mutex<HashMap<u64, Reply>>>;
type FrameWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Request/response client over any byte stream pair.
///
/// Requests are tagged with increasing ids and matched against responses in
/// whatever order they arrive. Event frames are republished on [`Bridge::events`].
pub struct Bridge {
    next_id: AtomicU64,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    writer: Mutex<FrameWriter>,
    hub: EventHub,
    reader: JoinHandle<()>,
}

impl Bridge {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let hub = EventHub::new();

        let reader =
            tokio::spawn(read_frames(reader, pending.clone(), closed.clone(), hub.clone()));

        Self {
            next_id: AtomicU64::new(1),
            pending,
            closed,
            writer: Mutex::new(Box::new(writer)),
            hub,
            reader,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    #[instrument(skip_all, fields(command = command.name()))]
    async fn request<T: DeserializeOwned>(&self, command: Command) -> Result<T, BackendError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            // checked under the lock: the reader drains the map only after setting `closed`
            let mut pending = self.pending.lock().await;
            if self.is_closed() {
                return Err(BackendError::Disconnected);
            }
            pending.insert(id, tx);
        }

        let mut line = serde_json::to_string(&RequestFrame { id, command })?;
        line.push('\n');

        debug!(id, "sending request");
        if let Err(e) = self.write_line(&line).await {
            self.pending.lock().await.remove(&id);
            return Err(e.into());
        }

        let value = rx
            .await
            .map_err(|_| BackendError::Disconnected)?
            .map_err(BackendError::Rejected)?;

        Ok(serde_json::from_value(value)?)
    }

    async fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_frames<R>(reader: R, pending: PendingMap, closed: Arc<AtomicBool>, hub: EventHub)
where
    R: AsyncRead + Send + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => dispatch_frame(&line, &pending, &hub).await,
            Ok(None) => {
                debug!("backend closed its output");
                break;
            }
            Err(e) => {
                warn!(%e, "failed to read from backend");
                break;
            }
        }
    }

    closed.store(true, Ordering::SeqCst);

    // dropping the reply senders wakes every waiter with a disconnect
    let mut pending = pending.lock().await;
    if !pending.is_empty() {
        warn!(count = pending.len(), "backend went away with requests in flight");
    }
    pending.clear();
}

async fn dispatch_frame(line: &str, pending: &PendingMap, hub: &EventHub) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    match serde_json::from_str::<HostFrame>(line) {
        Ok(HostFrame::Response(frame)) => {
            let waiter = pending.lock().await.remove(&frame.id);
            match waiter {
                Some(reply) => {
                    let _ = reply.send(frame.into_result());
                }
                None => warn!(id = frame.id, "response for an unknown request"),
            }
        }
        Ok(HostFrame::Event(event)) => hub.emit(event),
        Err(e) => warn!(%e, line, "skipping malformed frame"),
    }
}

impl UpdateBackend for Bridge {
    async fn get_app_version(&self) -> Result<String, BackendError> {
        self.request(Command::GetAppVersion).await
    }

    async fn get_app_environment(&self) -> Result<String, BackendError> {
        self.request(Command::GetAppEnvironment).await
    }

    async fn check_for_updates(&self) -> Result<UpdateInfo, BackendError> {
        self.request(Command::CheckForUpdates).await
    }

    async fn download_and_install_update(&self) -> Result<(), BackendError> {
        self.request(Command::DownloadAndInstallUpdate).await
    }

    fn events(&self) -> &EventHub {
        &self.hub
    }
}

/// A backend running as a child process, spoken to over its stdin/stdout.
///
/// The child is killed when this value is dropped.
pub struct ProcessBackend {
    bridge: Bridge,
    _child: std::sync::Mutex<Child>,
}

impl ProcessBackend {
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, BackendError> {
        let mut child = ProcessCommand::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BackendError::Protocol("backend stdin is not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Protocol("backend stdout is not piped".to_string()))?;

        info!(program, pid = ?child.id(), "spawned update backend");

        Ok(Self {
            bridge: Bridge::new(stdout, stdin),
            _child: std::sync::Mutex::new(child),
        })
    }
}

impl UpdateBackend for ProcessBackend {
    async fn get_app_version(&self) -> Result<String, BackendError> {
        self.bridge.get_app_version().await
    }

    async fn get_app_environment(&self) -> Result<String, BackendError> {
        self.bridge.get_app_environment().await
    }

    async fn check_for_updates(&self) -> Result<UpdateInfo, BackendError> {
        self.bridge.check_for_updates().await
    }

    async fn download_and_install_update(&self) -> Result<(), BackendError> {
        self.bridge.download_and_install_update().await
    }

    fn events(&self) -> &EventHub {
        self.bridge.events()
    }
}
