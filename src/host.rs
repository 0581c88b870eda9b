//! Serve an [`UpdateBackend`] over the JSON-lines bridge.

use std::io;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, UpdateBackend};
use crate::bridge::wire::{Command, RawRequestFrame, ResponseFrame};

/// Answer requests read from `reader` and forward backend events, writing frames to `writer`.
///
/// Requests are handled concurrently. Returns once `reader` hits EOF and every
/// in-flight request has been answered.
pub async fn serve<B, R, W>(backend: Arc<B>, reader: R, writer: W) -> io::Result<()>
where
    B: UpdateBackend,
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    // all output goes through one task so frames never interleave
    let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(write_frames(writer, out_rx));

    let forwarder = {
        let mut events = backend.events().subscribe();
        let out = out_tx.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if !send_frame(&out, &event) {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event forwarder fell behind")
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    info!("serving update backend");

    let mut lines = BufReader::new(reader).lines();
    let mut requests = JoinSet::new();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let raw: RawRequestFrame = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(%e, line, "skipping malformed request");
                continue;
            }
        };

        let Some(command) = Command::from_name(&raw.command) else {
            warn!(id = raw.id, command = %raw.command, "unknown command");
            let response = ResponseFrame::err(raw.id, format!("unknown command: {}", raw.command));
            send_frame(&out_tx, &response);
            continue;
        };

        let backend = backend.clone();
        let out = out_tx.clone();
        requests.spawn(async move {
            let response = handle_request(&*backend, raw.id, command).await;
            send_frame(&out, &response);
        });
    }

    debug!(in_flight = requests.len(), "input closed, finishing requests");
    while requests.join_next().await.is_some() {}

    forwarder.abort();
    let _ = forwarder.await;
    drop(out_tx);

    writer_task.await.map_err(io::Error::other)??;
    info!("update backend host stopped");
    Ok(())
}

async fn handle_request<B: UpdateBackend>(backend: &B, id: u64, command: Command) -> ResponseFrame {
    debug!(id, command = command.name(), "handling request");

    let result = match command {
        Command::GetAppVersion => backend.get_app_version().await.map(Value::String),
        Command::GetAppEnvironment => backend.get_app_environment().await.map(Value::String),
        Command::CheckForUpdates => backend
            .check_for_updates()
            .await
            .and_then(|info| serde_json::to_value(info).map_err(BackendError::from)),
        Command::DownloadAndInstallUpdate => {
            backend.download_and_install_update().await.map(|()| Value::Null)
        }
    };

    match result {
        Ok(value) => ResponseFrame::ok(id, value),
        Err(e) => {
            warn!(id, command = command.name(), %e, "request failed");
            ResponseFrame::err(id, e.to_string())
        }
    }
}

/// Queue a frame for writing. Returns false once the writer is gone.
fn send_frame<T: Serialize>(out: &mpsc::UnboundedSender<String>, frame: &T) -> bool {
    match serde_json::to_string(frame) {
        Ok(line) => out.send(line).is_ok(),
        Err(e) => {
            warn!(%e, "failed to encode frame");
            true
        }
    }
}

async fn write_frames<W>(
    mut writer: W,
    mut frames: mpsc::UnboundedReceiver<String>,
) -> io::Result<()>
where
    W: AsyncWrite + Send + Unpin,
{
    while let Some(line) = frames.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader};

    use super::*;
    use crate::backend::testing::ScriptedBackend;
    use crate::bridge::Bridge;
    use crate::events::{BackendEvent, EventKind};
    use crate::model::{DownloadProgress, UpdateInfo};

    fn available(version: &str) -> UpdateInfo {
        UpdateInfo {
            version: version.to_string(),
            notes: "fixes".to_string(),
            date: "2025-01-01 00:00:00 UTC".to_string(),
            available: true,
        }
    }

    #[tokio::test]
    async fn bridge_round_trip_through_host() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_check(Ok(available("1.1.0")));
        backend.push_install(Err("No pending update found"));

        let (client, server) = duplex(4096);
        let (server_read, server_write) = split(server);
        let host = tokio::spawn(serve(backend.clone(), server_read, server_write));

        let (client_read, client_write) = split(client);
        let bridge = Bridge::new(client_read, client_write);

        assert_eq!(bridge.get_app_version().await.unwrap(), "1.0.0");
        assert_eq!(bridge.get_app_environment().await.unwrap(), "test");
        assert_eq!(bridge.check_for_updates().await.unwrap(), available("1.1.0"));

        let err = bridge.download_and_install_update().await.unwrap_err();
        assert_eq!(err.to_string(), "No pending update found");

        drop(bridge);
        host.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn backend_events_reach_the_client() {
        let backend = Arc::new(ScriptedBackend::new());

        let (client, server) = duplex(4096);
        let (server_read, server_write) = split(server);
        let _host = tokio::spawn(serve(backend.clone(), server_read, server_write));

        let (client_read, client_write) = split(client);
        let bridge = Bridge::new(client_read, client_write);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _progress = bridge.events().listen(EventKind::Progress, {
            let tx = tx.clone();
            move |e| {
                let _ = tx.send(e);
            }
        });
        let _finished = bridge.events().listen(EventKind::Finished, move |e| {
            let _ = tx.send(e);
        });

        // a completed request guarantees the host is subscribed to the backend hub
        bridge.get_app_version().await.unwrap();

        let progress = BackendEvent::Progress(DownloadProgress::new(10, Some(20)));
        backend.hub.emit(progress.clone());
        assert_eq!(rx.recv().await.unwrap(), progress);

        backend.hub.emit(BackendEvent::Finished);
        assert_eq!(rx.recv().await.unwrap(), BackendEvent::Finished);
    }

    #[tokio::test]
    async fn unknown_commands_get_an_error_response() {
        let backend = Arc::new(ScriptedBackend::new());

        let (client, server) = duplex(4096);
        let (server_read, server_write) = split(server);
        let host = tokio::spawn(serve(backend, server_read, server_write));

        let (client_read, mut client_write) = split(client);
        client_write.write_all(b"garbage\n{\"id\":3,\"command\":\"greet\"}\n").await.unwrap();

        let mut lines = BufReader::new(client_read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let frame: ResponseFrame = serde_json::from_str(&line).unwrap();
        assert_eq!(frame, ResponseFrame::err(3, "unknown command: greet"));

        drop(lines);
        drop(client_write);
        host.await.unwrap().unwrap();
    }
}
