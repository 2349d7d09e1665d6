//! Per-connection driver (spec §4.4): reads one frame at a time,
//! dispatches by `type`, and owns the writer task that serializes the
//! "safe send" primitive for this socket.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::heartbeat::handle_disconnect;
use crate::metrics::ClipSyncMetrics;
use crate::protocol::{ClientFrame, ServerFrame};
use crate::relay::handle_clipboard;
use crate::session::{Role, SessionHandle};
use crate::transfer;

/// Spawns the writer task for one connection and returns the sender half
/// that becomes the connection's `ConnectionSlot::frame_tx`.
///
/// `ws_sink` is consumed entirely by this task: JSON-serialized
/// `ServerFrame`s are written as text frames, and a periodic transport
/// ping keeps the socket alive even if the application layer is quiet.
pub fn spawn_writer(
    mut ws_sink: futures_util::stream::SplitSink<WebSocket, Message>,
    heartbeat_interval: Duration,
) -> mpsc::UnboundedSender<ServerFrame> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();

    tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat_interval);
        ping_interval.tick().await; // skip the immediate first tick

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if ws_sink.send(Message::Text(frame.to_json())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    tx
}

/// Runs the reader loop for one authenticated connection until the
/// socket closes, then performs the disconnect path for its role.
pub async fn run_reader(
    mut ws_stream: futures_util::stream::SplitStream<WebSocket>,
    session: SessionHandle,
    config: Arc<ServerConfig>,
    metrics: Arc<ClipSyncMetrics>,
    role: Role,
    conn_id: u64,
) {
    while let Some(next) = ws_stream.next().await {
        let message = match next {
            Ok(message) => message,
            Err(err) => {
                debug!(error = %err, "websocket read error, closing connection");
                break;
            }
        };

        match message {
            Message::Text(text) => {
                {
                    let mut guard = session.lock().await;
                    guard.touch();
                    if !slot_is_current(&guard, role, conn_id) {
                        // We were displaced by a newer connection for this
                        // slot; stop processing frames for it.
                        return;
                    }
                }
                dispatch_frame(&session, &config, &metrics, role, &text).await;
            }
            Message::Pong(_) => {
                let guard = session.lock().await;
                if let Some(slot) = guard.slot(role) {
                    if slot.conn_id == conn_id {
                        slot.mark_alive();
                    }
                }
            }
            Message::Close(_) => break,
            Message::Binary(_) | Message::Ping(_) => {}
        }
    }

    let mut guard = session.lock().await;
    if slot_is_current(&guard, role, conn_id) {
        handle_disconnect(&mut guard, role);
    }
}

fn slot_is_current(session: &crate::session::Session, role: Role, conn_id: u64) -> bool {
    session.slot(role).as_ref().map(|s| s.conn_id) == Some(conn_id)
}

async fn dispatch_frame(session: &SessionHandle, config: &ServerConfig, metrics: &ClipSyncMetrics, role: Role, text: &str) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            // Protocol failure: log and drop, never close the connection
            // (spec §7 — Open Question (c) resolved in favor of "drop").
            debug!(error = %err, "dropping unparseable frame");
            return;
        }
    };

    match frame {
        ClientFrame::Clipboard { content } => {
            let mut guard = session.lock().await;
            handle_clipboard(&mut guard, role, content);
            metrics.clipboard_relayed_total.inc();
        }

        ClientFrame::FileMeta {
            file_id,
            file_name,
            total_chunks,
            total_size,
        } => {
            let mut guard = session.lock().await;
            if let Err(err) = transfer::handle_file_meta(&mut guard, config, role, file_id, file_name, &total_chunks, total_size) {
                warn!(error = %err, "rejected file_meta");
                guard.send_to(role, ServerFrame::Error { message: err.wire_message() });
                metrics.error_counts.inc();
            }
        }

        ClientFrame::FileChunk {
            file_id,
            chunk_index,
            total_chunks,
            data,
        } => {
            transfer::handle_file_chunk(session, config, role, file_id, chunk_index, total_chunks, data).await;
            metrics.chunks_forwarded_total.inc();
        }

        ClientFrame::FileChunkAck { file_id, chunk_index } => {
            let mut guard = session.lock().await;
            let was_complete = {
                let before = guard.files.get(&file_id).map(|f| f.status);
                transfer::handle_file_chunk_ack(&mut guard, role, &file_id, chunk_index);
                let after = guard.files.get(&file_id).map(|f| f.status);
                before != after && matches!(after, Some(crate::session::FileStatus::Completed))
            };
            metrics.chunks_acked_total.inc();
            if was_complete {
                metrics.files_completed_total.inc();
            }
        }

        ClientFrame::FileComplete { file_id } => {
            let guard = session.lock().await;
            transfer::handle_file_complete_informational(&guard, role, &file_id);
        }

        ClientFrame::PauseFile { file_id } => {
            let mut guard = session.lock().await;
            transfer::handle_pause_file(&mut guard, &file_id);
        }

        ClientFrame::ResumeFile { file_id } => {
            let mut guard = session.lock().await;
            transfer::handle_resume_file(&mut guard, &file_id);
        }

        ClientFrame::RequestChunks { file_id, chunks } => {
            let guard = session.lock().await;
            transfer::handle_request_chunks(&guard, &file_id, chunks);
        }

        ClientFrame::FileMissingChunks { file_id, chunks } => {
            let guard = session.lock().await;
            transfer::handle_file_missing_chunks_from_sender(&guard, role, &file_id, chunks);
        }
    }
}
