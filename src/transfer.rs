//! File-transfer engine (spec §4.6): per-file records, chunk forwarding
//! with retry, ack accounting, pause/resume, missing-chunk recovery.

use std::time::Duration;
use tracing::debug;

use crate::config::ServerConfig;
use crate::error::ClipSyncError;
use crate::protocol::{MissingChunkEntry, ServerFrame};
use crate::session::{FileRecord, FileStatus, Role, Session, SessionHandle};

/// `file_meta`: creates the record (if within limits) and mirrors it to
/// the other side. Returns the validation error to report back to the
/// sender on failure; no record is created in that case.
pub fn handle_file_meta(
    session: &mut Session,
    config: &ServerConfig,
    sender: Role,
    file_id: String,
    file_name: String,
    total_chunks_raw: &serde_json::Value,
    total_size: Option<u64>,
) -> Result<(), ClipSyncError> {
    if file_id.is_empty() || file_name.is_empty() {
        return Err(ClipSyncError::InvalidFileMeta);
    }

    let total_chunks = total_chunks_raw
        .as_u64()
        .filter(|&n| n > 0)
        .ok_or(ClipSyncError::InvalidFileMeta)?;

    if session.active_file_count() >= config.max_simultaneous_files {
        return Err(ClipSyncError::TooManyFiles(config.max_simultaneous_files));
    }

    let effective_size = total_size.unwrap_or_else(|| total_chunks.saturating_mul(config.chunk_size));
    if effective_size >= config.max_file_size {
        return Err(ClipSyncError::FileTooLarge(config.max_file_size_mb()));
    }

    let record = FileRecord::new(file_id.clone(), file_name.clone(), total_chunks, total_size, sender);
    session.files.insert(file_id.clone(), record);

    session.send_to(
        sender.other(),
        ServerFrame::FileMeta {
            file_id,
            file_name,
            total_chunks,
            total_size,
        },
    );
    Ok(())
}

/// `file_chunk`: forwards to the receiver with linear-backoff retry,
/// pausing the transfer if the receiver is unavailable or retries are
/// exhausted. Async because retries sleep between attempts and must not
/// hold the session lock while doing so (spec §5: concurrent files
/// interleave freely).
pub async fn handle_file_chunk(
    session: &SessionHandle,
    config: &ServerConfig,
    sender: Role,
    file_id: String,
    chunk_index: u64,
    total_chunks: u64,
    data: String,
) {
    let receiver = sender.other();

    // Pre-flight: drop duplicates, and pause immediately (no retry) if
    // the receiver is definitively gone rather than merely slow.
    {
        let mut guard = session.lock().await;
        let Some(file) = guard.files.get(&file_id) else {
            debug!(file_id = %file_id, error = %ClipSyncError::UnknownFile, "dropping file_chunk");
            return;
        };
        if file.status == FileStatus::Paused || file.received_map.contains(&chunk_index) {
            return;
        }
        let receiver_open = guard.slot(receiver).as_ref().map(|s| s.is_open()).unwrap_or(false);
        if !receiver_open {
            if let Some(file) = guard.files.get_mut(&file_id) {
                file.status = FileStatus::Paused;
                file.touch();
            }
            guard.broadcast(ServerFrame::FilePaused {
                file_id: file_id.clone(),
                reason: Some("Receiver unavailable".to_string()),
            });
            return;
        }
    }

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let delivered = {
            let guard = session.lock().await;
            if !guard.files.get(&file_id).map(|f| f.is_active()).unwrap_or(false) {
                return;
            }
            guard.send_to(
                receiver,
                ServerFrame::FileChunk {
                    file_id: file_id.clone(),
                    chunk_index,
                    total_chunks,
                    data: data.clone(),
                },
            )
        };

        if delivered {
            return;
        }

        if attempt >= config.chunk_retry_limit {
            let mut guard = session.lock().await;
            if let Some(file) = guard.files.get_mut(&file_id) {
                file.status = FileStatus::Paused;
                file.touch();
            }
            guard.broadcast(ServerFrame::FilePaused {
                file_id: file_id.clone(),
                reason: Some("Relay failed".to_string()),
            });
            return;
        }

        tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
    }
}

/// `file_chunk_ack`: the authoritative progress signal (spec §4.6 Ack
/// causality / Completion law).
pub fn handle_file_chunk_ack(session: &mut Session, from: Role, file_id: &str, chunk_index: u64) {
    let Some(file) = session.files.get_mut(file_id) else {
        debug!(file_id = %file_id, error = %ClipSyncError::UnknownFile, "dropping file_chunk_ack");
        return;
    };
    file.received_map.insert(chunk_index);
    file.touch();
    let received = file.received_chunks();
    let total = file.total_chunks;
    let sender_role = file.sender_role;

    session.send_to(
        sender_role,
        ServerFrame::FileChunkAck {
            file_id: file_id.to_string(),
            chunk_index,
        },
    );
    session.send_to(
        from,
        ServerFrame::FileProgress {
            file_id: file_id.to_string(),
            received_chunks: received,
            total_chunks: total,
        },
    );

    if received == total {
        if let Some(file) = session.files.get_mut(file_id) {
            file.status = FileStatus::Completed;
            file.touch();
        }
        session.broadcast(ServerFrame::FileComplete {
            file_id: file_id.to_string(),
        });
    }
}

/// `file_complete`: informational only, authoritative completion is
/// driven entirely by acks.
pub fn handle_file_complete_informational(session: &Session, from: Role, file_id: &str) {
    session.send_to(
        from.other(),
        ServerFrame::FileComplete {
            file_id: file_id.to_string(),
        },
    );
}

pub fn handle_pause_file(session: &mut Session, file_id: &str) {
    let Some(file) = session.files.get_mut(file_id) else {
        return;
    };
    file.status = FileStatus::Paused;
    file.touch();
    session.broadcast(ServerFrame::FilePaused {
        file_id: file_id.to_string(),
        reason: None,
    });
}

pub fn handle_resume_file(session: &mut Session, file_id: &str) {
    let Some(file) = session.files.get_mut(file_id) else {
        return;
    };
    if file.status == FileStatus::Completed {
        return;
    }
    file.status = FileStatus::Sending;
    file.touch();
    let missing = file.missing_chunks();
    let sender_role = file.sender_role;

    session.broadcast(ServerFrame::FileResumed {
        file_id: file_id.to_string(),
    });
    session.send_to(
        sender_role,
        ServerFrame::FileMissingChunks {
            file_id: file_id.to_string(),
            chunks: missing,
        },
    );
}

/// `request_chunks` (receiver -> server): forwarded verbatim to the
/// sender as `file_missing_chunks`.
pub fn handle_request_chunks(session: &Session, file_id: &str, chunks: Vec<u64>) {
    let Some(file) = session.files.get(file_id) else {
        return;
    };
    session.send_to(
        file.sender_role,
        ServerFrame::FileMissingChunks {
            file_id: file_id.to_string(),
            chunks,
        },
    );
}

/// `file_missing_chunks` (sender -> server): entries carrying data are
/// re-forwarded as `file_chunk`; bare indices are ignored per Open
/// Question (a) — the sender is expected to follow up with ordinary
/// `file_chunk` frames for those.
pub fn handle_file_missing_chunks_from_sender(
    session: &Session,
    from: Role,
    file_id: &str,
    entries: Vec<MissingChunkEntry>,
) {
    let Some(file) = session.files.get(file_id) else {
        return;
    };
    let total_chunks = file.total_chunks;
    let receiver = from.other();
    for entry in entries {
        if let MissingChunkEntry::WithData { chunk_index, data } = entry {
            session.send_to(
                receiver,
                ServerFrame::FileChunk {
                    file_id: file_id.to_string(),
                    chunk_index,
                    total_chunks,
                    data,
                },
            );
        }
    }
}

/// On reconnect for a side with in-flight files (spec §4.3 steps 6, 8).
pub fn replay_file_state(session: &Session, to: Role) {
    for file in session.files.values() {
        if file.sender_role.other() == to {
            // `to` is the receiver of this file.
            session.send_to(
                to,
                ServerFrame::FileMeta {
                    file_id: file.file_id.clone(),
                    file_name: file.name.clone(),
                    total_chunks: file.total_chunks,
                    total_size: file.total_size,
                },
            );
        } else {
            session.send_to(
                to,
                ServerFrame::FileProgress {
                    file_id: file.file_id.clone(),
                    received_chunks: file.received_chunks(),
                    total_chunks: file.total_chunks,
                },
            );
        }

        if file.status == FileStatus::Paused {
            session.send_to(
                file.sender_role,
                ServerFrame::FileMissingChunks {
                    file_id: file.file_id.clone(),
                    chunks: file.missing_chunks(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{PairId, Token};
    use crate::session::ConnectionSlot;
    use tokio::sync::mpsc;

    fn bind(session: &mut Session, role: Role, name: &str) -> mpsc::UnboundedReceiver<ServerFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        *session.slot_mut(role) = Some(ConnectionSlot::new(name.to_string(), tx));
        rx
    }

    fn new_session() -> Session {
        Session::new(PairId::generate(), Token::generate())
    }

    #[test]
    fn file_meta_rejects_empty_name() {
        let mut session = new_session();
        let config = ServerConfig::default();
        let err = handle_file_meta(
            &mut session,
            &config,
            Role::Pc,
            "f1".to_string(),
            String::new(),
            &serde_json::json!(3),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ClipSyncError::InvalidFileMeta));
        assert!(session.files.is_empty());
    }

    #[test]
    fn file_meta_rejects_over_capacity() {
        let mut session = new_session();
        let config = ServerConfig::default();
        for i in 0..config.max_simultaneous_files {
            handle_file_meta(
                &mut session,
                &config,
                Role::Pc,
                format!("f{i}"),
                "x.bin".to_string(),
                &serde_json::json!(1),
                Some(1),
            )
            .unwrap();
        }
        let err = handle_file_meta(
            &mut session,
            &config,
            Role::Pc,
            "overflow".to_string(),
            "x.bin".to_string(),
            &serde_json::json!(1),
            Some(1),
        )
        .unwrap_err();
        assert!(matches!(err, ClipSyncError::TooManyFiles(5)));
    }

    #[test]
    fn file_meta_rejects_oversized_transfer() {
        let mut session = new_session();
        let config = ServerConfig::default();
        let err = handle_file_meta(
            &mut session,
            &config,
            Role::Pc,
            "big".to_string(),
            "big.bin".to_string(),
            &serde_json::json!(81920),
            None,
        )
        .unwrap_err();
        match err {
            ClipSyncError::FileTooLarge(mb) => assert_eq!(mb, 5120),
            other => panic!("wrong error: {other:?}"),
        }
    }

    #[test]
    fn ack_driven_completion_fires_exactly_once() {
        let mut session = new_session();
        let mut pc_rx = bind(&mut session, Role::Pc, "Desktop");
        let mut app_rx = bind(&mut session, Role::App, "Phone");
        let config = ServerConfig::default();

        handle_file_meta(
            &mut session,
            &config,
            Role::Pc,
            "F".to_string(),
            "x.bin".to_string(),
            &serde_json::json!(3),
            Some(3 * config.chunk_size),
        )
        .unwrap();
        // drain the meta mirror
        app_rx.try_recv().unwrap();

        for i in 0..3u64 {
            handle_file_chunk_ack(&mut session, Role::App, "F", i);
        }

        let file = &session.files["F"];
        assert_eq!(file.status, FileStatus::Completed);

        let mut completes_pc = 0;
        let mut completes_app = 0;
        while let Ok(frame) = pc_rx.try_recv() {
            if matches!(frame, ServerFrame::FileComplete { .. }) {
                completes_pc += 1;
            }
        }
        while let Ok(frame) = app_rx.try_recv() {
            if matches!(frame, ServerFrame::FileComplete { .. }) {
                completes_app += 1;
            }
        }
        assert_eq!(completes_pc, 1);
        assert_eq!(completes_app, 1);
    }

    #[test]
    fn resume_sends_exact_missing_set_to_sender() {
        let mut session = new_session();
        let mut pc_rx = bind(&mut session, Role::Pc, "Desktop");
        let _app_rx = bind(&mut session, Role::App, "Phone");
        let config = ServerConfig::default();

        handle_file_meta(
            &mut session,
            &config,
            Role::Pc,
            "F".to_string(),
            "x.bin".to_string(),
            &serde_json::json!(5),
            Some(5 * config.chunk_size),
        )
        .unwrap();
        pc_rx.try_recv().ok();

        handle_file_chunk_ack(&mut session, Role::App, "F", 0);
        handle_file_chunk_ack(&mut session, Role::App, "F", 1);
        handle_pause_file(&mut session, "F");
        handle_resume_file(&mut session, "F");

        // Drain non-missing-chunks frames to find the one we want.
        let mut found = None;
        while let Ok(frame) = pc_rx.try_recv() {
            if let ServerFrame::FileMissingChunks { chunks, .. } = frame {
                found = Some(chunks);
            }
        }
        assert_eq!(found.unwrap(), vec![2, 3, 4]);
    }

    #[test]
    fn duplicate_chunk_ack_is_idempotent_on_received_map() {
        let mut session = new_session();
        let _pc_rx = bind(&mut session, Role::Pc, "Desktop");
        let _app_rx = bind(&mut session, Role::App, "Phone");
        let config = ServerConfig::default();
        handle_file_meta(
            &mut session,
            &config,
            Role::Pc,
            "F".to_string(),
            "x.bin".to_string(),
            &serde_json::json!(2),
            Some(2 * config.chunk_size),
        )
        .unwrap();

        handle_file_chunk_ack(&mut session, Role::App, "F", 0);
        handle_file_chunk_ack(&mut session, Role::App, "F", 0);

        assert_eq!(session.files["F"].received_chunks(), 1);
    }
}
