use proptest::prelude::*;

use crate::config::ServerConfig;
use crate::ids::{PairId, Token};
use crate::session::{FileStatus, Role, Session};
use crate::transfer::{handle_file_chunk_ack, handle_file_meta};

fn new_session() -> Session {
    Session::new(PairId::generate(), Token::generate())
}

proptest! {
    // `receivedChunks == |receivedMap| <= totalChunks` for any sequence of
    // (possibly duplicate, possibly out-of-range) acks (spec §8 invariant 1).
    #[test]
    fn received_chunks_matches_map_cardinality_under_any_ack_sequence(
        total_chunks in 1u64..64,
        acks in prop::collection::vec(0u64..128, 0..200),
    ) {
        let mut session = new_session();
        let config = ServerConfig::default();
        handle_file_meta(
            &mut session,
            &config,
            Role::Pc,
            "F".to_string(),
            "x.bin".to_string(),
            &serde_json::json!(total_chunks),
            Some(total_chunks * config.chunk_size),
        )
        .unwrap();

        for chunk_index in acks {
            if chunk_index < total_chunks {
                handle_file_chunk_ack(&mut session, Role::App, "F", chunk_index);
            }
        }

        let file = &session.files["F"];
        prop_assert_eq!(file.received_chunks(), file.received_map.len() as u64);
        prop_assert!(file.received_chunks() <= total_chunks);
        prop_assert_eq!(file.status == FileStatus::Completed, file.received_chunks() == total_chunks);
    }

    // `|files where status in {sending, paused}| <= MAX_SIMULTANEOUS_FILES`
    // no matter how many `file_meta` frames arrive (spec §8 invariant 3).
    #[test]
    fn active_file_count_never_exceeds_cap(attempts in 0usize..40) {
        let mut session = new_session();
        let config = ServerConfig::default();

        for i in 0..attempts {
            let _ = handle_file_meta(
                &mut session,
                &config,
                Role::Pc,
                format!("f{i}"),
                "x.bin".to_string(),
                &serde_json::json!(1u64),
                Some(1),
            );
        }

        prop_assert!(session.active_file_count() <= config.max_simultaneous_files);
    }

    // Every ack observed by the server (and only those) reaches the sender
    // as a `file_chunk_ack`, exactly once per distinct chunk index — the
    // ack-causality law (spec §8).
    #[test]
    fn every_distinct_ack_is_forwarded_exactly_once(
        total_chunks in 1u64..32,
        acks in prop::collection::vec(0u64..32, 0..80),
    ) {
        use crate::session::ConnectionSlot;
        use tokio::sync::mpsc;

        let mut session = new_session();
        let config = ServerConfig::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        *session.slot_mut(Role::Pc) = Some(ConnectionSlot::new("Desktop".to_string(), tx));

        handle_file_meta(
            &mut session,
            &config,
            Role::Pc,
            "F".to_string(),
            "x.bin".to_string(),
            &serde_json::json!(total_chunks),
            Some(total_chunks * config.chunk_size),
        )
        .unwrap();

        let mut distinct = std::collections::HashSet::new();
        for chunk_index in acks {
            if chunk_index < total_chunks {
                distinct.insert(chunk_index);
                handle_file_chunk_ack(&mut session, Role::App, "F", chunk_index);
            }
        }

        let mut forwarded = std::collections::HashMap::new();
        while let Ok(frame) = rx.try_recv() {
            if let crate::protocol::ServerFrame::FileChunkAck { chunk_index, .. } = frame {
                *forwarded.entry(chunk_index).or_insert(0u32) += 1;
            }
        }

        for chunk_index in &distinct {
            prop_assert_eq!(forwarded.get(chunk_index).copied().unwrap_or(0), 1);
        }
        prop_assert_eq!(forwarded.len(), distinct.len());
    }
}
