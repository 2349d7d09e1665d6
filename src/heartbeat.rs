//! Heartbeat & reaper (spec §4.7): connection liveness sweep and
//! per-session idle/mint-TTL garbage collection.

use std::time::Instant;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::protocol::ServerFrame;
use crate::session::{FileStatus, Role, SessionRegistry};

/// One tick of the connection-liveness sweep: for every session, for
/// every bound slot, terminate it if it missed the previous ping/pong
/// cycle, otherwise clear its flag and ping it.
///
/// `ping` is invoked for slots that stay open; the caller owns the
/// actual websocket ping frame since the slot only carries `ServerFrame`
/// values, not raw protocol frames.
pub async fn heartbeat_tick<F>(registry: &SessionRegistry, mut ping: F)
where
    F: FnMut(&str, Role),
{
    for (pair_id, handle) in registry.snapshot() {
        let mut session = handle.lock().await;
        for role in [Role::Pc, Role::App] {
            let Some(slot) = session.slot(role).clone() else {
                continue;
            };
            if !slot.is_open() {
                continue;
            }
            if slot.take_alive() {
                ping(pair_id.as_str(), role);
            } else {
                debug!(pair = %pair_id, role = role.as_str(), "heartbeat missed, terminating connection");
                // Disconnect path: pause active sends from this side,
                // notify the peer, release the slot.
                handle_disconnect(&mut session, role);
            }
        }
    }
}

/// Runs the disconnect path for `role`'s slot: closes it, pauses any file
/// it was sending, and notifies the remaining peer.
pub fn handle_disconnect(session: &mut crate::session::Session, role: Role) {
    if let Some(slot) = session.slot_mut(role).take() {
        slot.close(crate::session::CloseReason::HeartbeatTimeout);
    }

    let mut newly_paused = Vec::new();
    for file in session.files.values_mut() {
        if file.sender_role == role && file.status == FileStatus::Sending {
            file.status = FileStatus::Paused;
            file.touch();
            newly_paused.push(file.file_id.clone());
        }
    }
    for file_id in newly_paused {
        session.broadcast(ServerFrame::FilePaused {
            file_id,
            reason: Some("Sender disconnected".to_string()),
        });
    }

    session.send_to(
        role.other(),
        ServerFrame::PeerDisconnected {
            side: role.as_str().to_string(),
            message: format!("{} disconnected", role.as_str()),
        },
    );
    session.touch();
}

/// Why a session is being removed this tick, if at all.
enum Eviction {
    /// Mint TTL elapsed without the pair ever fully binding; any sole
    /// connected side still gets `{type: "expired"}` (spec §4.1).
    NeverBound,
    /// Both slots have been empty past `PAIR_CLEANUP_TIMEOUT`.
    IdlePair,
}

/// One tick of the per-session reaper: evicts stale file records and, if
/// both slots are empty for long enough (or the pair never fully bound
/// within its mint TTL), removes the session itself.
pub async fn reaper_tick(registry: &SessionRegistry, config: &ServerConfig) {
    let now = Instant::now();
    for (pair_id, handle) in registry.snapshot() {
        let eviction = {
            let mut session = handle.lock().await;

            let stale_files: Vec<String> = session
                .files
                .iter()
                .filter(|(_, file)| now.duration_since(file.last_activity) > config.file_cleanup_timeout())
                .map(|(file_id, _)| file_id.clone())
                .collect();
            for file_id in &stale_files {
                session.files.remove(file_id);
            }
            if !stale_files.is_empty() {
                debug!(pair = %pair_id, count = stale_files.len(), "reaped stale file records");
            }

            if !session.ever_fully_bound && now.duration_since(session.created_at) > config.mint_ttl() {
                Some(Eviction::NeverBound)
            } else if session.both_empty()
                && now.duration_since(session.last_activity) > config.pair_cleanup_timeout()
            {
                Some(Eviction::IdlePair)
            } else {
                None
            }
        };

        if let Some(eviction) = eviction {
            if matches!(eviction, Eviction::NeverBound) {
                let session = handle.lock().await;
                session.broadcast(ServerFrame::Expired {});
            }
            registry.remove(&pair_id);
            info!(pair = %pair_id, "reaped session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{PairId, Token};
    use crate::session::{ConnectionSlot, Session};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn heartbeat_pings_alive_connections_and_clears_flag() {
        let registry = SessionRegistry::new();
        let mut session = Session::new(PairId::generate(), Token::generate());
        let (tx, _rx) = mpsc::unbounded_channel();
        *session.slot_mut(Role::Pc) = Some(ConnectionSlot::new("Desktop".into(), tx));
        let pair_id = session.pair_id.clone();
        registry.insert(session);

        let mut pinged = Vec::new();
        heartbeat_tick(&registry, |pair, role| pinged.push((pair.to_string(), role))).await;

        assert_eq!(pinged, vec![(pair_id.as_str().to_string(), Role::Pc)]);
    }

    #[tokio::test]
    async fn heartbeat_terminates_connection_that_missed_a_cycle() {
        let registry = SessionRegistry::new();
        let mut session = Session::new(PairId::generate(), Token::generate());
        let (tx, _rx) = mpsc::unbounded_channel();
        let slot = ConnectionSlot::new("Desktop".into(), tx);
        slot.take_alive(); // simulate: already missed one cycle
        *session.slot_mut(Role::Pc) = Some(slot);
        registry.insert(session);

        heartbeat_tick(&registry, |_, _| {}).await;

        let handle = registry.snapshot().into_iter().next().unwrap().1;
        let session = handle.lock().await;
        assert!(session.pc.is_none());
    }

    #[tokio::test]
    async fn never_bound_pair_is_reaped_after_mint_ttl() {
        let registry = SessionRegistry::new();
        let mut config = ServerConfig::default();
        config.mint_ttl_secs = 0;
        let session = Session::new(PairId::generate(), Token::generate());
        let pair_id = session.pair_id.clone();
        registry.insert(session);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        reaper_tick(&registry, &config).await;

        assert!(!registry.contains(&pair_id));
    }
}
