//! Clipboard relay: history retention + forwarding (spec §4.5).

use crate::protocol::ServerFrame;
use crate::session::{Role, Session};

/// Handles an inbound `{type: "clipboard", content}` frame from `from`.
///
/// Appends to history (truncated to the last 50 entries) unconditionally,
/// then forwards to the other role if it is bound and open. A missing or
/// closed peer simply drops the forward; history retention still happens.
///
/// The `from` field on both the history entry and the forwarded frame is
/// the sender's `deviceName`, not its role (spec §4.5) — a blank name
/// falls back to the role string, matching the slot default of
/// "Unknown" never being blank in practice.
pub fn handle_clipboard(session: &mut Session, from: Role, content: String) {
    let from_name = session
        .slot(from)
        .as_ref()
        .map(|slot| slot.device_name.clone())
        .unwrap_or_else(|| from.as_str().to_string());

    session.push_clipboard(from_name.clone(), content.clone());

    session.send_to(
        from.other(),
        ServerFrame::Clipboard {
            from: from_name,
            content,
        },
    );
}

/// Replays clipboard history to a newly (re)connected side, in insertion
/// order, used by the authenticator on upgrade (spec §4.3 step 5).
pub fn replay_history(session: &Session, to: Role) {
    for entry in &session.clipboard_history {
        session.send_to(
            to,
            ServerFrame::Clipboard {
                from: entry.from.clone(),
                content: entry.content.clone(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{PairId, Token};
    use tokio::sync::mpsc;
    use crate::session::ConnectionSlot;

    fn bind(session: &mut Session, role: Role, name: &str) -> mpsc::UnboundedReceiver<ServerFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        *session.slot_mut(role) = Some(ConnectionSlot::new(name.to_string(), tx));
        rx
    }

    #[test]
    fn forwards_clipboard_to_other_role_with_sender_name() {
        let mut session = Session::new(PairId::generate(), Token::generate());
        bind(&mut session, Role::Pc, "Desktop");
        let mut app_rx = bind(&mut session, Role::App, "Phone");

        handle_clipboard(&mut session, Role::Pc, "hello".to_string());

        let frame = app_rx.try_recv().unwrap();
        match frame {
            ServerFrame::Clipboard { from, content } => {
                assert_eq!(from, "Desktop");
                assert_eq!(content, "hello");
            }
            _ => panic!("wrong frame"),
        }
        assert_eq!(session.clipboard_history.len(), 1);
    }

    #[test]
    fn retains_history_even_with_no_peer_bound() {
        let mut session = Session::new(PairId::generate(), Token::generate());
        bind(&mut session, Role::Pc, "Desktop");

        handle_clipboard(&mut session, Role::Pc, "solo".to_string());

        assert_eq!(session.clipboard_history.len(), 1);
    }
}
