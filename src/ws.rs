//! Authenticator / upgrader (spec §4.3): validates the `/connect`
//! upgrade request and binds the resulting connection into its role
//! slot.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::api::AppState;
use crate::driver;
use crate::error::ClipSyncError;
use crate::ids::PairId;
use crate::relay::replay_history;
use crate::session::{ConnectionSlot, Role};
use crate::transfer::replay_file_state;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    #[serde(rename = "pairId")]
    pub pair_id: Option<String>,
    pub token: Option<String>,
    #[serde(rename = "type")]
    pub role_type: Option<String>,
    #[serde(rename = "deviceName")]
    pub device_name: Option<String>,
}

/// `GET /connect?pairId=&token=&type=&deviceName=`
///
/// Any credential failure here returns a plain (non-101) response,
/// leaving the TCP connection to be torn down by the HTTP stack without
/// ever completing the websocket handshake (spec §4.3, §7).
pub async fn connect_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let pair_id = params.get("pairId").cloned();
    let token = params.get("token").cloned();
    let role_type = params.get("type").cloned();
    let device_name = params
        .get("deviceName")
        .cloned()
        .unwrap_or_else(|| "Unknown".to_string());

    let (pair_id, role) = match validate_credentials(&state, pair_id, token, role_type).await {
        Ok(pair) => pair,
        Err(err) => {
            // Credential failure at upgrade time: destroy the transport
            // without completing the 101 (spec §4.3, §7) — no wire-level
            // error frame is possible before `on_upgrade`.
            debug!(error = %err, "rejecting /connect upgrade");
            return axum::http::StatusCode::UNAUTHORIZED.into_response();
        }
    };

    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        let frame_tx = driver::spawn_writer(sink, state.config.heartbeat_interval());
        let slot = ConnectionSlot::new(device_name.clone(), frame_tx);
        let conn_id = slot.conn_id;

        let Some(session) = state.registry.get(&pair_id) else {
            return;
        };

        {
            let mut guard = session.lock().await;

            // Replace-on-rebind: close whatever was in the slot before.
            if let Some(old) = guard.slot_mut(role).take() {
                old.close(crate::session::CloseReason::Replaced);
            }
            *guard.slot_mut(role) = Some(slot.clone());
            slot.mark_alive();
            guard.touch();

            guard.send_to(
                role,
                crate::protocol::ServerFrame::Status {
                    message: format!("{} registered.", role.as_str()),
                },
            );

            replay_history(&guard, role);
            replay_file_state(&guard, role);

            if guard.both_bound() {
                guard.ever_fully_bound = true;
                guard.send_to(
                    Role::Pc,
                    crate::protocol::ServerFrame::Status {
                        message: "Mobile connected".to_string(),
                    },
                );
                guard.send_to(
                    Role::App,
                    crate::protocol::ServerFrame::Status {
                        message: "PC connected".to_string(),
                    },
                );
            }

            info!(pair = %pair_id, role = role.as_str(), device = %device_name, "connection registered");
        }

        driver::run_reader(stream, session, state.config.clone(), state.metrics.clone(), role, conn_id).await;
    })
}

async fn validate_credentials(
    state: &AppState,
    pair_id: Option<String>,
    token: Option<String>,
    role_type: Option<String>,
) -> Result<(PairId, Role), ClipSyncError> {
    let pair_id = PairId::from(pair_id.ok_or(ClipSyncError::MissingParam("pairId"))?);
    let token = crate::ids::Token::from(token.ok_or(ClipSyncError::MissingParam("token"))?);
    let role_type = role_type.ok_or(ClipSyncError::MissingParam("type"))?;
    let role = Role::parse(&role_type).ok_or(ClipSyncError::InvalidRole)?;

    let session = state.registry.get(&pair_id).ok_or(ClipSyncError::UnknownPair)?;
    let guard = session.lock().await;
    if guard.token != token {
        return Err(ClipSyncError::TokenMismatch);
    }
    drop(guard);

    Ok((pair_id, role))
}
