//! HTTP surface (spec §6): the credential mint plus the three plain
//! informational routes. The relay's actual traffic goes over `/connect`
//! (see `ws.rs`); everything here is request/response.

use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::{sync::Arc, time::Instant};

use crate::config::ServerConfig;
use crate::ids::{MintedPair, PairId, Token};
use crate::metrics::ClipSyncMetrics;
use crate::session::{Session, SessionRegistry};

#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub config: Arc<ServerConfig>,
    pub metrics: Arc<ClipSyncMetrics>,
    pub started_at: Instant,
}

/// `GET /pair` — mints a new pair identifier and bearer token, seeds an
/// empty session, and starts its mint-TTL clock (spec §4.1). Collisions
/// are statistically negligible (1-in-16M per attempt) but retried
/// rather than assumed impossible.
pub async fn get_pair(State(state): State<AppState>) -> Response {
    let start = Instant::now();

    let pair_id = loop {
        let candidate = PairId::generate();
        if !state.registry.contains(&candidate) {
            break candidate;
        }
    };
    let token = Token::generate();

    state
        .registry
        .insert(Session::new(pair_id.clone(), token.clone()));
    state.metrics.pairs_minted_total.inc();
    state.metrics.active_pairs.set(state.registry.len() as f64);
    state.metrics.request_latency.observe(start.elapsed().as_secs_f64());

    let body = MintedPair { pair_id, token };
    let mut response = (StatusCode::OK, Json(body)).into_response();
    let headers = response.headers_mut();
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    headers.insert("Access-Control-Allow-Origin", HeaderValue::from_static("*"));
    response
}

/// `GET /health`
pub async fn get_health(State(state): State<AppState>) -> Response {
    let uptime = state.started_at.elapsed().as_secs();
    (StatusCode::OK, Json(json!({ "ok": true, "uptime": uptime }))).into_response()
}

/// `GET /`
pub async fn get_root() -> Response {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain")],
        "ClipSync relay running",
    )
        .into_response()
}

/// `GET /metrics` — Prometheus text exposition.
pub async fn get_metrics(State(state): State<AppState>) -> Response {
    let prometheus = state.metrics.export_prometheus();
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        prometheus,
    )
        .into_response()
}

/// Any path/method not otherwise routed (spec §6: `404`, `text/plain`,
/// `Not found`).
pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, [("Content-Type", "text/plain")], "Not found").into_response()
}
