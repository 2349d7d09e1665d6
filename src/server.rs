//! Process wiring: builds the router, spawns the heartbeat and reaper
//! background tasks as two recurring interval sweeps, and drives
//! graceful shutdown on SIGTERM/SIGINT.

use axum::Router;
use std::sync::Arc;
use tokio::sync::watch;
use tower::Layer;
use tower_http::{cors::CorsLayer, normalize_path::NormalizePathLayer, trace::TraceLayer};
use tracing::info;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::metrics::ClipSyncMetrics;
use crate::session::SessionRegistry;

pub struct ClipSyncServer {
    config: Arc<ServerConfig>,
    registry: SessionRegistry,
    metrics: Arc<ClipSyncMetrics>,
    shutdown_tx: watch::Sender<bool>,
}

impl ClipSyncServer {
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let registry = SessionRegistry::new();
        let metrics = Arc::new(ClipSyncMetrics::new()?);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config: Arc::new(config),
            registry,
            metrics,
            shutdown_tx,
        })
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(Self::heartbeat_task(
            self.registry.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.metrics),
            shutdown_rx,
        ));

        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(Self::reaper_task(
            self.registry.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.metrics),
            shutdown_rx,
        ));

        let state = AppState {
            registry: self.registry.clone(),
            config: Arc::clone(&self.config),
            metrics: Arc::clone(&self.metrics),
            started_at: std::time::Instant::now(),
        };

        // Each route's method fallback (not just the router-wide fallback)
        // is pinned to `not_found` so a method mismatch on a registered path
        // (e.g. `POST /pair`) gets the spec's 404 body instead of axum's
        // default bare 405 (spec §6: "Any other path/method -> 404").
        let app = Router::new()
            .route(
                "/pair",
                axum::routing::get(crate::api::get_pair).fallback(crate::api::not_found),
            )
            .route(
                "/health",
                axum::routing::get(crate::api::get_health).fallback(crate::api::not_found),
            )
            .route(
                "/metrics",
                axum::routing::get(crate::api::get_metrics).fallback(crate::api::not_found),
            )
            .route(
                "/connect",
                axum::routing::get(crate::ws::connect_handler).fallback(crate::api::not_found),
            )
            .route(
                "/",
                axum::routing::get(crate::api::get_root).fallback(crate::api::not_found),
            )
            .fallback(crate::api::not_found)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state);

        // Trailing slashes on HTTP paths are normalized away (spec §6) before
        // routing ever sees them, so `/pair/` and `/pair` hit the same handler.
        let app = NormalizePathLayer::trim_trailing_slash().layer(app);

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        info!("clipsync-relay listening on {}", self.config.bind_addr);

        let shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, tower::util::ServiceExt::into_make_service(app))
            .with_graceful_shutdown(Self::shutdown_signal(shutdown_rx))
            .await?;

        Ok(())
    }

    /// Connection-liveness sweep (spec §4.7 paragraph 1).
    async fn heartbeat_task(
        registry: SessionRegistry,
        config: Arc<ServerConfig>,
        metrics: Arc<ClipSyncMetrics>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(config.heartbeat_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let (before, _) = count_live(&registry).await;
                    crate::heartbeat::heartbeat_tick(&registry, |pair, role| {
                        debug_ping(pair, role);
                    }).await;
                    let (connections, pairs) = count_live(&registry).await;
                    if connections < before {
                        for _ in 0..(before - connections) {
                            metrics.heartbeat_terminations_total.inc();
                        }
                    }
                    metrics.active_connections.set(connections as f64);
                    metrics.active_pairs.set(pairs as f64);
                    metrics.active_file_transfers.set(count_active_files(&registry).await as f64);
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Per-session file/pair-idle sweep (spec §4.7 paragraph 2).
    async fn reaper_task(
        registry: SessionRegistry,
        config: Arc<ServerConfig>,
        metrics: Arc<ClipSyncMetrics>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(config.reaper_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let before = registry.len();
                    crate::heartbeat::reaper_tick(&registry, &config).await;
                    let reaped = before.saturating_sub(registry.len());
                    for _ in 0..reaped {
                        metrics.sessions_reaped_total.inc();
                    }
                    metrics.active_pairs.set(registry.len() as f64);
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn shutdown_signal(mut shutdown: watch::Receiver<bool>) {
        #[cfg(unix)]
        let mut sigterm = {
            use tokio::signal::unix::{signal, SignalKind};
            signal(SignalKind::terminate()).ok()
        };

        tokio::select! {
            _ = async {
                #[cfg(unix)]
                {
                    if let Some(ref mut sigterm) = sigterm {
                        sigterm.recv().await;
                    }
                }
                #[cfg(not(unix))]
                {
                    std::future::pending::<()>().await;
                }
            } => {
                info!("received SIGTERM, starting graceful shutdown");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received SIGINT, starting graceful shutdown");
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("shutdown requested");
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn debug_ping(pair: &str, role: crate::session::Role) {
    tracing::debug!(pair, role = role.as_str(), "ping");
}

async fn count_live(registry: &SessionRegistry) -> (usize, usize) {
    let snapshot = registry.snapshot();
    let mut connections = 0;
    for (_, handle) in &snapshot {
        let session = handle.lock().await;
        if session.pc.is_some() {
            connections += 1;
        }
        if session.app.is_some() {
            connections += 1;
        }
    }
    (connections, snapshot.len())
}

async fn count_active_files(registry: &SessionRegistry) -> usize {
    let snapshot = registry.snapshot();
    let mut total = 0;
    for (_, handle) in &snapshot {
        let session = handle.lock().await;
        total += session.active_file_count();
    }
    total
}
