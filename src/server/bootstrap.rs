use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::balance::InMemoryBalanceStore;
use crate::db::{connect, ensure_schema};
use crate::engine::{Chips, EngineConfig, UniformSource};
use crate::service::{RoundService, RoundServiceConfig};
use crate::store::{InMemoryRoundStore, SeaOrmRoundStore, SharedRoundStore};

use super::hub::ConnectionHub;
use super::routes::CrashRoundServer;
use super::AppContext;

const LOG_TARGET: &str = "crash_round::server::bootstrap";

pub struct ServerConfig {
    pub bind: SocketAddr,
    pub database_url: Option<String>,
    pub engine: EngineConfig,
    pub source: Box<dyn UniformSource>,
    pub opening_balance: Chips,
    pub heartbeat: Duration,
    pub allowed_origin: Option<String>,
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    let store: SharedRoundStore = match &config.database_url {
        Some(url) => {
            let db = connect(url).await?;
            ensure_schema(&db)
                .await
                .context("failed to prepare database schema")?;
            Arc::new(SeaOrmRoundStore::new(db))
        }
        None => {
            warn!(
                target: LOG_TARGET,
                "no database configured; round records are kept in memory"
            );
            Arc::new(InMemoryRoundStore::new())
        }
    };
    let balances = InMemoryBalanceStore::new(config.opening_balance);
    let hub = Arc::new(ConnectionHub::new());
    let cors = cors_layer(config.allowed_origin.as_deref())?;

    let shutdown = CancellationToken::new();
    let service = RoundService::spawn(
        RoundServiceConfig::new(
            config.engine,
            config.source,
            Arc::new(balances.clone()),
            store,
            hub.clone(),
        ),
        shutdown.clone(),
    )
    .await
    .context("failed to start round service")?;

    let context = Arc::new(AppContext {
        rounds: service.handle(),
        hub,
        balances: Arc::new(balances.clone()),
        directory: Arc::new(balances),
        heartbeat: config.heartbeat,
        shutdown: shutdown.clone(),
    });
    let router = CrashRoundServer::new(context, cors).into_router();

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    let local_addr = listener.local_addr()?;
    info!(
        target: LOG_TARGET,
        %local_addr,
        persistent = config.database_url.is_some(),
        "crash round server listening"
    );

    let served = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("server exited with error");
    service.shutdown().await;
    info!(target: LOG_TARGET, "server stopped");
    served
}

/// Permissive when no origin is configured, otherwise limited to that origin.
pub fn cors_layer(allowed_origin: Option<&str>) -> Result<CorsLayer> {
    match allowed_origin {
        None => Ok(CorsLayer::permissive()),
        Some(origin) => {
            let origin = HeaderValue::from_str(origin)
                .with_context(|| format!("invalid allowed origin {origin}"))?;
            Ok(CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([Method::GET])
                .allow_headers(Any))
        }
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!(target: LOG_TARGET, error = %err, "failed to install ctrl-c handler");
                // without a handler only an explicit cancel stops the server
                shutdown.cancelled().await;
            }
        }
        _ = shutdown.cancelled() => {}
    }
    info!(target: LOG_TARGET, "shutdown signal received");
    shutdown.cancel();
}
