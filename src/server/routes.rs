use std::sync::Arc;

use axum::extract::Query;
use axum::middleware;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use crate::engine::{HistoryEntry, RoundSnapshot};

use super::error::ApiError;
use super::logging::log_requests;
use super::session::ws_handler;
use super::AppContext;

pub struct CrashRoundServer {
    router: Router,
}

impl CrashRoundServer {
    pub fn new(context: Arc<AppContext>, cors: CorsLayer) -> Self {
        let router = Router::new()
            .route("/ws", get(ws_handler))
            .route("/healthz", get(healthz))
            .route("/api/round", get(get_round))
            .route("/api/history", get(get_history))
            .layer(Extension(context))
            .layer(middleware::from_fn(log_requests))
            .layer(cors);

        Self { router }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn into_router(self) -> Router {
        self.router
    }
}

#[derive(Debug, Default, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn get_round(
    Extension(ctx): Extension<Arc<AppContext>>,
) -> Result<Json<RoundSnapshot>, ApiError> {
    let snapshot = ctx.rounds.snapshot().await?;
    Ok(Json(snapshot))
}

async fn get_history(
    Extension(ctx): Extension<Arc<AppContext>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let mut history = ctx.rounds.history().await?;
    if let Some(limit) = query.limit {
        history.truncate(limit);
    }
    Ok(Json(history))
}
