use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::info;

const LOG_TARGET: &str = "crash_round::server::http";

/// Logs each HTTP request once it has been answered. WebSocket upgrades show up as 101.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let start = Instant::now();

    let response = next.run(request).await;

    info!(
        target: LOG_TARGET,
        %method,
        %path,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "request completed"
    );
    response
}
