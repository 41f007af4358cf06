//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Emit one access-log event per request
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - Access events use the `access` target so they can be filtered separately
//! - Log level configurable via `RUST_LOG`

use std::time::Instant;

use axum::{
    extract::Request,
    http::header,
    middleware::Next,
    response::Response,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::http::request::{ClientInfo, X_REQUEST_ID};
use crate::observability::metrics::request_host;

pub const DEFAULT_FILTER: &str = "tirev=info,access=info,tower_http=warn";

/// Install the global subscriber: `RUST_LOG` or [`DEFAULT_FILTER`], fmt output.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Access logging stage.
pub async fn access_log_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let host = request_host(&request);
    let path = request.uri().path().to_string();
    let client = ClientInfo::of(&request);
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let request_header_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let response = next.run(request).await;

    // The id may be assigned by an inner stage and echoed on the response.
    let request_id = response
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(request_header_id)
        .unwrap_or_default();
    let client_ip = client.ip.map(|ip| ip.to_string()).unwrap_or_default();

    tracing::info!(
        target: "access",
        method = %method,
        host = %host,
        path = %path,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        client_ip = %client_ip,
        request_id = %request_id,
        user_agent = %user_agent,
        "request"
    );

    response
}
