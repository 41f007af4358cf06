//! Request body limits and buffering.
//!
//! # Responsibilities
//! - Enforce maximum request body size
//! - Optionally read the whole body before forwarding
//!
//! # Design Decisions
//! - Declared `Content-Length` over the limit is rejected before reading
//! - Streaming bodies are cut off at the limit by `tower-http`
//! - Return 413 Payload Too Large on limit violations, 400 on other read errors

use std::error::Error as StdError;

use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::LengthLimitError;
use tower_http::limit::RequestBodyLimitLayer;

/// Layer enforcing `limit` bytes per request body.
pub fn body_limit_layer(limit: u64) -> RequestBodyLimitLayer {
    RequestBodyLimitLayer::new(usize::try_from(limit).unwrap_or(usize::MAX))
}

/// True when `err` or any of its sources is a body length violation.
pub fn is_length_limit_error(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<LengthLimitError>() {
            return true;
        }
        current = e.source();
    }
    false
}

/// Body buffering stage.
///
/// Reads the body fully, then forwards it with an exact `Content-Length`.
pub async fn buffer_body_middleware(request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();

    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            if is_length_limit_error(&err) {
                return (StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large").into_response();
            }
            tracing::debug!(error = %err, "Failed to read request body");
            return (StatusCode::BAD_REQUEST, "Bad Request").into_response();
        }
    };

    parts.headers.remove(header::TRANSFER_ENCODING);
    parts
        .headers
        .insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}
