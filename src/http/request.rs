//! Per-request client context and request identifiers.
//!
//! # Responsibilities
//! - Establish `ClientInfo` (client IP, secure transport) for every request
//! - Apply the forwarded-header trust policy before any stage runs
//! - Generate request IDs (UUID v4)
//!
//! # Design Decisions
//! - `ClientInfo` travels as a request extension; stages read it with
//!   `ClientInfo::of` and fall back to an unknown, insecure client
//! - The connection facts (`ConnectInfo`, `ConnectionKind`) are inserted by the
//!   server runtime, so the pipeline works without them under test

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tower_http::request_id::{MakeRequestId, RequestId};

use crate::security::headers::normalize_forwarded;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Facts about the accepted connection, inserted by the acceptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionKind {
    /// The connection completed a TLS handshake.
    pub secure: bool,
}

/// Who sent the request, as far as the proxy trusts it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: Option<IpAddr>,
    pub secure: bool,
}

impl ClientInfo {
    /// Client info attached to the request, or an unknown insecure client.
    pub fn of<B>(request: &axum::http::Request<B>) -> Self {
        request
            .extensions()
            .get::<ClientInfo>()
            .copied()
            .unwrap_or_default()
    }
}

/// Middleware establishing `ClientInfo` from the connection and headers.
///
/// State is the `front` flag.
pub async fn client_info_middleware(
    State(front): State<bool>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let secure = request
        .extensions()
        .get::<ConnectionKind>()
        .map(|kind| kind.secure)
        .unwrap_or(false);

    let forwarded = normalize_forwarded(request.headers_mut(), front, peer, secure);
    request.extensions_mut().insert(ClientInfo {
        ip: forwarded.ip,
        secure: forwarded.secure,
    });

    next.run(request).await
}

/// Request ID generator producing UUID v4 values.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestUuid;

impl MakeRequestId for RequestUuid {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}
