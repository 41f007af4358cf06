//! Upstream dispatch: the terminal pipeline stage.
//!
//! # Responsibilities
//! - Select a target from the pool
//! - Rewrite destination, Host and path for the backend
//! - Strip hop-by-hop headers in both directions
//! - Relay the request and stream the response back
//!
//! # Design Decisions
//! - One attempt per request; failures become `502 Bad Gateway`
//! - Host is preserved unless an override is configured
//! - Request version always matches the transport

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, uri::PathAndQuery, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
};

use crate::config::ProxyConfig;
use crate::http::request::ClientInfo;
use crate::load_balancer::{Target, TargetPool};
use crate::security::headers::{proto, strip_hop_by_hop, X_FORWARDED_PROTO};
use crate::security::limits::is_length_limit_error;
use crate::upstream::transport::TransportError;

/// Per-request failure talking to the backend.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no upstream target available")]
    NoTarget,
    #[error("invalid upstream uri: {0}")]
    Uri(#[from] axum::http::Error),
    #[error("upstream request failed: {0}")]
    Exchange(#[from] hyper_util::client::legacy::Error),
}

/// Target pool plus the request rewriting applied before relaying.
#[derive(Debug)]
pub struct Upstream {
    pool: TargetPool,
    override_host: Option<HeaderValue>,
    path_prefix: String,
}

impl Upstream {
    pub fn new(pool: TargetPool, override_host: Option<HeaderValue>, path_prefix: &str) -> Self {
        Self {
            pool,
            override_host,
            path_prefix: normalize_prefix(path_prefix),
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Result<Self, TransportError> {
        let pool = TargetPool::from_addrs(
            config.upstream_proto,
            &config.upstream_addr,
            config.upstream_maxidleconns,
        )?;

        let override_host = if config.upstream_override_host.is_empty() {
            None
        } else {
            match HeaderValue::from_str(&config.upstream_override_host) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(
                        host = %config.upstream_override_host,
                        "Ignoring invalid upstream_override_host"
                    );
                    None
                }
            }
        };

        Ok(Self::new(pool, override_host, &config.upstream_path))
    }

    /// Forward `request` to the next target.
    pub async fn dispatch(&self, mut request: Request) -> Result<Response, DispatchError> {
        let target = self.pool.select().ok_or(DispatchError::NoTarget)?;
        let transport = target.transport();

        let host = self
            .override_host
            .clone()
            .or_else(|| request.headers().get(header::HOST).cloned())
            .or_else(|| {
                request
                    .uri()
                    .authority()
                    .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
            });
        let secure = ClientInfo::of(&request).secure;
        let uri = backend_uri(&target, &self.path_prefix, request.uri())?;

        let headers = request.headers_mut();
        strip_hop_by_hop(headers);
        if !headers.contains_key(X_FORWARDED_PROTO) {
            headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(proto(secure)));
        }
        match host {
            Some(host) => {
                headers.insert(header::HOST, host);
            }
            None => {
                headers.remove(header::HOST);
            }
        }
        *request.uri_mut() = uri;
        *request.version_mut() = transport.version();

        tracing::debug!(
            target_addr = %target.addr(),
            uri = %request.uri(),
            "Dispatching request"
        );

        let mut response = transport.exchange(request).await?;
        strip_hop_by_hop(response.headers_mut());
        Ok(response.map(Body::new))
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() || trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// `<scheme>://<authority><prefix><path>?<query>` for `target`.
pub fn backend_uri(
    target: &Target,
    prefix: &str,
    original: &Uri,
) -> Result<Uri, axum::http::Error> {
    let path = match original.path() {
        "" => "/",
        path => path,
    };
    let joined = match original.query() {
        Some(query) => format!("{prefix}{path}?{query}"),
        None => format!("{prefix}{path}"),
    };

    Uri::builder()
        .scheme(target.transport().scheme())
        .authority(target.authority())
        .path_and_query(PathAndQuery::try_from(joined)?)
        .build()
}

/// Terminal handler: dispatch or answer `502`.
pub async fn proxy_handler(State(upstream): State<Arc<Upstream>>, request: Request) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    match upstream.dispatch(request).await {
        Ok(response) => response,
        Err(DispatchError::Exchange(err)) if is_length_limit_error(&err) => {
            (StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large").into_response()
        }
        Err(err) => {
            tracing::warn!(method = %method, path = %path, error = %err, "Upstream request failed");
            (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::transport::Transport;

    fn target(addr: &str, transport: Transport) -> Target {
        Target::new(addr.to_string(), Arc::new(transport))
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix(""), "");
        assert_eq!(normalize_prefix("/"), "");
        assert_eq!(normalize_prefix("/api/"), "/api");
        assert_eq!(normalize_prefix("api"), "/api");
    }

    #[tokio::test]
    async fn test_backend_uri() {
        let t = target("10.0.0.1:8080", Transport::http(4));
        let uri = backend_uri(&t, "/api", &Uri::from_static("/users?id=1")).unwrap();
        assert_eq!(uri, "http://10.0.0.1:8080/api/users?id=1");

        let uri = backend_uri(&t, "", &Uri::from_static("http://example.com")).unwrap();
        assert_eq!(uri, "http://10.0.0.1:8080/");
    }

    #[tokio::test]
    async fn test_backend_uri_unix() {
        let t = target("/run/app.sock", Transport::unix("/run/app.sock", 4));
        let uri = backend_uri(&t, "", &Uri::from_static("/x")).unwrap();
        assert_eq!(uri, "http://localhost/x");
    }
}
