//! Redirect stages: plaintext to HTTPS and host canonicalisation.
//!
//! # Design Decisions
//! - Always `301 Moved Permanently`
//! - Requests without a host pass through untouched
//! - A redirect short-circuits the rest of the pipeline

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::WwwMode;
use crate::http::request::ClientInfo;
use crate::observability::metrics::request_host;

fn moved_permanently(location: &str) -> Option<Response> {
    let location = HeaderValue::from_str(location).ok()?;
    Some((StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response())
}

fn path_and_query(request: &Request) -> &str {
    request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
}

/// HTTPS redirect stage.
pub async fn https_redirect_middleware(request: Request, next: Next) -> Response {
    if ClientInfo::of(&request).secure {
        return next.run(request).await;
    }

    let host = request_host(&request);
    if host.is_empty() {
        return next.run(request).await;
    }

    let location = format!("https://{}{}", host, path_and_query(&request));
    match moved_permanently(&location) {
        Some(response) => response,
        None => next.run(request).await,
    }
}

/// Host the WWW stage should redirect to, if any.
pub fn www_target(mode: WwwMode, host: &str) -> Option<String> {
    match mode {
        WwwMode::Off => None,
        WwwMode::Www if !host.starts_with("www.") => Some(format!("www.{host}")),
        WwwMode::Non => host.strip_prefix("www.").map(str::to_string),
        WwwMode::Www => None,
    }
}

/// WWW-normalisation stage.
pub async fn www_redirect_middleware(
    State(mode): State<WwwMode>,
    request: Request,
    next: Next,
) -> Response {
    let host = request_host(&request);
    if host.is_empty() {
        return next.run(request).await;
    }

    let Some(target) = www_target(mode, &host) else {
        return next.run(request).await;
    };

    let scheme = if ClientInfo::of(&request).secure {
        "https"
    } else {
        "http"
    };
    let location = format!("{}://{}{}", scheme, target, path_and_query(&request));
    match moved_permanently(&location) {
        Some(response) => response,
        None => next.run(request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware, Router};
    use tower::ServiceExt;

    #[test]
    fn test_www_target() {
        assert_eq!(www_target(WwwMode::Www, "example.com"), Some("www.example.com".to_string()));
        assert_eq!(www_target(WwwMode::Www, "www.example.com"), None);
        assert_eq!(www_target(WwwMode::Non, "www.example.com"), Some("example.com".to_string()));
        assert_eq!(www_target(WwwMode::Non, "example.com"), None);
        assert_eq!(www_target(WwwMode::Off, "example.com"), None);
    }

    #[tokio::test]
    async fn test_https_redirect() {
        let app = Router::new()
            .fallback(|| async { "upstream" })
            .layer(middleware::from_fn(https_redirect_middleware));

        let request = Request::builder()
            .uri("/a/b?c=d")
            .header("host", "example.com")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()[header::LOCATION], "https://example.com/a/b?c=d");

        let mut request = Request::builder()
            .uri("/")
            .header("host", "example.com")
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(ClientInfo { ip: None, secure: true });
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_www_redirect_keeps_scheme() {
        let app = Router::new()
            .fallback(|| async { "upstream" })
            .layer(middleware::from_fn_with_state(WwwMode::Non, www_redirect_middleware));

        let mut request = Request::builder()
            .uri("/x")
            .header("host", "www.example.com")
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(ClientInfo { ip: None, secure: true });
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()[header::LOCATION], "https://example.com/x");
    }
}
