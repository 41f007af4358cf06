//! Health endpoint responder.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::health::state::HealthState;

/// Health endpoint configuration.
#[derive(Debug, Clone)]
pub struct Healthz {
    pub path: String,
    pub state: Arc<HealthState>,
}

impl Healthz {
    pub fn new(path: impl Into<String>, state: Arc<HealthState>) -> Self {
        Self {
            path: path.into(),
            state,
        }
    }
}

/// Healthz stage: answers `path` directly and passes everything else on.
///
/// A `ready` query parameter selects the readiness check.
pub async fn healthz_middleware(
    State(healthz): State<Arc<Healthz>>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().path() != healthz.path {
        return next.run(request).await;
    }

    let readiness = request
        .uri()
        .query()
        .map(|q| q.split('&').any(|pair| pair.split('=').next() == Some("ready")))
        .unwrap_or(false);

    let healthy = if readiness {
        healthz.state.is_ready()
    } else {
        healthz.state.is_live()
    };

    if healthy {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware, Router};
    use tower::ServiceExt;

    fn app(state: Arc<HealthState>) -> Router {
        Router::new()
            .fallback(|| async { "upstream" })
            .layer(middleware::from_fn_with_state(
                Arc::new(Healthz::new("/healthz", state)),
                healthz_middleware,
            ))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_live() {
        let state = Arc::new(HealthState::new());
        assert_eq!(get(app(state), "/healthz").await, (StatusCode::OK, "OK".to_string()));
    }

    #[tokio::test]
    async fn test_other_paths_pass_through() {
        let state = Arc::new(HealthState::new());
        assert_eq!(get(app(state), "/healthz/x").await.1, "upstream");
    }

    #[tokio::test]
    async fn test_readiness_after_drain() {
        let state = Arc::new(HealthState::new());
        state.set_ready(false);

        assert_eq!(get(app(state.clone()), "/healthz").await.0, StatusCode::OK);
        assert_eq!(
            get(app(state), "/healthz?ready").await.0,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_not_live() {
        let state = Arc::new(HealthState::new());
        state.set_live(false);
        assert_eq!(get(app(state), "/healthz").await.0, StatusCode::SERVICE_UNAVAILABLE);
    }
}
