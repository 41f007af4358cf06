//! HTTP server setup.
//!
//! # Responsibilities
//! - Assemble health state, the request pipeline and TLS material
//! - Attach client facts and request tracing around the pipeline
//! - Serve plaintext and TLS on one listener
//! - Run ACME issuance for managed hosts alongside the listener
//! - Drain in-flight requests on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, Router};
use axum_server::Handle;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::health::HealthState;
use crate::http::pipeline::Pipeline;
use crate::http::request::client_info_middleware;
use crate::net::acme::Autocert;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::ProxyAcceptor;
use crate::net::tls::{tls_setup, TlsError, TlsSetup};
use crate::upstream::TransportError;

/// How long in-flight requests may take to finish after shutdown starts.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("upstream setup failed: {0}")]
    Transport(#[from] TransportError),
    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// The reverse proxy server.
pub struct ProxyServer {
    config: ProxyConfig,
    health: Arc<HealthState>,
    pipeline: Pipeline,
    tls: Option<TlsSetup>,
    tracker: ConnectionTracker,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        let health = Arc::new(HealthState::new());
        let pipeline = Pipeline::from_config(&config, health.clone())?;
        let tls = tls_setup(&config)?;

        Ok(Self {
            config,
            health,
            pipeline,
            tls,
            tracker: ConnectionTracker::new(),
        })
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn health(&self) -> &Arc<HealthState> {
        &self.health
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// The pipeline with connection-level layers applied.
    pub fn app(&self) -> Router {
        self.pipeline
            .clone()
            .into_router()
            .layer(middleware::from_fn_with_state(
                self.config.front,
                client_info_middleware,
            ))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve on `listener` until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: std::net::TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        let app = self.app();

        let Self {
            config,
            health,
            tls,
            tracker,
            ..
        } = self;

        // The watcher stops when dropped, so it lives as long as the server.
        let (acceptor, _watcher) = match tls {
            Some(setup) => {
                if let Some(managed) = setup.store.managed() {
                    let autocert = Autocert::new(managed.clone(), &config.autocert_ca);
                    tokio::spawn(autocert.run(shutdown.resubscribe()));
                }
                (
                    Some(TlsAcceptor::from(setup.server_config)),
                    setup.watcher,
                )
            }
            None => (None, None),
        };

        tracing::info!(address = %addr, tls = acceptor.is_some(), "Proxy server starting");

        let handle = Handle::new();
        let drain = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            health.set_ready(false);
            tracing::info!(timeout_secs = DRAIN_TIMEOUT.as_secs(), "Draining connections");
            drain.graceful_shutdown(Some(DRAIN_TIMEOUT));
        });

        axum_server::from_tcp(listener)
            .acceptor(ProxyAcceptor::new(acceptor, tracker))
            .handle(handle)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await?;

        tracing::info!("Proxy server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn config() -> ProxyConfig {
        ProxyConfig {
            upstream_addr: vec!["127.0.0.1:1".into()],
            ..ProxyConfig::default()
        }
    }

    #[tokio::test]
    async fn test_new_without_tls() {
        let server = ProxyServer::new(config()).unwrap();
        assert!(server.tls.is_none());
        assert!(server.health().is_ready());
        assert!(!server.pipeline().stages().is_empty());
    }

    #[tokio::test]
    async fn test_new_rejects_empty_upstream() {
        let result = ProxyServer::new(ProxyConfig::default());
        assert!(matches!(result, Err(ServerError::Transport(_))));
    }

    #[tokio::test]
    async fn test_new_with_managed_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let server = ProxyServer::new(ProxyConfig {
            autocert_dir: dir.path().display().to_string(),
            autocert_hosts: vec!["a.example".into()],
            ..config()
        })
        .unwrap();

        let setup = server.tls.as_ref().unwrap();
        assert_eq!(setup.store.managed().unwrap().hosts(), ["a.example"]);
        assert!(setup.server_config.alpn_protocols.contains(&b"acme-tls/1".to_vec()));
    }

    #[tokio::test]
    async fn test_app_serves_healthz() {
        let server = ProxyServer::new(config()).unwrap();
        let response = server
            .app()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
