//! Protocol-specific transports to upstream targets.
//!
//! # Responsibilities
//! - Map a protocol tag to a pooled client
//! - Exchange one request for one response
//!
//! # Design Decisions
//! - Closed enum: the set of protocols is fixed at compile time
//! - Pooling is owned by `hyper-util`; idle connections are capped per host
//! - No retries here; connect failures surface to the dispatcher

use std::path::Path;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response, Version};
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::config::UpstreamProto;
use crate::upstream::unix::UnixConnector;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error building the upstream side at startup.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no upstream targets configured")]
    NoTargets,
    #[error("failed to load native root certificates: {0}")]
    NativeRoots(#[source] std::io::Error),
}

#[derive(Debug)]
pub enum Transport {
    /// HTTP/1.1 over TCP.
    Http(Client<HttpConnector, Body>),
    /// HTTP/1.1 over TLS, verified against the system roots.
    Https(Client<HttpsConnector<HttpConnector>, Body>),
    /// HTTP/2 with prior knowledge over TCP.
    H2c(Client<HttpConnector, Body>),
    /// HTTP/1.1 over a Unix domain socket.
    Unix(Client<UnixConnector, Body>),
}

fn tcp_connector() -> HttpConnector {
    let mut http = HttpConnector::new();
    http.set_connect_timeout(Some(CONNECT_TIMEOUT));
    http.set_nodelay(true);
    http
}

impl Transport {
    /// Transport for a TCP-based protocol tag. `unix` targets are built per
    /// socket path with [`Transport::unix`].
    pub fn for_proto(proto: UpstreamProto, max_idle: usize) -> Result<Self, TransportError> {
        match proto {
            UpstreamProto::Https => Self::https(max_idle),
            UpstreamProto::H2c => Ok(Self::h2c()),
            UpstreamProto::Http | UpstreamProto::Unix => Ok(Self::http(max_idle)),
        }
    }

    pub fn http(max_idle: usize) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(max_idle)
            .build(tcp_connector());
        Transport::Http(client)
    }

    pub fn https(max_idle: usize) -> Result<Self, TransportError> {
        let mut http = tcp_connector();
        http.enforce_http(false);

        let connector = HttpsConnectorBuilder::new()
            .with_provider_and_native_roots(rustls::crypto::ring::default_provider())
            .map_err(TransportError::NativeRoots)?
            .https_only()
            .enable_http1()
            .wrap_connector(http);

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(max_idle)
            .build(connector);
        Ok(Transport::Https(client))
    }

    /// One multiplexed connection per target, no idle cap.
    pub fn h2c() -> Self {
        let client = Client::builder(TokioExecutor::new())
            .http2_only(true)
            .build(tcp_connector());
        Transport::H2c(client)
    }

    pub fn unix(path: impl AsRef<Path>, max_idle: usize) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(max_idle)
            .build(UnixConnector::new(path));
        Transport::Unix(client)
    }

    /// URI scheme used to address targets of this transport.
    pub fn scheme(&self) -> &'static str {
        match self {
            Transport::Https(_) => "https",
            _ => "http",
        }
    }

    /// HTTP version requests must carry on this transport.
    pub fn version(&self) -> Version {
        match self {
            Transport::H2c(_) => Version::HTTP_2,
            _ => Version::HTTP_11,
        }
    }

    pub fn is_unix(&self) -> bool {
        matches!(self, Transport::Unix(_))
    }

    /// Send one request and wait for the response head.
    pub async fn exchange(
        &self,
        request: Request<Body>,
    ) -> Result<Response<Incoming>, hyper_util::client::legacy::Error> {
        match self {
            Transport::Http(client) | Transport::H2c(client) => client.request(request).await,
            Transport::Https(client) => client.request(request).await,
            Transport::Unix(client) => client.request(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scheme_and_version() {
        let http = Transport::http(4);
        assert_eq!(http.scheme(), "http");
        assert_eq!(http.version(), Version::HTTP_11);

        let h2c = Transport::h2c();
        assert_eq!(h2c.scheme(), "http");
        assert_eq!(h2c.version(), Version::HTTP_2);

        let unix = Transport::unix("/tmp/none.sock", 4);
        assert!(unix.is_unix());
        assert_eq!(unix.version(), Version::HTTP_11);
    }

    #[tokio::test]
    async fn test_unknown_proto_falls_back_to_http() {
        let transport = Transport::for_proto(UpstreamProto::from("spdy"), 4).unwrap();
        assert!(matches!(transport, Transport::Http(_)));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let request = Request::builder()
            .uri(format!("http://{addr}/"))
            .body(Body::empty())
            .unwrap();
        assert!(Transport::http(4).exchange(request).await.is_err());
    }
}
