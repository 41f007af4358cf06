//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Request, Response};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::{http1, http2};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::{TcpListener, UnixListener};

use tirev::health::HealthState;
use tirev::{Pipeline, ProxyConfig};

/// Answer with `name` as the body and describe the request in headers.
///
/// - `x-backend`: the backend name
/// - `x-version`: HTTP version seen by the backend
/// - `x-uri`: request target seen by the backend
/// - `x-body-len`: bytes received in the body
/// - `x-echo-<header>`: every request header, verbatim
async fn echo(
    name: &'static str,
    request: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let is_http1 = request.version() == axum::http::Version::HTTP_11;
    let version = format!("{:?}", request.version());
    let (parts, body) = request.into_parts();
    let body = body
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default();

    let mut response = Response::new(Full::new(Bytes::from_static(name.as_bytes())));
    let headers = response.headers_mut();
    headers.insert("x-backend", HeaderValue::from_static(name));
    headers.insert("x-version", HeaderValue::from_str(&version).unwrap());
    headers.insert("x-uri", HeaderValue::from_str(&parts.uri.to_string()).unwrap());
    headers.insert("x-body-len", HeaderValue::from(body.len()));
    if is_http1 {
        headers.insert("connection", HeaderValue::from_static("x-backend-hop"));
        headers.insert("x-backend-hop", HeaderValue::from_static("1"));
    }
    for (key, value) in &parts.headers {
        if let Ok(echoed) = HeaderName::from_bytes(format!("x-echo-{key}").as_bytes()) {
            headers.append(echoed, value.clone());
        }
    }
    Ok(response)
}

/// Start an HTTP/1.1 echo backend on an ephemeral port.
pub async fn spawn_backend(name: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service_fn(move |req| echo(name, req)))
                    .await;
            });
        }
    });

    addr
}

/// Start a cleartext HTTP/2 echo backend on an ephemeral port.
pub async fn spawn_h2c_backend(name: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = http2::Builder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(stream), service_fn(move |req| echo(name, req)))
                    .await;
            });
        }
    });

    addr
}

/// Start an HTTP/1.1 echo backend on a unix socket at `path`.
pub fn spawn_unix_backend(name: &'static str, path: &Path) {
    let listener = UnixListener::bind(path).unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service_fn(move |req| echo(name, req)))
                    .await;
            });
        }
    });
}

/// Start an HTTP/1.1 backend answering every request with `len` bytes of text.
pub async fn spawn_text_backend(len: usize) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = Bytes::from("lorem ipsum dolor sit amet ".repeat(len / 27 + 1)).slice(..len);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let body = body.clone();
            let service = service_fn(move |_req: Request<Incoming>| {
                let mut response = Response::new(Full::new(body.clone()));
                response
                    .headers_mut()
                    .insert("content-type", HeaderValue::from_static("text/plain"));
                async move { Ok::<_, Infallible>(response) }
            });
            tokio::spawn(async move {
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

/// An address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Configuration proxying to `addrs` with optional stages off.
pub fn base_config(addrs: &[SocketAddr]) -> ProxyConfig {
    ProxyConfig {
        upstream_addr: addrs.iter().map(ToString::to_string).collect(),
        no_prom: true,
        ..ProxyConfig::default()
    }
}

pub fn pipeline(config: &ProxyConfig) -> Pipeline {
    Pipeline::from_config(config, Arc::new(HealthState::new())).unwrap()
}

pub fn get(uri: &str, host: &str) -> Request<Body> {
    Request::get(uri)
        .header("host", host)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_bytes(response: axum::response::Response) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_text(response: axum::response::Response) -> String {
    String::from_utf8(body_bytes(response).await.to_vec()).unwrap()
}

/// Install ring as the process crypto provider; safe to call repeatedly.
pub fn install_crypto() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Self-signed certificate and key PEM for `host`.
pub fn self_signed(host: &str) -> (String, String) {
    let cert = rcgen::generate_simple_self_signed(vec![host.to_string()]).unwrap();
    (cert.cert.pem(), cert.key_pair.serialize_pem())
}
