//! Listener binding and the connection acceptor.
//!
//! # Responsibilities
//! - Bind the listen socket
//! - Tell TLS from plaintext on the same port by peeking the first byte
//! - Complete the TLS handshake when certificates are configured
//! - Close ACME TLS-ALPN-01 validation connections once the handshake is done
//! - Attach connection facts (`ConnectionKind`) for the request layer
//!
//! # Design Decisions
//! - A connection whose first byte is a TLS handshake record is TLS; anything
//!   else is served as plaintext so the HTTPS redirect stage can see it
//! - Without certificates every connection is plaintext
//! - Every accepted connection is metered for the lifetime of its stream

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum_server::accept::Accept;
use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tower_http::add_extension::AddExtension;

use crate::http::request::ConnectionKind;
use crate::net::acme::ACME_TLS_ALPN;
use crate::net::connection::{ConnectionTracker, Metered};

/// First byte of a TLS handshake record.
const TLS_HANDSHAKE: u8 = 0x16;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Bind a non-blocking listener on all interfaces.
pub fn bind(port: u16) -> Result<std::net::TcpListener, ListenerError> {
    bind_addr(SocketAddr::from(([0, 0, 0, 0], port)))
}

pub fn bind_addr(addr: SocketAddr) -> Result<std::net::TcpListener, ListenerError> {
    let listener = std::net::TcpListener::bind(addr)
        .and_then(|l| l.set_nonblocking(true).map(|_| l))
        .map_err(|source| ListenerError::Bind { addr, source })?;

    tracing::info!(address = %addr, "Listener bound");
    Ok(listener)
}

/// A client connection, plaintext or TLS.
pub enum ClientStream {
    Plain(Metered<TcpStream>),
    Tls(Box<TlsStream<Metered<TcpStream>>>),
}

impl AsyncRead for ClientStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClientStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            ClientStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClientStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ClientStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            ClientStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ClientStream::Plain(s) => Pin::new(s).poll_write_vectored(cx, bufs),
            ClientStream::Tls(s) => Pin::new(s.as_mut()).poll_write_vectored(cx, bufs),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            ClientStream::Plain(s) => s.is_write_vectored(),
            ClientStream::Tls(s) => s.is_write_vectored(),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClientStream::Plain(s) => Pin::new(s).poll_flush(cx),
            ClientStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClientStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            ClientStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Acceptor serving TLS and plaintext on one port.
#[derive(Clone)]
pub struct ProxyAcceptor {
    tls: Option<TlsAcceptor>,
    tracker: ConnectionTracker,
}

impl ProxyAcceptor {
    pub fn new(tls: Option<TlsAcceptor>, tracker: ConnectionTracker) -> Self {
        Self { tls, tracker }
    }
}

impl<S> Accept<TcpStream, S> for ProxyAcceptor
where
    S: Send + 'static,
{
    type Stream = ClientStream;
    type Service = AddExtension<S, ConnectionKind>;
    type Future = BoxFuture<'static, io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: TcpStream, service: S) -> Self::Future {
        let tls = self.tls.clone();
        let tracker = self.tracker.clone();

        Box::pin(async move {
            let _ = stream.set_nodelay(true);
            let guard = tracker.track();

            if let Some(acceptor) = tls {
                let mut first = [0u8; 1];
                let peeked = stream.peek(&mut first).await?;
                if peeked == 1 && first[0] == TLS_HANDSHAKE {
                    let id = guard.id();
                    let mut tls_stream = acceptor
                        .accept(Metered::new(stream, guard))
                        .await
                        .inspect_err(|e| {
                            tracing::debug!(connection_id = %id, error = %e, "TLS handshake failed")
                        })?;

                    if tls_stream.get_ref().1.alpn_protocol() == Some(ACME_TLS_ALPN) {
                        tracing::info!(connection_id = %id, "ACME validation handshake completed");
                        let _ = tls_stream.shutdown().await;
                        return Err(io::Error::new(
                            io::ErrorKind::ConnectionAborted,
                            "acme-tls/1 validation connection",
                        ));
                    }

                    let kind = ConnectionKind { secure: true };
                    return Ok((
                        ClientStream::Tls(Box::new(tls_stream)),
                        AddExtension::new(service, kind),
                    ));
                }
            }

            let kind = ConnectionKind { secure: false };
            Ok((
                ClientStream::Plain(Metered::new(stream, guard)),
                AddExtension::new(service, kind),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_ephemeral() {
        let listener = bind_addr("127.0.0.1:0".parse().unwrap()).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_bind_in_use() {
        let first = bind_addr("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();
        assert!(matches!(bind_addr(addr), Err(ListenerError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_plaintext_without_tls() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();

        let tracker = ConnectionTracker::new();
        let acceptor = ProxyAcceptor::new(None, tracker.clone());
        let (stream, _service) = acceptor.accept(stream, ()).await.unwrap();

        assert!(matches!(stream, ClientStream::Plain(_)));
        assert_eq!(tracker.active_count(), 1);
        drop(stream);
        assert_eq!(tracker.active_count(), 0);
    }
}
