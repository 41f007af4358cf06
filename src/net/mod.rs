//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind, peek first byte)
//!     → tls.rs (SNI certificate lookup, handshake)
//!     → connection.rs (metering, active count)
//!     → Hand off to the HTTP pipeline with a ConnectionKind
//! ```
//!
//! # Design Decisions
//! - TLS and plaintext share the listen port
//! - TLS is optional and handled transparently
//! - Certificates can change on disk without a restart
//! - Managed hosts get certificates from ACME (acme.rs) into the same directory

pub mod acme;
pub mod connection;
pub mod listener;
pub mod tls;

pub use acme::{AcmeError, Autocert};
pub use connection::ConnectionTracker;
pub use listener::{bind, bind_addr, ListenerError, ProxyAcceptor};
pub use tls::{tls_setup, CertStore, ManagedCerts, TlsError, TlsSetup};
