//! Upstream subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline terminal stage
//!     → dispatcher.rs (select target, rewrite URI/Host, strip hop-by-hop)
//!     → transport.rs (pooled client per protocol)
//!         - http / https / h2c over TCP
//!         - unix.rs (connector dialing a socket path)
//!     → Response streamed back through the pipeline
//! ```

pub mod dispatcher;
pub mod transport;
pub mod unix;

pub use dispatcher::{proxy_handler, DispatchError, Upstream};
pub use transport::{Transport, TransportError};
