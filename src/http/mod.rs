//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (client facts, tracing, serving)
//!     → pipeline.rs (configured stages in fixed order)
//!         → request.rs, redirect.rs, rewrite.rs, compression.rs, ...
//!     → upstream dispatcher
//!     → Send to client
//! ```

pub mod compression;
pub mod pipeline;
pub mod redirect;
pub mod request;
pub mod rewrite;
pub mod server;

pub use pipeline::{enabled_stages, Pipeline, StageKind};
pub use request::{ClientInfo, ConnectionKind, X_REQUEST_ID};
pub use server::{ProxyServer, ServerError};
