//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → trusted_proxy.rs (recover client IP behind a load balancer)
//!     → rate_limit.rs (per-IP fixed windows)
//!     → limits.rs (body size limit, optional buffering)
//!     → headers.rs (forwarded headers, hop-by-hop stripping, HSTS)
//!     → Upstream dispatch
//! ```
//!
//! # Design Decisions
//! - Each concern is its own pipeline stage, toggled by configuration
//! - Rejections become responses; nothing here fails the connection
//! - Client headers are trusted only as far as `front` allows

pub mod headers;
pub mod limits;
pub mod rate_limit;
pub mod trusted_proxy;
