//! tirev: a configuration-driven reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net (listener, TLS sniffing, metering, ACME)
//!                 │
//!                 ▼
//!               http::server (client facts, tracing)
//!                 │
//!                 ▼
//!               http::pipeline
//!                 healthz → request headers → response headers → metrics
//!                 → trusted proxy → access log → request id
//!                 → rate limits (second, minute, hour) → body limit
//!                 → body buffer → compression → https redirect → HSTS
//!                 → www redirect → upstream headers
//!                 │
//!                 ▼
//!               upstream (dispatcher) ──▶ load_balancer (round robin)
//!                 │
//!                 ▼
//!               transport: http | https | h2c | unix  ──▶ Backend
//! ```
//!
//! Every stage is switched on or off by `ProxyConfig`; the order between
//! enabled stages never changes.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod upstream;

// Traffic management
pub mod health;
pub mod load_balancer;
pub mod security;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::{load_config, ProxyConfig};
pub use http::{Pipeline, ProxyServer, StageKind};
pub use lifecycle::Shutdown;
