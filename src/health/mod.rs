//! Health reporting subsystem.
//!
//! # Data Flow
//! ```text
//! Lifecycle (startup, shutdown)
//!     → state.rs (live / ready flags)
//!
//! GET <healthz_path>[?ready]
//!     → endpoint.rs (first pipeline stage)
//!     → 200 OK or 503
//! ```
//!
//! # Design Decisions
//! - Liveness and readiness are separate checks
//! - Readiness drops as soon as graceful shutdown begins
//! - Backends are not health checked; selection is pure round robin

pub mod endpoint;
pub mod state;

pub use endpoint::{healthz_middleware, Healthz};
pub use state::HealthState;
