//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     upstream_addr + upstream_proto
//!     → target.rs (one Target per address, sharing or owning a Transport)
//!     → pool.rs (fixed, ordered TargetPool)
//!
//! Per request:
//!     → pool.rs select()
//!     → round_robin.rs (atomic cursor modulo pool size)
//!     → Target handed to the upstream dispatcher
//! ```
//!
//! # Design Decisions
//! - The pool is never resized after startup
//! - No health filtering; every target is always eligible
//! - Algorithm sits behind a trait so the pool does not depend on it

use std::sync::Arc;

pub mod pool;
pub mod round_robin;
pub mod target;

pub use pool::TargetPool;
pub use round_robin::RoundRobin;
pub use target::Target;

/// Strategy choosing one target per request.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    fn next_target(&self, targets: &[Arc<Target>]) -> Option<Arc<Target>>;
}
