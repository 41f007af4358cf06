//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → subscribers (server) → not ready → drain → exit
//! ```
//!
//! # Design Decisions
//! - Shutdown has a timeout: stragglers are cut off after the drain deadline
//! - Readiness flips before draining so load balancers stop routing traffic here

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
