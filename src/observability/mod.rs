//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline stages produce:
//!     → logging.rs (access events, target "access")
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Network layer produces:
//!     → metrics.rs (connection and byte counters)
//!
//! Consumers:
//!     → stdout via tracing-subscriber
//!     → Prometheus scrape on prom_port
//! ```
//!
//! # Design Decisions
//! - Structured logging for machine parsing
//! - Request ID flows from the request-id stage into access events
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
