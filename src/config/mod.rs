//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! environment (name, then NAME) over optional TOML file
//!     → loader.rs (resolve raw values, typed getters)
//!     → schema.rs (ProxyConfig with defaults)
//!     → header_spec.rs (header rule strings → pairs / names)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Unparsable values fall back to defaults; only semantic checks are fatal

pub mod header_spec;
pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError, ConfigReader};
pub use schema::{HstsMode, ProxyConfig, UpstreamProto, WwwMode};
pub use validation::{TlsVersion, ValidationError};
