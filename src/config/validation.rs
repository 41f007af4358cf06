//! Configuration validation.
//!
//! # Responsibilities
//! - Reject settings that make startup impossible (no upstream, bad TLS floor)
//! - Warn about settings that are legal but risky
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::ProxyConfig;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("upstream_addr must name at least one target")]
    NoUpstream,
    #[error("invalid tls_min_version {0:?}")]
    TlsVersion(String),
    #[error("healthz_path must start with '/': {0:?}")]
    HealthzPath(String),
}

/// Lowest protocol version the TLS listener accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVersion {
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

impl TlsVersion {
    /// Parse a `tls_min_version` value. Empty means the default `tls1.0`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "" | "tls1.0" => Some(TlsVersion::Tls10),
            "tls1.1" => Some(TlsVersion::Tls11),
            "tls1.2" => Some(TlsVersion::Tls12),
            "tls1.3" => Some(TlsVersion::Tls13),
            _ => None,
        }
    }
}

/// Validate a resolved configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.upstream_addr.is_empty() {
        errors.push(ValidationError::NoUpstream);
    }

    if config.tls_enabled() && TlsVersion::parse(&config.tls_min_version).is_none() {
        errors.push(ValidationError::TlsVersion(config.tls_min_version.clone()));
    }

    if config.tls_cert.is_empty() != config.tls_key.is_empty() {
        tracing::warn!(
            "Only one of tls_cert and tls_key is set; the static certificate is ignored"
        );
    }

    if !config.no_healthz && !config.healthz_path.starts_with('/') {
        errors.push(ValidationError::HealthzPath(config.healthz_path.clone()));
    }

    if config.body_bufferrequest && config.body_limitrequest == 0 {
        tracing::warn!(
            "body_bufferrequest is enabled without body_limitrequest; \
             request bodies are buffered unbounded"
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
