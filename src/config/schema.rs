//! Configuration schema definitions.
//!
//! This module defines the complete configuration snapshot for the proxy.
//! Field names match the setting names read from the environment.

use serde::Serialize;

use crate::config::header_spec::{parse_header_names, parse_header_pairs};
use crate::config::loader::ConfigReader;

/// Root configuration for the reverse proxy.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyConfig {
    /// Edge mode: do not trust forwarded headers from clients.
    pub front: bool,
    pub port: u16,

    pub no_healthz: bool,
    pub healthz_path: String,

    pub no_prom: bool,
    pub prom_port: u16,

    pub no_gzip: bool,
    pub no_br: bool,
    pub no_log: bool,
    pub no_reqid: bool,

    pub reqheader_set: Vec<(String, String)>,
    pub reqheader_add: Vec<(String, String)>,
    pub reqheader_del: Vec<String>,
    pub respheader_set: Vec<(String, String)>,
    pub respheader_add: Vec<(String, String)>,
    pub respheader_del: Vec<String>,

    /// Requests per second per client (0 = disabled).
    pub ratelimit_s: u64,
    /// Requests per minute per client (0 = disabled).
    pub ratelimit_m: u64,
    /// Requests per hour per client (0 = disabled).
    pub ratelimit_h: u64,

    pub body_bufferrequest: bool,
    /// Maximum request body in bytes (0 = disabled).
    pub body_limitrequest: u64,

    pub redirect_https: bool,
    pub hsts: HstsMode,
    pub redirect_www: WwwMode,

    /// Backend addresses in selection order.
    pub upstream_addr: Vec<String>,
    pub upstream_proto: UpstreamProto,
    pub upstream_header_set: Vec<(String, String)>,
    pub upstream_header_add: Vec<(String, String)>,
    pub upstream_header_del: Vec<String>,
    pub upstream_override_host: String,
    pub upstream_path: String,
    pub upstream_maxidleconns: usize,

    /// Extra trusted hops in front of the GCP load balancer (-1 = disabled).
    pub gcp_hlb: i64,

    pub tls_key: String,
    pub tls_cert: String,
    pub tls_min_version: String,
    pub autocert_dir: String,
    pub autocert_hosts: Vec<String>,
    /// ACME directory URL; empty means Let's Encrypt production.
    pub autocert_ca: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            front: false,
            port: 8080,
            no_healthz: false,
            healthz_path: "/healthz".to_string(),
            no_prom: false,
            prom_port: 9187,
            no_gzip: false,
            no_br: false,
            no_log: false,
            no_reqid: false,
            reqheader_set: Vec::new(),
            reqheader_add: Vec::new(),
            reqheader_del: Vec::new(),
            respheader_set: Vec::new(),
            respheader_add: Vec::new(),
            respheader_del: Vec::new(),
            ratelimit_s: 0,
            ratelimit_m: 0,
            ratelimit_h: 0,
            body_bufferrequest: false,
            body_limitrequest: 0,
            redirect_https: false,
            hsts: HstsMode::Off,
            redirect_www: WwwMode::Off,
            upstream_addr: Vec::new(),
            upstream_proto: UpstreamProto::Http,
            upstream_header_set: Vec::new(),
            upstream_header_add: Vec::new(),
            upstream_header_del: Vec::new(),
            upstream_override_host: String::new(),
            upstream_path: String::new(),
            upstream_maxidleconns: 32,
            gcp_hlb: -1,
            tls_key: String::new(),
            tls_cert: String::new(),
            tls_min_version: String::new(),
            autocert_dir: String::new(),
            autocert_hosts: Vec::new(),
            autocert_ca: String::new(),
        }
    }
}

impl ProxyConfig {
    /// Resolve every setting from the reader, falling back to defaults.
    pub fn from_reader(reader: &ConfigReader) -> Self {
        let defaults = Self::default();
        Self {
            front: reader.bool("front"),
            port: reader.int_default("port", defaults.port),
            no_healthz: reader.bool("no_healthz"),
            healthz_path: reader.string_default("healthz_path", &defaults.healthz_path),
            no_prom: reader.bool("no_prom"),
            prom_port: reader.int_default("prom_port", defaults.prom_port),
            no_gzip: reader.bool("no_gzip"),
            no_br: reader.bool("no_br"),
            no_log: reader.bool("no_log"),
            no_reqid: reader.bool("no_reqid"),
            reqheader_set: parse_header_pairs(&reader.string("reqheader_set")),
            reqheader_add: parse_header_pairs(&reader.string("reqheader_add")),
            reqheader_del: parse_header_names(&reader.string("reqheader_del")),
            respheader_set: parse_header_pairs(&reader.string("respheader_set")),
            respheader_add: parse_header_pairs(&reader.string("respheader_add")),
            respheader_del: parse_header_names(&reader.string("respheader_del")),
            ratelimit_s: reader.int_default("ratelimit_s", 0),
            ratelimit_m: reader.int_default("ratelimit_m", 0),
            ratelimit_h: reader.int_default("ratelimit_h", 0),
            body_bufferrequest: reader.bool("body_bufferrequest"),
            body_limitrequest: reader.int_default("body_limitrequest", 0),
            redirect_https: reader.bool("redirect_https"),
            hsts: HstsMode::from(reader.string("hsts").as_str()),
            redirect_www: WwwMode::from(reader.string("redirect_www").as_str()),
            upstream_addr: split_list(&reader.string("upstream_addr")),
            upstream_proto: UpstreamProto::from(reader.string("upstream_proto").as_str()),
            upstream_header_set: parse_header_pairs(&reader.string("upstream_header_set")),
            upstream_header_add: parse_header_pairs(&reader.string("upstream_header_add")),
            upstream_header_del: parse_header_names(&reader.string("upstream_header_del")),
            upstream_override_host: reader.string("upstream_override_host"),
            upstream_path: reader.string("upstream_path"),
            upstream_maxidleconns: reader
                .int_default("upstream_maxidleconns", defaults.upstream_maxidleconns),
            gcp_hlb: reader.int_default("gcp_hlb", defaults.gcp_hlb),
            tls_key: reader.string("tls_key"),
            tls_cert: reader.string("tls_cert"),
            tls_min_version: reader.string("tls_min_version"),
            autocert_dir: reader.string("autocert_dir"),
            autocert_hosts: split_list(&reader.string("autocert_hosts")),
            autocert_ca: reader.string("autocert_ca"),
        }
    }

    /// Static certificate pair, only when both paths are set.
    pub fn static_tls(&self) -> Option<(&str, &str)> {
        if self.tls_cert.is_empty() || self.tls_key.is_empty() {
            return None;
        }
        Some((&self.tls_cert, &self.tls_key))
    }

    /// Managed certificate directory and allow-list, only when both are set.
    pub fn managed_tls(&self) -> Option<(&str, &[String])> {
        if self.autocert_dir.is_empty() || self.autocert_hosts.is_empty() {
            return None;
        }
        Some((&self.autocert_dir, &self.autocert_hosts))
    }

    pub fn tls_enabled(&self) -> bool {
        self.static_tls().is_some() || self.managed_tls().is_some()
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Strict-Transport-Security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HstsMode {
    Off,
    Default,
    Preload,
}

impl From<&str> for HstsMode {
    fn from(s: &str) -> Self {
        match s.trim() {
            "" => HstsMode::Off,
            "preload" => HstsMode::Preload,
            _ => HstsMode::Default,
        }
    }
}

/// Host canonicalisation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WwwMode {
    Off,
    /// Redirect `example.com` to `www.example.com`.
    Www,
    /// Redirect `www.example.com` to `example.com`.
    Non,
}

impl From<&str> for WwwMode {
    fn from(s: &str) -> Self {
        match s.trim() {
            "www" => WwwMode::Www,
            "non" => WwwMode::Non,
            _ => WwwMode::Off,
        }
    }
}

/// Protocol used to reach the upstream targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamProto {
    Http,
    Https,
    H2c,
    Unix,
}

impl From<&str> for UpstreamProto {
    /// Unknown tags fall back to plain HTTP.
    fn from(s: &str) -> Self {
        match s.trim() {
            "https" => UpstreamProto::Https,
            "h2c" => UpstreamProto::H2c,
            "unix" => UpstreamProto::Unix,
            _ => UpstreamProto::Http,
        }
    }
}

impl std::fmt::Display for UpstreamProto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            UpstreamProto::Http => "http",
            UpstreamProto::Https => "https",
            UpstreamProto::H2c => "h2c",
            UpstreamProto::Unix => "unix",
        };
        f.write_str(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_reader() {
        let reader = ConfigReader::from_pairs(Vec::<(String, String)>::new());
        let config = ProxyConfig::from_reader(&reader);
        assert_eq!(config.port, 8080);
        assert_eq!(config.prom_port, 9187);
        assert_eq!(config.healthz_path, "/healthz");
        assert_eq!(config.upstream_maxidleconns, 32);
        assert_eq!(config.gcp_hlb, -1);
        assert_eq!(config.upstream_proto, UpstreamProto::Http);
        assert_eq!(config.hsts, HstsMode::Off);
        assert!(!config.tls_enabled());
    }

    #[test]
    fn test_from_reader() {
        let reader = ConfigReader::from_pairs([
            ("port", "9000"),
            ("no_gzip", "true"),
            ("ratelimit_m", "60"),
            ("upstream_addr", "a:80, b:80,"),
            ("upstream_proto", "h2c"),
            ("hsts", "preload"),
            ("redirect_www", "non"),
            ("reqheader_set", "x-a:1,bad"),
            ("autocert_dir", "/var/certs"),
            ("autocert_hosts", "example.com,www.example.com"),
            ("autocert_ca", "https://acme.test/directory"),
        ]);
        let config = ProxyConfig::from_reader(&reader);

        assert_eq!(config.port, 9000);
        assert!(config.no_gzip);
        assert_eq!(config.ratelimit_m, 60);
        assert_eq!(config.upstream_addr, vec!["a:80", "b:80"]);
        assert_eq!(config.upstream_proto, UpstreamProto::H2c);
        assert_eq!(config.hsts, HstsMode::Preload);
        assert_eq!(config.redirect_www, WwwMode::Non);
        assert_eq!(config.reqheader_set, vec![("x-a".to_string(), "1".to_string())]);
        assert!(config.tls_enabled());
        assert!(config.static_tls().is_none());
        assert_eq!(config.autocert_ca, "https://acme.test/directory");
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(HstsMode::from("strict"), HstsMode::Default);
        assert_eq!(WwwMode::from("sometimes"), WwwMode::Off);
        assert_eq!(UpstreamProto::from("spdy"), UpstreamProto::Http);
        assert_eq!(UpstreamProto::from("unix").to_string(), "unix");
    }
}
