//! Header manipulation and security headers.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers in both directions
//! - Normalise X-Forwarded-For, X-Forwarded-Proto and X-Real-IP
//! - Provide Strict-Transport-Security values
//!
//! # Design Decisions
//! - In edge mode, never trust existing X-Forwarded-* from the client
//! - Behind another proxy, trust what it set and only fill the gaps

use std::net::IpAddr;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

use crate::config::HstsMode;

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

const PROXY_CONNECTION: HeaderName = HeaderName::from_static("proxy-connection");
const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");

/// HSTS value for `hsts=preload`.
pub const HSTS_PRELOAD: &str = "max-age=63072000; includeSubDomains; preload";
/// HSTS value for any other non-empty `hsts` mode.
pub const HSTS_DEFAULT: &str = "max-age=31536000";

/// Header value for the given HSTS mode, `None` when disabled.
pub fn hsts_value(mode: HstsMode) -> Option<HeaderValue> {
    match mode {
        HstsMode::Off => None,
        HstsMode::Default => Some(HeaderValue::from_static(HSTS_DEFAULT)),
        HstsMode::Preload => Some(HeaderValue::from_static(HSTS_PRELOAD)),
    }
}

/// Remove hop-by-hop headers, including any named in `Connection`.
///
/// `TE: trailers` is the one TE value forwarded.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let trailers = headers
        .get(header::TE)
        .filter(|v| v.as_bytes().eq_ignore_ascii_case(b"trailers"))
        .cloned();

    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }

    for name in [
        header::CONNECTION,
        KEEP_ALIVE,
        PROXY_CONNECTION,
        header::TE,
        header::TRAILER,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
    ] {
        headers.remove(name);
    }
    if let Some(te) = trailers {
        headers.insert(header::TE, te);
    }
}

/// Protocol label for X-Forwarded-Proto.
pub fn proto(secure: bool) -> &'static str {
    if secure {
        "https"
    } else {
        "http"
    }
}

/// Resolved view of who sent the request, after forwarded-header policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Forwarded {
    pub ip: Option<IpAddr>,
    pub secure: bool,
}

/// Apply the forwarded-header policy to `headers`.
///
/// With `front` set the proxy is the edge, so X-Forwarded-For and
/// X-Forwarded-Proto are overwritten from the connection. Otherwise the
/// values set by the fronting proxy win and are only filled when absent.
pub fn normalize_forwarded(
    headers: &mut HeaderMap,
    front: bool,
    peer: Option<IpAddr>,
    secure: bool,
) -> Forwarded {
    if front {
        headers.remove(X_REAL_IP);
        match peer {
            Some(ip) => set_str(headers, X_FORWARDED_FOR, &ip.to_string()),
            None => {
                headers.remove(X_FORWARDED_FOR);
            }
        }
        set_str(headers, X_FORWARDED_PROTO, proto(secure));
        return Forwarded { ip: peer, secure };
    }

    let forwarded_ip = header_ip(headers, &X_REAL_IP).or_else(|| first_forwarded_for(headers));
    let secure = match headers.get(X_FORWARDED_PROTO).and_then(|v| v.to_str().ok()) {
        Some(value) => value.trim().eq_ignore_ascii_case("https"),
        None => {
            set_str(headers, X_FORWARDED_PROTO, proto(secure));
            secure
        }
    };
    if !headers.contains_key(X_FORWARDED_FOR) {
        if let Some(ip) = peer {
            set_str(headers, X_FORWARDED_FOR, &ip.to_string());
        }
    }

    Forwarded {
        ip: forwarded_ip.or(peer),
        secure,
    }
}

/// Entries of all X-Forwarded-For headers, in order.
pub fn forwarded_for(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|entry| entry.trim().to_string())
        .filter(|entry| !entry.is_empty())
        .collect()
}

fn first_forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    forwarded_for(headers).first().and_then(|ip| ip.parse().ok())
}

fn header_ip(headers: &HeaderMap, name: &HeaderName) -> Option<IpAddr> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn set_str(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}
