//! Response compression negotiation.
//!
//! The negotiation stage picks one codec from the client's `Accept-Encoding`
//! and rewrites the header to name only that codec. The `tower-http`
//! compression layer underneath then encodes the response with it.

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};
use tower_http::compression::CompressionLayer;

/// Codecs the operator left enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codecs {
    pub gzip: bool,
    pub br: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Br,
    Gzip,
}

impl Encoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Br => "br",
            Encoding::Gzip => "gzip",
        }
    }
}

/// Whether `accept_encoding` accepts `coding` with a non-zero quality.
fn accepts(accept_encoding: &str, coding: &str) -> bool {
    let mut wildcard = false;
    for item in accept_encoding.split(',') {
        let mut params = item.split(';');
        let name = params.next().unwrap_or("").trim();
        let quality = params
            .filter_map(|p| p.trim().strip_prefix("q="))
            .filter_map(|q| q.trim().parse::<f32>().ok())
            .next()
            .unwrap_or(1.0);

        if name.eq_ignore_ascii_case(coding) {
            return quality > 0.0;
        }
        if name == "*" {
            wildcard = quality > 0.0;
        }
    }
    wildcard
}

/// Brotli first, then gzip, each only when enabled and accepted.
pub fn negotiate(codecs: Codecs, accept_encoding: &str) -> Option<Encoding> {
    if codecs.br && accepts(accept_encoding, "br") {
        return Some(Encoding::Br);
    }
    if codecs.gzip && accepts(accept_encoding, "gzip") {
        return Some(Encoding::Gzip);
    }
    None
}

/// Compression negotiation stage.
pub async fn negotiate_middleware(
    State(codecs): State<Codecs>,
    mut request: Request,
    next: Next,
) -> Response {
    let chosen = request
        .headers()
        .get(header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| negotiate(codecs, v));

    if let Some(encoding) = chosen {
        request.headers_mut().insert(
            header::ACCEPT_ENCODING,
            HeaderValue::from_static(encoding.as_str()),
        );
    }
    next.run(request).await
}

/// The encoding layer for the enabled codecs.
pub fn compression_layer(codecs: Codecs) -> CompressionLayer {
    CompressionLayer::new().gzip(codecs.gzip).br(codecs.br)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOTH: Codecs = Codecs { gzip: true, br: true };

    #[test]
    fn test_prefers_brotli() {
        assert_eq!(negotiate(BOTH, "gzip, br"), Some(Encoding::Br));
        assert_eq!(negotiate(BOTH, "gzip"), Some(Encoding::Gzip));
        assert_eq!(negotiate(BOTH, "identity"), None);
    }

    #[test]
    fn test_respects_disabled_codecs() {
        let gzip_only = Codecs { gzip: true, br: false };
        assert_eq!(negotiate(gzip_only, "br, gzip"), Some(Encoding::Gzip));
        assert_eq!(negotiate(gzip_only, "br"), None);
    }

    #[test]
    fn test_quality_values() {
        assert_eq!(negotiate(BOTH, "br;q=0, gzip;q=0.5"), Some(Encoding::Gzip));
        assert_eq!(negotiate(BOTH, "*"), Some(Encoding::Br));
        assert_eq!(negotiate(BOTH, "*;q=0"), None);
        assert_eq!(negotiate(BOTH, "br;q=0, *"), Some(Encoding::Gzip));
    }
}
