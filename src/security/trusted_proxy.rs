//! Client IP recovery behind a Google Cloud HTTP(S) load balancer.
//!
//! The load balancer appends `<client>, <lb>` to X-Forwarded-For. With `n`
//! further trusted hops in front of it, the client is the entry at
//! `len - 2 - n`.

use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};

use crate::http::request::ClientInfo;
use crate::security::headers::{forwarded_for, X_REAL_IP};

/// Number of extra trusted hops in front of the load balancer.
#[derive(Debug, Clone, Copy)]
pub struct TrustedHops(pub usize);

/// Client IP per the load balancer convention, if the header is long enough.
pub fn gcp_client_ip(headers: &HeaderMap, hops: usize) -> Option<IpAddr> {
    let entries = forwarded_for(headers);
    let index = entries.len().checked_sub(2 + hops)?;
    entries[index].parse().ok()
}

/// Trusted-proxy stage.
pub async fn gcp_hlb_middleware(
    State(hops): State<Arc<TrustedHops>>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(ip) = gcp_client_ip(request.headers(), hops.0) {
        let mut client = ClientInfo::of(&request);
        client.ip = Some(ip);
        request.extensions_mut().insert(client);
        if let Ok(value) = HeaderValue::from_str(&ip.to_string()) {
            request.headers_mut().insert(X_REAL_IP, value);
        }
    }
    next.run(request).await
}
