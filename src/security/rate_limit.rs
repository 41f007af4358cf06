//! Fixed-window rate limiting.
//!
//! # Responsibilities
//! - Count requests per client in discrete windows (second, minute, hour)
//! - Reject requests over the limit with `429` and `Retry-After`
//!
//! # Design Decisions
//! - One limiter per configured window; a request must pass all of them
//! - A key's window starts at its first request and lasts exactly its length
//! - Counters live in a `DashMap`; stale windows are swept periodically
//! - Clients with unknown IP share a single key

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;

use crate::http::request::ClientInfo;
use crate::observability::metrics;

const SWEEP_EVERY: u64 = 1024;

/// Which window a limiter enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Second,
    Minute,
    Hour,
}

impl Window {
    pub fn duration(self) -> Duration {
        match self {
            Window::Second => Duration::from_secs(1),
            Window::Minute => Duration::from_secs(60),
            Window::Hour => Duration::from_secs(3600),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Window::Second => "second",
            Window::Minute => "minute",
            Window::Hour => "hour",
        }
    }
}

#[derive(Debug)]
struct Counter {
    started: Instant,
    count: u64,
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Reject { retry_after: Duration },
}

/// Fixed-window request counter keyed by client IP.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    window: Window,
    limit: u64,
    counters: DashMap<Option<IpAddr>, Counter>,
    checks: AtomicU64,
}

impl FixedWindowLimiter {
    pub fn new(window: Window, limit: u64) -> Self {
        Self {
            window,
            limit,
            counters: DashMap::new(),
            checks: AtomicU64::new(0),
        }
    }

    pub fn window(&self) -> Window {
        self.window
    }

    /// Count one request for `key` at `now`.
    pub fn check(&self, key: Option<IpAddr>, now: Instant) -> Decision {
        let length = self.window.duration();

        let decision = {
            let mut counter = self.counters.entry(key).or_insert(Counter {
                started: now,
                count: 0,
            });
            let elapsed = now.saturating_duration_since(counter.started);
            if elapsed >= length {
                counter.started = now;
                counter.count = 0;
            }

            if counter.count < self.limit {
                counter.count += 1;
                Decision::Allow
            } else {
                let elapsed = now.saturating_duration_since(counter.started);
                let remaining = length.saturating_sub(elapsed);
                Decision::Reject {
                    retry_after: remaining,
                }
            }
        };

        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep(now);
        }

        decision
    }

    /// Drop counters whose window has ended.
    pub fn sweep(&self, now: Instant) {
        let length = self.window.duration();
        self.counters
            .retain(|_, counter| now.saturating_duration_since(counter.started) < length);
    }

    pub fn tracked_clients(&self) -> usize {
        self.counters.len()
    }
}

/// Rate limiting stage for one window.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<FixedWindowLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let client = ClientInfo::of(&request);

    match limiter.check(client.ip, Instant::now()) {
        Decision::Allow => next.run(request).await,
        Decision::Reject { retry_after } => {
            tracing::debug!(
                client = ?client.ip,
                window = limiter.window().label(),
                "Rate limit exceeded"
            );
            metrics::record_rate_limited(limiter.window().label());
            too_many_requests(retry_after)
        }
    }
}

fn too_many_requests(retry_after: Duration) -> Response {
    // Whole seconds, rounded up.
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    let mut response = (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests").into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Option<IpAddr> {
        Some(s.parse().unwrap())
    }

    #[test]
    fn test_limit_within_window() {
        let limiter = FixedWindowLimiter::new(Window::Second, 2);
        let now = Instant::now();

        assert_eq!(limiter.check(ip("1.1.1.1"), now), Decision::Allow);
        assert_eq!(limiter.check(ip("1.1.1.1"), now + Duration::from_millis(10)), Decision::Allow);
        assert!(matches!(
            limiter.check(ip("1.1.1.1"), now + Duration::from_millis(20)),
            Decision::Reject { .. }
        ));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = FixedWindowLimiter::new(Window::Minute, 1);
        let now = Instant::now();

        assert_eq!(limiter.check(ip("1.1.1.1"), now), Decision::Allow);
        assert_eq!(limiter.check(ip("2.2.2.2"), now), Decision::Allow);
        assert_eq!(limiter.check(None, now), Decision::Allow);
        assert!(matches!(limiter.check(None, now), Decision::Reject { .. }));
    }

    #[test]
    fn test_window_resets() {
        let limiter = FixedWindowLimiter::new(Window::Second, 1);
        let now = Instant::now();

        assert_eq!(limiter.check(ip("1.1.1.1"), now), Decision::Allow);
        assert!(matches!(
            limiter.check(ip("1.1.1.1"), now + Duration::from_millis(500)),
            Decision::Reject { .. }
        ));
        assert_eq!(limiter.check(ip("1.1.1.1"), now + Duration::from_secs(1)), Decision::Allow);
    }

    #[test]
    fn test_hour_window_is_an_hour() {
        let limiter = FixedWindowLimiter::new(Window::Hour, 1);
        let now = Instant::now();

        assert_eq!(limiter.check(ip("1.1.1.1"), now), Decision::Allow);
        match limiter.check(ip("1.1.1.1"), now + Duration::from_secs(120)) {
            Decision::Reject { retry_after } => assert_eq!(retry_after, Duration::from_secs(3480)),
            Decision::Allow => panic!("second request inside the hour must be rejected"),
        }
    }

    #[test]
    fn test_sweep_drops_expired() {
        let limiter = FixedWindowLimiter::new(Window::Second, 5);
        let now = Instant::now();
        limiter.check(ip("1.1.1.1"), now);
        limiter.check(ip("2.2.2.2"), now + Duration::from_millis(900));

        limiter.sweep(now + Duration::from_millis(1500));
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let response = too_many_requests(Duration::from_millis(1200));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");

        let response = too_many_requests(Duration::ZERO);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    }
}
