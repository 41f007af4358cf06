//! Middleware pipeline assembly.
//!
//! # Responsibilities
//! - Decide which stages a configuration enables
//! - Compose them, in a fixed order, around the upstream dispatcher
//! - Expose the ordered stage list and a single request entry point
//!
//! # Design Decisions
//! - Stage inclusion is a declarative table of (kind, toggle, constructor)
//! - Earlier entries sit closer to the client; the table is applied in
//!   reverse so the first entry becomes the outermost layer
//! - Disabled stages are omitted entirely, never bypassed at runtime
//! - Every stage is infallible; rejections and failures become responses

use std::fmt;
use std::sync::Arc;

use axum::{
    extract::Request,
    http::header,
    middleware::{from_fn, from_fn_with_state},
    response::Response,
    Router,
};
use tower::ServiceExt;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::config::{HstsMode, ProxyConfig, WwwMode};
use crate::health::{healthz_middleware, HealthState, Healthz};
use crate::http::compression::{compression_layer, negotiate_middleware, Codecs};
use crate::http::redirect::{https_redirect_middleware, www_redirect_middleware};
use crate::http::request::{RequestUuid, X_REQUEST_ID};
use crate::http::rewrite::{
    request_headers_middleware, response_headers_middleware, Direction, HeaderRuleSet,
};
use crate::observability::{logging::access_log_middleware, metrics::metrics_middleware};
use crate::security::headers::hsts_value;
use crate::security::limits::{body_limit_layer, buffer_body_middleware};
use crate::security::rate_limit::{rate_limit_middleware, FixedWindowLimiter, Window};
use crate::security::trusted_proxy::{gcp_hlb_middleware, TrustedHops};
use crate::upstream::{proxy_handler, TransportError, Upstream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Healthz,
    RequestHeaders,
    ResponseHeaders,
    Metrics,
    TrustedProxy,
    AccessLog,
    RequestId,
    RateLimitSecond,
    RateLimitMinute,
    RateLimitHour,
    BodyLimit,
    BodyBuffer,
    Compression,
    HttpsRedirect,
    Hsts,
    WwwRedirect,
    UpstreamHeaders,
    Upstream,
}

impl StageKind {
    pub fn name(self) -> &'static str {
        match self {
            StageKind::Healthz => "healthz",
            StageKind::RequestHeaders => "request headers",
            StageKind::ResponseHeaders => "response headers",
            StageKind::Metrics => "metrics",
            StageKind::TrustedProxy => "trusted proxy",
            StageKind::AccessLog => "access log",
            StageKind::RequestId => "request id",
            StageKind::RateLimitSecond => "rate limit (second)",
            StageKind::RateLimitMinute => "rate limit (minute)",
            StageKind::RateLimitHour => "rate limit (hour)",
            StageKind::BodyLimit => "body limit",
            StageKind::BodyBuffer => "body buffer",
            StageKind::Compression => "compression",
            StageKind::HttpsRedirect => "https redirect",
            StageKind::Hsts => "hsts",
            StageKind::WwwRedirect => "www redirect",
            StageKind::UpstreamHeaders => "upstream headers",
            StageKind::Upstream => "upstream",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shared inputs for stage constructors.
pub struct StageContext<'a> {
    pub config: &'a ProxyConfig,
    pub health: &'a Arc<HealthState>,
}

struct StageEntry {
    kind: StageKind,
    enabled: fn(&ProxyConfig) -> bool,
    build: fn(Router, &StageContext<'_>) -> Router,
}

/// Stage order, client side first.
const PRECEDENCE: &[StageEntry] = &[
    StageEntry {
        kind: StageKind::Healthz,
        enabled: healthz_enabled,
        build: build_healthz,
    },
    StageEntry {
        kind: StageKind::RequestHeaders,
        enabled: request_headers_enabled,
        build: build_request_headers,
    },
    StageEntry {
        kind: StageKind::ResponseHeaders,
        enabled: response_headers_enabled,
        build: build_response_headers,
    },
    StageEntry {
        kind: StageKind::Metrics,
        enabled: metrics_enabled,
        build: build_metrics,
    },
    StageEntry {
        kind: StageKind::TrustedProxy,
        enabled: trusted_proxy_enabled,
        build: build_trusted_proxy,
    },
    StageEntry {
        kind: StageKind::AccessLog,
        enabled: access_log_enabled,
        build: build_access_log,
    },
    StageEntry {
        kind: StageKind::RequestId,
        enabled: request_id_enabled,
        build: build_request_id,
    },
    StageEntry {
        kind: StageKind::RateLimitSecond,
        enabled: rate_second_enabled,
        build: build_rate_second,
    },
    StageEntry {
        kind: StageKind::RateLimitMinute,
        enabled: rate_minute_enabled,
        build: build_rate_minute,
    },
    StageEntry {
        kind: StageKind::RateLimitHour,
        enabled: rate_hour_enabled,
        build: build_rate_hour,
    },
    StageEntry {
        kind: StageKind::BodyLimit,
        enabled: body_limit_enabled,
        build: build_body_limit,
    },
    StageEntry {
        kind: StageKind::BodyBuffer,
        enabled: body_buffer_enabled,
        build: build_body_buffer,
    },
    StageEntry {
        kind: StageKind::Compression,
        enabled: compression_enabled,
        build: build_compression,
    },
    StageEntry {
        kind: StageKind::HttpsRedirect,
        enabled: https_redirect_enabled,
        build: build_https_redirect,
    },
    StageEntry {
        kind: StageKind::Hsts,
        enabled: hsts_enabled,
        build: build_hsts,
    },
    StageEntry {
        kind: StageKind::WwwRedirect,
        enabled: www_redirect_enabled,
        build: build_www_redirect,
    },
    StageEntry {
        kind: StageKind::UpstreamHeaders,
        enabled: upstream_headers_enabled,
        build: build_upstream_headers,
    },
    StageEntry {
        kind: StageKind::Upstream,
        enabled: always,
        build: terminal,
    },
];

fn always(_: &ProxyConfig) -> bool {
    true
}

fn healthz_enabled(c: &ProxyConfig) -> bool {
    !c.no_healthz
}

fn request_headers_enabled(c: &ProxyConfig) -> bool {
    !(c.reqheader_set.is_empty() && c.reqheader_add.is_empty() && c.reqheader_del.is_empty())
}

fn response_headers_enabled(c: &ProxyConfig) -> bool {
    !(c.respheader_set.is_empty() && c.respheader_add.is_empty() && c.respheader_del.is_empty())
}

fn metrics_enabled(c: &ProxyConfig) -> bool {
    !c.no_prom
}

fn trusted_proxy_enabled(c: &ProxyConfig) -> bool {
    c.gcp_hlb >= 0
}

fn access_log_enabled(c: &ProxyConfig) -> bool {
    !c.no_log
}

fn request_id_enabled(c: &ProxyConfig) -> bool {
    !c.no_reqid
}

fn rate_second_enabled(c: &ProxyConfig) -> bool {
    c.ratelimit_s > 0
}

fn rate_minute_enabled(c: &ProxyConfig) -> bool {
    c.ratelimit_m > 0
}

fn rate_hour_enabled(c: &ProxyConfig) -> bool {
    c.ratelimit_h > 0
}

fn body_limit_enabled(c: &ProxyConfig) -> bool {
    c.body_limitrequest > 0
}

fn body_buffer_enabled(c: &ProxyConfig) -> bool {
    c.body_bufferrequest
}

fn compression_enabled(c: &ProxyConfig) -> bool {
    !c.no_gzip || !c.no_br
}

fn https_redirect_enabled(c: &ProxyConfig) -> bool {
    c.redirect_https
}

fn hsts_enabled(c: &ProxyConfig) -> bool {
    c.hsts != HstsMode::Off
}

fn www_redirect_enabled(c: &ProxyConfig) -> bool {
    c.redirect_www != WwwMode::Off
}

fn upstream_headers_enabled(c: &ProxyConfig) -> bool {
    !(c.upstream_header_set.is_empty()
        && c.upstream_header_add.is_empty()
        && c.upstream_header_del.is_empty())
}

fn build_healthz(router: Router, ctx: &StageContext<'_>) -> Router {
    let healthz = Healthz::new(ctx.config.healthz_path.clone(), ctx.health.clone());
    router.layer(from_fn_with_state(Arc::new(healthz), healthz_middleware))
}

fn build_request_headers(router: Router, ctx: &StageContext<'_>) -> Router {
    let c = ctx.config;
    let rules = HeaderRuleSet::compile(
        Direction::ClientRequest,
        &c.reqheader_set,
        &c.reqheader_add,
        &c.reqheader_del,
    );
    router.layer(from_fn_with_state(Arc::new(rules), request_headers_middleware))
}

fn build_response_headers(router: Router, ctx: &StageContext<'_>) -> Router {
    let c = ctx.config;
    let rules = HeaderRuleSet::compile(
        Direction::ClientResponse,
        &c.respheader_set,
        &c.respheader_add,
        &c.respheader_del,
    );
    router.layer(from_fn_with_state(Arc::new(rules), response_headers_middleware))
}

fn build_metrics(router: Router, _ctx: &StageContext<'_>) -> Router {
    router.layer(from_fn(metrics_middleware))
}

fn build_trusted_proxy(router: Router, ctx: &StageContext<'_>) -> Router {
    let hops = TrustedHops(usize::try_from(ctx.config.gcp_hlb).unwrap_or(0));
    router.layer(from_fn_with_state(Arc::new(hops), gcp_hlb_middleware))
}

fn build_access_log(router: Router, _ctx: &StageContext<'_>) -> Router {
    router.layer(from_fn(access_log_middleware))
}

fn build_request_id(router: Router, _ctx: &StageContext<'_>) -> Router {
    router
        .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
        .layer(SetRequestIdLayer::new(X_REQUEST_ID, RequestUuid))
}

fn rate_limit(router: Router, window: Window, limit: u64) -> Router {
    let limiter = FixedWindowLimiter::new(window, limit);
    router.layer(from_fn_with_state(Arc::new(limiter), rate_limit_middleware))
}

fn build_rate_second(router: Router, ctx: &StageContext<'_>) -> Router {
    rate_limit(router, Window::Second, ctx.config.ratelimit_s)
}

fn build_rate_minute(router: Router, ctx: &StageContext<'_>) -> Router {
    rate_limit(router, Window::Minute, ctx.config.ratelimit_m)
}

fn build_rate_hour(router: Router, ctx: &StageContext<'_>) -> Router {
    rate_limit(router, Window::Hour, ctx.config.ratelimit_h)
}

fn build_body_limit(router: Router, ctx: &StageContext<'_>) -> Router {
    router.layer(body_limit_layer(ctx.config.body_limitrequest))
}

fn build_body_buffer(router: Router, _ctx: &StageContext<'_>) -> Router {
    router.layer(from_fn(buffer_body_middleware))
}

fn build_compression(router: Router, ctx: &StageContext<'_>) -> Router {
    let codecs = Codecs {
        gzip: !ctx.config.no_gzip,
        br: !ctx.config.no_br,
    };
    router
        .layer(compression_layer(codecs))
        .layer(from_fn_with_state(codecs, negotiate_middleware))
}

fn build_https_redirect(router: Router, _ctx: &StageContext<'_>) -> Router {
    router.layer(from_fn(https_redirect_middleware))
}

fn build_hsts(router: Router, ctx: &StageContext<'_>) -> Router {
    match hsts_value(ctx.config.hsts) {
        Some(value) => router.layer(SetResponseHeaderLayer::overriding(
            header::STRICT_TRANSPORT_SECURITY,
            value,
        )),
        None => router,
    }
}

fn build_www_redirect(router: Router, ctx: &StageContext<'_>) -> Router {
    router.layer(from_fn_with_state(ctx.config.redirect_www, www_redirect_middleware))
}

fn build_upstream_headers(router: Router, ctx: &StageContext<'_>) -> Router {
    let c = ctx.config;
    let rules = HeaderRuleSet::compile(
        Direction::BackendRequest,
        &c.upstream_header_set,
        &c.upstream_header_add,
        &c.upstream_header_del,
    );
    router.layer(from_fn_with_state(Arc::new(rules), request_headers_middleware))
}

/// The dispatcher is the base router every other stage wraps.
fn terminal(router: Router, _ctx: &StageContext<'_>) -> Router {
    router
}

/// Stages `config` enables, client side first.
pub fn enabled_stages(config: &ProxyConfig) -> Vec<StageKind> {
    PRECEDENCE
        .iter()
        .filter(|entry| (entry.enabled)(config))
        .map(|entry| entry.kind)
        .collect()
}

/// The assembled request pipeline.
#[derive(Clone)]
pub struct Pipeline {
    stages: Vec<StageKind>,
    router: Router,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("stages", &self.stages).finish()
    }
}

impl Pipeline {
    /// Build the pipeline around an existing upstream.
    pub fn build(config: &ProxyConfig, upstream: Arc<Upstream>, health: Arc<HealthState>) -> Self {
        let ctx = StageContext {
            config,
            health: &health,
        };

        let enabled: Vec<&StageEntry> = PRECEDENCE
            .iter()
            .filter(|entry| (entry.enabled)(config))
            .collect();

        let base = Router::new().fallback(proxy_handler).with_state(upstream);
        let router = enabled
            .iter()
            .rev()
            .fold(base, |router, entry| (entry.build)(router, &ctx));

        for entry in &enabled {
            tracing::info!(stage = %entry.kind, "Registered stage");
        }

        Self {
            stages: enabled.iter().map(|entry| entry.kind).collect(),
            router,
        }
    }

    /// Build the upstream from `config`, then the pipeline around it.
    pub fn from_config(
        config: &ProxyConfig,
        health: Arc<HealthState>,
    ) -> Result<Self, TransportError> {
        let upstream = Arc::new(Upstream::from_config(config)?);
        Ok(Self::build(config, upstream, health))
    }

    pub fn stages(&self) -> &[StageKind] {
        &self.stages
    }

    pub fn into_router(self) -> Router {
        self.router
    }

    /// Run one request through every stage.
    pub async fn handle(&self, request: Request) -> Response {
        match self.router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn everything() -> ProxyConfig {
        ProxyConfig {
            reqheader_set: vec![("x-a".into(), "1".into())],
            respheader_del: vec!["server".into()],
            gcp_hlb: 0,
            ratelimit_s: 10,
            ratelimit_m: 100,
            ratelimit_h: 1000,
            body_limitrequest: 1024,
            body_bufferrequest: true,
            redirect_https: true,
            hsts: HstsMode::Default,
            redirect_www: WwwMode::Www,
            upstream_header_add: vec![("x-b".into(), "2".into())],
            upstream_addr: vec!["127.0.0.1:1".into()],
            ..ProxyConfig::default()
        }
    }

    #[test]
    fn test_full_order() {
        assert_eq!(
            enabled_stages(&everything()),
            vec![
                StageKind::Healthz,
                StageKind::RequestHeaders,
                StageKind::ResponseHeaders,
                StageKind::Metrics,
                StageKind::TrustedProxy,
                StageKind::AccessLog,
                StageKind::RequestId,
                StageKind::RateLimitSecond,
                StageKind::RateLimitMinute,
                StageKind::RateLimitHour,
                StageKind::BodyLimit,
                StageKind::BodyBuffer,
                StageKind::Compression,
                StageKind::HttpsRedirect,
                StageKind::Hsts,
                StageKind::WwwRedirect,
                StageKind::UpstreamHeaders,
                StageKind::Upstream,
            ]
        );
    }

    #[test]
    fn test_defaults() {
        assert_eq!(
            enabled_stages(&ProxyConfig::default()),
            vec![
                StageKind::Healthz,
                StageKind::Metrics,
                StageKind::AccessLog,
                StageKind::RequestId,
                StageKind::Compression,
                StageKind::Upstream,
            ]
        );
    }

    #[test]
    fn test_toggles_remove_exactly_their_stage() {
        let cases: [(fn(&mut ProxyConfig), StageKind); 17] = [
            (|c: &mut ProxyConfig| c.no_healthz = true, StageKind::Healthz),
            (|c: &mut ProxyConfig| c.reqheader_set.clear(), StageKind::RequestHeaders),
            (|c: &mut ProxyConfig| c.respheader_del.clear(), StageKind::ResponseHeaders),
            (|c: &mut ProxyConfig| c.no_prom = true, StageKind::Metrics),
            (|c: &mut ProxyConfig| c.gcp_hlb = -1, StageKind::TrustedProxy),
            (|c: &mut ProxyConfig| c.no_log = true, StageKind::AccessLog),
            (|c: &mut ProxyConfig| c.no_reqid = true, StageKind::RequestId),
            (|c: &mut ProxyConfig| c.ratelimit_s = 0, StageKind::RateLimitSecond),
            (|c: &mut ProxyConfig| c.ratelimit_m = 0, StageKind::RateLimitMinute),
            (|c: &mut ProxyConfig| c.ratelimit_h = 0, StageKind::RateLimitHour),
            (|c: &mut ProxyConfig| c.body_limitrequest = 0, StageKind::BodyLimit),
            (|c: &mut ProxyConfig| c.body_bufferrequest = false, StageKind::BodyBuffer),
            (|c: &mut ProxyConfig| { c.no_gzip = true; c.no_br = true; }, StageKind::Compression),
            (|c: &mut ProxyConfig| c.redirect_https = false, StageKind::HttpsRedirect),
            (|c: &mut ProxyConfig| c.hsts = HstsMode::Off, StageKind::Hsts),
            (|c: &mut ProxyConfig| c.redirect_www = WwwMode::Off, StageKind::WwwRedirect),
            (|c: &mut ProxyConfig| c.upstream_header_add.clear(), StageKind::UpstreamHeaders),
        ];

        let full = enabled_stages(&everything());
        for (toggle, removed) in cases {
            let mut config = everything();
            toggle(&mut config);
            let expected: Vec<_> = full.iter().copied().filter(|k| *k != removed).collect();
            assert_eq!(enabled_stages(&config), expected, "toggling off {removed}");
        }
    }

    #[test]
    fn test_compression_needs_only_one_codec() {
        let config = ProxyConfig {
            no_br: true,
            ..ProxyConfig::default()
        };
        assert!(enabled_stages(&config).contains(&StageKind::Compression));
    }

    #[tokio::test]
    async fn test_build_is_deterministic() {
        let config = everything();
        let health = Arc::new(HealthState::new());
        let a = Pipeline::from_config(&config, health.clone()).unwrap();
        let b = Pipeline::from_config(&config, health).unwrap();
        assert_eq!(a.stages(), b.stages());
        assert_eq!(a.stages(), enabled_stages(&config).as_slice());
    }
}
