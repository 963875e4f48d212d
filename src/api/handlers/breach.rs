//! k-anonymity breach range proxy.
//!
//! Flow Overview:
//! 1) Resolve a client identity and count the request against its budget.
//! 2) Reject over-budget requests with `429` and a `Retry-After` hint.
//! 3) Validate the five-hex-character prefix (`400` on failure).
//! 4) Relay the prefix to the upstream range API and hand the `SUFFIX:COUNT`
//!    body back verbatim.
//!
//! Everything past step 3 fails open: no upstream configured, upstream
//! unreachable, non-success status, redirect, or unreadable body all answer
//! an empty `200`, which clients read as "no data". Screening is advisory
//! and must never block signup; this endpoint never produces a `500`.

use axum::{
    body::Bytes,
    extract::rejection::QueryRejection,
    extract::{Extension, Query},
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE, RETRY_AFTER},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::{net::IpAddr, sync::Arc, time::Duration};
use tracing::{debug, error, instrument, warn};
use utoipa::IntoParams;

use crate::{breach, rate_limit::RateLimiter};

/// Reference policy: 10 lookups per minute per client identity.
pub const DEFAULT_RATE_LIMIT_MAX: u64 = 10;
pub const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

pub const DEFAULT_IP_HEADER: &str = "X-Forwarded-For";

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);
const RATE_LIMIT_NAMESPACE: &str = "breach";

/// Upstream request header asking HIBP-compatible servers to pad the
/// response, so the line count does not leak which prefix was queried.
const PADDING_HEADER: &str = "Add-Padding";

#[derive(IntoParams, Debug, Deserialize, Default)]
#[into_params(parameter_in = Query)]
pub struct RangeArgs {
    // first five uppercase hex characters of the SHA-1 digest
    prefix: String,
}

/// Proxy configuration; see the server action for the knobs behind it.
#[derive(Debug, Clone)]
pub struct BreachConfig {
    upstream_base: Option<String>,
    rate_limit_max: u64,
    rate_limit_window: Duration,
    ip_header: String,
}

impl BreachConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            upstream_base: None,
            rate_limit_max: DEFAULT_RATE_LIMIT_MAX,
            rate_limit_window: DEFAULT_RATE_LIMIT_WINDOW,
            ip_header: DEFAULT_IP_HEADER.to_string(),
        }
    }

    /// Range API base, e.g. `https://api.pwnedpasswords.com/range`.
    /// `None` means every lookup answers empty, which keeps clients working
    /// with no upstream at all.
    #[must_use]
    pub fn with_upstream_base(mut self, base: Option<String>) -> Self {
        self.upstream_base = base.map(|base| base.trim_end_matches('/').to_string());
        self
    }

    #[must_use]
    pub fn with_rate_limit_max(mut self, max: u64) -> Self {
        self.rate_limit_max = max;
        self
    }

    #[must_use]
    pub fn with_rate_limit_window(mut self, window: Duration) -> Self {
        self.rate_limit_window = window;
        self
    }

    /// Header carrying the client address, e.g. behind Cloudflare
    /// `CF-Connecting-IP` instead of the default `X-Forwarded-For`.
    #[must_use]
    pub fn with_ip_header(mut self, header: String) -> Self {
        self.ip_header = header;
        self
    }

    #[must_use]
    pub fn upstream_base(&self) -> Option<&str> {
        self.upstream_base.as_deref()
    }

    #[must_use]
    pub fn rate_limit_max(&self) -> u64 {
        self.rate_limit_max
    }

    #[must_use]
    pub fn rate_limit_window(&self) -> Duration {
        self.rate_limit_window
    }

    #[must_use]
    pub fn ip_header(&self) -> &str {
        &self.ip_header
    }
}

impl Default for BreachConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared proxy state: policy, limiter, and the outbound HTTP client.
#[derive(Clone)]
pub struct BreachState {
    config: BreachConfig,
    limiter: RateLimiter,
    client: reqwest::Client,
}

impl BreachState {
    /// # Errors
    /// Returns an error if the upstream HTTP client cannot be built.
    pub fn new(config: BreachConfig, limiter: RateLimiter) -> anyhow::Result<Self> {
        // Redirects are never followed; a redirecting upstream is treated
        // as failed rather than silently relaying another host's body.
        let client = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(UPSTREAM_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            config,
            limiter,
            client,
        })
    }
}

#[utoipa::path(
    get,
    path= "/breach",
    params(RangeArgs),
    responses (
        (status = 200, description = "Raw SUFFIX:COUNT range lines; empty body when no data is available", body = String),
        (status = 400, description = "Prefix is not exactly five hex characters"),
        (status = 429, description = "Rate limited; Retry-After carries the wait in seconds")
    ),
    tag = "breach",
)]
#[instrument(skip(state, headers, query))]
pub async fn range(
    Extension(state): Extension<Arc<BreachState>>,
    headers: HeaderMap,
    query: Result<Query<RangeArgs>, QueryRejection>,
) -> Response {
    let identity = client_identity(state.config.ip_header(), &headers);

    // Budget is spent before validation, so malformed requests cannot probe
    // for free.
    let key = format!("{RATE_LIMIT_NAMESPACE}:{identity}");
    match state.limiter.check(
        &key,
        state.config.rate_limit_window(),
        state.config.rate_limit_max(),
    ) {
        Ok(decision) if !decision.allowed => {
            debug!("Breach lookup rate limited for {identity}");
            return limited_response(decision.retry_after_seconds());
        }
        Ok(_) => {}
        Err(err) => {
            // Fail open: a dead counter store must not take password
            // screening down with it.
            error!("Rate limit check failed: {err}");
        }
    }

    let prefix = query
        .ok()
        .and_then(|Query(args)| breach::normalize_prefix(&args.prefix));
    let Some(prefix) = prefix else {
        debug!("Rejecting malformed breach prefix");
        return text_response(StatusCode::BAD_REQUEST, String::new());
    };

    let Some(base) = state.config.upstream_base() else {
        debug!("No breach upstream configured; answering empty");
        return text_response(StatusCode::OK, String::new());
    };

    let body = relay_range(&state.client, base, &prefix)
        .await
        .unwrap_or_default();

    bytes_response(StatusCode::OK, body)
}

/// Fetch the range body for a validated prefix, or `None` for any failure.
///
/// `None` covers every failure mode: unreachable upstream, non-success
/// status, redirect, unreadable body. The caller turns all of them into the
/// same empty `200` the no-upstream case produces.
async fn relay_range(client: &reqwest::Client, base: &str, prefix: &str) -> Option<Bytes> {
    let url = format!("{base}/{prefix}");

    let response = client
        .get(&url)
        .header(PADDING_HEADER, "true")
        .header(CACHE_CONTROL, "no-cache")
        .send()
        .await
        .map_err(|err| {
            warn!("Breach upstream request failed: {err}");
        })
        .ok()?;

    let status = response.status();
    if !status.is_success() {
        warn!("Breach upstream answered {status}; relaying empty body");
        return None;
    }

    // Raw bytes, not text: decoding would rewrite anything that is not
    // clean UTF-8 and the body must come through untouched.
    response
        .bytes()
        .await
        .map_err(|err| {
            warn!("Failed to read breach upstream body: {err}");
        })
        .ok()
}

/// Best-effort client identity for rate-limit bucketing.
///
/// Reads the configured forwarding header (first hop wins) and requires it
/// to parse as an IP address; anything else buckets under `unknown`, which
/// keeps limiting functional behind proxies that strip client addresses.
fn client_identity(ip_header: &str, headers: &HeaderMap) -> String {
    headers
        .get(ip_header)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|candidate| candidate.trim().parse::<IpAddr>().ok())
        .map_or_else(|| "unknown".to_string(), |ip| ip.to_string())
}

fn text_response(status: StatusCode, body: String) -> Response {
    (status, response_headers(), body).into_response()
}

fn bytes_response(status: StatusCode, body: Bytes) -> Response {
    (status, response_headers(), body).into_response()
}

fn limited_response(retry_after_seconds: u64) -> Response {
    let mut headers = response_headers();
    if let Ok(value) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
        headers.insert(RETRY_AFTER, value);
    }
    (StatusCode::TOO_MANY_REQUESTS, headers, String::new()).into_response()
}

/// Every response is `text/plain` and uncacheable: range bodies must not
/// stick in shared caches, and an empty fail-open body must not be reused.
fn response_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate"),
    );
    headers
}
