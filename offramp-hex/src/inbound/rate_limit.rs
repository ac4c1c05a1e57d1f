//! Rate limiting middleware using Governor.
//!
//! One keyed token bucket per client. A request presenting the valid admin
//! token shares the admin bucket; every other request is keyed on the TCP
//! peer address. Headers the client controls never pick the bucket.

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, State},
    http::{Extensions, HeaderMap, Request, StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use serde_json::json;
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};
use tokio_util::sync::CancellationToken;

use super::auth::{extract_bearer, tokens_match};

pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 100;

/// How often idle buckets are dropped.
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Bucket a request is charged to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientKey {
    Admin,
    Peer(IpAddr),
    /// No peer address is known (in-process callers)
    Unknown,
}

/// Rate limiter state shared across requests.
pub struct RateLimiterState {
    limiter: DefaultKeyedRateLimiter<ClientKey>,
    admin_token: Option<String>,
}

impl Default for RateLimiterState {
    fn default() -> Self {
        Self::per_minute(DEFAULT_REQUESTS_PER_MINUTE, None)
    }
}

impl RateLimiterState {
    /// Allows `requests` per minute per client, all of them as a burst.
    pub fn per_minute(requests: u32, admin_token: Option<String>) -> Self {
        let burst = NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN);
        Self::with_quota(Quota::per_minute(burst), admin_token)
    }

    pub(crate) fn with_quota(quota: Quota, admin_token: Option<String>) -> Self {
        Self {
            limiter: RateLimiter::keyed(quota),
            admin_token,
        }
    }

    /// Returns true if the request is allowed, false if rate limited.
    pub fn check(&self, key: &ClientKey) -> bool {
        self.limiter.check_key(key).is_ok()
    }

    /// Number of buckets currently tracked.
    pub fn tracked(&self) -> usize {
        self.limiter.len()
    }

    /// Drops buckets that have refilled completely.
    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    /// Prunes every `every` until `shutdown` is cancelled.
    pub async fn prune_until(self: Arc<Self>, every: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.prune(),
                _ = shutdown.cancelled() => return,
            }
        }
    }

    pub(crate) fn client_key(&self, headers: &HeaderMap, extensions: &Extensions) -> ClientKey {
        let bearer = extract_bearer(headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok()));
        if let (Some(expected), Some(presented)) = (self.admin_token.as_deref(), bearer) {
            if tokens_match(expected, presented) {
                return ClientKey::Admin;
            }
        }
        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| ClientKey::Peer(addr.ip()))
            .unwrap_or(ClientKey::Unknown)
    }
}

/// Provider callbacks must never be throttled.
fn is_exempt(path: &str) -> bool {
    path == "/health" || path.starts_with("/webhooks/")
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiterState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if is_exempt(request.uri().path()) {
        return next.run(request).await;
    }

    let key = limiter.client_key(request.headers(), request.extensions());
    if !limiter.check(&key) {
        tracing::warn!(path = %request.uri().path(), client = ?key, "rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": "Rate limit exceeded. Please try again later.",
                "code": 429,
                "retry_after_seconds": 60
            })),
        )
            .into_response();
    }

    next.run(request).await
}
