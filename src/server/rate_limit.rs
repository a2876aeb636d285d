//! Token bucket rate limiting.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;

use crate::observability::metrics;

/// Client address as reported by a trusted proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub IpAddr);

/// A simple token bucket rate limiter.
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// How requests are grouped into buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateScope {
    /// One bucket shared by every request.
    Global,
    /// One bucket per client address.
    PerClient,
}

impl RateScope {
    fn label(self) -> &'static str {
        match self {
            RateScope::Global => "global",
            RateScope::PerClient => "client",
        }
    }
}

pub struct RateLimiter {
    buckets: DashMap<String, TokenBucket>,
    scope: RateScope,
    rate: f64,
    burst: f64,
}

impl RateLimiter {
    /// `rate` tokens per second, holding at most `burst` tokens.
    pub fn new(scope: RateScope, rate: u32, burst: u32) -> Self {
        Self {
            buckets: DashMap::new(),
            scope,
            rate: f64::from(rate),
            burst: f64::from(burst.max(1)),
        }
    }

    pub fn check(&self, key: &str) -> bool {
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.burst));
        bucket.try_acquire(self.burst, self.rate)
    }

    fn key(&self, request: &Request<Body>) -> String {
        if self.scope == RateScope::Global {
            return "*".to_string();
        }
        client_ip(request)
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "local".to_string())
    }
}

/// Best known address of the client that sent `request`.
pub fn client_ip(request: &Request<Body>) -> Option<IpAddr> {
    if let Some(ClientAddr(ip)) = request.extensions().get::<ClientAddr>() {
        return Some(*ip);
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Middleware function rejecting requests once the bucket is empty.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = limiter.key(&request);
    if limiter.check(&key) {
        next.run(request).await
    } else {
        tracing::warn!(client = %key, scope = limiter.scope.label(), "Rate limit exceeded");
        metrics::record_rate_limited(limiter.scope.label());
        (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_is_consumed_then_rejected() {
        let limiter = RateLimiter::new(RateScope::PerClient, 1, 2);
        assert!(limiter.check("a"));
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
        // other clients have their own bucket
        assert!(limiter.check("b"));
    }

    #[test]
    fn client_addr_extension_wins() {
        let mut request = Request::new(Body::empty());
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 4000))));
        assert_eq!(client_ip(&request), Some(IpAddr::from([10, 0, 0, 1])));

        request
            .extensions_mut()
            .insert(ClientAddr(IpAddr::from([192, 168, 1, 9])));
        assert_eq!(client_ip(&request), Some(IpAddr::from([192, 168, 1, 9])));
    }

    #[test]
    fn global_scope_shares_one_bucket() {
        let limiter = RateLimiter::new(RateScope::Global, 1, 1);
        let request = Request::new(Body::empty());
        assert_eq!(limiter.key(&request), "*");
    }
}
