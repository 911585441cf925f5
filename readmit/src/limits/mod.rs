//! Per-client sliding-window rate limiting.
//!
//! Each client key may make at most `max_requests` admitted requests in any trailing window of
//! `window` length. Only admitted requests are recorded, so a client hammering the API while
//! rejected does not push its own recovery further out.
//!
//! Counters live in a [`RateLimitBackend`]:
//!
//! - [`memory::MemoryBackend`]: `DashMap` of timestamp logs, correct for a single instance
//! - [`redis_backend::RedisBackend`]: a sorted set per key updated by one Lua script, shared by
//!   every instance pointing at the same Redis
//!
//! When the backend fails, [`FailureMode`] decides between admitting the request (with a
//! warning) and rejecting it with `503 rate_limiter_unavailable`.

pub mod memory;
pub mod redis_backend;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, Response},
    middleware::Next,
    response::IntoResponse,
};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::{FailureMode, RateLimitConfig, RateLimitStorage};
use crate::errors::Error;

pub use memory::MemoryBackend;
pub use redis_backend::RedisBackend;

const API_KEY_HEADER: &str = "x-api-key";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
const LIMIT_HEADER: &str = "x-ratelimit-limit";
const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const ANONYMOUS_KEY: &str = "anonymous";

#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("rate limit backend unavailable: {0}")]
    Unavailable(String),
}

impl From<redis::RedisError> for LimiterError {
    fn from(err: redis::RedisError) -> Self {
        LimiterError::Unavailable(err.to_string())
    }
}

/// Outcome of recording one request against a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    /// Requests still admissible in the current window
    pub remaining: u32,
    /// Time until the oldest counted request leaves the window; zero when allowed
    pub retry_after: Duration,
}

impl Decision {
    pub fn admitted(limit: u32, remaining: u32) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            retry_after: Duration::ZERO,
        }
    }

    pub fn rejected(limit: u32, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            retry_after,
        }
    }
}

/// Storage for sliding-window request logs.
///
/// `hit` must prune, count and record as one atomic step per key, otherwise concurrent requests
/// could both observe `max - 1` and both be admitted.
#[async_trait::async_trait]
pub trait RateLimitBackend: Send + Sync {
    async fn hit(&self, key: &str, max_requests: u32, window: Duration) -> Result<Decision, LimiterError>;

    /// Drop logs with no request inside `window`. Returns the number of keys removed.
    async fn evict_idle(&self, _window: Duration) -> usize {
        0
    }

    fn name(&self) -> &'static str;
}

pub struct RateLimiter {
    backend: Arc<dyn RateLimitBackend>,
    max_requests: u32,
    window: Duration,
    failure_mode: FailureMode,
    backend_timeout: Duration,
    trust_forwarded_for: bool,
}

impl RateLimiter {
    pub fn new(backend: Arc<dyn RateLimitBackend>, config: &RateLimitConfig) -> Self {
        Self {
            backend,
            max_requests: config.max_requests,
            window: config.window,
            failure_mode: config.failure_mode,
            backend_timeout: config.backend_timeout,
            trust_forwarded_for: config.trust_forwarded_for,
        }
    }

    /// Build the limiter selected by configuration, or `None` when rate limiting is disabled.
    pub async fn from_config(config: &RateLimitConfig) -> anyhow::Result<Option<Self>> {
        if !config.enabled {
            info!("Rate limiting disabled");
            return Ok(None);
        }
        let backend: Arc<dyn RateLimitBackend> = match &config.storage {
            RateLimitStorage::Memory => Arc::new(MemoryBackend::new()),
            RateLimitStorage::Redis { url, key_prefix } => {
                let backend = RedisBackend::new(url, key_prefix, config.backend_timeout)?;
                match backend.ensure_connected().await {
                    Ok(()) => {}
                    // Fail-open keeps serving and retries the connection on each request
                    Err(err) if config.failure_mode == FailureMode::Open => {
                        warn!(error = %err, "Redis unavailable at startup, rate limiting fails open until it connects");
                    }
                    Err(err) => return Err(err.into()),
                }
                Arc::new(backend)
            }
        };
        info!(
            backend = backend.name(),
            max_requests = config.max_requests,
            window_secs = config.window.as_secs(),
            "Rate limiting enabled"
        );
        Ok(Some(Self::new(backend, config)))
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a request for `key`.
    ///
    /// Returns `Ok(None)` when the backend failed and the failure mode is open; the request should
    /// be admitted without rate-limit headers.
    /// A backend that does not answer within `backend_timeout` counts as unavailable.
    pub async fn check(&self, key: &str) -> Result<Option<Decision>, LimiterError> {
        let hit = tokio::time::timeout(self.backend_timeout, self.backend.hit(key, self.max_requests, self.window));
        let outcome = hit.await.unwrap_or_else(|_| {
            Err(LimiterError::Unavailable(format!(
                "no answer within {}ms",
                self.backend_timeout.as_millis()
            )))
        });
        match outcome {
            Ok(decision) => Ok(Some(decision)),
            Err(err) => match self.failure_mode {
                FailureMode::Open => {
                    warn!(backend = self.backend.name(), error = %err, "Rate limiter unavailable, admitting request");
                    Ok(None)
                }
                FailureMode::Closed => Err(err),
            },
        }
    }

    /// Whether a request for `key` is admitted right now.
    pub async fn allow(&self, key: &str) -> Result<bool, LimiterError> {
        Ok(self.check(key).await?.is_none_or(|decision| decision.allowed))
    }

    /// Periodically drop idle per-key state until `shutdown` fires.
    pub fn spawn_eviction(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Rate limiter eviction task stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = limiter.backend.evict_idle(limiter.window).await;
                        if evicted > 0 {
                            debug!(evicted, "Evicted idle rate limit buckets");
                        }
                    }
                }
            }
        })
    }

    fn client_key(&self, request: &Request) -> String {
        let peer = request.extensions().get::<ConnectInfo<SocketAddr>>().map(|info| info.0);
        client_key(request.headers(), peer, self.trust_forwarded_for)
    }
}

/// Identify the caller: API key header, then the first forwarded hop when trusted, then the peer
/// address. Requests with none of these share a single anonymous bucket.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded_for: bool) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(api_key) = header(API_KEY_HEADER) {
        return format!("key:{api_key}");
    }
    if trust_forwarded_for
        && let Some(first) = header(FORWARDED_FOR_HEADER).and_then(|v| v.split(',').next()).map(str::trim)
        && !first.is_empty()
    {
        return format!("ip:{first}");
    }
    match peer {
        Some(addr) => format!("ip:{}", addr.ip()),
        None => ANONYMOUS_KEY.to_string(),
    }
}

fn set_header(response: &mut Response<Body>, name: &'static str, value: u32) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        response.headers_mut().insert(name, value);
    }
}

/// Rejects requests over the limit with 429 and annotates every limited response with
/// `x-ratelimit-limit` and `x-ratelimit-remaining`.
#[instrument(skip_all, fields(path = %request.uri().path(), method = %request.method()))]
pub async fn rate_limit_middleware(State(limiter): State<Arc<RateLimiter>>, request: Request, next: Next) -> Response<Body> {
    let key = limiter.client_key(&request);

    let decision = match limiter.check(&key).await {
        Ok(decision) => decision,
        Err(err) => return Error::from(err).into_response(),
    };

    let Some(decision) = decision else {
        return next.run(request).await;
    };

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        metrics::counter!("readmit_rate_limited_total").increment(1);
        debug!(key = %key, retry_after_ms = decision.retry_after.as_millis() as u64, "Request rate limited");
        Error::TooManyRequests {
            retry_after: decision.retry_after,
        }
        .into_response()
    };

    set_header(&mut response, LIMIT_HEADER, decision.limit);
    set_header(&mut response, REMAINING_HEADER, decision.remaining);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, routing::get};
    use axum_test::TestServer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(max_requests: u32, failure_mode: FailureMode) -> RateLimitConfig {
        RateLimitConfig {
            max_requests,
            window: Duration::from_secs(60),
            failure_mode,
            ..Default::default()
        }
    }

    fn memory_limiter(max_requests: u32) -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryBackend::new()), &config(max_requests, FailureMode::Closed))
    }

    /// Backend that always fails, counting how often it was asked.
    #[derive(Default)]
    struct BrokenBackend {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl RateLimitBackend for BrokenBackend {
        async fn hit(&self, _key: &str, _max: u32, _window: Duration) -> Result<Decision, LimiterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(LimiterError::Unavailable("connection refused".to_string()))
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    /// Backend whose calls never complete, like a black-holed Redis.
    struct HangingBackend;

    #[async_trait::async_trait]
    impl RateLimitBackend for HangingBackend {
        async fn hit(&self, _key: &str, _max: u32, _window: Duration) -> Result<Decision, LimiterError> {
            std::future::pending().await
        }

        fn name(&self) -> &'static str {
            "hanging"
        }
    }

    fn server(limiter: RateLimiter) -> TestServer {
        let app = Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(axum::middleware::from_fn_with_state(Arc::new(limiter), rate_limit_middleware));
        TestServer::new(app).expect("Failed to create test server")
    }

    #[tokio::test]
    async fn test_requests_over_limit_are_rejected() {
        let limiter = memory_limiter(3);
        for _ in 0..3 {
            assert!(limiter.allow("ip:10.0.0.1").await.unwrap());
        }
        assert!(!limiter.allow("ip:10.0.0.1").await.unwrap());
        // Other clients are unaffected
        assert!(limiter.allow("ip:10.0.0.2").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = memory_limiter(2);
        assert!(limiter.allow("k").await.unwrap());
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(limiter.allow("k").await.unwrap());

        let rejected = limiter.check("k").await.unwrap().unwrap();
        assert!(!rejected.allowed);
        assert_eq!(rejected.retry_after, Duration::from_secs(30));

        // The first hit leaves the window; only one slot frees up
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(limiter.allow("k").await.unwrap());
        assert!(!limiter.allow("k").await.unwrap());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(limiter.allow("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_failure_mode_closed_propagates_error() {
        let limiter = RateLimiter::new(Arc::new(BrokenBackend::default()), &config(5, FailureMode::Closed));
        assert!(matches!(limiter.allow("k").await, Err(LimiterError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_failure_mode_open_admits() {
        let limiter = RateLimiter::new(Arc::new(BrokenBackend::default()), &config(5, FailureMode::Open));
        assert!(limiter.check("k").await.unwrap().is_none());
        assert!(limiter.allow("k").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_hits_never_exceed_limit() {
        let limiter = Arc::new(memory_limiter(50));
        let handles: Vec<_> = (0..200)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.allow("shared").await.unwrap() })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 50);
    }

    #[test]
    fn test_client_key_precedence() {
        let peer: SocketAddr = "192.168.1.9:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers, Some(peer), true), "ip:192.168.1.9");
        assert_eq!(client_key(&headers, None, true), "anonymous");

        headers.insert(FORWARDED_FOR_HEADER, HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(client_key(&headers, Some(peer), true), "ip:203.0.113.7");
        // Untrusted forwarded headers are ignored
        assert_eq!(client_key(&headers, Some(peer), false), "ip:192.168.1.9");

        headers.insert(API_KEY_HEADER, HeaderValue::from_static("abc123"));
        assert_eq!(client_key(&headers, Some(peer), true), "key:abc123");
    }

    #[tokio::test]
    async fn test_middleware_sets_headers_and_rejects() {
        let server = server(memory_limiter(2));

        let first = server.get("/ping").await;
        first.assert_status_ok();
        assert_eq!(first.header(LIMIT_HEADER), "2");
        assert_eq!(first.header(REMAINING_HEADER), "1");

        server.get("/ping").await.assert_status_ok();

        let rejected = server.get("/ping").await;
        rejected.assert_status(StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(rejected.header(REMAINING_HEADER), "0");
        assert!(rejected.maybe_header("retry-after").is_some());
        let body: serde_json::Value = rejected.json();
        assert_eq!(body["code"], "rate_limit_exceeded");
    }

    #[tokio::test]
    async fn test_middleware_fail_closed_returns_503() {
        let limiter = RateLimiter::new(Arc::new(BrokenBackend::default()), &config(5, FailureMode::Closed));
        let response = server(limiter).get("/ping").await;

        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = response.json();
        assert_eq!(body["code"], "rate_limiter_unavailable");
    }

    #[tokio::test]
    async fn test_middleware_fail_open_passes_through() {
        let limiter = RateLimiter::new(Arc::new(BrokenBackend::default()), &config(5, FailureMode::Open));
        let response = server(limiter).get("/ping").await;

        response.assert_status_ok();
        assert!(response.maybe_header(LIMIT_HEADER).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_backend_applies_failure_mode() {
        let closed = RateLimiter::new(Arc::new(HangingBackend), &config(5, FailureMode::Closed));
        assert!(matches!(closed.check("k").await, Err(LimiterError::Unavailable(_))));

        let open = RateLimiter::new(Arc::new(HangingBackend), &config(5, FailureMode::Open));
        assert!(open.check("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_middleware_unresponsive_backend_returns_503() {
        let mut config = config(5, FailureMode::Closed);
        config.backend_timeout = Duration::from_millis(20);
        let response = server(RateLimiter::new(Arc::new(HangingBackend), &config)).get("/ping").await;

        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.json::<serde_json::Value>()["code"], "rate_limiter_unavailable");
    }

    fn unreachable_redis(failure_mode: FailureMode) -> RateLimitConfig {
        RateLimitConfig {
            storage: RateLimitStorage::Redis {
                // Nothing listens on port 1
                url: "redis://127.0.0.1:1".to_string(),
                key_prefix: "readmit:test".to_string(),
            },
            backend_timeout: Duration::from_millis(200),
            ..config(5, failure_mode)
        }
    }

    #[tokio::test]
    async fn test_unreachable_redis_fails_open_at_startup() {
        let limiter = RateLimiter::from_config(&unreachable_redis(FailureMode::Open))
            .await
            .unwrap()
            .expect("limiter enabled");
        assert!(limiter.allow("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_redis_fails_closed_at_startup() {
        assert!(RateLimiter::from_config(&unreachable_redis(FailureMode::Closed)).await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_config_builds_no_limiter() {
        let config = RateLimitConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(RateLimiter::from_config(&config).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_task_stops_on_cancel() {
        let limiter = Arc::new(memory_limiter(5));
        let shutdown = CancellationToken::new();
        let handle = limiter.spawn_eviction(Duration::from_secs(1), shutdown.clone());

        tokio::time::advance(Duration::from_secs(3)).await;
        shutdown.cancel();
        handle.await.unwrap();
    }
}
