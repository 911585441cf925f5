//! Redis-backed sliding-window logs shared across instances.
//!
//! Each client key maps to a sorted set of request timestamps (milliseconds, scored by Redis'
//! own clock). A Lua script prunes, counts and records in one server-side step, so instances
//! never race each other on the same key.
//!
//! The connection is established on first use, so a Redis outage at startup only matters if the
//! limiter fails closed.

use std::time::Duration;

use redis::{
    Client, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use tokio::sync::OnceCell;
use tracing::info;
use uuid::Uuid;

use super::{Decision, LimiterError, RateLimitBackend};

const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local window = tonumber(ARGV[1])
local max = tonumber(ARGV[2])
local member = ARGV[3]
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
if count < max then
  redis.call('ZADD', key, now, member)
  redis.call('PEXPIRE', key, window)
  return {1, max - count - 1, 0}
end

local retry = window
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if oldest[2] then
  retry = tonumber(oldest[2]) + window - now
end
return {0, 0, retry}
"#;

pub struct RedisBackend {
    client: Client,
    connect_timeout: Duration,
    connection: OnceCell<ConnectionManager>,
    key_prefix: String,
    script: Script,
}

impl RedisBackend {
    /// Parse `url` without connecting. The first [`hit`](RateLimitBackend::hit) connects.
    pub fn new(url: &str, key_prefix: &str, connect_timeout: Duration) -> Result<Self, LimiterError> {
        Ok(Self {
            client: Client::open(url)?,
            connect_timeout,
            connection: OnceCell::new(),
            key_prefix: key_prefix.to_string(),
            script: Script::new(SLIDING_WINDOW_SCRIPT),
        })
    }

    /// Connect now instead of on the first request.
    pub async fn ensure_connected(&self) -> Result<(), LimiterError> {
        self.connection().await.map(|_| ())
    }

    async fn connection(&self) -> Result<ConnectionManager, LimiterError> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                let config = ConnectionManagerConfig::new()
                    .set_connection_timeout(self.connect_timeout)
                    .set_number_of_retries(1);
                let connection = self.client.get_connection_manager_with_config(config).await?;
                info!(key_prefix = %self.key_prefix, "Connected to Redis for rate limiting");
                Ok::<_, LimiterError>(connection)
            })
            .await?;
        Ok(connection.clone())
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }
}

#[async_trait::async_trait]
impl RateLimitBackend for RedisBackend {
    async fn hit(&self, key: &str, max_requests: u32, window: Duration) -> Result<Decision, LimiterError> {
        let mut connection = self.connection().await?;
        let window_ms = window.as_millis().max(1) as u64;

        let reply: Vec<i64> = self
            .script
            .key(self.redis_key(key))
            .arg(window_ms)
            .arg(max_requests)
            .arg(Uuid::new_v4().to_string())
            .invoke_async(&mut connection)
            .await?;

        match reply.as_slice() {
            [1, remaining, _] => Ok(Decision::admitted(max_requests, (*remaining).max(0) as u32)),
            [0, _, retry_ms] => Ok(Decision::rejected(
                max_requests,
                Duration::from_millis((*retry_ms).max(0) as u64),
            )),
            other => Err(LimiterError::Unavailable(format!("unexpected script reply: {other:?}"))),
        }
    }

    // Keys expire in Redis via PEXPIRE; nothing to evict locally.

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn test_shared_window_across_backends() {
        let prefix = format!("readmit:test:{}", Uuid::new_v4());
        let a = RedisBackend::new(&redis_url(), &prefix, Duration::from_secs(1)).unwrap();
        let b = RedisBackend::new(&redis_url(), &prefix, Duration::from_secs(1)).unwrap();
        a.ensure_connected().await.unwrap();
        let window = Duration::from_secs(60);

        assert!(a.hit("client", 2, window).await.unwrap().allowed);
        assert!(b.hit("client", 2, window).await.unwrap().allowed);

        let rejected = a.hit("client", 2, window).await.unwrap();
        assert!(!rejected.allowed);
        assert!(rejected.retry_after <= window);
        assert!(rejected.retry_after > Duration::ZERO);
    }
}
