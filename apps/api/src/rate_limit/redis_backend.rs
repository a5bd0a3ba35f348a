use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Script;
use uuid::Uuid;

use super::{RateLimitError, RateLimitPolicy, RateLimitResult, RateLimiter};

const KEY_PREFIX: &str = "om2chat:ratelimit:";

/// Sorted-set sliding window. Members are request ids scored by their
/// timestamp; the whole check runs as one script so concurrent instances see
/// a consistent count.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local max = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, 0, now - window)
local count = redis.call('ZCARD', key)
local allowed = 0
if count < max then
    redis.call('ZADD', key, now, ARGV[4])
    count = count + 1
    allowed = 1
end
redis.call('PEXPIRE', key, window)

local reset = now + window
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if oldest[2] then
    reset = tonumber(oldest[2]) + window
end
return {allowed, count, reset}
"#;

/// Rate limiter shared by every instance pointed at the same Redis.
#[derive(Clone)]
pub struct RedisRateLimiter {
    conn: MultiplexedConnection,
    script: Script,
}

impl RedisRateLimiter {
    pub async fn connect(client: &redis::Client) -> Result<Self, RateLimitError> {
        let conn = client.get_multiplexed_tokio_connection().await?;
        Ok(Self {
            conn,
            script: Script::new(SLIDING_WINDOW_SCRIPT),
        })
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(
        &self,
        key: &str,
        policy: RateLimitPolicy,
    ) -> Result<RateLimitResult, RateLimitError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut conn = self.conn.clone();

        let (allowed, count, reset): (i64, i64, i64) = self
            .script
            .key(format!("{KEY_PREFIX}{key}"))
            .arg(now_ms)
            .arg(policy.window_ms)
            .arg(policy.max)
            .arg(format!("{now_ms}-{}", Uuid::new_v4()))
            .invoke_async(&mut conn)
            .await?;

        Ok(RateLimitResult {
            success: allowed == 1,
            limit: policy.max,
            remaining: policy.max.saturating_sub(count.max(0) as u32),
            reset_time: reset,
        })
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
