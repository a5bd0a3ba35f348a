//! Sliding-window rate limiting.
//!
//! Two backends share the [`RateLimiter`] contract: an in-process map
//! ([`MemoryRateLimiter`], correct only for a single instance) and a Redis
//! sorted-set window ([`RedisRateLimiter`]). `AppState` carries one of them as
//! `Arc<dyn RateLimiter>`, chosen at startup from `REDIS_URL`.

mod memory;
mod middleware;
mod redis_backend;
mod tiers;

use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::errors::AppError;

pub use self::memory::MemoryRateLimiter;
pub use self::middleware::rate_limit_public;
pub use self::redis_backend::RedisRateLimiter;
pub use self::tiers::{tier_limits, PUBLIC_CHAT_LIMIT, PUBLIC_PAGE_LIMIT};

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// A (window, max) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub window_ms: i64,
    pub max: u32,
}

impl RateLimitPolicy {
    pub const fn new(window: Duration, max: u32) -> Self {
        Self {
            window_ms: window.as_millis() as i64,
            max,
        }
    }

    pub const fn per_minute(max: u32) -> Self {
        Self::new(Duration::from_secs(60), max)
    }

    pub const fn per_hour(max: u32) -> Self {
        Self::new(Duration::from_secs(3600), max)
    }
}

/// Outcome of a single rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    pub success: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix epoch milliseconds at which the oldest counted request leaves the window.
    pub reset_time: i64,
}

impl RateLimitResult {
    /// Result used when the backend is unavailable; requests are let through.
    pub fn allow_all(policy: RateLimitPolicy, now_ms: i64) -> Self {
        Self {
            success: true,
            limit: policy.max,
            remaining: policy.max,
            reset_time: now_ms + policy.window_ms,
        }
    }

    /// Whole seconds until the window frees a slot, never less than one.
    pub fn retry_after_secs(&self, now_ms: i64) -> u64 {
        let remaining_ms = (self.reset_time - now_ms).max(0);
        ((remaining_ms + 999) / 1000).max(1) as u64
    }

    /// Writes the `X-RateLimit-*` headers.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert("x-ratelimit-limit", HeaderValue::from(self.limit));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(self.remaining));
        headers.insert(
            "x-ratelimit-reset",
            HeaderValue::from((self.reset_time / 1000).max(0) as u64),
        );
    }
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check(
        &self,
        key: &str,
        policy: RateLimitPolicy,
    ) -> Result<RateLimitResult, RateLimitError>;

    fn backend(&self) -> &'static str;
}

/// Checks `key` against `policy`, returning a 429 error once the window is full.
///
/// Backend failures are logged and the request is allowed through.
pub async fn enforce(
    limiter: &dyn RateLimiter,
    key: &str,
    policy: RateLimitPolicy,
) -> Result<RateLimitResult, AppError> {
    let result = match limiter.check(key, policy).await {
        Ok(result) => result,
        Err(e) => {
            warn!(backend = limiter.backend(), key, "Rate limiter unavailable: {e}");
            RateLimitResult::allow_all(policy, chrono::Utc::now().timestamp_millis())
        }
    };

    if result.success {
        Ok(result)
    } else {
        warn!(key, limit = result.limit, "Rate limit exceeded");
        Err(AppError::RateLimited(result))
    }
}
