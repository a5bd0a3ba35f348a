use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{RateLimitError, RateLimitPolicy, RateLimitResult, RateLimiter};

/// Keys are swept of empty windows once the map grows past this size.
const SWEEP_THRESHOLD: usize = 10_000;

/// In-process sliding window.
///
/// State lives in this process only: counts reset on restart and are not
/// shared between instances.
#[derive(Default)]
pub struct MemoryRateLimiter {
    windows: Mutex<HashMap<String, Window>>,
}

/// Hits for one key, together with the window length that key is checked with.
#[derive(Debug, Default)]
struct Window {
    window_ms: i64,
    hits: VecDeque<i64>,
}

impl Window {
    fn evict_expired(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.window_ms;
        while self.hits.front().is_some_and(|&t| t <= cutoff) {
            self.hits.pop_front();
        }
    }
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn check_at(&self, key: &str, policy: RateLimitPolicy, now_ms: i64) -> RateLimitResult {
        let mut windows = self.windows.lock().await;

        if windows.len() > SWEEP_THRESHOLD {
            windows.retain(|_, window| {
                window.evict_expired(now_ms);
                !window.hits.is_empty()
            });
        }

        let window = windows.entry(key.to_string()).or_default();
        window.window_ms = policy.window_ms;
        window.evict_expired(now_ms);
        let hits = &mut window.hits;

        let success = (hits.len() as u32) < policy.max;
        if success {
            hits.push_back(now_ms);
        }

        let reset_time = hits.front().copied().unwrap_or(now_ms) + policy.window_ms;
        RateLimitResult {
            success,
            limit: policy.max,
            remaining: policy.max.saturating_sub(hits.len() as u32),
            reset_time,
        }
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn check(
        &self,
        key: &str,
        policy: RateLimitPolicy,
    ) -> Result<RateLimitResult, RateLimitError> {
        Ok(self
            .check_at(key, policy, chrono::Utc::now().timestamp_millis())
            .await)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
