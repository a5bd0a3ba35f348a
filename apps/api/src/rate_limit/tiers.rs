use super::RateLimitPolicy;
use crate::models::broker::SubscriptionTier;

/// Per-tier limits for authenticated broker endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub chat: RateLimitPolicy,
    pub upload: RateLimitPolicy,
}

/// Unauthenticated chat through a public link, keyed by client IP.
pub const PUBLIC_CHAT_LIMIT: RateLimitPolicy = RateLimitPolicy::per_minute(20);

/// Public link pages and email capture, keyed by client IP.
pub const PUBLIC_PAGE_LIMIT: RateLimitPolicy = RateLimitPolicy::per_minute(60);

pub const fn tier_limits(tier: SubscriptionTier) -> TierLimits {
    match tier {
        SubscriptionTier::FreeTrial => TierLimits {
            chat: RateLimitPolicy::per_minute(10),
            upload: RateLimitPolicy::per_hour(5),
        },
        SubscriptionTier::Individual => TierLimits {
            chat: RateLimitPolicy::per_minute(30),
            upload: RateLimitPolicy::per_hour(20),
        },
        SubscriptionTier::Team => TierLimits {
            chat: RateLimitPolicy::per_minute(60),
            upload: RateLimitPolicy::per_hour(50),
        },
        SubscriptionTier::Enterprise => TierLimits {
            chat: RateLimitPolicy::per_minute(200),
            upload: RateLimitPolicy::per_hour(200),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_grow_with_tier() {
        let tiers = [
            SubscriptionTier::FreeTrial,
            SubscriptionTier::Individual,
            SubscriptionTier::Team,
            SubscriptionTier::Enterprise,
        ];
        for pair in tiers.windows(2) {
            let (lower, higher) = (tier_limits(pair[0]), tier_limits(pair[1]));
            assert!(lower.chat.max < higher.chat.max);
            assert!(lower.upload.max <= higher.upload.max);
        }
    }

    #[test]
    fn test_windows() {
        let limits = tier_limits(SubscriptionTier::Individual);
        assert_eq!(limits.chat.window_ms, 60_000);
        assert_eq!(limits.upload.window_ms, 3_600_000);
    }
}
