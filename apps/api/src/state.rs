use std::sync::Arc;

use sqlx::PgPool;

use crate::auth::jwt::JwtService;
use crate::billing::stripe::StripeClient;
use crate::config::Config;
use crate::llm_client::LlmClient;
use crate::mailer::Mailer;
use crate::rate_limit::RateLimiter;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub llm: LlmClient,
    pub config: Config,
    pub jwt: JwtService,
    /// Redis-backed when `REDIS_URL` is set, in-process otherwise.
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub mailer: Mailer,
    /// `None` when `STRIPE_SECRET_KEY` is unset; billing routes then return 500.
    pub stripe: Option<StripeClient>,
}

#[cfg(test)]
impl AppState {
    /// State with a lazily-connecting pool and an in-memory limiter. Tests
    /// using it must not reach a handler path that touches the database.
    pub fn for_tests() -> Self {
        let config = Config::for_tests();
        let db = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .expect("lazy pool");
        AppState {
            db,
            llm: LlmClient::new(&config),
            jwt: JwtService::from_config(&config),
            rate_limiter: Arc::new(crate::rate_limit::MemoryRateLimiter::new()),
            mailer: Mailer::from_config(&config),
            stripe: None,
            config,
        }
    }
}
