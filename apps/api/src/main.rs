mod analytics;
mod auth;
mod billing;
mod chat;
mod config;
mod db;
mod documents;
mod errors;
mod llm_client;
mod mailer;
mod models;
mod public;
mod rate_limit;
mod retention;
mod routes;
mod state;
mod teams;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::auth::jwt::JwtService;
use crate::billing::stripe::StripeClient;
use crate::config::Config;
use crate::db::{create_pool, run_migrations};
use crate::llm_client::LlmClient;
use crate::mailer::Mailer;
use crate::rate_limit::{MemoryRateLimiter, RateLimiter, RedisRateLimiter};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={},tower_http={}",
                env!("CARGO_CRATE_NAME"),
                &config.rust_log,
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting om2chat API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;
    if config.run_migrations {
        run_migrations(&db).await?;
    }

    // Rate limiter: Redis when configured, per-process memory otherwise
    let rate_limiter = build_rate_limiter(&config).await?;
    info!("Rate limiter backend: {}", rate_limiter.backend());

    // Initialize LLM client
    let llm = LlmClient::new(&config);
    info!("LLM client initialized (chat model: {})", llm.chat_model());

    let stripe = config.stripe_secret_key.clone().map(StripeClient::new);
    if stripe.is_none() {
        warn!("STRIPE_SECRET_KEY not set; billing routes are disabled");
    }

    let mailer = Mailer::from_config(&config);
    if config.resend_api_key.is_none() {
        warn!("RESEND_API_KEY not set; outgoing email is logged only");
    }

    // Build app state
    let state = AppState {
        db,
        llm,
        jwt: JwtService::from_config(&config),
        rate_limiter,
        mailer,
        stripe,
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn build_rate_limiter(config: &Config) -> Result<Arc<dyn RateLimiter>> {
    match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str()).context("Invalid REDIS_URL")?;
            let limiter = RedisRateLimiter::connect(&client)
                .await
                .context("Failed to connect to Redis")?;
            Ok(Arc::new(limiter))
        }
        None => {
            warn!("REDIS_URL not set; rate limits are tracked per process");
            Ok(Arc::new(MemoryRateLimiter::new()))
        }
    }
}
