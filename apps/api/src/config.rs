use std::str::FromStr;

use anyhow::{bail, Context, Result};
use axum_client_ip::SecureClientIpSource;

/// Application configuration loaded from environment variables.
/// Startup fails if a required variable is missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Distributed rate limiting is enabled only when this is set.
    pub redis_url: Option<String>,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub stripe_secret_key: Option<String>,
    pub resend_api_key: Option<String>,
    pub email_from: String,
    pub cron_secret: Option<String>,
    pub app_url: String,
    pub max_upload_bytes: usize,
    pub chunk_size: usize,
    pub match_count: i32,
    pub match_threshold: f64,
    pub trial_days: i64,
    pub retention_days: i64,
    pub run_migrations: bool,
    /// Where the client address for per-IP rate limits comes from. Only
    /// set a header source when a trusted proxy overwrites that header.
    pub client_ip_source: SecureClientIpSource,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: optional_env("REDIS_URL"),
            openai_api_key: require_env("OPENAI_API_KEY")?,
            openai_base_url: optional_env("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            chat_model: optional_env("OPENAI_CHAT_MODEL")
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            embedding_model: optional_env("OPENAI_EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            jwt_secret: require_env("JWT_SECRET")?,
            jwt_expiry_hours: parse_env("JWT_EXPIRY_HOURS", 24 * 7)?,
            stripe_secret_key: optional_env("STRIPE_SECRET_KEY"),
            resend_api_key: optional_env("RESEND_API_KEY"),
            email_from: optional_env("EMAIL_FROM")
                .unwrap_or_else(|| "om2chat <noreply@om2chat.com>".to_string()),
            cron_secret: optional_env("CRON_SECRET"),
            app_url: optional_env("APP_URL").unwrap_or_else(|| "http://localhost:3000".to_string()),
            max_upload_bytes: parse_env("MAX_UPLOAD_BYTES", 15 * 1024 * 1024)?,
            chunk_size: parse_env("CHUNK_SIZE", 1000)?,
            match_count: parse_env("MATCH_COUNT", 5)?,
            match_threshold: parse_env("MATCH_THRESHOLD", 0.3)?,
            trial_days: parse_env("TRIAL_DAYS", 14)?,
            retention_days: parse_env("RETENTION_DAYS", 90)?,
            run_migrations: parse_env("RUN_MIGRATIONS", false)?,
            client_ip_source: match optional_env("CLIENT_IP_SOURCE") {
                Some(raw) => parse_client_ip_source(&raw)?,
                None => SecureClientIpSource::ConnectInfo,
            },
            port: parse_env("PORT", 8080)?,
            rust_log: optional_env("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_client_ip_source(raw: &str) -> Result<SecureClientIpSource> {
    Ok(match raw.trim().to_ascii_lowercase().as_str() {
        "connect_info" => SecureClientIpSource::ConnectInfo,
        "rightmost_x_forwarded_for" => SecureClientIpSource::RightmostXForwardedFor,
        "rightmost_forwarded" => SecureClientIpSource::RightmostForwarded,
        "x_real_ip" => SecureClientIpSource::XRealIp,
        "cf_connecting_ip" => SecureClientIpSource::CfConnectingIp,
        "true_client_ip" => SecureClientIpSource::TrueClientIp,
        "fly_client_ip" => SecureClientIpSource::FlyClientIp,
        other => bail!("Environment variable 'CLIENT_IP_SOURCE' has an unknown value '{other}'"),
    })
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value")),
        None => Ok(default),
    }
}

#[cfg(test)]
impl Config {
    /// Configuration used by handler tests; nothing here is ever dialed.
    pub fn for_tests() -> Self {
        Config {
            database_url: "postgres://localhost/om2chat_test".to_string(),
            redis_url: None,
            openai_api_key: "sk-test".to_string(),
            openai_base_url: "http://127.0.0.1:9/v1".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            jwt_secret: "test-secret".to_string(),
            jwt_expiry_hours: 1,
            stripe_secret_key: None,
            resend_api_key: None,
            email_from: "test@om2chat.com".to_string(),
            cron_secret: None,
            app_url: "http://localhost:3000".to_string(),
            max_upload_bytes: 1024,
            chunk_size: 1000,
            match_count: 5,
            match_threshold: 0.3,
            trial_days: 14,
            retention_days: 90,
            run_migrations: false,
            client_ip_source: SecureClientIpSource::ConnectInfo,
            port: 0,
            rust_log: "debug".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_source_names() {
        assert!(matches!(
            parse_client_ip_source("connect_info").unwrap(),
            SecureClientIpSource::ConnectInfo
        ));
        assert!(matches!(
            parse_client_ip_source(" CF_CONNECTING_IP ").unwrap(),
            SecureClientIpSource::CfConnectingIp
        ));
        assert!(parse_client_ip_source("x-forwarded-for").is_err());
    }
}
