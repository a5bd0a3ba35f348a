//! Registration, login, password reset and profile routes.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::auth::password::{hash_password, verify_or_dummy};
use crate::auth::reset::{generate_token, reset_password, store_reset_token};
use crate::auth::AuthBroker;
use crate::errors::AppError;
use crate::models::broker::BrokerRow;
use crate::state::AppState;

/// Outcome string returned by form-style actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Success,
    InvalidData,
    UserExists,
    InvalidToken,
    Failed,
}

impl ActionStatus {
    fn http_status(self) -> StatusCode {
        match self {
            ActionStatus::Success => StatusCode::OK,
            ActionStatus::InvalidData | ActionStatus::InvalidToken => StatusCode::BAD_REQUEST,
            ActionStatus::UserExists => StatusCode::CONFLICT,
            ActionStatus::Failed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ActionStatus {
    fn into_response(self) -> Response {
        (self.http_status(), Json(serde_json::json!({ "status": self }))).into_response()
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[validate(length(max = 120))]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub broker: BrokerRow,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1))]
    pub token: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(max = 120))]
    pub name: Option<String>,
    #[validate(length(max = 120))]
    pub company: Option<String>,
    #[validate(length(max = 40))]
    pub phone: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/auth/register
///
/// A duplicate email yields `user_exists` and leaves the existing row alone.
pub async fn handle_register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ActionStatus {
    if req.validate().is_err() {
        return ActionStatus::InvalidData;
    }

    let password_hash = match hash_password(&req.password) {
        Ok(hash) => hash,
        Err(e) => {
            error!("Password hashing failed: {e:#}");
            return ActionStatus::Failed;
        }
    };
    let email = normalize_email(&req.email);
    let trial_ends_at = Utc::now() + Duration::days(state.config.trial_days);

    let inserted: Result<Option<Uuid>, sqlx::Error> = sqlx::query_scalar(
        r#"
        INSERT INTO brokers (email, password_hash, name, subscription_tier, subscription_status, trial_ends_at)
        VALUES ($1, $2, $3, 'free_trial', 'trial', $4)
        ON CONFLICT (email) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(&email)
    .bind(&password_hash)
    .bind(req.name.as_deref().map(str::trim))
    .bind(trial_ends_at)
    .fetch_optional(&state.db)
    .await;

    registration_outcome(inserted)
}

/// `Ok(None)` is the `ON CONFLICT DO NOTHING` path; a unique violation is the
/// same race lost at commit.
fn registration_outcome(inserted: Result<Option<Uuid>, sqlx::Error>) -> ActionStatus {
    match inserted {
        Ok(Some(id)) => {
            info!("Registered broker {id}");
            ActionStatus::Success
        }
        Ok(None) => ActionStatus::UserExists,
        Err(e) if crate::db::is_unique_violation(&e) => ActionStatus::UserExists,
        Err(e) => {
            error!("Broker registration failed: {e}");
            ActionStatus::Failed
        }
    }
}

/// POST /api/auth/login
pub async fn handle_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let broker = find_by_email(&state, &normalize_email(&req.email)).await?;

    let stored_hash = broker.as_ref().map(|b| b.password_hash.as_str());
    if !verify_or_dummy(&req.password, stored_hash) {
        return Err(AppError::Unauthorized);
    }
    let broker = broker.ok_or(AppError::Unauthorized)?;

    let access_token = state.jwt.generate_token(&broker)?;
    Ok(Json(LoginResponse {
        access_token,
        token_type: "Bearer",
        expires_in: state.jwt.expires_in_secs(),
        broker,
    }))
}

/// POST /api/auth/forgot-password
///
/// Always answers `success` so the response does not reveal whether the
/// email is registered.
pub async fn handle_forgot_password(
    State(state): State<AppState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> ActionStatus {
    if req.validate().is_err() {
        return ActionStatus::InvalidData;
    }

    let broker = match find_by_email(&state, &normalize_email(&req.email)).await {
        Ok(Some(broker)) => broker,
        Ok(None) => return ActionStatus::Success,
        Err(e) => {
            error!("Password reset lookup failed: {e}");
            return ActionStatus::Success;
        }
    };

    let token = generate_token();
    if let Err(e) = store_reset_token(&state.db, broker.id, &token).await {
        error!("Failed to store reset token for broker {}: {e:#}", broker.id);
        return ActionStatus::Success;
    }

    let link = format!("{}/reset-password?token={token}", state.config.app_url);
    state.mailer.send_in_background(
        broker.email,
        "Reset your om2chat password".to_string(),
        format!(
            "<p>Someone requested a password reset for your om2chat account.</p>\
             <p><a href=\"{link}\">Choose a new password</a>. The link expires in one hour.</p>\
             <p>If this wasn't you, you can ignore this email.</p>"
        ),
    );
    ActionStatus::Success
}

/// POST /api/auth/reset-password
pub async fn handle_reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordRequest>,
) -> ActionStatus {
    if req.validate().is_err() {
        return ActionStatus::InvalidData;
    }

    let password_hash = match hash_password(&req.password) {
        Ok(hash) => hash,
        Err(e) => {
            error!("Password hashing failed: {e:#}");
            return ActionStatus::Failed;
        }
    };

    reset_outcome(reset_password(&state.db, &req.token, &password_hash).await)
}

fn reset_outcome(reset: anyhow::Result<Option<Uuid>>) -> ActionStatus {
    match reset {
        Ok(Some(id)) => {
            info!("Password reset for broker {id}");
            ActionStatus::Success
        }
        Ok(None) => {
            warn!("Rejected unknown, expired or used reset token");
            ActionStatus::InvalidToken
        }
        Err(e) => {
            error!("Password reset failed: {e:#}");
            ActionStatus::Failed
        }
    }
}

/// GET /api/me
pub async fn handle_get_me(
    State(state): State<AppState>,
    AuthBroker(claims): AuthBroker,
) -> Result<Json<BrokerRow>, AppError> {
    let broker = sqlx::query_as::<_, BrokerRow>("SELECT * FROM brokers WHERE id = $1")
        .bind(claims.sub)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Broker not found".to_string()))?;
    Ok(Json(broker))
}

/// PUT /api/me
pub async fn handle_update_me(
    State(state): State<AppState>,
    AuthBroker(claims): AuthBroker,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<BrokerRow>, AppError> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let broker = sqlx::query_as::<_, BrokerRow>(
        r#"
        UPDATE brokers
        SET name = COALESCE($1, name),
            company = COALESCE($2, company),
            phone = COALESCE($3, phone),
            updated_at = now()
        WHERE id = $4
        RETURNING *
        "#,
    )
    .bind(req.name.as_deref().map(str::trim))
    .bind(req.company.as_deref().map(str::trim))
    .bind(req.phone.as_deref().map(str::trim))
    .bind(claims.sub)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound("Broker not found".to_string()))?;

    Ok(Json(broker))
}

async fn find_by_email(state: &AppState, email: &str) -> Result<Option<BrokerRow>, AppError> {
    Ok(
        sqlx::query_as::<_, BrokerRow>("SELECT * FROM brokers WHERE email = $1")
            .bind(email)
            .fetch_optional(&state.db)
            .await?,
    )
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Dana@Example.COM "), "dana@example.com");
    }

    #[test]
    fn test_register_validation() {
        let ok = RegisterRequest {
            email: "dana@example.com".to_string(),
            password: "longenough".to_string(),
            name: None,
        };
        assert!(ok.validate().is_ok());

        let bad_email = RegisterRequest {
            email: "not-an-email".to_string(),
            ..ok
        };
        assert!(bad_email.validate().is_err());

        let short_password = RegisterRequest {
            email: "dana@example.com".to_string(),
            password: "short".to_string(),
            name: None,
        };
        assert!(short_password.validate().is_err());
    }

    #[test]
    fn test_registration_outcome() {
        assert_eq!(registration_outcome(Ok(Some(Uuid::new_v4()))), ActionStatus::Success);
        assert_eq!(registration_outcome(Ok(None)), ActionStatus::UserExists);
        assert_eq!(
            registration_outcome(Err(sqlx::Error::PoolTimedOut)),
            ActionStatus::Failed
        );
        assert_eq!(ActionStatus::UserExists.http_status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_reused_reset_token_is_invalid() {
        use crate::auth::reset::test_support::MemoryResetStore;

        let store = MemoryResetStore::default();
        let broker_id = Uuid::new_v4();
        let token = generate_token();
        store.issue(broker_id, &token, Utc::now() + Duration::minutes(5)).await;

        let first = reset_outcome(reset_password(&store, &token, "hash-1").await);
        assert_eq!(first, ActionStatus::Success);
        assert_eq!(store.password_of(broker_id).await.as_deref(), Some("hash-1"));

        let second = reset_outcome(reset_password(&store, &token, "hash-2").await);
        assert_eq!(second, ActionStatus::InvalidToken);
        assert_eq!(second.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(store.password_of(broker_id).await.as_deref(), Some("hash-1"));
    }

    #[tokio::test]
    async fn test_action_status_response() {
        let response = ActionStatus::UserExists.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "user_exists");
    }

    #[test]
    fn test_invalid_token_maps_to_bad_request() {
        assert_eq!(ActionStatus::InvalidToken.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(ActionStatus::Success.http_status(), StatusCode::OK);
    }
}
