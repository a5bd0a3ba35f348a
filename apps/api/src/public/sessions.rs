use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::analytics::{self, NewAnalyticsEvent};
use crate::auth::handlers::normalize_email;
use crate::errors::AppError;
use crate::models::analytics::AnalyticsEventType;
use crate::models::public_link::{ClientSessionRow, PublicLinkRow};
use crate::public::links::find_active_by_token;
use crate::public::random_token;
use crate::state::AppState;

/// Error reason returned when a link needs the client's email first.
pub const EMAIL_REQUIRED: &str = "email_required";

#[derive(Debug, Deserialize, Validate)]
pub struct CaptureEmailRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(max = 120))]
    pub name: Option<String>,
    #[validate(length(max = 40))]
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_token: String,
    pub session: ClientSessionRow,
}

/// Whether a client may chat through `link`.
///
/// An email-gated link requires a session created for that link.
pub fn authorize_chat(
    link: &PublicLinkRow,
    session: Option<&ClientSessionRow>,
) -> Result<(), AppError> {
    if !link.is_active {
        return Err(AppError::NotFound("Link not found".to_string()));
    }
    match session {
        Some(session) if session.public_link_id != link.id => {
            Err(AppError::Forbidden(EMAIL_REQUIRED.to_string()))
        }
        None if link.requires_email => Err(AppError::Forbidden(EMAIL_REQUIRED.to_string())),
        _ => Ok(()),
    }
}

pub async fn find_session(
    pool: &PgPool,
    link_id: Uuid,
    session_token: &str,
) -> Result<Option<ClientSessionRow>, sqlx::Error> {
    sqlx::query_as::<_, ClientSessionRow>(
        "SELECT * FROM client_sessions WHERE public_link_id = $1 AND session_token = $2",
    )
    .bind(link_id)
    .bind(session_token)
    .fetch_optional(pool)
    .await
}

/// Bumps `last_activity_at` and `message_count` on a background task.
pub fn record_activity(pool: &PgPool, session_id: Uuid) {
    let pool = pool.clone();
    tokio::spawn(async move {
        let result = sqlx::query(
            r#"
            UPDATE client_sessions
            SET last_activity_at = now(), message_count = message_count + 1
            WHERE id = $1
            "#,
        )
        .bind(session_id)
        .execute(&pool)
        .await;
        if let Err(e) = result {
            warn!("Failed to update activity for session {session_id}: {e}");
        }
    });
}

/// POST /api/public/:token/session
pub async fn handle_capture_email(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(req): Json<CaptureEmailRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), AppError> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let link = find_active_by_token(&state.db, &token)
        .await?
        .ok_or_else(|| AppError::NotFound("Link not found".to_string()))?;

    let session_token = random_token();
    let session = sqlx::query_as::<_, ClientSessionRow>(
        r#"
        INSERT INTO client_sessions (public_link_id, session_token, email, name, phone)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(link.id)
    .bind(&session_token)
    .bind(normalize_email(&req.email))
    .bind(req.name.as_deref().map(str::trim).filter(|n| !n.is_empty()))
    .bind(req.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()))
    .fetch_one(&state.db)
    .await?;

    info!("Captured client email for link {}", link.id);
    analytics::track(
        &state.db,
        NewAnalyticsEvent::new(link.broker_id, AnalyticsEventType::EmailCaptured)
            .link(link.id)
            .session(Some(session.id))
            .data(json!({ "email": session.email, "name": session.name })),
    );

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            session_token,
            session,
        }),
    ))
}
