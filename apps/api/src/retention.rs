//! Scheduled data retention, triggered by an external cron over HTTP.

use axum::{extract::State, http::HeaderMap, Json};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::info;

use crate::auth::bearer_token;
use crate::errors::AppError;
use crate::state::AppState;

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct RetentionReport {
    pub cutoff: String,
    pub chat_messages: u64,
    pub client_sessions: u64,
    pub analytics_events: u64,
    pub public_links: u64,
}

/// True when `presented` matches the configured cron secret. With no secret
/// configured the endpoint is closed.
fn cron_authorized(configured: Option<&str>, presented: Option<&str>) -> bool {
    match (configured, presented) {
        (Some(expected), Some(given)) => !expected.is_empty() && expected == given,
        _ => false,
    }
}

/// Deletes everything older than `cutoff`, one table at a time.
pub async fn purge_before(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<RetentionReport, sqlx::Error> {
    let chat_messages = sqlx::query(
        r#"
        DELETE FROM chat_histories
        WHERE client_session_id IN (
            SELECT id FROM client_sessions WHERE last_activity_at < $1
        )
        "#,
    )
    .bind(cutoff)
    .execute(pool)
    .await?
    .rows_affected();

    let client_sessions = sqlx::query("DELETE FROM client_sessions WHERE last_activity_at < $1")
        .bind(cutoff)
        .execute(pool)
        .await?
        .rows_affected();

    let analytics_events = sqlx::query("DELETE FROM analytics WHERE created_at < $1")
        .bind(cutoff)
        .execute(pool)
        .await?
        .rows_affected();

    let public_links = sqlx::query(
        "DELETE FROM public_links WHERE is_active = FALSE AND updated_at < $1",
    )
    .bind(cutoff)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(RetentionReport {
        cutoff: cutoff.to_rfc3339(),
        chat_messages,
        client_sessions,
        analytics_events,
        public_links,
    })
}

/// POST /api/cron/retention
pub async fn handle_retention(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RetentionReport>, AppError> {
    if !cron_authorized(state.config.cron_secret.as_deref(), bearer_token(&headers)) {
        return Err(AppError::Unauthorized);
    }

    let cutoff = Utc::now() - Duration::days(state.config.retention_days);
    let report = purge_before(&state.db, cutoff).await?;
    info!(
        "Retention run: {} sessions, {} chat messages, {} analytics events, {} links removed",
        report.client_sessions, report.chat_messages, report.analytics_events, report.public_links
    );
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        routing::post,
        Router,
    };
    use tower::ServiceExt;

    use super::*;

    #[test]
    fn test_cron_authorization() {
        assert!(cron_authorized(Some("s3cret"), Some("s3cret")));
        assert!(!cron_authorized(Some("s3cret"), Some("guess")));
        assert!(!cron_authorized(Some("s3cret"), None));
        assert!(!cron_authorized(None, Some("anything")));
        assert!(!cron_authorized(Some(""), Some("")));
    }

    #[tokio::test]
    async fn test_retention_rejects_missing_secret() {
        let app = Router::new()
            .route("/api/cron/retention", post(handle_retention))
            .with_state(AppState::for_tests());
        let request = Request::builder()
            .method("POST")
            .uri("/api/cron/retention")
            .header("authorization", "Bearer wrong")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
