use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::AuthBroker;
use crate::errors::AppError;
use crate::models::analytics::{AnalyticsEventRow, EventCountRow, LinkActivityRow};
use crate::state::AppState;
use crate::teams::resolve_owner_id;

const MAX_DAYS: i64 = 365;
const RECENT_EVENTS: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AnalyticsSummary {
    pub days: i64,
    pub event_counts: Vec<EventCountRow>,
    pub unique_clients: i64,
    pub links: Vec<LinkActivityRow>,
    pub recent_events: Vec<AnalyticsEventRow>,
}

/// GET /api/analytics?days=30
pub async fn handle_summary(
    State(state): State<AppState>,
    AuthBroker(claims): AuthBroker,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<AnalyticsSummary>, AppError> {
    let days = query.days.unwrap_or(30).clamp(1, MAX_DAYS);
    let since = Utc::now() - Duration::days(days);
    let owner_id = resolve_owner_id(&state.db, &claims).await?;

    let event_counts = sqlx::query_as::<_, EventCountRow>(
        r#"
        SELECT event_type, COUNT(*) AS count
        FROM analytics
        WHERE broker_id = $1 AND created_at >= $2
        GROUP BY event_type
        ORDER BY event_type
        "#,
    )
    .bind(owner_id)
    .bind(since)
    .fetch_all(&state.db)
    .await?;

    let unique_clients: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(DISTINCT client_session_id)
        FROM analytics
        WHERE broker_id = $1 AND created_at >= $2 AND client_session_id IS NOT NULL
        "#,
    )
    .bind(owner_id)
    .bind(since)
    .fetch_one(&state.db)
    .await?;

    let links = sqlx::query_as::<_, LinkActivityRow>(
        r#"
        SELECT a.public_link_id,
               l.title,
               COUNT(*) FILTER (WHERE a.event_type = 'link_opened') AS opens,
               COUNT(*) FILTER (WHERE a.event_type = 'chat_message') AS messages,
               COUNT(*) FILTER (WHERE a.event_type = 'email_captured') AS emails_captured
        FROM analytics a
        JOIN public_links l ON l.id = a.public_link_id
        WHERE a.broker_id = $1 AND a.created_at >= $2
        GROUP BY a.public_link_id, l.title
        ORDER BY messages DESC
        "#,
    )
    .bind(owner_id)
    .bind(since)
    .fetch_all(&state.db)
    .await?;

    let recent_events = sqlx::query_as::<_, AnalyticsEventRow>(
        "SELECT * FROM analytics WHERE broker_id = $1 ORDER BY created_at DESC LIMIT $2",
    )
    .bind(owner_id)
    .bind(RECENT_EVENTS)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(AnalyticsSummary {
        days,
        event_counts,
        unique_clients,
        links,
        recent_events,
    }))
}
