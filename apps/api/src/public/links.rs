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
use crate::auth::{ActiveBroker, AuthBroker};
use crate::db::is_unique_violation;
use crate::documents::store;
use crate::errors::AppError;
use crate::models::analytics::AnalyticsEventType;
use crate::models::public_link::PublicLinkRow;
use crate::public::random_token;
use crate::state::AppState;
use crate::teams::{resolve_owner_id, visible_owner_ids};

const TOKEN_ATTEMPTS: usize = 3;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
pub struct CreateLinkRequest {
    pub document_id: Uuid,
    #[validate(length(max = 200))]
    pub title: Option<String>,
    pub requires_email: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateLinkRequest {
    #[validate(length(max = 200))]
    pub title: Option<String>,
    pub requires_email: Option<bool>,
    pub is_active: Option<bool>,
}

/// A link plus its shareable URL.
#[derive(Debug, Serialize)]
pub struct LinkView {
    #[serde(flatten)]
    pub link: PublicLinkRow,
    pub url: String,
}

/// What an unauthenticated visitor sees when opening a link.
#[derive(Debug, Serialize)]
pub struct PublicLinkInfo {
    pub title: String,
    pub document_title: String,
    pub requires_email: bool,
}

fn share_url(app_url: &str, token: &str) -> String {
    format!("{}/chat/{token}", app_url.trim_end_matches('/'))
}

fn view(state: &AppState, link: PublicLinkRow) -> LinkView {
    let url = share_url(&state.config.app_url, &link.token);
    LinkView { link, url }
}

// ────────────────────────────────────────────────────────────────────────────
// Queries
// ────────────────────────────────────────────────────────────────────────────

/// An active link by its token.
pub async fn find_active_by_token(
    pool: &PgPool,
    token: &str,
) -> Result<Option<PublicLinkRow>, sqlx::Error> {
    sqlx::query_as::<_, PublicLinkRow>(
        "SELECT * FROM public_links WHERE token = $1 AND is_active = TRUE",
    )
    .bind(token)
    .fetch_optional(pool)
    .await
}

async fn find_owned(pool: &PgPool, id: Uuid, owner_id: Uuid) -> Result<PublicLinkRow, AppError> {
    sqlx::query_as::<_, PublicLinkRow>("SELECT * FROM public_links WHERE id = $1 AND broker_id = $2")
        .bind(id)
        .bind(owner_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Link {id} not found")))
}

async fn insert_link(
    pool: &PgPool,
    owner_id: Uuid,
    req: &CreateLinkRequest,
) -> Result<PublicLinkRow, AppError> {
    let title = req.title.as_deref().map(str::trim).filter(|t| !t.is_empty());
    let requires_email = req.requires_email.unwrap_or(true);

    for attempt in 1..=TOKEN_ATTEMPTS {
        let result = sqlx::query_as::<_, PublicLinkRow>(
            r#"
            INSERT INTO public_links (token, document_id, broker_id, title, requires_email)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(random_token())
        .bind(req.document_id)
        .bind(owner_id)
        .bind(title)
        .bind(requires_email)
        .fetch_one(pool)
        .await;

        match result {
            Ok(link) => return Ok(link),
            Err(e) if is_unique_violation(&e) => {
                warn!("Link token collision (attempt {attempt})");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(AppError::Internal(anyhow::anyhow!(
        "could not allocate a unique link token"
    )))
}

// ────────────────────────────────────────────────────────────────────────────
// Broker handlers
// ────────────────────────────────────────────────────────────────────────────

/// GET /api/public-links
pub async fn handle_list_links(
    State(state): State<AppState>,
    AuthBroker(claims): AuthBroker,
) -> Result<Json<Vec<LinkView>>, AppError> {
    let owner_id = resolve_owner_id(&state.db, &claims).await?;
    let links = sqlx::query_as::<_, PublicLinkRow>(
        "SELECT * FROM public_links WHERE broker_id = $1 ORDER BY created_at DESC",
    )
    .bind(owner_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(links.into_iter().map(|l| view(&state, l)).collect()))
}

/// POST /api/public-links
///
/// The link is always owned by the resolved owner (the team admin for team
/// members), whatever the request says.
pub async fn handle_create_link(
    State(state): State<AppState>,
    ActiveBroker(claims): ActiveBroker,
    Json(req): Json<CreateLinkRequest>,
) -> Result<(StatusCode, Json<LinkView>), AppError> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let owners = visible_owner_ids(&state.db, &claims).await?;
    store::find_visible(&state.db, req.document_id, &owners)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Document {} not found", req.document_id)))?;

    let owner_id = resolve_owner_id(&state.db, &claims).await?;
    let link = insert_link(&state.db, owner_id, &req).await?;
    info!("Broker {} created link {} for document {}", claims.sub, link.id, link.document_id);

    analytics::track(
        &state.db,
        NewAnalyticsEvent::new(owner_id, AnalyticsEventType::LinkCreated)
            .link(link.id)
            .data(json!({ "document_id": link.document_id, "created_by": claims.sub })),
    );

    Ok((StatusCode::CREATED, Json(view(&state, link))))
}

/// GET /api/public-links/:id
pub async fn handle_get_link(
    State(state): State<AppState>,
    AuthBroker(claims): AuthBroker,
    Path(id): Path<Uuid>,
) -> Result<Json<LinkView>, AppError> {
    let owner_id = resolve_owner_id(&state.db, &claims).await?;
    let link = find_owned(&state.db, id, owner_id).await?;
    Ok(Json(view(&state, link)))
}

/// PUT /api/public-links/:id
pub async fn handle_update_link(
    State(state): State<AppState>,
    ActiveBroker(claims): ActiveBroker,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateLinkRequest>,
) -> Result<Json<LinkView>, AppError> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let owner_id = resolve_owner_id(&state.db, &claims).await?;
    let title = title_update(req.title.as_deref());
    let link = sqlx::query_as::<_, PublicLinkRow>(
        r#"
        UPDATE public_links
        SET title = CASE WHEN $1 THEN $2 ELSE title END,
            requires_email = COALESCE($3, requires_email),
            is_active = COALESCE($4, is_active),
            updated_at = now()
        WHERE id = $5 AND broker_id = $6
        RETURNING *
        "#,
    )
    .bind(title.is_some())
    .bind(title.flatten())
    .bind(req.requires_email)
    .bind(req.is_active)
    .bind(id)
    .bind(owner_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Link {id} not found")))?;

    Ok(Json(view(&state, link)))
}

/// `None` leaves the title alone. A blank title clears it, the same way a
/// blank title on create stores none.
fn title_update(title: Option<&str>) -> Option<Option<&str>> {
    title.map(|t| Some(t.trim()).filter(|t| !t.is_empty()))
}

/// DELETE /api/public-links/:id
pub async fn handle_delete_link(
    State(state): State<AppState>,
    AuthBroker(claims): AuthBroker,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let owner_id = resolve_owner_id(&state.db, &claims).await?;
    let deleted = sqlx::query("DELETE FROM public_links WHERE id = $1 AND broker_id = $2")
        .bind(id)
        .bind(owner_id)
        .execute(&state.db)
        .await?
        .rows_affected();

    if deleted == 0 {
        return Err(AppError::NotFound(format!("Link {id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ────────────────────────────────────────────────────────────────────────────
// Public handlers
// ────────────────────────────────────────────────────────────────────────────

/// GET /api/public/:token
pub async fn handle_open_link(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<PublicLinkInfo>, AppError> {
    let link = find_active_by_token(&state.db, &token)
        .await?
        .ok_or_else(|| AppError::NotFound("Link not found".to_string()))?;
    let document = store::find_by_id(&state.db, link.document_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Link not found".to_string()))?;

    analytics::track(
        &state.db,
        NewAnalyticsEvent::new(link.broker_id, AnalyticsEventType::LinkOpened).link(link.id),
    );

    Ok(Json(PublicLinkInfo {
        title: link.title.unwrap_or_else(|| document.title.clone()),
        document_title: document.title,
        requires_email: link.requires_email,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_update() {
        assert_eq!(title_update(None), None);
        assert_eq!(title_update(Some("  ")), Some(None));
        assert_eq!(title_update(Some("")), Some(None));
        assert_eq!(title_update(Some(" Harbor Plaza ")), Some(Some("Harbor Plaza")));
    }

    #[test]
    fn test_share_url() {
        assert_eq!(
            share_url("https://app.om2chat.com/", "abc123"),
            "https://app.om2chat.com/chat/abc123"
        );
        assert_eq!(share_url("http://localhost:3000", "t"), "http://localhost:3000/chat/t");
    }

    #[test]
    fn test_link_view_flattens_row() {
        let now = chrono::Utc::now();
        let row = PublicLinkRow {
            id: Uuid::new_v4(),
            token: "tok".to_string(),
            document_id: Uuid::new_v4(),
            broker_id: Uuid::new_v4(),
            title: None,
            requires_email: true,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let value = serde_json::to_value(LinkView {
            link: row,
            url: "http://x/chat/tok".to_string(),
        })
        .unwrap();
        assert_eq!(value["token"], "tok");
        assert_eq!(value["url"], "http://x/chat/tok");
        assert_eq!(value["requires_email"], true);
    }

    #[test]
    fn test_create_request_defaults() {
        let req: CreateLinkRequest =
            serde_json::from_str(&format!(r#"{{"document_id":"{}"}}"#, Uuid::new_v4())).unwrap();
        assert_eq!(req.requires_email, None);
        assert!(req.validate().is_ok());
    }
}
