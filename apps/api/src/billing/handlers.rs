use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::AuthBroker;
use crate::billing::stripe::{StripeClient, StripeError};
use crate::errors::AppError;
use crate::models::broker::{BrokerRow, SubscriptionStatus};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub status: SubscriptionStatus,
    pub deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub status: SubscriptionStatus,
    /// Session token carrying the refreshed subscription status.
    pub access_token: String,
}

impl From<StripeError> for AppError {
    fn from(e: StripeError) -> Self {
        AppError::Upstream(e.to_string())
    }
}

/// Statements run after cancellation, in order. Each runs on its own; a
/// failure stops the sequence but keeps earlier deletes.
const ACCOUNT_CLEANUP: &[(&str, &str)] = &[
    (
        "document chunks",
        "DELETE FROM documents WHERE file_id IN (SELECT id FROM document_metadata WHERE broker_id = $1)",
    ),
    (
        "chat histories",
        "DELETE FROM chat_histories WHERE broker_id = $1 \
         OR document_id IN (SELECT id FROM document_metadata WHERE broker_id = $1)",
    ),
    (
        "client sessions",
        "DELETE FROM client_sessions WHERE public_link_id IN (SELECT id FROM public_links WHERE broker_id = $1)",
    ),
    ("public links", "DELETE FROM public_links WHERE broker_id = $1"),
    ("analytics", "DELETE FROM analytics WHERE broker_id = $1"),
    ("documents", "DELETE FROM document_metadata WHERE broker_id = $1"),
    ("broker", "DELETE FROM brokers WHERE id = $1"),
];

/// POST /api/stripe/cancel-subscription
///
/// Cancels the broker's Stripe subscription and then deletes all of the
/// broker's data, including the broker row.
pub async fn handle_cancel_subscription(
    State(state): State<AppState>,
    AuthBroker(claims): AuthBroker,
) -> Result<Json<CancelResponse>, AppError> {
    if claims.is_team_member {
        return Err(AppError::Forbidden(
            "Only the team admin can cancel the subscription".to_string(),
        ));
    }

    let broker = load_broker(&state.db, claims.sub).await?;
    let status = broker
        .status()
        .after_event("customer.subscription.deleted", None);

    let payload = match broker.stripe_subscription_id.as_deref() {
        Some(subscription_id) => {
            let subscription = stripe_client(&state)?
                .cancel_subscription(subscription_id)
                .await?;
            json!({ "subscription_id": subscription.id, "stripe_status": subscription.status })
        }
        None => json!({ "subscription_id": null }),
    };

    record_event(&state.db, broker.id, "customer.subscription.deleted", &payload).await;
    delete_account_data(&state.db, broker.id).await?;

    info!("Broker {} cancelled and their data was deleted", broker.id);
    Ok(Json(CancelResponse {
        status,
        deleted: true,
    }))
}

/// POST /api/stripe/sync
///
/// Pulls the current subscription from Stripe and applies its status.
pub async fn handle_sync_subscription(
    State(state): State<AppState>,
    AuthBroker(claims): AuthBroker,
) -> Result<Json<SyncResponse>, AppError> {
    let broker = load_broker(&state.db, claims.sub).await?;
    let subscription_id = broker
        .stripe_subscription_id
        .as_deref()
        .ok_or_else(|| AppError::NotFound("No Stripe subscription on file".to_string()))?;

    let subscription = stripe_client(&state)?
        .get_subscription(subscription_id)
        .await?;
    let status = broker
        .status()
        .after_event("customer.subscription.updated", Some(&subscription.status));

    let updated = sqlx::query_as::<_, BrokerRow>(
        r#"
        UPDATE brokers
        SET subscription_status = $1,
            stripe_customer_id = COALESCE($2, stripe_customer_id),
            updated_at = now()
        WHERE id = $3
        RETURNING *
        "#,
    )
    .bind(status.as_str())
    .bind(subscription.customer.as_deref())
    .bind(broker.id)
    .fetch_one(&state.db)
    .await?;

    record_event(
        &state.db,
        broker.id,
        "customer.subscription.updated",
        &json!({ "subscription_id": subscription.id, "stripe_status": subscription.status }),
    )
    .await;

    let access_token = state.jwt.generate_token(&updated)?;
    Ok(Json(SyncResponse {
        status,
        access_token,
    }))
}

fn stripe_client(state: &AppState) -> Result<&StripeClient, AppError> {
    state
        .stripe
        .as_ref()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("STRIPE_SECRET_KEY is not configured")))
}

async fn load_broker(pool: &PgPool, id: Uuid) -> Result<BrokerRow, AppError> {
    sqlx::query_as::<_, BrokerRow>("SELECT * FROM brokers WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Broker not found".to_string()))
}

async fn record_event(pool: &PgPool, broker_id: Uuid, event_type: &str, payload: &serde_json::Value) {
    let result = sqlx::query(
        "INSERT INTO subscription_events (broker_id, event_type, payload) VALUES ($1, $2, $3)",
    )
    .bind(broker_id)
    .bind(event_type)
    .bind(payload)
    .execute(pool)
    .await;
    if let Err(e) = result {
        warn!("Failed to record subscription event {event_type} for broker {broker_id}: {e}");
    }
}

async fn delete_account_data(pool: &PgPool, broker_id: Uuid) -> Result<(), AppError> {
    for (label, sql) in ACCOUNT_CLEANUP {
        let deleted = sqlx::query(sql)
            .bind(broker_id)
            .execute(pool)
            .await?
            .rows_affected();
        info!("Deleted {deleted} {label} for broker {broker_id}");
    }
    Ok(())
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
    use crate::auth::jwt::test_support::broker;

    #[test]
    fn test_cleanup_removes_broker_last() {
        let (label, sql) = ACCOUNT_CLEANUP[ACCOUNT_CLEANUP.len() - 1];
        assert_eq!(label, "broker");
        assert!(sql.starts_with("DELETE FROM brokers"));
        assert!(ACCOUNT_CLEANUP[0].1.starts_with("DELETE FROM documents"));
    }

    #[tokio::test]
    async fn test_team_member_cannot_cancel() {
        let state = AppState::for_tests();
        let mut member = broker("active", None);
        member.team_id = Some(Uuid::new_v4());
        member.is_team_member = true;
        let token = state.jwt.generate_token(&member).unwrap();

        let app = Router::new()
            .route("/api/stripe/cancel-subscription", post(handle_cancel_subscription))
            .with_state(state);
        let request = Request::builder()
            .method("POST")
            .uri("/api/stripe/cancel-subscription")
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
