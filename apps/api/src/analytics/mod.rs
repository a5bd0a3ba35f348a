//! Append-only analytics events and error logging.
//!
//! Both writers are fire-and-forget: the insert runs on its own task and a
//! failure is logged, never returned to the request that triggered it.

pub mod handlers;

use serde_json::Value;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::models::analytics::AnalyticsEventType;

#[derive(Debug, Clone)]
pub struct NewAnalyticsEvent {
    pub broker_id: Uuid,
    pub public_link_id: Option<Uuid>,
    pub client_session_id: Option<Uuid>,
    pub event_type: AnalyticsEventType,
    pub event_data: Value,
}

impl NewAnalyticsEvent {
    pub fn new(broker_id: Uuid, event_type: AnalyticsEventType) -> Self {
        Self {
            broker_id,
            public_link_id: None,
            client_session_id: None,
            event_type,
            event_data: Value::Object(Default::default()),
        }
    }

    pub fn link(mut self, public_link_id: Uuid) -> Self {
        self.public_link_id = Some(public_link_id);
        self
    }

    pub fn session(mut self, client_session_id: Option<Uuid>) -> Self {
        self.client_session_id = client_session_id;
        self
    }

    pub fn data(mut self, event_data: Value) -> Self {
        self.event_data = event_data;
        self
    }
}

pub async fn insert_event(pool: &PgPool, event: &NewAnalyticsEvent) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO analytics (broker_id, public_link_id, client_session_id, event_type, event_data)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(event.broker_id)
    .bind(event.public_link_id)
    .bind(event.client_session_id)
    .bind(event.event_type.as_str())
    .bind(&event.event_data)
    .execute(pool)
    .await?;
    Ok(())
}

/// Records `event` on a background task.
pub fn track(pool: &PgPool, event: NewAnalyticsEvent) {
    let pool = pool.clone();
    tokio::spawn(async move {
        if let Err(e) = insert_event(&pool, &event).await {
            warn!(
                event_type = event.event_type.as_str(),
                "Failed to record analytics event: {e}"
            );
        }
    });
}

/// Writes a row to `error_logs` on a background task.
pub fn log_error(pool: &PgPool, source: &'static str, message: String, context: Value) {
    let pool = pool.clone();
    tokio::spawn(async move {
        let result = sqlx::query("INSERT INTO error_logs (source, message, context) VALUES ($1, $2, $3)")
            .bind(source)
            .bind(&message)
            .bind(&context)
            .execute(&pool)
            .await;
        if let Err(e) = result {
            warn!(source, "Failed to persist error log: {e}");
        }
    });
}
