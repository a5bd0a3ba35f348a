use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PublicLinkRow {
    pub id: Uuid,
    pub token: String,
    pub document_id: Uuid,
    pub broker_id: Uuid,
    pub title: Option<String>,
    pub requires_email: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClientSessionRow {
    pub id: Uuid,
    pub public_link_id: Uuid,
    #[serde(skip_serializing)]
    pub session_token: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub first_activity_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub message_count: i32,
}
