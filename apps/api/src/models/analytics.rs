use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Allowed values of `analytics.event_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsEventType {
    LinkOpened,
    EmailCaptured,
    ChatMessage,
    DocumentUploaded,
    LinkCreated,
}

impl AnalyticsEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyticsEventType::LinkOpened => "link_opened",
            AnalyticsEventType::EmailCaptured => "email_captured",
            AnalyticsEventType::ChatMessage => "chat_message",
            AnalyticsEventType::DocumentUploaded => "document_uploaded",
            AnalyticsEventType::LinkCreated => "link_created",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AnalyticsEventRow {
    pub id: i64,
    pub broker_id: Uuid,
    pub public_link_id: Option<Uuid>,
    pub client_session_id: Option<Uuid>,
    pub event_type: String,
    pub event_data: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct EventCountRow {
    pub event_type: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LinkActivityRow {
    pub public_link_id: Uuid,
    pub title: Option<String>,
    pub opens: i64,
    pub messages: i64,
    pub emails_captured: i64,
}
