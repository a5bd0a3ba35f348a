use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DocumentMetadataRow {
    pub id: Uuid,
    pub broker_id: Uuid,
    pub title: String,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Listing row: metadata plus how many chunks were stored for it.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DocumentSummaryRow {
    pub id: Uuid,
    pub broker_id: Uuid,
    pub title: String,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub chunk_count: i64,
}

/// A row returned by the `match_documents` function.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MatchedChunkRow {
    pub id: i64,
    pub file_id: Uuid,
    pub content: String,
    pub chunk_index: i32,
    pub similarity: f64,
}
