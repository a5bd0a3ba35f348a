use pgvector::Vector;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::chat::prompts::build_system_prompt;
use crate::errors::AppError;
use crate::models::document::{DocumentMetadataRow, MatchedChunkRow};
use crate::state::AppState;

/// Chunks of `document_id` most similar to `embedding`, best first.
pub async fn retrieve(
    pool: &PgPool,
    embedding: Vec<f32>,
    document_id: Uuid,
    count: i32,
    threshold: f64,
) -> Result<Vec<MatchedChunkRow>, sqlx::Error> {
    sqlx::query_as::<_, MatchedChunkRow>("SELECT * FROM match_documents($1, $2, $3, $4)")
        .bind(Vector::from(embedding))
        .bind(threshold)
        .bind(count)
        .bind(document_id)
        .fetch_all(pool)
        .await
}

/// Embeds `question`, retrieves matching chunks of `document` and builds the
/// system prompt grounded on them.
pub async fn document_prompt(
    state: &AppState,
    document: &DocumentMetadataRow,
    question: &str,
) -> Result<String, AppError> {
    let embedding = state.llm.embed(question).await?;
    let chunks = retrieve(
        &state.db,
        embedding,
        document.id,
        state.config.match_count,
        state.config.match_threshold,
    )
    .await?;

    debug!(
        "Retrieved {} chunks for document {} (best similarity {:?})",
        chunks.len(),
        document.id,
        chunks.first().map(|c| c.similarity)
    );
    Ok(build_system_prompt(document, &chunks))
}
