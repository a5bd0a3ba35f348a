use pgvector::Vector;
use serde_json::Value;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::models::document::{DocumentMetadataRow, DocumentSummaryRow};

pub async fn insert_metadata(
    pool: &PgPool,
    broker_id: Uuid,
    title: &str,
    url: Option<&str>,
) -> Result<DocumentMetadataRow, sqlx::Error> {
    sqlx::query_as::<_, DocumentMetadataRow>(
        "INSERT INTO document_metadata (broker_id, title, url) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(broker_id)
    .bind(title)
    .bind(url)
    .fetch_one(pool)
    .await
}

/// Loads a document if it belongs to one of `owner_ids`.
pub async fn find_visible(
    pool: &PgPool,
    document_id: Uuid,
    owner_ids: &[Uuid],
) -> Result<Option<DocumentMetadataRow>, sqlx::Error> {
    sqlx::query_as::<_, DocumentMetadataRow>(
        "SELECT * FROM document_metadata WHERE id = $1 AND broker_id = ANY($2)",
    )
    .bind(document_id)
    .bind(owner_ids)
    .fetch_optional(pool)
    .await
}

pub async fn find_by_id(
    pool: &PgPool,
    document_id: Uuid,
) -> Result<Option<DocumentMetadataRow>, sqlx::Error> {
    sqlx::query_as::<_, DocumentMetadataRow>("SELECT * FROM document_metadata WHERE id = $1")
        .bind(document_id)
        .fetch_optional(pool)
        .await
}

pub async fn list_visible(
    pool: &PgPool,
    owner_ids: &[Uuid],
) -> Result<Vec<DocumentSummaryRow>, sqlx::Error> {
    sqlx::query_as::<_, DocumentSummaryRow>(
        r#"
        SELECT m.id, m.broker_id, m.title, m.url, m.created_at,
               COUNT(d.id) AS chunk_count
        FROM document_metadata m
        LEFT JOIN documents d ON d.file_id = m.id
        WHERE m.broker_id = ANY($1)
        GROUP BY m.id
        ORDER BY m.created_at DESC
        "#,
    )
    .bind(owner_ids)
    .fetch_all(pool)
    .await
}

pub async fn insert_chunk(
    pool: &PgPool,
    document_id: Uuid,
    chunk_index: i32,
    content: &str,
    embedding: Vec<f32>,
    metadata: &Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO documents (file_id, content, embedding, chunk_index, metadata)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(document_id)
    .bind(content)
    .bind(Vector::from(embedding))
    .bind(chunk_index)
    .bind(metadata)
    .execute(pool)
    .await?;
    Ok(())
}

/// Stored chunk texts of a document in chunk order.
pub async fn stored_chunks(pool: &PgPool, document_id: Uuid) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT content FROM documents WHERE file_id = $1 ORDER BY chunk_index")
        .bind(document_id)
        .fetch_all(pool)
        .await
}

pub async fn clear_chunks(pool: &PgPool, document_id: Uuid) -> Result<u64, sqlx::Error> {
    Ok(sqlx::query("DELETE FROM documents WHERE file_id = $1")
        .bind(document_id)
        .execute(pool)
        .await?
        .rows_affected())
}

/// Deletes a document and everything hanging off it, one table at a time.
///
/// The statements are independent; a failure part-way leaves earlier deletes
/// in place.
pub async fn delete_document(pool: &PgPool, document_id: Uuid) -> Result<(), sqlx::Error> {
    let chunks = clear_chunks(pool, document_id).await?;

    sqlx::query("DELETE FROM chat_histories WHERE document_id = $1")
        .bind(document_id)
        .execute(pool)
        .await?;

    sqlx::query("DELETE FROM public_links WHERE document_id = $1")
        .bind(document_id)
        .execute(pool)
        .await?;

    sqlx::query("DELETE FROM document_metadata WHERE id = $1")
        .bind(document_id)
        .execute(pool)
        .await?;

    info!("Deleted document {document_id} ({chunks} chunks)");
    Ok(())
}
