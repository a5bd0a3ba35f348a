//! Embedding and storage of a document's chunks.
//!
//! Chunks are processed strictly one after another. A chunk whose embedding
//! or insert fails is counted and skipped; the remaining chunks still run.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::documents::store;
use crate::llm_client::LlmClient;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct IngestReport {
    pub document_id: Uuid,
    pub title: String,
    pub total_chunks: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Persists one chunk of a document.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    async fn store_chunk(
        &self,
        document_id: Uuid,
        chunk_index: usize,
        content: &str,
    ) -> anyhow::Result<()>;
}

/// Embeds each chunk with the LLM client and writes it to `documents`.
pub struct EmbeddingSink<'a> {
    pub pool: &'a PgPool,
    pub llm: &'a LlmClient,
    pub title: &'a str,
}

#[async_trait]
impl<'a> ChunkSink for EmbeddingSink<'a> {
    async fn store_chunk(
        &self,
        document_id: Uuid,
        chunk_index: usize,
        content: &str,
    ) -> anyhow::Result<()> {
        let embedding = self.llm.embed(content).await?;
        let index = i32::try_from(chunk_index)?;
        let metadata = json!({
            "title": self.title,
            "chunk_index": index,
            "length": content.chars().count(),
        });
        store::insert_chunk(self.pool, document_id, index, content, embedding, &metadata).await?;
        Ok(())
    }
}

pub async fn ingest_chunks(
    sink: &dyn ChunkSink,
    document_id: Uuid,
    title: &str,
    chunks: &[String],
) -> IngestReport {
    let mut succeeded = 0;
    let mut failed = 0;

    for (index, chunk) in chunks.iter().enumerate() {
        match sink.store_chunk(document_id, index, chunk).await {
            Ok(()) => succeeded += 1,
            Err(e) => {
                warn!("Chunk {index} of document {document_id} failed: {e:#}");
                failed += 1;
            }
        }
    }

    info!(
        "Ingested document {document_id}: {succeeded}/{} chunks stored, {failed} failed",
        chunks.len()
    );

    IngestReport {
        document_id,
        title: title.to_string(),
        total_chunks: chunks.len(),
        succeeded,
        failed,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Records stored chunk indices and fails on the configured ones.
    struct RecordingSink {
        fail_on: Vec<usize>,
        stored: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl ChunkSink for RecordingSink {
        async fn store_chunk(&self, _: Uuid, chunk_index: usize, _: &str) -> anyhow::Result<()> {
            if self.fail_on.contains(&chunk_index) {
                anyhow::bail!("embedding quota exceeded");
            }
            self.stored.lock().unwrap().push(chunk_index);
            Ok(())
        }
    }

    fn chunks(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("Chunk {i}.")).collect()
    }

    #[tokio::test]
    async fn test_failed_chunks_are_counted_and_skipped() {
        let sink = RecordingSink {
            fail_on: vec![1, 3],
            stored: Mutex::new(Vec::new()),
        };
        let id = Uuid::new_v4();
        let report = ingest_chunks(&sink, id, "Offering Memo", &chunks(5)).await;

        assert_eq!(report.total_chunks, 5);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 2);
        assert_eq!(*sink.stored.lock().unwrap(), vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn test_chunks_are_stored_in_order() {
        let sink = RecordingSink {
            fail_on: vec![],
            stored: Mutex::new(Vec::new()),
        };
        let report = ingest_chunks(&sink, Uuid::new_v4(), "OM", &chunks(4)).await;
        assert_eq!(report.failed, 0);
        assert_eq!(*sink.stored.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_empty_document() {
        let sink = RecordingSink {
            fail_on: vec![],
            stored: Mutex::new(Vec::new()),
        };
        let report = ingest_chunks(&sink, Uuid::new_v4(), "Blank", &[]).await;
        assert_eq!(report.total_chunks, 0);
        assert_eq!(report.succeeded, 0);
    }
}
