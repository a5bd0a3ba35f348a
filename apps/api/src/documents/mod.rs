// Document ingestion: PDF text extraction, sentence chunking, embedding and
// storage of chunks, plus listing and deletion of a broker's documents.

pub mod chunker;
pub mod handlers;
pub mod ingest;
pub mod pdf;
pub mod store;
