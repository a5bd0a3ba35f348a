use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("File is not a PDF")]
    NotPdf,

    #[error("PDF parsing failed: {0}")]
    Parse(String),

    #[error("PDF contains no extractable text")]
    Empty,
}

/// True when the bytes start with the PDF header.
pub fn looks_like_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_MAGIC)
}

/// Extracts the text layer of a PDF on a blocking thread.
///
/// Parser panics on malformed input are reported as `ExtractError::Parse`.
pub async fn extract_text(bytes: Bytes) -> Result<String, ExtractError> {
    if !looks_like_pdf(&bytes) {
        return Err(ExtractError::NotPdf);
    }

    let size = bytes.len();
    let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
        .await
        .map_err(|e| ExtractError::Parse(format!("parser aborted: {e}")))?
        .map_err(|e| ExtractError::Parse(e.to_string()))?;

    if text.trim().is_empty() {
        return Err(ExtractError::Empty);
    }

    debug!("Extracted {} characters from {} byte PDF", text.len(), size);
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_header() {
        assert!(looks_like_pdf(b"%PDF-1.7\n..."));
        assert!(!looks_like_pdf(b"PK\x03\x04"));
        assert!(!looks_like_pdf(b""));
    }

    #[tokio::test]
    async fn test_rejects_non_pdf_without_parsing() {
        let err = extract_text(Bytes::from_static(b"hello world")).await.unwrap_err();
        assert!(matches!(err, ExtractError::NotPdf));
    }
}
