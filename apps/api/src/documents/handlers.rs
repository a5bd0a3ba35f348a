use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::{header::CONTENT_LENGTH, HeaderMap, StatusCode},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::analytics::{self, NewAnalyticsEvent};
use crate::auth::{ActiveBroker, AuthBroker};
use crate::documents::chunker::chunk_text;
use crate::documents::ingest::{ingest_chunks, EmbeddingSink, IngestReport};
use crate::documents::pdf::{extract_text, looks_like_pdf, ExtractError};
use crate::documents::store;
use crate::errors::AppError;
use crate::models::analytics::AnalyticsEventType;
use crate::models::document::DocumentSummaryRow;
use crate::rate_limit::{enforce, tier_limits};
use crate::state::AppState;
use crate::teams::{resolve_owner_id, visible_owner_ids};

/// Fields read from the upload form.
#[derive(Default)]
struct UploadForm {
    file: Option<Bytes>,
    file_name: Option<String>,
    content_type: Option<String>,
    title: Option<String>,
    document_id: Option<String>,
}

#[derive(Serialize)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentSummaryRow>,
}

/// POST /api/process-document
///
/// Multipart form with either a `file` (PDF) or the `document_id` of an
/// existing document to re-chunk and re-embed from its stored chunk text. An
/// optional `title` names a new upload.
///
/// An oversized declared length is rejected before the billing lookup.
pub async fn handle_process_document(
    State(state): State<AppState>,
    AuthBroker(claims): AuthBroker,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<IngestReport>, AppError> {
    let limit = state.config.max_upload_bytes;
    if declared_length(&headers).is_some_and(|len| len > limit) {
        return Err(AppError::PayloadTooLarge { limit });
    }
    let ActiveBroker(claims) = ActiveBroker::authorize(&state, claims).await?;

    let policy = tier_limits(claims.tier).upload;
    enforce(state.rate_limiter.as_ref(), &format!("upload:{}", claims.sub), policy).await?;

    let form = read_form(multipart, limit).await?;

    let (document, text, is_new) = match (form.file, form.document_id.as_deref()) {
        (Some(bytes), _) => {
            validate_pdf(&bytes, form.content_type.as_deref(), form.file_name.as_deref())?;
            let title = document_title(form.title.as_deref(), form.file_name.as_deref());
            let text = extract(bytes.clone()).await?;
            let owner_id = resolve_owner_id(&state.db, &claims).await?;
            let document = store::insert_metadata(&state.db, owner_id, &title, None).await?;
            (document, text, true)
        }
        (None, Some(raw_id)) => {
            let document_id = Uuid::parse_str(raw_id.trim())
                .map_err(|_| AppError::Validation("document_id must be a UUID".to_string()))?;
            let owners = visible_owner_ids(&state.db, &claims).await?;
            let document = store::find_visible(&state.db, document_id, &owners)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Document {document_id} not found")))?;
            let chunks = store::stored_chunks(&state.db, document.id).await?;
            let text = source_text(&chunks).ok_or_else(|| {
                AppError::Validation("Document has no stored text to re-process".to_string())
            })?;
            let cleared = store::clear_chunks(&state.db, document.id).await?;
            info!("Re-processing document {} from {cleared} stored chunks", document.id);
            (document, text, false)
        }
        (None, None) => {
            return Err(AppError::Validation(
                "Either a file or a document_id is required".to_string(),
            ))
        }
    };

    let chunks = chunk_text(&text, state.config.chunk_size);
    let sink = EmbeddingSink {
        pool: &state.db,
        llm: &state.llm,
        title: &document.title,
    };
    let report = ingest_chunks(&sink, document.id, &document.title, &chunks).await;

    if report.failed > 0 {
        analytics::log_error(
            &state.db,
            "process-document",
            format!("{} of {} chunks failed", report.failed, report.total_chunks),
            json!({ "document_id": document.id }),
        );
    }

    analytics::track(
        &state.db,
        NewAnalyticsEvent::new(document.broker_id, AnalyticsEventType::DocumentUploaded).data(
            json!({
                "document_id": document.id,
                "reprocessed": !is_new,
                "chunks": report.total_chunks,
                "failed": report.failed,
            }),
        ),
    );

    Ok(Json(report))
}

/// GET /api/documents
pub async fn handle_list_documents(
    State(state): State<AppState>,
    ActiveBroker(claims): ActiveBroker,
) -> Result<Json<DocumentListResponse>, AppError> {
    let owners = visible_owner_ids(&state.db, &claims).await?;
    let documents = store::list_visible(&state.db, &owners).await?;
    Ok(Json(DocumentListResponse { documents }))
}

/// DELETE /api/documents/:id
pub async fn handle_delete_document(
    State(state): State<AppState>,
    ActiveBroker(claims): ActiveBroker,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let owners = visible_owner_ids(&state.db, &claims).await?;
    store::find_visible(&state.db, id, &owners)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Document {id} not found")))?;

    store::delete_document(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

async fn read_form(mut multipart: Multipart, limit: usize) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        match field.name() {
            Some("file") => {
                form.file_name = field.file_name().map(str::to_string);
                form.content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
                if data.len() > limit {
                    return Err(AppError::PayloadTooLarge { limit });
                }
                form.file = Some(data);
            }
            Some("title") => {
                let value = field.text().await.map_err(|e| multipart_error(e, limit))?;
                form.title = Some(value).filter(|v| !v.trim().is_empty());
            }
            Some("document_id") => {
                let value = field.text().await.map_err(|e| multipart_error(e, limit))?;
                form.document_id = Some(value).filter(|v| !v.trim().is_empty());
            }
            _ => {}
        }
    }

    Ok(form)
}

fn multipart_error(e: MultipartError, limit: usize) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AppError::PayloadTooLarge { limit };
    }
    error!("Invalid multipart upload: {e}");
    AppError::Validation(format!("Invalid multipart data: {e}"))
}

fn validate_pdf(
    bytes: &[u8],
    content_type: Option<&str>,
    file_name: Option<&str>,
) -> Result<(), AppError> {
    let declared_other = content_type
        .is_some_and(|ct| ct != "application/pdf" && ct != "application/octet-stream");
    let named_other = file_name.is_some_and(|n| !n.to_lowercase().ends_with(".pdf"));

    if declared_other || named_other || !looks_like_pdf(bytes) {
        return Err(AppError::Validation("Only PDF files are supported".to_string()));
    }
    Ok(())
}

async fn extract(bytes: Bytes) -> Result<String, AppError> {
    extract_text(bytes).await.map_err(|e| match e {
        ExtractError::NotPdf => AppError::Validation("Only PDF files are supported".to_string()),
        ExtractError::Empty => {
            AppError::Validation("The PDF contains no extractable text".to_string())
        }
        ExtractError::Parse(msg) => {
            AppError::Validation(format!("The PDF could not be read: {msg}"))
        }
    })
}

/// Rebuilds a document's text from its stored chunks.
fn source_text(chunks: &[String]) -> Option<String> {
    let text = chunks
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    Some(text).filter(|t| !t.is_empty())
}

/// Uses the form title, else the file name without its extension.
fn document_title(title: Option<&str>, file_name: Option<&str>) -> String {
    if let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) {
        return title.to_string();
    }
    match file_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => {
            let stem_len = name.len().saturating_sub(4);
            match name.get(stem_len..) {
                Some(ext) if ext.eq_ignore_ascii_case(".pdf") => name[..stem_len].to_string(),
                _ => name.to_string(),
            }
        }
        None => "Untitled document".to_string(),
    }
}
