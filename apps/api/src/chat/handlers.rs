use axum::{extract::State, response::Response, Json};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::auth::ActiveBroker;
use crate::chat::history::{load_recent, save_exchange, ChatScope, HISTORY_LIMIT};
use crate::chat::prompts::{compose_messages, generic_system_prompt};
use crate::chat::retrieval::document_prompt;
use crate::chat::sse::relay;
use crate::documents::store::find_visible;
use crate::errors::AppError;
use crate::rate_limit::{enforce, tier_limits};
use crate::state::AppState;
use crate::teams::visible_owner_ids;

#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    /// A document id for a document chat, any other string for a generic one.
    #[validate(length(min = 1, max = 200))]
    pub id: String,
    #[validate(length(min = 1, max = 4000))]
    pub message: String,
}

/// POST /api/chat
///
/// Streams the assistant answer as UI message events. Both sides of the
/// exchange are saved once the answer is complete.
pub async fn handle_chat(
    State(state): State<AppState>,
    ActiveBroker(claims): ActiveBroker,
    Json(req): Json<ChatRequest>,
) -> Result<Response, AppError> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    let question = req.message.trim().to_string();
    if question.is_empty() {
        return Err(AppError::Validation("message must not be empty".to_string()));
    }

    let policy = tier_limits(claims.tier).chat;
    enforce(state.rate_limiter.as_ref(), &format!("chat:{}", claims.sub), policy).await?;

    let (system, scope) = match Uuid::parse_str(&req.id) {
        Ok(document_id) => {
            let owners = visible_owner_ids(&state.db, &claims).await?;
            let document = find_visible(&state.db, document_id, &owners)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Document {document_id} not found")))?;
            let system = document_prompt(&state, &document, &question).await?;
            (system, ChatScope::broker(&req.id, claims.sub, Some(document.id)))
        }
        Err(_) => (
            generic_system_prompt(),
            ChatScope::broker(&req.id, claims.sub, None),
        ),
    };

    let history = load_recent(&state.db, &scope, HISTORY_LIMIT).await?;
    let messages = compose_messages(system, history, &question);
    let upstream = state.llm.stream_chat(&messages).await?;

    info!(
        "Streaming {} chat {} for broker {}",
        if scope.document_id.is_some() { "document" } else { "generic" },
        scope.chat_id,
        claims.sub
    );

    let pool = state.db.clone();
    Ok(relay(upstream.bytes_stream(), move |answer| async move {
        if let Err(e) = save_exchange(&pool, &scope, &question, &answer).await {
            warn!("Failed to save chat {}: {e}", scope.chat_id);
        }
    }))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        routing::post,
        Router,
    };
    use tower::ServiceExt;

    use super::*;

    fn chat_request(authorization: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("authorization", authorization)
            .header("content-type", "application/json")
            .body(Body::from(r#"{"id":"general","message":"Hello"}"#))
            .unwrap()
    }

    #[tokio::test]
    async fn test_chat_rejects_invalid_session() {
        let app = Router::new()
            .route("/api/chat", post(handle_chat))
            .with_state(AppState::for_tests());

        for authorization in ["Bearer not-a-jwt", "Basic abc"] {
            let response = app.clone().oneshot(chat_request(authorization)).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn test_request_validation() {
        let ok = ChatRequest {
            id: "chat-1".to_string(),
            message: "What is the cap rate?".to_string(),
        };
        assert!(ok.validate().is_ok());
        let empty = ChatRequest {
            id: "chat-1".to_string(),
            message: String::new(),
        };
        assert!(empty.validate().is_err());
    }
}
