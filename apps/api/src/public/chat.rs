use std::net::IpAddr;

use axum::{extract::State, response::Response, Json};
use axum_client_ip::SecureClientIp;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use validator::Validate;

use crate::analytics::{self, NewAnalyticsEvent};
use crate::chat::history::{load_recent, save_exchange, ChatScope, HISTORY_LIMIT};
use crate::chat::prompts::compose_messages;
use crate::chat::retrieval::document_prompt;
use crate::chat::sse::relay;
use crate::documents::store;
use crate::errors::AppError;
use crate::models::analytics::AnalyticsEventType;
use crate::public::links::find_active_by_token;
use crate::public::sessions::{authorize_chat, find_session, record_activity};
use crate::rate_limit::{enforce, PUBLIC_CHAT_LIMIT};
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct PublicChatRequest {
    #[validate(length(min = 1, max = 64))]
    pub token: String,
    pub session_token: Option<String>,
    #[validate(length(min = 1, max = 2000))]
    pub message: String,
}

/// Rate-limit keys for a public chat request: always the client IP, plus
/// the session token when the client sent one.
fn rate_limit_keys(ip: IpAddr, session_token: Option<&str>) -> Vec<String> {
    let mut keys = vec![format!("public-chat:ip:{ip}")];
    if let Some(token) = session_token.filter(|t| !t.is_empty()) {
        keys.push(format!("public-chat:session:{token}"));
    }
    keys
}

/// POST /api/public-chat
///
/// Unauthenticated chat through a public link. Everything written on the
/// client's behalf (messages, session counters, analytics) is fire-and-forget.
pub async fn handle_public_chat(
    State(state): State<AppState>,
    SecureClientIp(ip): SecureClientIp,
    Json(req): Json<PublicChatRequest>,
) -> Result<Response, AppError> {
    for key in rate_limit_keys(ip, req.session_token.as_deref()) {
        enforce(state.rate_limiter.as_ref(), &key, PUBLIC_CHAT_LIMIT).await?;
    }

    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    let question = req.message.trim().to_string();
    if question.is_empty() {
        return Err(AppError::Validation("message must not be empty".to_string()));
    }

    let link = find_active_by_token(&state.db, &req.token)
        .await?
        .ok_or_else(|| AppError::NotFound("Link not found".to_string()))?;

    let session = match req.session_token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => find_session(&state.db, link.id, token).await?,
        None => None,
    };
    authorize_chat(&link, session.as_ref())?;

    let document = store::find_by_id(&state.db, link.document_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Link not found".to_string()))?;

    let session_id = session.as_ref().map(|s| s.id);
    let scope = ChatScope::public(link.id, link.broker_id, document.id, session_id);
    let history = match session_id {
        Some(_) => load_recent(&state.db, &scope, HISTORY_LIMIT).await?,
        None => Vec::new(),
    };

    let system = document_prompt(&state, &document, &question).await?;
    let messages = compose_messages(system, history, &question);
    let upstream = match state.llm.stream_chat(&messages).await {
        Ok(upstream) => upstream,
        Err(e) => {
            analytics::log_error(
                &state.db,
                "public-chat",
                e.to_string(),
                json!({ "public_link_id": link.id }),
            );
            return Err(e.into());
        }
    };

    if let Some(session_id) = session_id {
        record_activity(&state.db, session_id);
    }
    analytics::track(
        &state.db,
        NewAnalyticsEvent::new(link.broker_id, AnalyticsEventType::ChatMessage)
            .link(link.id)
            .session(session_id)
            .data(json!({ "message_length": question.chars().count() })),
    );
    info!("Streaming public chat on link {}", link.id);

    let pool = state.db.clone();
    Ok(relay(upstream.bytes_stream(), move |answer| async move {
        tokio::spawn(async move {
            if let Err(e) = save_exchange(&pool, &scope, &question, &answer).await {
                warn!("Failed to save public chat {}: {e}", scope.chat_id);
            }
        });
    }))
}
