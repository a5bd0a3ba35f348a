pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};

use crate::analytics::handlers as analytics;
use crate::auth::handlers as auth;
use crate::billing::handlers as billing;
use crate::chat::handlers as chat;
use crate::documents::handlers as documents;
use crate::public::{chat as public_chat, links, sessions};
use crate::rate_limit::rate_limit_public;
use crate::retention;
use crate::state::AppState;

/// Room for multipart framing and the text fields around the file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    let client_ip_source = state.config.client_ip_source.clone();
    let upload_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD;

    // Unauthenticated client surface, rate limited per IP
    let public = Router::new()
        .route("/api/public/:token", get(links::handle_open_link))
        .route("/api/public/:token/session", post(sessions::handle_capture_email))
        .route("/api/public-chat", post(public_chat::handle_public_chat))
        .route_layer(from_fn_with_state(state.clone(), rate_limit_public));

    Router::new()
        .route("/health", get(health::health_handler))
        // Auth
        .route("/api/auth/register", post(auth::handle_register))
        .route("/api/auth/login", post(auth::handle_login))
        .route("/api/auth/forgot-password", post(auth::handle_forgot_password))
        .route("/api/auth/reset-password", post(auth::handle_reset_password))
        .route("/api/me", get(auth::handle_get_me).put(auth::handle_update_me))
        // Documents
        .route(
            "/api/process-document",
            post(documents::handle_process_document).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/documents", get(documents::handle_list_documents))
        .route("/api/documents/:id", delete(documents::handle_delete_document))
        // Chat
        .route("/api/chat", post(chat::handle_chat))
        // Public links (broker side)
        .route(
            "/api/public-links",
            get(links::handle_list_links).post(links::handle_create_link),
        )
        .route(
            "/api/public-links/:id",
            get(links::handle_get_link)
                .put(links::handle_update_link)
                .delete(links::handle_delete_link),
        )
        // Analytics
        .route("/api/analytics", get(analytics::handle_summary))
        // Billing
        .route(
            "/api/stripe/cancel-subscription",
            post(billing::handle_cancel_subscription),
        )
        .route("/api/stripe/sync", post(billing::handle_sync_subscription))
        // Cron
        .route("/api/cron/retention", post(retention::handle_retention))
        .merge(public)
        .layer(client_ip_source.into_extension())
        .with_state(state)
}
