use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_client_ip::SecureClientIp;

use super::{enforce, PUBLIC_PAGE_LIMIT};
use crate::state::AppState;

/// Rate limits unauthenticated public endpoints by client IP.
///
/// The address comes from the configured [`axum_client_ip::SecureClientIpSource`],
/// so headers a client sets itself are ignored unless a proxy is trusted.
pub async fn rate_limit_public(
    State(state): State<AppState>,
    SecureClientIp(ip): SecureClientIp,
    request: Request,
    next: Next,
) -> Response {
    let key = format!("public:{ip}");

    match enforce(state.rate_limiter.as_ref(), &key, PUBLIC_PAGE_LIMIT).await {
        Ok(result) => {
            let mut response = next.run(request).await;
            result.apply_headers(response.headers_mut());
            response
        }
        Err(error) => error.into_response(),
    }
}
