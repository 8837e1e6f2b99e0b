use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tower_cookies::Cookies;

use crate::state::AppState;

/// A middleware that requires a valid session to be present.
///
/// The loaded [`Session`](crate::models::session::Session) is inserted
/// into the request extensions for the handlers behind it.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `cookies` - The request cookies.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response` or an error `StatusCode`.
pub async fn require_session(
    State(state): State<AppState>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    tracing::debug!("🔐 Checking session...");

    let session = state
        .sessions
        .load(&cookies)
        .await
        .map_err(|e| {
            tracing::error!("❌ Session lookup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or_else(|| {
            tracing::debug!("No valid session on request");
            StatusCode::UNAUTHORIZED
        })?;

    tracing::debug!("✅ Session {} loaded", session.public_id);

    request.extensions_mut().insert(session);

    Ok(next.run(request).await)
}
