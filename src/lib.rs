pub mod config;
pub mod error;
pub mod state;

pub mod crypto {
    pub mod aes;
    pub mod hmac;
    pub mod random;
}

pub mod models {
    pub mod session;
}

pub mod session {
    pub mod codec;
    pub mod cookie;
    pub mod gc;
    pub mod provider;
}

pub mod store;

pub mod handlers {
    pub mod session;
}

pub mod middleware_layer {
    pub mod auth;
}

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
};
use tower_cookies::CookieManagerLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use state::AppState;

/// Builds the portal router.
///
/// # Arguments
///
/// * `state` - The application state.
///
/// # Returns
///
/// A `Router` with every session route and the cookie and trace layers.
pub fn app(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/session", post(handlers::session::create))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/session", get(handlers::session::current))
        .route("/api/session/elevate", post(handlers::session::elevate))
        .route("/api/session/logout", post(handlers::session::logout))
        .route("/api/sessions", get(handlers::session::list))
        .route("/api/sessions/{public_id}", delete(handlers::session::revoke))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::require_session,
        ))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default())
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(CookieManagerLayer::new())
}
