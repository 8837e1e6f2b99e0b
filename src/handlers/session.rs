use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;

use crate::{
    error::{Result, SessionError, StoreError},
    models::session::Session,
    state::AppState,
};

/// Longest accepted username.
const MAX_USERNAME_LENGTH: usize = 64;

/// Authentication state kept inside the encrypted session.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PortalState {
    /// 1 after the first factor, 2 after the second.
    pub authentication_level: u8,
    /// Whether the cookie outlives the browser session.
    pub remember_me: bool,
}

impl PortalState {
    /// The cookie expiration matching this state.
    fn expiration(&self) -> Duration {
        if self.remember_me {
            Duration::zero()
        } else {
            Duration::seconds(-1)
        }
    }
}

/// The request payload for creating a session.
#[derive(Deserialize, Debug)]
pub struct CreateSessionRequest {
    pub username: String,
    #[serde(default)]
    pub remember_me: bool,
}

/// The response payload describing a session.
#[derive(Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub public_id: String,
    pub username: Option<String>,
    pub authentication_level: u8,
    pub remember_me: bool,
}

impl From<&Session> for SessionResponse {
    fn from(session: &Session) -> Self {
        let state: PortalState = session.state().unwrap_or_default();
        Self {
            public_id: session.public_id.clone(),
            username: session.username.clone(),
            authentication_level: state.authentication_level,
            remember_me: state.remember_me,
        }
    }
}

/// One entry of the device list.
#[derive(Serialize, Deserialize, Debug)]
pub struct DeviceResponse {
    pub public_id: String,
    pub expires_at: DateTime<Utc>,
    /// Whether this is the session making the request.
    pub current: bool,
}

/// A generic status payload.
#[derive(Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

/// Creates a session after the first factor.
///
/// Any session the request already carries is destroyed first so the new
/// one never inherits its ID.
#[axum::debug_handler]
pub async fn create(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<Response> {
    let username = payload.username.trim();
    if username.is_empty() || username.len() > MAX_USERNAME_LENGTH {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(MessageResponse {
                success: false,
                message: "Invalid username".to_string(),
            }),
        )
            .into_response());
    }

    match state.sessions.load(&cookies).await? {
        Some(previous) => state.sessions.destroy(&cookies, &previous).await?,
        None => state.sessions.delete_cookie(&cookies),
    }

    let portal = PortalState {
        authentication_level: 1,
        remember_me: payload.remember_me,
    };

    let mut session = Session::new(Some(username.to_string()));
    session.put_state(&portal)?;
    state
        .sessions
        .save_with_expiration(&cookies, &mut session, portal.expiration())
        .await?;

    tracing::info!("✅ Session created for {}", username);

    Ok((StatusCode::CREATED, Json(SessionResponse::from(&session))).into_response())
}

/// Returns the current session.
pub async fn current(Extension(session): Extension<Session>) -> Json<SessionResponse> {
    Json(SessionResponse::from(&session))
}

/// Records a completed second factor and moves the session to a new ID.
pub async fn elevate(
    State(state): State<AppState>,
    cookies: Cookies,
    Extension(mut session): Extension<Session>,
) -> Result<Json<SessionResponse>> {
    let mut portal: PortalState = session.state().unwrap_or_default();
    portal.authentication_level = 2;
    session.put_state(&portal)?;

    state
        .sessions
        .regenerate(&cookies, &mut session, portal.expiration())
        .await?;

    tracing::info!("✅ Session {} elevated", session.public_id);

    Ok(Json(SessionResponse::from(&session)))
}

/// Destroys the current session.
pub async fn logout(
    State(state): State<AppState>,
    cookies: Cookies,
    Extension(session): Extension<Session>,
) -> Result<Json<MessageResponse>> {
    state.sessions.destroy(&cookies, &session).await?;

    Ok(Json(MessageResponse {
        success: true,
        message: "Logged out".to_string(),
    }))
}

/// Lists the live sessions of the current user.
pub async fn list(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<Vec<DeviceResponse>>> {
    let Some(username) = &session.username else {
        return Ok(Json(Vec::new()));
    };

    let current = state.sessions.private_id(&session.id);
    let devices = state
        .sessions
        .sessions_by_username(username)
        .await?
        .into_iter()
        .map(|keys| DeviceResponse {
            current: keys.private_id == current,
            public_id: keys.public_id,
            expires_at: keys.expires_at,
        })
        .collect();

    Ok(Json(devices))
}

/// Revokes one of the current user's sessions.
pub async fn revoke(
    State(state): State<AppState>,
    cookies: Cookies,
    Extension(session): Extension<Session>,
    Path(public_id): Path<String>,
) -> Result<StatusCode> {
    let username = session.username.as_deref().ok_or(SessionError::InvalidSession)?;

    let keys = state
        .sessions
        .sessions_by_username(username)
        .await?
        .into_iter()
        .find(|keys| keys.public_id == public_id)
        .ok_or(SessionError::Store(StoreError::NotFound))?;

    state.sessions.destroy_keys(&keys).await?;
    if keys.public_id == session.public_id {
        state.sessions.delete_cookie(&cookies);
    }

    tracing::info!("✅ Session {} revoked by {}", public_id, username);

    Ok(StatusCode::NO_CONTENT)
}
