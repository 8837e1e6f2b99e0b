use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// The session subsystem's error type.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Bad key material or a cipher that could not be built.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sealing or opening a session blob failed.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// A session value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The random source could not supply entropy.
    #[error("Random source error: {0}")]
    Random(#[from] RandomError),

    /// The session store rejected an operation.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// No valid session is attached to the request.
    #[error("Session invalid")]
    InvalidSession,
}

/// Errors raised by a `SessionStore` implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A stored record could not be encoded or decoded.
    #[error("Record serialization error: {0}")]
    Serialization(String),

    /// The record an operation depends on does not exist.
    #[error("Session record not found")]
    NotFound,
}

/// Entropy could not be read from the random source.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct RandomError(pub String);

/// A `Result` type that uses `SessionError` as the error type.
pub type Result<T> = std::result::Result<T, SessionError>;

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            SessionError::Crypto(ref msg) | SessionError::Serialization(ref msg) => {
                tracing::debug!("Session payload rejected: {}", msg);
                (StatusCode::UNAUTHORIZED, "Session invalid")
            }

            SessionError::InvalidSession => {
                tracing::debug!("No valid session");
                (StatusCode::UNAUTHORIZED, "Session invalid")
            }

            SessionError::Store(StoreError::NotFound) => {
                tracing::debug!("Session record not found");
                (StatusCode::NOT_FOUND, "Session not found")
            }

            SessionError::Store(ref e) => {
                tracing::error!("Session store error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Session store error")
            }

            SessionError::Random(ref e) => {
                tracing::error!("Random source error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }

            SessionError::Config(ref msg) => {
                tracing::error!("Configuration error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": message
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string());

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_errors_do_not_leak_detail() {
        let response = SessionError::Crypto("aead::Error at offset 12".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = SessionError::InvalidSession.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_store_errors_map_to_server_errors() {
        let response = SessionError::Store(StoreError::Serialization("bad".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = SessionError::Store(StoreError::NotFound).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
