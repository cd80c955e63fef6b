use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Failures of the authentication core. Variant granularity is server-side;
/// `client_message` collapses token-verification detail into a generic
/// "log in again" so responses never reveal why a token was rejected.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("Duplicate email")]
    DuplicateEmail,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account banned")]
    AccountBanned,

    #[error("Invalid access token")]
    InvalidToken,

    #[error("Expired access token")]
    ExpiredToken,

    #[error("Not logged in")]
    Unauthenticated,

    #[error("No refresh token presented")]
    NoRefreshToken,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Refresh token reuse detected")]
    SuspiciousActivity,

    #[error("Insufficient role")]
    Forbidden,

    #[error("Invalid federated token")]
    InvalidFederatedToken,

    #[error("Identity provider not configured")]
    IdentityProviderUnavailable,
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::DuplicateEmail => StatusCode::BAD_REQUEST,
            AuthError::InvalidCredentials
            | AuthError::InvalidToken
            | AuthError::ExpiredToken
            | AuthError::Unauthenticated
            | AuthError::NoRefreshToken
            | AuthError::InvalidRefreshToken
            | AuthError::SuspiciousActivity
            | AuthError::InvalidFederatedToken => StatusCode::UNAUTHORIZED,
            AuthError::AccountBanned | AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::IdentityProviderUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn client_message(&self) -> &'static str {
        match self {
            AuthError::DuplicateEmail => "User with this email already exists.",
            AuthError::InvalidCredentials => "Invalid email or password.",
            AuthError::AccountBanned => {
                "Your account has been banned. Please contact support."
            }
            AuthError::InvalidToken | AuthError::ExpiredToken => {
                "Invalid or expired session. Please log in again."
            }
            AuthError::Unauthenticated => "You are not logged in. Please log in to access.",
            AuthError::NoRefreshToken => "Refresh token not found. Please log in again.",
            AuthError::InvalidRefreshToken => {
                "Invalid or expired refresh token. Please log in again."
            }
            AuthError::SuspiciousActivity => {
                "Refresh token reuse detected. All sessions have been revoked. Please log in again."
            }
            AuthError::Forbidden => "You do not have permission to perform this action.",
            AuthError::InvalidFederatedToken => "Federated sign-in could not be verified.",
            AuthError::IdentityProviderUnavailable => "Federated login is not configured.",
        }
    }
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Record not found")]
    NotFound,

    #[error("Duplicate record")]
    Duplicate,
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::Database(DatabaseError::NotFound),
            _ => AppError::Database(DatabaseError::QueryError(err.to_string())),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl AppError {
    /// `(status, body)` pair for the response. Expected client errors carry
    /// `status: "fail"`, everything 5xx carries `status: "error"`; internals
    /// (queries, stack context, secrets) never reach the body.
    pub fn client_payload(&self) -> (StatusCode, serde_json::Value) {
        let status = self.status_code();
        let message = match self {
            AppError::Auth(e) => e.client_message().to_string(),
            AppError::Validation(msg) => msg.clone(),
            AppError::Database(DatabaseError::NotFound) => "Resource not found.".to_string(),
            _ => "Something went wrong. Please try again later.".to_string(),
        };
        let kind = if status.is_server_error() { "error" } else { "fail" };
        (status, json!({ "status": kind, "message": message }))
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, body) = self.client_payload();
        HttpResponse::build(status).json(body)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Auth(e) => e.status_code(),
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Database(DatabaseError::NotFound) => StatusCode::NOT_FOUND,
            AppError::Database(DatabaseError::Duplicate) => StatusCode::BAD_REQUEST,
            AppError::Database(_) | AppError::Config(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_status_codes() {
        let err = AppError::Auth(AuthError::InvalidCredentials);
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);

        let err = AppError::Auth(AuthError::AccountBanned);
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        let err = AppError::Auth(AuthError::DuplicateEmail);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err = AppError::Auth(AuthError::SuspiciousActivity);
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);

        let err = AppError::Auth(AuthError::IdentityProviderUnavailable);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_client_payload_shape() {
        let (status, body) = AppError::Auth(AuthError::AccountBanned).client_payload();
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["status"], "fail");
        assert_eq!(
            body["message"],
            "Your account has been banned. Please contact support."
        );

        let (status, body) = AppError::Internal("pool exhausted".into()).client_payload();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "error");
        // Internal detail must not leak to the client.
        assert_eq!(body["message"], "Something went wrong. Please try again later.");
    }

    #[test]
    fn test_token_failures_are_generic_to_clients() {
        assert_eq!(
            AuthError::InvalidToken.client_message(),
            AuthError::ExpiredToken.client_message()
        );
    }

    #[test]
    fn test_sqlx_error_conversion() {
        let app_err: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(
            app_err,
            AppError::Database(DatabaseError::NotFound)
        ));
    }
}
