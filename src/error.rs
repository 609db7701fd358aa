use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

pub type Result<T> = std::result::Result<T, Error>;

/// Verification failures for a presented token. Never retried by this crate;
/// the caller decides what a rejected credential means for the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token expired")]
    Expired,

    #[error("wrong token type for this operation")]
    WrongType,

    #[error("token has been revoked")]
    Revoked,
}

/// Policy decisions that reject a request before it reaches any handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyViolation {
    #[error("suspicious pattern detected: {0}")]
    SuspiciousPattern(String),

    #[error("request body exceeds the configured size limit")]
    OversizedRequest,

    #[error("source address is blocked")]
    BlockedIp,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    Token(#[from] TokenError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("security policy violation: {0}")]
    Policy(#[from] PolicyViolation),

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("authentication required")]
    Unauthenticated,

    #[error("insufficient permissions")]
    Forbidden,

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Stable machine-readable reason code exposed at the HTTP boundary.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Token(TokenError::InvalidSignature) => "INVALID_TOKEN",
            Error::Token(TokenError::Expired) => "TOKEN_EXPIRED",
            Error::Token(TokenError::WrongType) => "WRONG_TOKEN_TYPE",
            Error::Token(TokenError::Revoked) => "TOKEN_REVOKED",
            Error::Validation(_) => "VALIDATION_FAILED",
            Error::Policy(PolicyViolation::SuspiciousPattern(_)) => "SUSPICIOUS_PATTERN",
            Error::Policy(PolicyViolation::OversizedRequest) => "REQUEST_TOO_LARGE",
            Error::Policy(PolicyViolation::BlockedIp) => "IP_BLOCKED",
            Error::RateLimited { .. } => "RATE_LIMITED",
            Error::Unauthenticated => "AUTH_REQUIRED",
            Error::Forbidden => "FORBIDDEN",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::Config(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Token(_) => StatusCode::UNAUTHORIZED,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Policy(PolicyViolation::OversizedRequest) => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Policy(_) => StatusCode::FORBIDDEN,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::Forbidden => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // Internal details stay out of the response body.
            Error::Internal(_) | Error::Config(_) => "internal server error".to_string(),
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": message,
            "code": self.code(),
            "status": status.as_u16()
        }));

        let mut response = (status, body).into_response();
        if let Error::RateLimited { retry_after_secs } = self {
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}
