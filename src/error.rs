//! Crate-wide error type and its mapping onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the gateway's request-handling pipeline.
///
/// Each variant names the HTTP status it maps to; see [`GatewayError::status`].
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("malformed request body: {0}")]
    MalformedBody(String),

    #[error("missing model")]
    MissingModel,

    #[error("unknown alias or combo: {0}")]
    UnknownAlias(String),

    #[error("provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("no eligible credential for provider {0}")]
    NoEligibleCredential(String),

    #[error("upstream auth failed: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("client disconnected")]
    ClientDisconnected,

    #[error("upstream connection failed: {0}")]
    BadGateway(String),

    #[error("upstream timed out")]
    Timeout,

    #[error("all combo models exhausted: {0}")]
    ComboExhausted(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] crate::state::StateError),

    #[error("credential error: {0}")]
    Credential(#[from] crate::credentials::CredentialError),

    #[error("executor error: {0}")]
    Executor(#[from] crate::executors::ExecutorError),

    #[error("translate error: {0}")]
    Translate(#[from] crate::translate::TranslateError),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::MalformedBody(_)
            | GatewayError::MissingModel
            | GatewayError::UnknownAlias(_)
            | GatewayError::ProviderNotConfigured(_) => StatusCode::BAD_REQUEST,
            GatewayError::NoEligibleCredential(_) | GatewayError::Auth(_) => {
                StatusCode::UNAUTHORIZED
            }
            GatewayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::QuotaExhausted(_) => StatusCode::PAYMENT_REQUIRED,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::ClientDisconnected => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            GatewayError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::ComboExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Credential(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Executor(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Translate(_) => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
