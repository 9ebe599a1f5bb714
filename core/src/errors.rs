//! Error taxonomy shared by every Analytical Core component, composed at
//! the API boundary into the structured error envelope of the gateway.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::Validation(_) => 400,
            CoreError::Unauthorized(_) => 401,
            CoreError::Forbidden(_) => 403,
            CoreError::NotFound(_) => 404,
            CoreError::Conflict(_) => 409,
            CoreError::RateLimited { .. } => 429,
            CoreError::UpstreamUnavailable(_) => 502,
            CoreError::IntegrityViolation(_) => 422,
            CoreError::Internal(_) => 500,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation",
            CoreError::Unauthorized(_) => "unauthorized",
            CoreError::Forbidden(_) => "forbidden",
            CoreError::NotFound(_) => "not_found",
            CoreError::Conflict(_) => "conflict",
            CoreError::RateLimited { .. } => "rate_limited",
            CoreError::UpstreamUnavailable(_) => "upstream_unavailable",
            CoreError::IntegrityViolation(_) => "integrity_violation",
            CoreError::Internal(_) => "internal",
        }
    }
}

/// Structured error envelope returned by every API route on failure, per
/// §7's propagation rule.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error_kind: &'static str,
    pub message: String,
    pub code: u16,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&CoreError> for ErrorEnvelope {
    fn from(err: &CoreError) -> Self {
        ErrorEnvelope {
            error_kind: err.kind(),
            message: err.to_string(),
            code: err.status_code(),
            timestamp: chrono::Utc::now(),
            details: None,
        }
    }
}

impl From<storage::StorageError> for CoreError {
    fn from(err: storage::StorageError) -> Self {
        CoreError::Internal(err.to_string())
    }
}

impl From<protocols::ProtocolError> for CoreError {
    fn from(err: protocols::ProtocolError) -> Self {
        CoreError::Validation(err.to_string())
    }
}

impl From<crypto_primitives::CryptoError> for CoreError {
    fn from(err: crypto_primitives::CryptoError) -> Self {
        CoreError::Internal(err.to_string())
    }
}

impl From<ledger_clients::LedgerClientError> for CoreError {
    fn from(err: ledger_clients::LedgerClientError) -> Self {
        CoreError::UpstreamUnavailable(err.to_string())
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let envelope = ErrorEnvelope::from(&self);
        let status = StatusCode::from_u16(envelope.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(envelope)).into_response()
    }
}
