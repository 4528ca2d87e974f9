//! Error types and handling for the LLM router.
//!
//! This module provides a unified error type [`RouterError`] covering the
//! whole request lifecycle and implements the HTTP response mapping. Every
//! surfaced error becomes a JSON body of the form
//! `{"status": false, "error": {"code": ..., "message": ..., "details"?: ...}}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

/// Main error type for the router.
#[derive(Error, Debug)]
pub enum RouterError {
    /// Malformed JSON or an unsupported content type.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A declared required argument is absent or null.
    #[error("Missing required parameter '{0}'")]
    MissingParam(String),

    /// A value failed endpoint-specific validation.
    #[error("Invalid value for '{field}': {reason}")]
    ValidationError { field: String, reason: String },

    /// A guardrail classifier blocked the request or the response.
    #[error("Blocked by guardrail: {0}")]
    GuardrailBlocked(String),

    /// The catalog has no active provider for the model, or all provider
    /// locks are busy.
    #[error("No provider available for model '{0}'")]
    NoProviderAvailable(String),

    /// The coordination store is required by the active strategy but is
    /// unreachable.
    #[error("Coordination store unavailable: {0}")]
    StoreUnavailable(String),

    /// The request deadline expired on the upstream leg.
    #[error("Upstream timeout")]
    UpstreamTimeout,

    /// Upstream returned a server error or a malformed response.
    #[error("Upstream error (status {status})")]
    UpstreamError { status: u16, body: Value },

    /// The endpoint cannot target the selected provider's api type.
    #[error("Endpoint cannot target provider api type '{0}'")]
    ApiTypeMismatch(String),

    /// An unknown `api_type` tag was encountered.
    #[error("Unknown api type '{0}'")]
    UnknownApiType(String),

    /// An internal endpoint invariant is broken (e.g. multi-shot without
    /// an aggregator).
    #[error("Misconfigured endpoint: {0}")]
    MisconfiguredEndpoint(String),

    /// Catalog file could not be loaded or failed validation.
    #[error("Bad catalog: {0}")]
    BadCatalog(String),

    /// Prompt template lookup failed.
    #[error("Prompt '{0}' not found")]
    PromptNotFound(String),

    /// HTTP client errors on the upstream leg.
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Catch-all for internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RouterError {
    /// Machine-readable error code used in the JSON body.
    pub fn code(&self) -> &'static str {
        match self {
            RouterError::BadRequest(_) => "BadRequest",
            RouterError::MissingParam(_) => "MissingParam",
            RouterError::ValidationError { .. } => "ValidationError",
            RouterError::GuardrailBlocked(_) => "GuardrailBlocked",
            RouterError::NoProviderAvailable(_) => "NoProviderAvailable",
            RouterError::StoreUnavailable(_) => "StoreUnavailable",
            RouterError::UpstreamTimeout => "UpstreamTimeout",
            RouterError::UpstreamError { .. } => "UpstreamError",
            RouterError::ApiTypeMismatch(_) => "ApiTypeMismatch",
            RouterError::UnknownApiType(_) => "UnknownApiType",
            RouterError::MisconfiguredEndpoint(_) => "MisconfiguredEndpoint",
            RouterError::BadCatalog(_) => "BadCatalog",
            RouterError::PromptNotFound(_) => "PromptNotFound",
            RouterError::Request(_) => "UpstreamError",
            RouterError::Serialization(_) => "BadRequest",
            RouterError::Internal(_) => "Internal",
        }
    }

    /// HTTP status mapping per the error taxonomy.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RouterError::BadRequest(_)
            | RouterError::MissingParam(_)
            | RouterError::ValidationError { .. }
            | RouterError::Serialization(_) => StatusCode::BAD_REQUEST,
            RouterError::GuardrailBlocked(_) => StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS,
            RouterError::NoProviderAvailable(_) | RouterError::StoreUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            RouterError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            RouterError::UpstreamError { .. } | RouterError::ApiTypeMismatch(_) => {
                StatusCode::BAD_GATEWAY
            }
            RouterError::UnknownApiType(_) => StatusCode::BAD_GATEWAY,
            RouterError::Request(e) => {
                if e.is_timeout() {
                    StatusCode::GATEWAY_TIMEOUT
                } else {
                    StatusCode::BAD_GATEWAY
                }
            }
            RouterError::MisconfiguredEndpoint(_)
            | RouterError::BadCatalog(_)
            | RouterError::PromptNotFound(_)
            | RouterError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Optional structured details attached to the error body.
    fn details(&self) -> Option<Value> {
        match self {
            RouterError::UpstreamError { status, body } => Some(json!({
                "upstream_status": status,
                "upstream_body": body,
            })),
            RouterError::ValidationError { field, .. } => Some(json!({ "field": field })),
            _ => None,
        }
    }
}

impl IntoResponse for RouterError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut error = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let Some(details) = self.details() {
            error["details"] = details;
        }

        let body = Json(json!({
            "status": false,
            "error": error,
        }));

        (status, body).into_response()
    }
}

/// Convenience type alias for Results using [`RouterError`].
pub type Result<T> = std::result::Result<T, RouterError>;
