//! Mapping of upstream wire dialects to endpoint paths and methods.
//!
//! This table is the only place the router hardcodes the URL layout of the
//! supported upstream API families. Everything else asks the dispatcher.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::error::RouterError;

/// Wire dialect spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiType {
    OpenAI,
    Vllm,
    Ollama,
    LmStudio,
    /// Endpoints served by the router itself; no upstream dialect.
    Builtin,
}

/// All recognised api-type tags, in the order they are documented.
pub const API_TYPES: [ApiType; 5] = [
    ApiType::Builtin,
    ApiType::OpenAI,
    ApiType::Ollama,
    ApiType::LmStudio,
    ApiType::Vllm,
];

impl ApiType {
    /// Parse a tag such as `"openai"` or `"vllm"` (case-insensitive).
    pub fn parse(tag: &str) -> Result<Self, RouterError> {
        match tag.trim().to_lowercase().as_str() {
            "openai" => Ok(ApiType::OpenAI),
            "vllm" => Ok(ApiType::Vllm),
            "ollama" => Ok(ApiType::Ollama),
            "lmstudio" => Ok(ApiType::LmStudio),
            "builtin" => Ok(ApiType::Builtin),
            other => Err(RouterError::UnknownApiType(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiType::OpenAI => "openai",
            ApiType::Vllm => "vllm",
            ApiType::Ollama => "ollama",
            ApiType::LmStudio => "lmstudio",
            ApiType::Builtin => "builtin",
        }
    }

    /// True when the upstream streams newline-delimited JSON instead of
    /// server-sent events.
    pub fn streams_ndjson(&self) -> bool {
        matches!(self, ApiType::Ollama)
    }
}

impl fmt::Display for ApiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Endpoint paths and HTTP methods for one upstream dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiRoutes {
    pub chat_path: &'static str,
    pub chat_method: &'static str,
    pub completions_path: &'static str,
    pub completions_method: &'static str,
    pub embeddings_path: &'static str,
    /// Responses API path, for dialects that expose one.
    pub responses_path: Option<&'static str>,
}

/// Resolve the route table for an api type.
///
/// `Builtin` has no upstream surface and yields `UnknownApiType`; callers
/// must not compose upstream URLs for builtin providers.
pub fn routes_for(api_type: ApiType) -> Result<ApiRoutes, RouterError> {
    match api_type {
        ApiType::OpenAI | ApiType::Vllm => Ok(ApiRoutes {
            chat_path: "/v1/chat/completions",
            chat_method: "POST",
            completions_path: "/v1/chat/completions",
            completions_method: "POST",
            embeddings_path: "/v1/embeddings",
            responses_path: Some("/v1/responses"),
        }),
        ApiType::Ollama => Ok(ApiRoutes {
            chat_path: "/api/chat",
            chat_method: "POST",
            completions_path: "/api/chat",
            completions_method: "POST",
            embeddings_path: "/api/embed",
            responses_path: None,
        }),
        ApiType::LmStudio => Ok(ApiRoutes {
            chat_path: "/api/v0/chat/completions",
            chat_method: "POST",
            completions_path: "/api/v0/chat/completions",
            completions_method: "POST",
            embeddings_path: "/api/v0/embeddings",
            responses_path: None,
        }),
        ApiType::Builtin => Err(RouterError::UnknownApiType("builtin".to_string())),
    }
}

/// Compose the full upstream chat URL for a provider host.
pub fn chat_url(api_host: &str, api_type: ApiType) -> Result<String, RouterError> {
    let routes = routes_for(api_type)?;
    Ok(format!("{}{}", api_host.trim_end_matches('/'), routes.chat_path))
}

/// Compose the full upstream embeddings URL for a provider host.
pub fn embeddings_url(api_host: &str, api_type: ApiType) -> Result<String, RouterError> {
    let routes = routes_for(api_type)?;
    Ok(format!(
        "{}{}",
        api_host.trim_end_matches('/'),
        routes.embeddings_path
    ))
}

/// Compose the full upstream Responses API URL for a provider host.
pub fn responses_url(api_host: &str, api_type: ApiType) -> Result<String, RouterError> {
    let routes = routes_for(api_type)?;
    let path = routes
        .responses_path
        .ok_or_else(|| RouterError::ApiTypeMismatch(api_type.to_string()))?;
    Ok(format!("{}{}", api_host.trim_end_matches('/'), path))
}
