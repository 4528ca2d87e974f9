//! Upstream HTTP request construction and the buffered call path.
//!
//! Retries are deliberately not performed at this layer; a failed call
//! surfaces as `UpstreamError` and the strategy layer is told about it.

use reqwest::StatusCode;
use serde_json::Value;

use crate::core::error::{Result, RouterError};
use crate::services::chooser::ApiModel;

/// Build the upstream request for a JSON payload, attaching the bearer
/// token when the provider carries one.
pub fn build_upstream_request(
    client: &reqwest::Client,
    method: &str,
    url: &str,
    api_model: &ApiModel,
    payload: &Value,
) -> reqwest::RequestBuilder {
    let mut request = if method == "GET" {
        client.get(url).query(&flatten_query(payload))
    } else {
        client.post(url).json(payload)
    };

    if let Some(token) = &api_model.provider.api_token {
        if !token.is_empty() {
            request = request.bearer_auth(token);
        }
    }

    request
}

fn flatten_query(payload: &Value) -> Vec<(String, String)> {
    match payload {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Execute a buffered upstream call and parse the JSON body.
///
/// Returns the upstream status together with the parsed body. Statuses
/// of 500 and above become `UpstreamError`; 4xx bodies are relayed to the
/// caller under the upstream status (bearer failures included).
pub async fn call_buffered(
    client: &reqwest::Client,
    method: &str,
    url: &str,
    api_model: &ApiModel,
    payload: &Value,
) -> Result<(StatusCode, Value)> {
    let request = build_upstream_request(client, method, url, api_model, payload);

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            RouterError::UpstreamTimeout
        } else {
            RouterError::Request(e)
        }
    })?;

    let status = response.status();
    let body_text = response.text().await.map_err(RouterError::Request)?;
    let body: Value = serde_json::from_str(&body_text).unwrap_or_else(|_| {
        Value::String(body_text.clone())
    });

    if status.is_server_error() {
        return Err(RouterError::UpstreamError {
            status: status.as_u16(),
            body,
        });
    }

    Ok((status, body))
}

/// Extract the assistant message text from an upstream chat response.
///
/// Understands both the OpenAI shape (`choices[0].message.content`) and
/// the Ollama shape (`message.content`).
pub fn assistant_content(response: &Value) -> String {
    if let Some(choices) = response.get("choices").and_then(Value::as_array) {
        if let Some(content) = choices
            .first()
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
        {
            return content.to_string();
        }
    }
    response
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
