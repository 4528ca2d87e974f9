//! Endpoint auto-registration.
//!
//! Collects every endpoint descriptor, validates its flags and builds the
//! axum router, applying the configured path prefix to endpoints that do
//! not opt out.

use anyhow::{bail, Result};
use axum::body::Bytes;
use axum::extract::Query;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::builtin::builtin_endpoints;
use crate::api::endpoint::{dispatch, EndpointSpec, Envelope};
use crate::api::passthrough::passthrough_endpoints;
use crate::api::state::AppState;
use crate::core::error::RouterError;
use crate::core::metrics::render_metrics;

/// Every endpoint the router serves, in registration order.
pub fn all_endpoints() -> Vec<&'static EndpointSpec> {
    let mut endpoints = passthrough_endpoints();
    endpoints.extend(builtin_endpoints());
    endpoints
}

/// Final URL for an endpoint under the configured prefix.
pub fn route_path(prefix: &str, spec: &EndpointSpec) -> String {
    if spec.dont_add_api_prefix {
        if spec.path.starts_with('/') {
            spec.path.to_string()
        } else {
            format!("/{}", spec.path)
        }
    } else {
        format!("{}/{}", prefix, spec.path.trim_start_matches('/'))
    }
}

/// Reject descriptors that break the dispatcher's invariants. Runs once
/// at startup; a bad descriptor must never reach traffic.
fn validate_spec(spec: &EndpointSpec) -> Result<()> {
    if spec.api_types.is_empty() {
        bail!("endpoint '{}' declares no api types", spec.path);
    }
    if !matches!(spec.method, "GET" | "POST") {
        bail!("endpoint '{}' has unsupported method {}", spec.path, spec.method);
    }
    if spec.call_for_each_user_msg && spec.direct_return {
        bail!(
            "endpoint '{}' combines call_for_each_user_msg with direct_return",
            spec.path
        );
    }
    if spec.call_for_each_user_msg && spec.aggregate.is_none() {
        bail!("multi-shot endpoint '{}' has no aggregator", spec.path);
    }
    Ok(())
}

async fn handle_post(
    spec: &'static EndpointSpec,
    state: Arc<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let envelope = match parse_json_body(&headers, &body) {
        Ok(envelope) => envelope,
        Err(err) => return err.into_response(),
    };
    match dispatch(spec, state, envelope).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn handle_get(
    spec: &'static EndpointSpec,
    state: Arc<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut envelope = Envelope::new();
    for (key, value) in params {
        envelope.insert(key, Value::String(value));
    }
    match dispatch(spec, state, envelope).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

/// Parse a POST body into the request envelope.
///
/// An explicit non-JSON content type is rejected; an empty body is an
/// empty envelope (argument validation decides whether that suffices).
fn parse_json_body(headers: &HeaderMap, body: &Bytes) -> Result<Envelope, RouterError> {
    if let Some(content_type) = headers.get(header::CONTENT_TYPE) {
        let content_type = content_type.to_str().unwrap_or_default();
        if !content_type.trim_start().starts_with("application/json") {
            return Err(RouterError::BadRequest(format!(
                "unsupported content type '{}'",
                content_type
            )));
        }
    }

    if body.is_empty() {
        return Ok(Envelope::new());
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(RouterError::BadRequest(
            "request body must be a JSON object".to_string(),
        )),
        Err(err) => Err(RouterError::BadRequest(format!("malformed JSON: {}", err))),
    }
}

async fn ping_handler() -> Json<&'static str> {
    Json("pong")
}

async fn home_handler() -> &'static str {
    "Ollama is running"
}

async fn metrics_handler() -> Response {
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], render_metrics()).into_response()
}

/// Build the full router for the application state.
pub fn build_router(state: Arc<AppState>) -> Result<Router> {
    let mut router = Router::new();
    let mut registered: HashSet<String> = HashSet::new();

    for spec in all_endpoints() {
        validate_spec(spec)?;
        let path = route_path(&state.config.api_prefix, spec);
        if !registered.insert(format!("{} {}", spec.method, path)) {
            bail!("duplicate route {} {}", spec.method, path);
        }

        tracing::debug!(method = %spec.method, path = %path, "registering endpoint");

        let handler_state = state.clone();
        router = match spec.method {
            "GET" => router.route(
                &path,
                get(move |query: Query<HashMap<String, String>>| {
                    handle_get(spec, handler_state.clone(), query)
                }),
            ),
            _ => router.route(
                &path,
                post(move |headers: HeaderMap, body: Bytes| {
                    handle_post(spec, handler_state.clone(), headers, body)
                }),
            ),
        };
    }

    router = router
        .route("/ping", get(ping_handler))
        .route("/", get(home_handler));

    if state.config.use_prometheus {
        router = router.route("/metrics", get(metrics_handler));
    }

    Ok(router
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http()))
}
