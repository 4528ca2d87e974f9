//! Endpoint descriptors and the generic request dispatch pipeline.
//!
//! Every HTTP endpoint of the router is a static [`EndpointSpec`]: a
//! declarative record of its path, method, accepted upstream api types,
//! argument lists, system prompt mapping and behaviour flags, plus plain
//! function pointers for payload preparation and response shaping. One
//! generic [`dispatch`] function owns the request lifecycle:
//!
//! validate -> mask -> guardrail-in -> prepare -> select -> upstream ->
//! guardrail-out -> respond -> release

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::api::state::AppState;
use crate::api::streaming::relay_stream;
use crate::api::upstream::{build_upstream_request, call_buffered};
use crate::core::dispatcher::ApiType;
use crate::core::error::{Result, RouterError};
use crate::core::logging::generate_request_id;
use crate::core::metrics::get_metrics;
use crate::services::chooser::{ApiModel, ProviderLease};

/// The request envelope: an ordered mapping of string keys to JSON
/// values. Owned by the handler from parse until response emission.
pub type Envelope = serde_json::Map<String, Value>;

/// Keys under which clients may pass the logical model name.
pub const MODEL_NAME_PARAMS: [&str; 2] = ["model", "model_name"];

/// Key carrying the request language for prompt resolution.
pub const LANGUAGE_PARAM: &str = "language";

/// Housekeeping keys that never travel upstream.
const INTERNAL_KEYS: [&str; 5] = [
    "response_time",
    "mask_payload",
    "masker_pipeline",
    "language",
    "model_name",
];

/// Request parameters accepted by OpenAI-type upstreams; everything else
/// is dropped before the call.
const OPENAI_ACCEPTABLE_PARAMS: [&str; 10] = [
    "model",
    "messages",
    "stream",
    "temperature",
    "max_tokens",
    "tools",
    "tool_choice",
    "input",
    "reasoning_effort",
    "extra_body",
];

/// Which upstream operation the endpoint performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Chat,
    Embeddings,
    Responses,
}

/// Output of an endpoint's `prepare` function: the upstream-ready
/// envelope plus the prompt shaping instructions.
#[derive(Debug, Default)]
pub struct PreparedPayload {
    pub envelope: Envelope,
    /// Placeholder substitutions applied to the system prompt, in order.
    pub map_prompt: Vec<(String, String)>,
    /// Appended to the system prompt after substitution.
    pub prompt_postfix: Option<String>,
    /// Used verbatim as the system prompt, bypassing the template lookup.
    pub prompt_force: Option<String>,
}

impl PreparedPayload {
    pub fn passthrough(envelope: Envelope) -> Self {
        PreparedPayload {
            envelope,
            ..Default::default()
        }
    }
}

/// Payload transformation hook. Receives the shared state for endpoints
/// that answer from the catalog.
pub type PrepareFn = fn(&AppState, Envelope) -> Result<PreparedPayload>;

/// Response shaping for single-call builtin endpoints; receives the
/// upstream body and the elapsed generation time in seconds.
pub type ResponseFn = fn(&Value, f64) -> Value;

/// Aggregation for multi-shot endpoints; receives one upstream response
/// and one user message per sub-call, in request order.
pub type AggregateFn = fn(&[Value], &[Value], f64) -> Result<Value>;

/// Static description of one endpoint.
pub struct EndpointSpec {
    /// URL path relative to the global prefix (or absolute when
    /// `dont_add_api_prefix` is set).
    pub path: &'static str,
    /// `GET` or `POST`.
    pub method: &'static str,
    /// Upstream api types this endpoint can target. A `builtin` entry
    /// means responses are post-processed locally and any upstream type
    /// is acceptable.
    pub api_types: &'static [ApiType],
    pub required_args: &'static [&'static str],
    pub optional_args: &'static [&'static str],
    /// `(language, prompt-id)` pairs for system prompt resolution.
    pub system_prompts: &'static [(&'static str, &'static str)],
    pub operation: Operation,
    pub direct_return: bool,
    pub call_for_each_user_msg: bool,
    pub dont_add_api_prefix: bool,
    /// Value assumed for `stream` when the client omits it.
    pub default_stream: bool,
    pub prepare: Option<PrepareFn>,
    pub on_response: Option<ResponseFn>,
    pub aggregate: Option<AggregateFn>,
}

impl EndpointSpec {
    /// Simple-proxy mode: no declared arguments, no local post-processing.
    pub fn is_simple_proxy(&self) -> bool {
        self.required_args.is_empty() && self.on_response.is_none() && self.aggregate.is_none()
    }

    fn targets_builtin(&self) -> bool {
        self.api_types.contains(&ApiType::Builtin)
    }

    /// Prompt id for a language tag, if declared.
    fn prompt_for_language(&self, language: &str) -> Option<&'static str> {
        self.system_prompts
            .iter()
            .find(|(lang, _)| *lang == language)
            .map(|(_, id)| *id)
    }
}

/// Extract the logical model name from an envelope.
pub fn model_name_from(envelope: &Envelope) -> Result<String> {
    for key in MODEL_NAME_PARAMS {
        if let Some(Value::String(name)) = envelope.get(key) {
            if !name.is_empty() {
                return Ok(name.clone());
            }
        }
    }
    Err(RouterError::BadRequest(format!(
        "model name [{}] is required",
        MODEL_NAME_PARAMS.join(", ")
    )))
}

/// Apply prompt placeholder substitutions: single pass, left to right.
pub fn apply_map_prompt(prompt: &str, map_prompt: &[(String, String)]) -> String {
    let mut result = prompt.to_string();
    for (token, replacement) in map_prompt {
        result = result.replace(token.as_str(), replacement);
    }
    result
}

/// Outcome of the upstream leg.
enum ExecOutcome {
    Buffered { status: StatusCode, body: Value },
    Streaming(reqwest::Response),
    Aggregated(Value),
}

/// Run one request through the full endpoint lifecycle.
pub async fn dispatch(
    spec: &'static EndpointSpec,
    state: Arc<AppState>,
    mut envelope: Envelope,
) -> Result<Response> {
    let request_id = generate_request_id();
    let started = Instant::now();

    // 2. Validation of declared arguments.
    check_required_params(spec, &envelope)?;

    // 3. Masking pre-hook.
    envelope = run_masking(&state, envelope);

    // 4. Request guardrails.
    if state.config.guardrails.force_request {
        state.hooks.run_guardrails(
            &state.config.guardrails.request_pipeline,
            &envelope,
            state.config.guardrails.request_with_audit,
            "request",
        )?;
    }

    // Captured before `prepare` consumes the envelope.
    let language = envelope
        .get(LANGUAGE_PARAM)
        .and_then(Value::as_str)
        .map(str::to_string);

    // 5. Endpoint payload transformation.
    let mut prepared = match spec.prepare {
        Some(prepare) => prepare(state.as_ref(), envelope)?,
        None => PreparedPayload::passthrough(envelope),
    };

    // A prepared `{"status": false, ...}` short-circuits verbatim.
    if prepared.envelope.get("status") == Some(&Value::Bool(false)) {
        return Ok(Json(Value::Object(prepared.envelope)).into_response());
    }

    // 6. Endpoints that answer locally.
    if spec.direct_return {
        return Ok(Json(Value::Object(prepared.envelope)).into_response());
    }

    // 7. System prompt resolution.
    let system_prompt = resolve_system_prompt(spec, &state, language.as_deref(), &prepared)?;
    if let Some(prompt) = &system_prompt {
        prepend_system_message(&mut prepared.envelope, prompt);
    }

    // 8. Provider selection.
    let model_name = model_name_from(&prepared.envelope)?;
    let api_model = state.chooser.choose(&model_name).await?;
    let lease = ProviderLease::new(state.chooser.clone(), api_model.clone());

    tracing::debug!(
        request_id = %request_id,
        endpoint = %spec.path,
        model = %model_name,
        provider = %api_model.provider.id,
        "provider selected"
    );

    // 9. Api-type compatibility.
    if !spec.targets_builtin() && !spec.api_types.contains(&api_model.api_type()) {
        lease.release().await;
        return Err(RouterError::ApiTypeMismatch(
            api_model.api_type().to_string(),
        ));
    }

    // Envelope hygiene before the upstream leg.
    let mut stream = prepared
        .envelope
        .get("stream")
        .and_then(Value::as_bool)
        .unwrap_or(spec.default_stream);
    if stream && spec.call_for_each_user_msg {
        tracing::info!(
            request_id = %request_id,
            endpoint = %spec.path,
            "stream=true coerced to false for multi-shot endpoint"
        );
        stream = false;
    }
    finalize_upstream_envelope(&mut prepared.envelope, &api_model, stream);

    // 10-11. URL composition and the upstream call, under the request
    // deadline.
    let deadline = Duration::from_secs(state.config.request_timeout_secs);
    let exec = tokio::time::timeout(
        deadline,
        execute_upstream(spec, &state, &api_model, &prepared.envelope, stream, started),
    )
    .await;

    let outcome = match exec {
        Err(_elapsed) => {
            state.chooser.record_failure(&api_model);
            lease.release().await;
            return Err(RouterError::UpstreamTimeout);
        }
        Ok(Err(err)) => {
            state.chooser.record_failure(&api_model);
            lease.release().await;
            record_request_metrics(spec, &model_name, &api_model, err.status_code(), started);
            return Err(err);
        }
        Ok(Ok(outcome)) => outcome,
    };

    state.chooser.record_success(&api_model);
    state.chooser.record_latency(&api_model, started.elapsed());

    // 12-14. Response relay, response guardrails, lease release.
    match outcome {
        ExecOutcome::Streaming(upstream) => {
            record_request_metrics(spec, &model_name, &api_model, StatusCode::OK, started);
            Ok(relay_stream(
                upstream,
                api_model.api_type().streams_ndjson(),
                Some(lease),
            ))
        }
        ExecOutcome::Buffered { status, body } => {
            lease.release().await;
            run_response_guardrails(&state, &body)?;
            record_request_metrics(spec, &model_name, &api_model, status, started);

            if spec.is_simple_proxy() {
                // Scenario: the upstream body is relayed verbatim under
                // the upstream status.
                return Ok((status, Json(body)).into_response());
            }

            if !status.is_success() {
                return Err(RouterError::UpstreamError {
                    status: status.as_u16(),
                    body,
                });
            }

            let shaped = match spec.on_response {
                Some(on_response) => on_response(&body, started.elapsed().as_secs_f64()),
                None => body,
            };
            Ok(Json(json!({"status": true, "body": shaped})).into_response())
        }
        ExecOutcome::Aggregated(body) => {
            lease.release().await;
            run_response_guardrails(&state, &body)?;
            record_request_metrics(spec, &model_name, &api_model, StatusCode::OK, started);
            Ok(Json(json!({"status": true, "body": body})).into_response())
        }
    }
}

/// Perform the upstream leg: buffered, streaming, or one call per user
/// message.
async fn execute_upstream(
    spec: &'static EndpointSpec,
    state: &Arc<AppState>,
    api_model: &ApiModel,
    payload: &Envelope,
    stream: bool,
    started: Instant,
) -> Result<ExecOutcome> {
    let url = match spec.operation {
        Operation::Chat => api_model.chat_url()?,
        Operation::Embeddings => api_model.embeddings_url()?,
        Operation::Responses => api_model.responses_url()?,
    };
    let method = spec.method;

    if spec.call_for_each_user_msg {
        let body = run_multi_shot(spec, state, api_model, payload, &url, started).await?;
        return Ok(ExecOutcome::Aggregated(body));
    }

    let value = Value::Object(payload.clone());

    if stream {
        let request = build_upstream_request(&state.http_client, method, &url, api_model, &value);
        let response = request.send().await.map_err(RouterError::Request)?;
        let status = response.status();
        if status.is_server_error() {
            let body_text = response.text().await.unwrap_or_default();
            let body =
                serde_json::from_str(&body_text).unwrap_or(Value::String(body_text));
            return Err(RouterError::UpstreamError {
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            // Upstream refused before streaming started; relay as JSON.
            let body_text = response.text().await.unwrap_or_default();
            let body =
                serde_json::from_str(&body_text).unwrap_or(Value::String(body_text));
            return Ok(ExecOutcome::Buffered { status, body });
        }
        return Ok(ExecOutcome::Streaming(response));
    }

    let (status, body) =
        call_buffered(&state.http_client, method, &url, api_model, &value).await?;
    Ok(ExecOutcome::Buffered { status, body })
}

/// Multi-shot mode: one upstream call per user message against the same
/// selected provider, aggregated by the endpoint's function.
async fn run_multi_shot(
    spec: &'static EndpointSpec,
    state: &Arc<AppState>,
    api_model: &ApiModel,
    payload: &Envelope,
    url: &str,
    started: Instant,
) -> Result<Value> {
    let aggregate = spec.aggregate.ok_or_else(|| {
        RouterError::MisconfiguredEndpoint(format!(
            "multi-shot endpoint '{}' has no aggregator",
            spec.path
        ))
    })?;

    let messages = payload
        .get("messages")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let system: Option<Value> = messages
        .iter()
        .find(|m| m.get("role").and_then(Value::as_str) == Some("system"))
        .cloned();
    let user_messages: Vec<Value> = messages
        .iter()
        .filter(|m| m.get("role").and_then(Value::as_str) == Some("user"))
        .cloned()
        .collect();

    if user_messages.is_empty() {
        return Err(RouterError::ValidationError {
            field: "messages".to_string(),
            reason: "at least one user message is required".to_string(),
        });
    }

    let mut responses: Vec<Value> = Vec::with_capacity(user_messages.len());

    for user_message in &user_messages {
        // The lock TTL may not outlive the whole batch; refresh before
        // each sub-request.
        if let Err(err) = state.chooser.refresh(api_model).await {
            tracing::warn!(
                model = %api_model.name,
                provider = %api_model.provider.id,
                error = %err,
                "lock refresh failed before sub-request"
            );
        }

        let mut sub_payload = payload.clone();
        let mut sub_messages = Vec::with_capacity(2);
        if let Some(system) = &system {
            sub_messages.push(system.clone());
        }
        sub_messages.push(user_message.clone());
        sub_payload.insert("messages".to_string(), Value::Array(sub_messages));

        let value = Value::Object(sub_payload);
        let (status, body) =
            call_buffered(&state.http_client, spec.method, url, api_model, &value).await?;
        if !status.is_success() {
            return Err(RouterError::UpstreamError {
                status: status.as_u16(),
                body,
            });
        }

        responses.push(body);
    }

    aggregate(&responses, &user_messages, started.elapsed().as_secs_f64())
}

fn check_required_params(spec: &EndpointSpec, envelope: &Envelope) -> Result<()> {
    for arg in spec.required_args {
        match envelope.get(*arg) {
            None | Some(Value::Null) => {
                return Err(RouterError::MissingParam((*arg).to_string()));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn run_masking(state: &Arc<AppState>, mut envelope: Envelope) -> Envelope {
    let requested = envelope.get("mask_payload").and_then(Value::as_bool) == Some(true);
    if !state.config.masking.force && !requested {
        return envelope;
    }

    let pipeline: Vec<String> = envelope
        .get("masker_pipeline")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_else(|| state.config.masking.pipeline.clone());

    envelope = state
        .hooks
        .run_maskers(&pipeline, envelope, state.config.masking.with_audit);
    envelope
}

fn run_response_guardrails(state: &Arc<AppState>, body: &Value) -> Result<()> {
    if !state.config.guardrails.force_response {
        return Ok(());
    }
    let envelope: Envelope = match body {
        Value::Object(map) => map.clone(),
        other => {
            let mut map = Envelope::new();
            map.insert("body".to_string(), other.clone());
            map
        }
    };
    state.hooks.run_guardrails(
        &state.config.guardrails.response_pipeline,
        &envelope,
        state.config.guardrails.response_with_audit,
        "response",
    )
}

/// Resolve the system prompt text for this request, if any.
fn resolve_system_prompt(
    spec: &EndpointSpec,
    state: &Arc<AppState>,
    language: Option<&str>,
    prepared: &PreparedPayload,
) -> Result<Option<String>> {
    let mut prompt = match &prepared.prompt_force {
        Some(force) if !force.trim().is_empty() => Some(force.clone()),
        _ if !spec.system_prompts.is_empty() => {
            let lang = language.unwrap_or(&state.config.default_language);
            let prompt_id = spec.prompt_for_language(lang).ok_or_else(|| {
                RouterError::ValidationError {
                    field: LANGUAGE_PARAM.to_string(),
                    reason: format!("unsupported language '{}'", lang),
                }
            })?;
            Some(state.prompts.get(prompt_id)?)
        }
        _ => None,
    };

    if let Some(text) = prompt.as_mut() {
        *text = apply_map_prompt(text, &prepared.map_prompt);
        if let Some(postfix) = &prepared.prompt_postfix {
            if !postfix.trim().is_empty() {
                text.push_str("\n\n");
                text.push_str(postfix);
            }
        }
        *text = text.trim().to_string();
    }

    Ok(prompt)
}

/// Prepend `{role: system, content}` to the envelope's messages.
fn prepend_system_message(envelope: &mut Envelope, prompt: &str) {
    let system = json!({"role": "system", "content": prompt});
    match envelope.get_mut("messages") {
        Some(Value::Array(messages)) => {
            messages.insert(0, system);
        }
        _ => {
            envelope.insert("messages".to_string(), Value::Array(vec![system]));
        }
    }
}

/// Strip housekeeping keys, normalize `stream` and rewrite the model
/// field for providers that declare a `model_path`.
fn finalize_upstream_envelope(envelope: &mut Envelope, api_model: &ApiModel, stream: bool) {
    for key in INTERNAL_KEYS {
        envelope.remove(key);
    }
    envelope.insert("stream".to_string(), Value::Bool(stream));

    if !api_model.provider.model_path.is_empty() {
        envelope.insert(
            "model".to_string(),
            Value::String(api_model.provider.model_path.clone()),
        );
    } else if !envelope.contains_key("model") {
        envelope.insert("model".to_string(), Value::String(api_model.name.clone()));
    }

    if api_model.api_type() == ApiType::OpenAI {
        envelope.retain(|key, _| OPENAI_ACCEPTABLE_PARAMS.contains(&key.as_str()));
    }
}

fn record_request_metrics(
    spec: &EndpointSpec,
    model: &str,
    api_model: &ApiModel,
    status: StatusCode,
    started: Instant,
) {
    let metrics = get_metrics();
    metrics
        .request_count
        .with_label_values(&[
            spec.path,
            model,
            &api_model.provider.id,
            status.as_str(),
        ])
        .inc();
    metrics
        .request_duration
        .with_label_values(&[spec.path, model, &api_model.provider.id])
        .observe(started.elapsed().as_secs_f64());
    metrics
        .upstream_latency
        .with_label_values(&[&api_model.provider.id])
        .observe(started.elapsed().as_secs_f64());
}
