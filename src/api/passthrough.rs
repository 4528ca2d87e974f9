//! Passthrough endpoints (chat, responses, embeddings) and the model
//! listing surfaces for the supported client dialects.
//!
//! Passthrough endpoints declare no required arguments, which puts the
//! dispatcher in simple-proxy mode: the client payload is forwarded
//! unchanged after provider selection and the upstream body is relayed
//! verbatim.

use serde_json::{json, Value};

use crate::api::endpoint::{EndpointSpec, Envelope, Operation, PreparedPayload};
use crate::api::state::AppState;
use crate::core::dispatcher::ApiType;
use crate::core::error::Result;

const OPENAI_FAMILY: &[ApiType] = &[ApiType::OpenAI, ApiType::LmStudio, ApiType::Vllm];
const OPENAI_RESPONSES: &[ApiType] = &[ApiType::OpenAI, ApiType::Vllm];
const OLLAMA_ONLY: &[ApiType] = &[ApiType::Ollama];
const ALL_UPSTREAMS: &[ApiType] = &[
    ApiType::OpenAI,
    ApiType::Ollama,
    ApiType::LmStudio,
    ApiType::Vllm,
];
const BUILTIN: &[ApiType] = &[ApiType::Builtin];

macro_rules! chat_passthrough {
    ($name:ident, $path:expr, $api_types:expr, $no_prefix:expr) => {
        pub static $name: EndpointSpec = EndpointSpec {
            path: $path,
            method: "POST",
            api_types: $api_types,
            required_args: &[],
            optional_args: &[],
            system_prompts: &[],
            operation: Operation::Chat,
            direct_return: false,
            call_for_each_user_msg: false,
            dont_add_api_prefix: $no_prefix,
            default_stream: true,
            prepare: None,
            on_response: None,
            aggregate: None,
        };
    };
}

// OpenAI-style chat surfaces.
chat_passthrough!(CHAT_COMPLETIONS, "/chat/completions", OPENAI_FAMILY, true);
chat_passthrough!(CHAT_COMPLETIONS_V1, "/v1/chat/completions", OPENAI_FAMILY, true);
chat_passthrough!(CHAT_COMPLETIONS_API, "chat/completions", OPENAI_FAMILY, false);
// Ollama-style chat.
chat_passthrough!(OLLAMA_CHAT, "chat", OLLAMA_ONLY, false);
// LM Studio chat.
chat_passthrough!(LMSTUDIO_CHAT_V0, "v0/chat/completions", OPENAI_FAMILY, false);

/// OpenAI Responses passthrough.
pub static RESPONSES_V1: EndpointSpec = EndpointSpec {
    path: "/v1/responses",
    method: "POST",
    api_types: OPENAI_RESPONSES,
    required_args: &[],
    optional_args: &[],
    system_prompts: &[],
    operation: Operation::Responses,
    direct_return: false,
    call_for_each_user_msg: false,
    dont_add_api_prefix: true,
    default_stream: false,
    prepare: None,
    on_response: None,
    aggregate: None,
};

macro_rules! embeddings_passthrough {
    ($name:ident, $path:expr, $no_prefix:expr) => {
        pub static $name: EndpointSpec = EndpointSpec {
            path: $path,
            method: "POST",
            api_types: ALL_UPSTREAMS,
            required_args: &[],
            optional_args: &[],
            system_prompts: &[],
            operation: Operation::Embeddings,
            direct_return: false,
            call_for_each_user_msg: false,
            dont_add_api_prefix: $no_prefix,
            default_stream: false,
            prepare: None,
            on_response: None,
            aggregate: None,
        };
    };
}

embeddings_passthrough!(EMBEDDINGS_API, "embeddings", false);
embeddings_passthrough!(EMBEDDINGS_V1, "/v1/embeddings", true);
embeddings_passthrough!(EMBED_API, "embed", false);

// ---------------------------------------------------------------------
// Model listing and service endpoints
// ---------------------------------------------------------------------

/// Ollama-style tag list, aggregated from the catalog.
fn prepare_tags(state: &AppState, _envelope: Envelope) -> Result<PreparedPayload> {
    let models: Vec<Value> = state
        .catalog
        .active_model_names()
        .into_iter()
        .map(|name| {
            json!({
                "name": name,
                "model": name,
                "modified_at": chrono::Utc::now().to_rfc3339(),
                "size": 0,
                "digest": "",
                "details": {
                    "format": "",
                    "family": "",
                    "parameter_size": "",
                    "quantization_level": "",
                },
            })
        })
        .collect();

    let mut envelope = Envelope::new();
    envelope.insert("models".to_string(), Value::Array(models));
    Ok(PreparedPayload::passthrough(envelope))
}

/// OpenAI-style model list.
fn prepare_models(state: &AppState, _envelope: Envelope) -> Result<PreparedPayload> {
    let data: Vec<Value> = state
        .catalog
        .active_model_names()
        .into_iter()
        .map(|name| {
            json!({
                "id": name,
                "object": "model",
                "created": chrono::Utc::now().timestamp(),
                "owned_by": "llm-router",
            })
        })
        .collect();

    let mut envelope = Envelope::new();
    envelope.insert("object".to_string(), Value::String("list".to_string()));
    envelope.insert("data".to_string(), Value::Array(data));
    Ok(PreparedPayload::passthrough(envelope))
}

/// LM Studio model list.
fn prepare_lmstudio_models(state: &AppState, _envelope: Envelope) -> Result<PreparedPayload> {
    let data: Vec<Value> = state
        .catalog
        .active_model_names()
        .into_iter()
        .map(|name| {
            let max_context = state.catalog.max_input_size(&name);
            json!({
                "id": name,
                "object": "model",
                "type": "llm",
                "publisher": "llm-router",
                "arch": "",
                "compatibility_type": "gguf",
                "quantization": "",
                "state": "loaded",
                "max_context_length": max_context,
            })
        })
        .collect();

    let mut envelope = Envelope::new();
    envelope.insert("data".to_string(), Value::Array(data));
    envelope.insert("object".to_string(), Value::String("list".to_string()));
    Ok(PreparedPayload::passthrough(envelope))
}

/// Router version.
fn prepare_version(_state: &AppState, _envelope: Envelope) -> Result<PreparedPayload> {
    let mut envelope = Envelope::new();
    envelope.insert(
        "version".to_string(),
        Value::String(env!("CARGO_PKG_VERSION").to_string()),
    );
    Ok(PreparedPayload::passthrough(envelope))
}

macro_rules! local_endpoint {
    ($name:ident, $path:expr, $method:expr, $no_prefix:expr, $prepare:expr) => {
        pub static $name: EndpointSpec = EndpointSpec {
            path: $path,
            method: $method,
            api_types: BUILTIN,
            required_args: &[],
            optional_args: &[],
            system_prompts: &[],
            operation: Operation::Chat,
            direct_return: true,
            call_for_each_user_msg: false,
            dont_add_api_prefix: $no_prefix,
            default_stream: false,
            prepare: Some($prepare),
            on_response: None,
            aggregate: None,
        };
    };
}

// `/tags` for clients that skip the prefix, plus the Ollama-style
// prefixed spelling (`/api/tags` under the default prefix).
local_endpoint!(TAGS, "/tags", "GET", true, prepare_tags);
local_endpoint!(TAGS_API, "tags", "GET", false, prepare_tags);
local_endpoint!(MODELS, "/models", "GET", true, prepare_models);
local_endpoint!(MODELS_V1, "/v1/models", "GET", true, prepare_models);
local_endpoint!(LMSTUDIO_MODELS_V0, "v0/models", "POST", false, prepare_lmstudio_models);
local_endpoint!(VERSION, "version", "GET", false, prepare_version);

/// All passthrough and listing endpoints, in registration order.
pub fn passthrough_endpoints() -> Vec<&'static EndpointSpec> {
    vec![
        &CHAT_COMPLETIONS,
        &CHAT_COMPLETIONS_V1,
        &CHAT_COMPLETIONS_API,
        &OLLAMA_CHAT,
        &LMSTUDIO_CHAT_V0,
        &RESPONSES_V1,
        &EMBEDDINGS_API,
        &EMBEDDINGS_V1,
        &EMBED_API,
        &TAGS,
        &TAGS_API,
        &MODELS,
        &MODELS_V1,
        &LMSTUDIO_MODELS_V0,
        &VERSION,
    ]
}
