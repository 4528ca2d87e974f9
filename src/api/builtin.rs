//! Built-in endpoints: chat variants with injected system prompts and the
//! utility endpoints (translate, simplify, question generation, article
//! writing, context QA, batch file summaries).
//!
//! Each endpoint is a static descriptor plus plain functions for payload
//! preparation and response shaping; the lifecycle itself lives in
//! `endpoint::dispatch`.

use serde_json::{json, Value};

use crate::api::endpoint::{EndpointSpec, Envelope, Operation, PreparedPayload};
use crate::api::state::AppState;
use crate::api::upstream::assistant_content;
use crate::core::dispatcher::ApiType;
use crate::core::error::{Result, RouterError};

const BUILTIN: &[ApiType] = &[ApiType::Builtin];

// ---------------------------------------------------------------------
// Shared payload helpers
// ---------------------------------------------------------------------

fn require_string(envelope: &Envelope, key: &str) -> Result<String> {
    envelope
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| RouterError::ValidationError {
            field: key.to_string(),
            reason: "expected a non-empty string".to_string(),
        })
}

fn take_texts(envelope: &mut Envelope) -> Result<Vec<String>> {
    match envelope.remove("texts") {
        Some(Value::Array(items)) => {
            let texts: Vec<String> = items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
            if texts.len() != items.len() || texts.is_empty() {
                return Err(RouterError::ValidationError {
                    field: "texts".to_string(),
                    reason: "expected a non-empty list of strings".to_string(),
                });
            }
            Ok(texts)
        }
        _ => Err(RouterError::ValidationError {
            field: "texts".to_string(),
            reason: "expected a list of strings".to_string(),
        }),
    }
}

/// Convert `historical_messages` (`[{user, assistant}]` pairs) into chat
/// messages, preserving order.
fn history_messages(history: Option<Value>) -> Vec<Value> {
    let mut messages = Vec::new();
    let Some(Value::Array(entries)) = history else {
        return messages;
    };
    for entry in entries {
        if let Some(user) = entry.get("user").and_then(Value::as_str) {
            messages.push(json!({"role": "user", "content": user}));
        }
        if let Some(assistant) = entry.get("assistant").and_then(Value::as_str) {
            messages.push(json!({"role": "assistant", "content": assistant}));
        }
    }
    messages
}

fn user_messages_from_texts(texts: Vec<String>) -> Value {
    Value::Array(
        texts
            .into_iter()
            .map(|text| json!({"role": "user", "content": text}))
            .collect(),
    )
}

fn set_model_from_model_name(envelope: &mut Envelope) -> Result<()> {
    let model = require_string(envelope, "model_name")?;
    envelope.insert("model".to_string(), Value::String(model));
    Ok(())
}

fn message_content(message: &Value) -> String {
    message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

// ---------------------------------------------------------------------
// conversation_with_model
// ---------------------------------------------------------------------

fn prepare_conversation(_state: &AppState, mut envelope: Envelope) -> Result<PreparedPayload> {
    set_model_from_model_name(&mut envelope)?;
    let user_last = require_string(&envelope, "user_last_statement")?;
    envelope.remove("user_last_statement");

    let mut messages = history_messages(envelope.remove("historical_messages"));
    messages.push(json!({"role": "user", "content": user_last}));
    envelope.insert("messages".to_string(), Value::Array(messages));

    Ok(PreparedPayload::passthrough(envelope))
}

fn conversation_response(body: &Value, elapsed: f64) -> Value {
    json!({
        "response": assistant_content(body),
        "generation_time": elapsed,
    })
}

pub static CONVERSATION_WITH_MODEL: EndpointSpec = EndpointSpec {
    path: "conversation_with_model",
    method: "POST",
    api_types: BUILTIN,
    required_args: &["model_name", "user_last_statement"],
    optional_args: &[
        "language",
        "historical_messages",
        "stream",
        "temperature",
        "max_tokens",
        "options",
    ],
    system_prompts: &[
        ("pl", "builtin/system/pl/chat-conversation-simple"),
        ("en", "builtin/system/en/chat-conversation-simple"),
    ],
    operation: Operation::Chat,
    direct_return: false,
    call_for_each_user_msg: false,
    dont_add_api_prefix: false,
    default_stream: false,
    prepare: Some(prepare_conversation),
    on_response: Some(conversation_response),
    aggregate: None,
};

// ---------------------------------------------------------------------
// extended_conversation_with_model
// ---------------------------------------------------------------------

fn prepare_extended_conversation(
    _state: &AppState,
    mut envelope: Envelope,
) -> Result<PreparedPayload> {
    set_model_from_model_name(&mut envelope)?;
    let user_last = require_string(&envelope, "user_last_statement")?;
    let system_prompt = require_string(&envelope, "system_prompt")?;
    envelope.remove("user_last_statement");
    envelope.remove("system_prompt");

    let mut messages = history_messages(envelope.remove("historical_messages"));
    messages.push(json!({"role": "user", "content": user_last}));
    envelope.insert("messages".to_string(), Value::Array(messages));

    Ok(PreparedPayload {
        envelope,
        prompt_force: Some(system_prompt),
        ..Default::default()
    })
}

pub static EXTENDED_CONVERSATION_WITH_MODEL: EndpointSpec = EndpointSpec {
    path: "extended_conversation_with_model",
    method: "POST",
    api_types: BUILTIN,
    required_args: &["model_name", "user_last_statement", "system_prompt"],
    optional_args: &[
        "language",
        "historical_messages",
        "stream",
        "temperature",
        "max_tokens",
        "options",
    ],
    system_prompts: &[],
    operation: Operation::Chat,
    direct_return: false,
    call_for_each_user_msg: false,
    dont_add_api_prefix: false,
    default_stream: false,
    prepare: Some(prepare_extended_conversation),
    on_response: Some(conversation_response),
    aggregate: None,
};

// ---------------------------------------------------------------------
// generative_answer (context QA)
// ---------------------------------------------------------------------

fn prepare_generative_answer(_state: &AppState, mut envelope: Envelope) -> Result<PreparedPayload> {
    set_model_from_model_name(&mut envelope)?;
    let question = require_string(&envelope, "question_str")?;

    let doc_name_in_answer = envelope
        .get("doc_name_in_answer")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let mut context = String::new();
    match envelope.remove("texts") {
        Some(Value::Array(texts)) => {
            for text in texts.iter().filter_map(Value::as_str) {
                context.push_str(text);
                context.push_str("\n\n");
            }
        }
        Some(Value::Object(documents)) => {
            for (doc_name, chunks) in &documents {
                let Some(chunks) = chunks.as_array() else {
                    continue;
                };
                for chunk in chunks.iter().filter_map(Value::as_str) {
                    if doc_name_in_answer {
                        context.push_str(&format!(
                            "Document name: {}\nDocument context: {}",
                            doc_name, chunk
                        ));
                    } else {
                        context.push_str(chunk);
                    }
                    context.push_str("\n\n");
                }
            }
        }
        _ => {
            return Err(RouterError::ValidationError {
                field: "texts".to_string(),
                reason: "expected a list of strings or a {document: [chunks]} mapping"
                    .to_string(),
            })
        }
    }

    let prompt_force = envelope
        .remove("system_prompt")
        .and_then(|v| v.as_str().map(str::to_string));
    let prompt_postfix = envelope
        .remove("question_prompt")
        .and_then(|v| v.as_str().map(str::to_string));
    envelope.remove("question_str");
    envelope.remove("doc_name_in_answer");

    envelope.insert(
        "messages".to_string(),
        json!([{"role": "user", "content": context.trim()}]),
    );

    Ok(PreparedPayload {
        envelope,
        map_prompt: vec![("##QUESTION_STR##".to_string(), question)],
        prompt_postfix,
        prompt_force,
    })
}

fn generative_answer_response(body: &Value, elapsed: f64) -> Value {
    json!({
        "response": assistant_content(body),
        "generation_time": elapsed,
    })
}

pub static GENERATIVE_ANSWER: EndpointSpec = EndpointSpec {
    path: "generative_answer",
    method: "POST",
    api_types: BUILTIN,
    required_args: &["model_name", "question_str", "texts"],
    optional_args: &[
        "language",
        "system_prompt",
        "question_prompt",
        "doc_name_in_answer",
        "stream",
        "temperature",
        "max_tokens",
    ],
    system_prompts: &[
        ("pl", "builtin/system/pl/answer-from-context-simple"),
        ("en", "builtin/system/en/answer-from-context-simple"),
    ],
    operation: Operation::Chat,
    direct_return: false,
    call_for_each_user_msg: false,
    dont_add_api_prefix: false,
    default_stream: false,
    prepare: Some(prepare_generative_answer),
    on_response: Some(generative_answer_response),
    aggregate: None,
};

// ---------------------------------------------------------------------
// generate_questions (multi-shot)
// ---------------------------------------------------------------------

fn prepare_generate_questions(
    _state: &AppState,
    mut envelope: Envelope,
) -> Result<PreparedPayload> {
    set_model_from_model_name(&mut envelope)?;
    let number = match envelope.remove("number_of_questions") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(1),
        Some(Value::String(s)) => s.trim().parse().map_err(|_| RouterError::ValidationError {
            field: "number_of_questions".to_string(),
            reason: "expected a positive integer".to_string(),
        })?,
        _ => {
            return Err(RouterError::ValidationError {
                field: "number_of_questions".to_string(),
                reason: "expected a positive integer".to_string(),
            })
        }
    };

    let texts = take_texts(&mut envelope)?;
    envelope.insert("messages".to_string(), user_messages_from_texts(texts));

    Ok(PreparedPayload {
        envelope,
        map_prompt: vec![(
            "##QUESTION_NUM_STR##".to_string(),
            format!("{} question(s)", number),
        )],
        ..Default::default()
    })
}

/// Strip a leading `N.` enumeration from a generated question line.
fn remove_enumeration(question: &str) -> String {
    let question = question.trim();
    if let Some(dot) = question.find('.') {
        if question[..dot].parse::<u32>().is_ok() {
            return question[dot + 1..].trim().to_string();
        }
    }
    question.to_string()
}

fn parse_questions(raw: &str) -> Vec<String> {
    // Models tend to prefix the list with commentary; the final paragraph
    // carries the actual questions.
    let block = raw.trim().rsplit("\n\n").next().unwrap_or("");
    block
        .lines()
        .map(remove_enumeration)
        .filter(|q| !q.is_empty())
        .collect()
}

fn aggregate_generated_questions(
    responses: &[Value],
    user_messages: &[Value],
    elapsed: f64,
) -> Result<Value> {
    let items: Vec<Value> = responses
        .iter()
        .zip(user_messages)
        .map(|(response, message)| {
            json!({
                "text": message_content(message),
                "questions": parse_questions(&assistant_content(response)),
            })
        })
        .collect();

    Ok(json!({"response": items, "generation_time": elapsed}))
}

pub static GENERATE_QUESTIONS: EndpointSpec = EndpointSpec {
    path: "generate_questions",
    method: "POST",
    api_types: BUILTIN,
    required_args: &["model_name", "texts", "number_of_questions"],
    optional_args: &["language", "stream", "temperature", "max_tokens"],
    system_prompts: &[
        ("pl", "builtin/system/pl/generate-questions"),
        ("en", "builtin/system/en/generate-questions"),
    ],
    operation: Operation::Chat,
    direct_return: false,
    call_for_each_user_msg: true,
    dont_add_api_prefix: false,
    default_stream: false,
    prepare: Some(prepare_generate_questions),
    on_response: None,
    aggregate: Some(aggregate_generated_questions),
};

// ---------------------------------------------------------------------
// translate (multi-shot)
// ---------------------------------------------------------------------

fn prepare_texts_endpoint(_state: &AppState, mut envelope: Envelope) -> Result<PreparedPayload> {
    set_model_from_model_name(&mut envelope)?;
    let texts = take_texts(&mut envelope)?;
    envelope.insert("messages".to_string(), user_messages_from_texts(texts));
    Ok(PreparedPayload::passthrough(envelope))
}

fn aggregate_translations(
    responses: &[Value],
    user_messages: &[Value],
    elapsed: f64,
) -> Result<Value> {
    let items: Vec<Value> = responses
        .iter()
        .zip(user_messages)
        .map(|(response, message)| {
            json!({
                "original": message_content(message),
                "translated": assistant_content(response),
            })
        })
        .collect();
    Ok(json!({"response": items, "generation_time": elapsed}))
}

pub static TRANSLATE: EndpointSpec = EndpointSpec {
    path: "translate",
    method: "POST",
    api_types: BUILTIN,
    required_args: &["model_name", "texts"],
    optional_args: &["language", "stream", "temperature", "max_tokens"],
    system_prompts: &[
        ("pl", "builtin/system/pl/translate-to-pl"),
        ("en", "builtin/system/en/translate-to-pl"),
    ],
    operation: Operation::Chat,
    direct_return: false,
    call_for_each_user_msg: true,
    dont_add_api_prefix: false,
    default_stream: false,
    prepare: Some(prepare_texts_endpoint),
    on_response: None,
    aggregate: Some(aggregate_translations),
};

// ---------------------------------------------------------------------
// simplify_text (multi-shot)
// ---------------------------------------------------------------------

fn aggregate_simplifications(
    responses: &[Value],
    _user_messages: &[Value],
    elapsed: f64,
) -> Result<Value> {
    let items: Vec<Value> = responses
        .iter()
        .map(|response| Value::String(assistant_content(response)))
        .collect();
    Ok(json!({"response": items, "generation_time": elapsed}))
}

pub static SIMPLIFY_TEXT: EndpointSpec = EndpointSpec {
    path: "simplify_text",
    method: "POST",
    api_types: BUILTIN,
    required_args: &["model_name", "texts"],
    optional_args: &["language", "stream", "temperature", "max_tokens"],
    system_prompts: &[
        ("pl", "builtin/system/pl/simplify-text"),
        ("en", "builtin/system/en/simplify-text"),
    ],
    operation: Operation::Chat,
    direct_return: false,
    call_for_each_user_msg: true,
    dont_add_api_prefix: false,
    default_stream: false,
    prepare: Some(prepare_texts_endpoint),
    on_response: None,
    aggregate: Some(aggregate_simplifications),
};

// ---------------------------------------------------------------------
// generate_article_from_text
// ---------------------------------------------------------------------

fn prepare_generate_article(_state: &AppState, mut envelope: Envelope) -> Result<PreparedPayload> {
    set_model_from_model_name(&mut envelope)?;
    let text = require_string(&envelope, "text")?;
    envelope.remove("text");
    envelope.insert(
        "messages".to_string(),
        json!([{"role": "user", "content": text}]),
    );
    Ok(PreparedPayload::passthrough(envelope))
}

fn article_response(body: &Value, elapsed: f64) -> Value {
    json!({
        "response": {"article_text": assistant_content(body)},
        "generation_time": elapsed,
    })
}

pub static GENERATE_ARTICLE_FROM_TEXT: EndpointSpec = EndpointSpec {
    path: "generate_article_from_text",
    method: "POST",
    api_types: BUILTIN,
    required_args: &["model_name", "text"],
    optional_args: &["language", "stream", "temperature", "max_tokens"],
    system_prompts: &[
        ("pl", "builtin/system/pl/news-on-sm"),
        ("en", "builtin/system/en/news-on-sm"),
    ],
    operation: Operation::Chat,
    direct_return: false,
    call_for_each_user_msg: false,
    dont_add_api_prefix: false,
    default_stream: false,
    prepare: Some(prepare_generate_article),
    on_response: Some(article_response),
    aggregate: None,
};

// ---------------------------------------------------------------------
// create_full_article_from_texts
// ---------------------------------------------------------------------

fn prepare_full_article(_state: &AppState, mut envelope: Envelope) -> Result<PreparedPayload> {
    set_model_from_model_name(&mut envelope)?;
    let user_query = require_string(&envelope, "user_query")?;
    let texts = take_texts(&mut envelope)?;
    envelope.remove("user_query");

    let prompt_postfix = envelope
        .remove("article_type")
        .and_then(|v| v.as_str().map(str::to_string));

    let joined = texts
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    envelope.insert(
        "messages".to_string(),
        json!([{"role": "user", "content": joined}]),
    );

    Ok(PreparedPayload {
        envelope,
        map_prompt: vec![("##USER_Q_STR##".to_string(), user_query)],
        prompt_postfix,
        prompt_force: None,
    })
}

pub static CREATE_FULL_ARTICLE_FROM_TEXTS: EndpointSpec = EndpointSpec {
    path: "create_full_article_from_texts",
    method: "POST",
    api_types: BUILTIN,
    required_args: &["model_name", "texts", "user_query"],
    optional_args: &["language", "article_type", "stream", "temperature", "max_tokens"],
    system_prompts: &[
        ("pl", "builtin/system/pl/full-article"),
        ("en", "builtin/system/en/full-article"),
    ],
    operation: Operation::Chat,
    direct_return: false,
    call_for_each_user_msg: false,
    dont_add_api_prefix: false,
    default_stream: false,
    prepare: Some(prepare_full_article),
    on_response: Some(article_response),
    aggregate: None,
};

// ---------------------------------------------------------------------
// batch_file_summaries (multi-shot)
// ---------------------------------------------------------------------

fn prepare_batch_file_summaries(
    _state: &AppState,
    mut envelope: Envelope,
) -> Result<PreparedPayload> {
    set_model_from_model_name(&mut envelope)?;

    let files = match envelope.remove("files") {
        Some(Value::Array(files)) if !files.is_empty() => files,
        _ => {
            return Err(RouterError::ValidationError {
                field: "files".to_string(),
                reason: "expected a non-empty list of {name, content} objects".to_string(),
            })
        }
    };

    let mut messages = Vec::with_capacity(files.len());
    for file in &files {
        let name = file.get("name").and_then(Value::as_str).unwrap_or_default();
        let content = file
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| RouterError::ValidationError {
                field: "files".to_string(),
                reason: "every file needs a string 'content'".to_string(),
            })?;
        messages.push(json!({"role": "user", "content": content, "name": name}));
    }
    envelope.insert("messages".to_string(), Value::Array(messages));

    Ok(PreparedPayload::passthrough(envelope))
}

/// Split a summary response into the lead paragraph and its bullet
/// points.
fn parse_summary(raw: &str) -> (String, Vec<String>) {
    let mut summary_lines: Vec<&str> = Vec::new();
    let mut key_points: Vec<String> = Vec::new();

    for line in raw.lines() {
        let trimmed = line.trim();
        if let Some(point) = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
            .or_else(|| trimmed.strip_prefix("• "))
        {
            key_points.push(point.trim().to_string());
        } else if !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case("key points:") {
            let cleaned = trimmed.strip_prefix("Summary:").unwrap_or(trimmed).trim();
            if !cleaned.is_empty() {
                summary_lines.push(cleaned);
            }
        }
    }

    (summary_lines.join(" "), key_points)
}

fn aggregate_file_summaries(
    responses: &[Value],
    user_messages: &[Value],
    elapsed: f64,
) -> Result<Value> {
    let items: Vec<Value> = responses
        .iter()
        .zip(user_messages)
        .map(|(response, message)| {
            let (summary, key_points) = parse_summary(&assistant_content(response));
            json!({
                "name": message.get("name").and_then(Value::as_str).unwrap_or_default(),
                "summary": summary,
                "key_points": key_points,
            })
        })
        .collect();

    Ok(json!({"response": items, "generation_time": elapsed}))
}

pub static BATCH_FILE_SUMMARIES: EndpointSpec = EndpointSpec {
    path: "batch_file_summaries",
    method: "POST",
    api_types: BUILTIN,
    required_args: &["model_name", "files"],
    optional_args: &["language", "stream", "temperature", "max_tokens"],
    system_prompts: &[
        ("pl", "builtin/system/pl/batch-file-summaries"),
        ("en", "builtin/system/en/batch-file-summaries"),
    ],
    operation: Operation::Chat,
    direct_return: false,
    call_for_each_user_msg: true,
    dont_add_api_prefix: false,
    default_stream: false,
    prepare: Some(prepare_batch_file_summaries),
    on_response: None,
    aggregate: Some(aggregate_file_summaries),
};

/// All builtin endpoints, in registration order.
pub fn builtin_endpoints() -> Vec<&'static EndpointSpec> {
    vec![
        &CONVERSATION_WITH_MODEL,
        &EXTENDED_CONVERSATION_WITH_MODEL,
        &GENERATIVE_ANSWER,
        &GENERATE_QUESTIONS,
        &TRANSLATE,
        &SIMPLIFY_TEXT,
        &GENERATE_ARTICLE_FROM_TEXT,
        &CREATE_FULL_ARTICLE_FROM_TEXTS,
        &BATCH_FILE_SUMMARIES,
    ]
}
