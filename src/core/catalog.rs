//! Model/provider catalog loading.
//!
//! The catalog is a JSON document mapping model-type groups to model
//! entries, plus a mandatory `active_models` section that decides which
//! models the router exposes. Loading is a pure function of the input
//! bytes; no side effects beyond a warning log for duplicate provider ids.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::core::dispatcher::ApiType;
use crate::core::error::{Result, RouterError};

/// One concrete upstream inference endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSpec {
    /// Unique identifier, used as the selection key.
    pub id: String,
    /// Absolute URL base of the upstream server.
    pub api_host: String,
    /// Optional bearer token forwarded upstream.
    pub api_token: Option<String>,
    /// Wire dialect of the upstream.
    pub api_type: ApiType,
    /// Identifier passed upstream in the `model` field; empty lets the
    /// upstream infer.
    pub model_path: String,
    /// Context window size.
    pub input_size: u64,
    /// Selection weight for the weighted strategies.
    pub weight: f64,
    /// Keep-alive period as the original duration string.
    pub keep_alive: Option<String>,
    /// Whether the upstream supports tool calling.
    pub tool_calling: bool,
}

impl ProviderSpec {
    /// The `host:port` part of `api_host`, used as the physical-box key by
    /// the coordination layer.
    pub fn host(&self) -> String {
        let stripped = self
            .api_host
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        stripped.trim_end_matches('/').to_string()
    }
}

/// Providers registered for one model.
#[derive(Debug, Clone, Default)]
pub struct ModelEntry {
    /// Primary provider pool, in configuration order.
    pub providers: Vec<ProviderSpec>,
    /// Low-priority fallback pool. Loaded for completeness; no current
    /// strategy consults it.
    pub providers_sleep: Vec<ProviderSpec>,
}

/// Loaded, queryable view of the model catalog.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    /// `group -> [active model names]`, as declared in `active_models`.
    pub active_models: HashMap<String, Vec<String>>,
    /// `model name -> entry`, resolved for every active model.
    pub models: HashMap<String, ModelEntry>,
}

impl ModelCatalog {
    /// Load and validate a catalog file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            RouterError::BadCatalog(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    /// Parse a catalog from raw JSON text.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(content)
            .map_err(|e| RouterError::BadCatalog(format!("invalid JSON: {}", e)))?;

        let root_obj = root
            .as_object()
            .ok_or_else(|| RouterError::BadCatalog("top level must be an object".to_string()))?;

        let active_value = root_obj
            .get("active_models")
            .ok_or_else(|| RouterError::BadCatalog("'active_models' is mandatory".to_string()))?;
        let active_obj = active_value.as_object().ok_or_else(|| {
            RouterError::BadCatalog("'active_models' must be an object".to_string())
        })?;

        let mut active_models: HashMap<String, Vec<String>> = HashMap::new();
        for (group, names) in active_obj {
            let list = names.as_array().ok_or_else(|| {
                RouterError::BadCatalog(format!("active_models['{}'] must be a list", group))
            })?;
            let mut model_names = Vec::with_capacity(list.len());
            for name in list {
                let name = name.as_str().ok_or_else(|| {
                    RouterError::BadCatalog(format!(
                        "active_models['{}'] contains a non-string entry",
                        group
                    ))
                })?;
                model_names.push(name.to_string());
            }
            active_models.insert(group.clone(), model_names);
        }

        let mut models: HashMap<String, ModelEntry> = HashMap::new();
        for (group, model_names) in &active_models {
            let group_obj = root_obj
                .get(group)
                .and_then(Value::as_object)
                .ok_or_else(|| {
                    RouterError::BadCatalog(format!(
                        "active group '{}' is missing from the catalog",
                        group
                    ))
                })?;

            for model_name in model_names {
                let model_cfg = group_obj.get(model_name).ok_or_else(|| {
                    RouterError::BadCatalog(format!(
                        "active model '{}:{}' has no configuration",
                        group, model_name
                    ))
                })?;

                let entry = parse_model_entry(group, model_name, model_cfg)?;
                models.insert(model_name.clone(), entry);
            }
        }

        let catalog = ModelCatalog {
            active_models,
            models,
        };
        catalog.warn_duplicate_ids();
        Ok(catalog)
    }

    /// Look up the entry for a visible model.
    pub fn entry(&self, model_name: &str) -> Option<&ModelEntry> {
        self.models.get(model_name)
    }

    /// Names of every active model, across all groups, sorted.
    pub fn active_model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.keys().cloned().collect();
        names.sort();
        names
    }

    /// Find the first primary provider of `model_name` whose host matches.
    pub fn provider_on_host(&self, model_name: &str, host: &str) -> Option<&ProviderSpec> {
        self.models
            .get(model_name)?
            .providers
            .iter()
            .find(|p| p.host() == host)
    }

    /// Maximum context window among a model's primary providers.
    pub fn max_input_size(&self, model_name: &str) -> u64 {
        self.models
            .get(model_name)
            .map(|e| e.providers.iter().map(|p| p.input_size).max().unwrap_or(0))
            .unwrap_or(0)
    }

    fn warn_duplicate_ids(&self) {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut duplicates: Vec<&str> = Vec::new();
        for entry in self.models.values() {
            for provider in &entry.providers {
                if !seen.insert(provider.id.as_str()) {
                    duplicates.push(provider.id.as_str());
                }
            }
        }
        if !duplicates.is_empty() {
            duplicates.sort();
            duplicates.dedup();
            tracing::warn!(
                ids = %duplicates.join(", "),
                "duplicate provider ids across the catalog; selection keys are (model, id) pairs"
            );
        }
    }
}

fn parse_model_entry(group: &str, model_name: &str, cfg: &Value) -> Result<ModelEntry> {
    let obj = cfg.as_object().ok_or_else(|| {
        RouterError::BadCatalog(format!("'{}:{}' must be an object", group, model_name))
    })?;

    let providers_value = obj.get("providers").ok_or_else(|| {
        RouterError::BadCatalog(format!("'{}:{}' has no providers", group, model_name))
    })?;

    let providers = parse_provider_list(model_name, providers_value)?;
    let providers_sleep = match obj.get("providers_sleep") {
        Some(v) => parse_provider_list(model_name, v)?,
        None => Vec::new(),
    };

    Ok(ModelEntry {
        providers,
        providers_sleep,
    })
}

fn parse_provider_list(model_name: &str, value: &Value) -> Result<Vec<ProviderSpec>> {
    let list = value.as_array().ok_or_else(|| {
        RouterError::BadCatalog(format!("providers of '{}' must be a list", model_name))
    })?;

    list.iter()
        .map(|p| parse_provider(model_name, p))
        .collect()
}

fn parse_provider(model_name: &str, value: &Value) -> Result<ProviderSpec> {
    let obj = value.as_object().ok_or_else(|| {
        RouterError::BadCatalog(format!("provider of '{}' must be an object", model_name))
    })?;

    let id = required_str(obj, "id", model_name)?;
    let api_host = required_str(obj, "api_host", model_name)?;
    let api_type_tag = required_str(obj, "api_type", model_name)?;
    let api_type = ApiType::parse(&api_type_tag)
        .map_err(|_| RouterError::BadCatalog(format!(
            "provider '{}' of '{}' has unknown api_type '{}'",
            id, model_name, api_type_tag
        )))?;

    let input_size = parse_input_size(obj.get("input_size"), &id, model_name)?;

    let weight = match obj.get("weight") {
        None | Some(Value::Null) => 1.0,
        Some(Value::Number(n)) => n.as_f64().unwrap_or(1.0),
        Some(Value::String(s)) => s.parse::<f64>().map_err(|_| {
            RouterError::BadCatalog(format!(
                "provider '{}' of '{}' has non-numeric weight '{}'",
                id, model_name, s
            ))
        })?,
        Some(other) => {
            return Err(RouterError::BadCatalog(format!(
                "provider '{}' of '{}' has invalid weight {}",
                id, model_name, other
            )))
        }
    };
    if weight <= 0.0 {
        return Err(RouterError::BadCatalog(format!(
            "provider '{}' of '{}' must have a positive weight",
            id, model_name
        )));
    }

    let api_token = obj
        .get("api_token")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string);

    let keep_alive = obj
        .get("keep_alive")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string);

    let model_path = obj
        .get("model_path")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let tool_calling = obj
        .get("tool_calling")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Ok(ProviderSpec {
        id,
        api_host,
        api_token,
        api_type,
        model_path,
        input_size,
        weight,
        keep_alive,
        tool_calling,
    })
}

fn required_str(
    obj: &serde_json::Map<String, Value>,
    key: &str,
    model_name: &str,
) -> Result<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            RouterError::BadCatalog(format!(
                "provider of '{}' is missing '{}'",
                model_name, key
            ))
        })
}

fn parse_input_size(value: Option<&Value>, id: &str, model_name: &str) -> Result<u64> {
    match value {
        None | Some(Value::Null) => Ok(4096),
        Some(Value::Number(n)) => n.as_u64().ok_or_else(|| {
            RouterError::BadCatalog(format!(
                "provider '{}' of '{}' has invalid input_size",
                id, model_name
            ))
        }),
        Some(Value::String(s)) => s.trim().parse::<u64>().map_err(|_| {
            RouterError::BadCatalog(format!(
                "provider '{}' of '{}' has non-numeric input_size '{}'",
                id, model_name, s
            ))
        }),
        Some(other) => Err(RouterError::BadCatalog(format!(
            "provider '{}' of '{}' has invalid input_size {}",
            id, model_name, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "active_models": {
            "llm": ["bielik", "llama"]
        },
        "llm": {
            "bielik": {
                "providers": [
                    {
                        "id": "bielik-1",
                        "api_host": "http://gpu-1:8000",
                        "api_type": "vllm",
                        "model_path": "speakleash/Bielik-11B",
                        "input_size": 32768,
                        "weight": 2.0,
                        "keep_alive": "45m"
                    },
                    {
                        "id": "bielik-2",
                        "api_host": "http://gpu-2:11434/",
                        "api_type": "ollama",
                        "model_path": "bielik:11b",
                        "input_size": "4096"
                    }
                ],
                "providers_sleep": []
            },
            "llama": {
                "providers": []
            }
        },
        "embedders": {
            "ignored-model": {
                "providers": [
                    {"id": "x", "api_host": "http://h", "api_type": "openai"}
                ]
            }
        }
    }"#;

    #[test]
    fn test_load_catalog() {
        let catalog = ModelCatalog::from_json_str(CATALOG).unwrap();
        assert_eq!(catalog.models.len(), 2);
        let entry = catalog.entry("bielik").unwrap();
        assert_eq!(entry.providers.len(), 2);
        assert_eq!(entry.providers[0].id, "bielik-1");
        assert_eq!(entry.providers[0].api_type, ApiType::Vllm);
        assert_eq!(entry.providers[0].weight, 2.0);
        assert_eq!(entry.providers[0].keep_alive.as_deref(), Some("45m"));
    }

    #[test]
    fn test_groups_outside_active_models_are_ignored() {
        let catalog = ModelCatalog::from_json_str(CATALOG).unwrap();
        assert!(catalog.entry("ignored-model").is_none());
    }

    #[test]
    fn test_input_size_accepts_numeric_string() {
        let catalog = ModelCatalog::from_json_str(CATALOG).unwrap();
        let entry = catalog.entry("bielik").unwrap();
        assert_eq!(entry.providers[1].input_size, 4096);
    }

    #[test]
    fn test_input_size_rejects_non_numeric_string() {
        let raw = r#"{
            "active_models": {"llm": ["m"]},
            "llm": {"m": {"providers": [
                {"id": "p", "api_host": "http://h", "api_type": "openai", "input_size": "lots"}
            ]}}
        }"#;
        let err = ModelCatalog::from_json_str(raw).unwrap_err();
        assert!(matches!(err, RouterError::BadCatalog(_)));
    }

    #[test]
    fn test_missing_active_models_is_fatal() {
        let err = ModelCatalog::from_json_str(r#"{"llm": {}}"#).unwrap_err();
        assert!(err.to_string().contains("active_models"));
    }

    #[test]
    fn test_active_model_without_config_is_fatal() {
        let raw = r#"{
            "active_models": {"llm": ["ghost"]},
            "llm": {}
        }"#;
        let err = ModelCatalog::from_json_str(raw).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_model_without_providers_key_is_fatal() {
        let raw = r#"{
            "active_models": {"llm": ["m"]},
            "llm": {"m": {}}
        }"#;
        let err = ModelCatalog::from_json_str(raw).unwrap_err();
        assert!(err.to_string().contains("providers"));
    }

    #[test]
    fn test_empty_provider_list_loads() {
        let catalog = ModelCatalog::from_json_str(CATALOG).unwrap();
        let entry = catalog.entry("llama").unwrap();
        assert!(entry.providers.is_empty());
    }

    #[test]
    fn test_duplicate_ids_are_not_fatal() {
        let raw = r#"{
            "active_models": {"llm": ["a", "b"]},
            "llm": {
                "a": {"providers": [{"id": "dup", "api_host": "http://h1", "api_type": "openai"}]},
                "b": {"providers": [{"id": "dup", "api_host": "http://h2", "api_type": "openai"}]}
            }
        }"#;
        let catalog = ModelCatalog::from_json_str(raw).unwrap();
        assert_eq!(catalog.models.len(), 2);
    }

    #[test]
    fn test_unknown_api_type_is_fatal() {
        let raw = r#"{
            "active_models": {"llm": ["m"]},
            "llm": {"m": {"providers": [
                {"id": "p", "api_host": "http://h", "api_type": "bedrock"}
            ]}}
        }"#;
        let err = ModelCatalog::from_json_str(raw).unwrap_err();
        assert!(err.to_string().contains("bedrock"));
    }

    #[test]
    fn test_zero_weight_is_fatal() {
        let raw = r#"{
            "active_models": {"llm": ["m"]},
            "llm": {"m": {"providers": [
                {"id": "p", "api_host": "http://h", "api_type": "openai", "weight": 0}
            ]}}
        }"#;
        assert!(ModelCatalog::from_json_str(raw).is_err());
    }

    #[test]
    fn test_provider_host() {
        let catalog = ModelCatalog::from_json_str(CATALOG).unwrap();
        let entry = catalog.entry("bielik").unwrap();
        assert_eq!(entry.providers[0].host(), "gpu-1:8000");
        assert_eq!(entry.providers[1].host(), "gpu-2:11434");
    }

    #[test]
    fn test_provider_on_host() {
        let catalog = ModelCatalog::from_json_str(CATALOG).unwrap();
        let found = catalog.provider_on_host("bielik", "gpu-2:11434").unwrap();
        assert_eq!(found.id, "bielik-2");
        assert!(catalog.provider_on_host("bielik", "nowhere:1").is_none());
    }

    #[test]
    fn test_load_is_pure() {
        let a = ModelCatalog::from_json_str(CATALOG).unwrap();
        let b = ModelCatalog::from_json_str(CATALOG).unwrap();
        assert_eq!(a.active_model_names(), b.active_model_names());
        assert_eq!(
            a.entry("bielik").unwrap().providers,
            b.entry("bielik").unwrap().providers
        );
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(CATALOG.as_bytes()).unwrap();
        tmp.flush().unwrap();
        let catalog = ModelCatalog::load(tmp.path()).unwrap();
        assert!(catalog.entry("bielik").is_some());
    }

    #[test]
    fn test_load_missing_file() {
        let err = ModelCatalog::load("does/not/exist.json").unwrap_err();
        assert!(matches!(err, RouterError::BadCatalog(_)));
    }

    #[test]
    fn test_max_input_size() {
        let catalog = ModelCatalog::from_json_str(CATALOG).unwrap();
        assert_eq!(catalog.max_input_size("bielik"), 32768);
        assert_eq!(catalog.max_input_size("llama"), 0);
    }
}
