//! Configuration management for the LLM router.
//!
//! All settings are read from `LLM_ROUTER_*` environment variables so the
//! deployment environment controls behaviour without code changes. The
//! historical `LLM_PROXY_API_*` spelling is still honoured as an alias;
//! `LLM_ROUTER_*` is canonical.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;

/// Canonical environment prefix.
pub const ENV_PREFIX: &str = "LLM_ROUTER_";
/// Historical alias kept for older deployments.
pub const LEGACY_ENV_PREFIX: &str = "LLM_PROXY_API_";

/// Names of the selection strategies accepted by
/// [`AppConfig::balance_strategy`].
pub const BALANCE_STRATEGIES: [&str; 5] = [
    "balanced",
    "weighted",
    "dynamic_weighted",
    "first_available",
    "first_available_optim",
];

/// Main application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Path to the model catalog file.
    pub models_config_path: String,
    /// Root of the prompt template tree.
    pub prompts_dir: String,
    /// Prefix prepended to endpoint paths that do not opt out.
    pub api_prefix: String,
    /// Default language for system prompt resolution.
    pub default_language: String,
    /// Per-request deadline in seconds.
    pub request_timeout_secs: u64,
    /// Timeout for the upstream HTTP leg in seconds.
    pub external_timeout_secs: u64,
    /// Name of the active provider-selection strategy.
    pub balance_strategy: String,
    /// Server bind settings.
    pub server: ServerConfig,
    /// Coordination store settings.
    pub redis: RedisConfig,
    /// Masking pipeline toggles.
    pub masking: MaskingConfig,
    /// Guardrail pipeline toggles.
    pub guardrails: GuardrailConfig,
    /// Whether the Prometheus exposition endpoint is enabled.
    pub use_prometheus: bool,
    /// Keep-alive monitor check interval in seconds.
    pub keepalive_check_interval_secs: u64,
    /// Provider monitor check interval in seconds.
    pub provider_monitor_interval_secs: u64,
    /// Whether the coordination buffers are purged at startup.
    pub clear_buffers: bool,
    /// Proxy-only mode flag; the router refuses to start without it.
    pub minimum_mode: bool,
}

/// Server bind configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub threads: usize,
}

/// Coordination store connection settings.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
}

impl RedisConfig {
    /// Whether a store host was configured at all.
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty()
    }

    /// Connection URL in the `redis://` scheme.
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

/// Masking pipeline configuration.
#[derive(Debug, Clone, Default)]
pub struct MaskingConfig {
    pub force: bool,
    pub with_audit: bool,
    pub pipeline: Vec<String>,
}

/// Guardrail pipeline configuration.
#[derive(Debug, Clone, Default)]
pub struct GuardrailConfig {
    pub force_request: bool,
    pub request_with_audit: bool,
    pub request_pipeline: Vec<String>,
    pub force_response: bool,
    pub response_with_audit: bool,
    pub response_pipeline: Vec<String>,
}

/// Read an env var under the canonical prefix, falling back to the legacy
/// alias with a deprecation warning.
pub fn env_value(name: &str) -> Option<String> {
    if let Ok(v) = std::env::var(format!("{}{}", ENV_PREFIX, name)) {
        return Some(v);
    }
    if let Ok(v) = std::env::var(format!("{}{}", LEGACY_ENV_PREFIX, name)) {
        tracing::warn!(
            variable = %format!("{}{}", LEGACY_ENV_PREFIX, name),
            "legacy environment prefix is deprecated, use LLM_ROUTER_*"
        );
        return Some(v);
    }
    None
}

fn env_or(name: &str, default: &str) -> String {
    env_value(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
    match env_value(name) {
        Some(v) => v
            .trim()
            .parse::<u64>()
            .with_context(|| format!("{}{} must be an integer", ENV_PREFIX, name)),
        None => Ok(default),
    }
}

/// Accepts `true`, `1`, `yes`, `on`, `t` (case-insensitive).
pub fn bool_env_value(name: &str) -> bool {
    env_value(name)
        .map(|v| {
            matches!(
                v.trim().to_lowercase().as_str(),
                "true" | "1" | "yes" | "on" | "t"
            )
        })
        .unwrap_or(false)
}

fn env_list(name: &str, default: &str) -> Vec<String> {
    env_or(name, default)
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl AppConfig {
    /// Load the configuration from the environment and validate it.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = AppConfig {
            models_config_path: env_or("MODELS_CONFIG", "resources/configs/models-config.json"),
            prompts_dir: env_or("PROMPTS_DIR", "resources/prompts"),
            api_prefix: normalize_prefix(&env_or("EP_PREFIX", "/api")),
            default_language: env_or("DEFAULT_LANGUAGE", "pl"),
            request_timeout_secs: env_u64("TIMEOUT", 300)?,
            external_timeout_secs: env_u64("EXTERNAL_TIMEOUT", 300)?,
            balance_strategy: env_or("BALANCE_STRATEGY", "balanced").to_lowercase(),
            server: ServerConfig {
                host: env_or("SERVER_HOST", "0.0.0.0"),
                port: env_u64("SERVER_PORT", 8080)? as u16,
                workers: env_u64("SERVER_WORKERS_COUNT", 2)? as usize,
                threads: env_u64("SERVER_THREADS_COUNT", 8)? as usize,
            },
            redis: RedisConfig {
                host: env_or("REDIS_HOST", ""),
                port: env_u64("REDIS_PORT", 6379)? as u16,
                db: env_u64("REDIS_DB", 0)? as i64,
                password: env_value("REDIS_PASSWORD")
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty()),
            },
            masking: MaskingConfig {
                force: bool_env_value("FORCE_MASKING"),
                with_audit: bool_env_value("MASKING_WITH_AUDIT"),
                pipeline: env_list("MASKING_STRATEGY_PIPELINE", "fast_masker"),
            },
            guardrails: GuardrailConfig {
                force_request: bool_env_value("FORCE_GUARDRAIL_REQUEST"),
                request_with_audit: bool_env_value("GUARDRAIL_WITH_AUDIT_REQUEST"),
                request_pipeline: env_list("GUARDRAIL_STRATEGY_PIPELINE_REQUEST", ""),
                force_response: bool_env_value("FORCE_GUARDRAIL_RESPONSE"),
                response_with_audit: bool_env_value("GUARDRAIL_WITH_AUDIT_RESPONSE"),
                response_pipeline: env_list("GUARDRAIL_STRATEGY_PIPELINE_RESPONSE", ""),
            },
            use_prometheus: bool_env_value("USE_PROMETHEUS"),
            keepalive_check_interval_secs: env_u64("KEEPALIVE_MODEL_MONITOR_INTERVAL_SECONDS", 1)?,
            provider_monitor_interval_secs: env_u64("PROVIDER_MONITOR_INTERVAL_SECONDS", 5)?,
            clear_buffers: true,
            minimum_mode: bool_env_value("MINIMUM"),
        };

        config.verify()?;
        Ok(config)
    }

    /// Validate the loaded configuration. Failures here must abort startup
    /// before any traffic is served.
    pub fn verify(&self) -> Result<()> {
        if !self.minimum_mode {
            bail!(
                "the router only supports service-as-proxy mode; \
                 set {}MINIMUM=1 to start",
                ENV_PREFIX
            );
        }

        if !BALANCE_STRATEGIES.contains(&self.balance_strategy.as_str()) {
            bail!(
                "'{}' is not a valid balance strategy; available: {}",
                self.balance_strategy,
                BALANCE_STRATEGIES.join(", ")
            );
        }

        if self.strategy_requires_store() && !self.redis.is_configured() {
            bail!(
                "strategy '{}' requires the coordination store; set {}REDIS_HOST",
                self.balance_strategy,
                ENV_PREFIX
            );
        }

        if self.masking.force && self.masking.pipeline.is_empty() {
            bail!("FORCE_MASKING requires a non-empty masking pipeline");
        }
        if self.guardrails.force_request && self.guardrails.request_pipeline.is_empty() {
            bail!("FORCE_GUARDRAIL_REQUEST requires a non-empty request pipeline");
        }
        if self.guardrails.force_response && self.guardrails.response_pipeline.is_empty() {
            bail!("FORCE_GUARDRAIL_RESPONSE requires a non-empty response pipeline");
        }

        Ok(())
    }

    /// Whether the configured strategy keeps state in the shared store.
    pub fn strategy_requires_store(&self) -> bool {
        matches!(
            self.balance_strategy.as_str(),
            "first_available" | "first_available_optim"
        )
    }

    /// Test-friendly constructor with sensible defaults and no env reads.
    pub fn for_tests() -> Self {
        AppConfig {
            models_config_path: String::new(),
            prompts_dir: "resources/prompts".to_string(),
            api_prefix: "/api".to_string(),
            default_language: "pl".to_string(),
            request_timeout_secs: 300,
            external_timeout_secs: 300,
            balance_strategy: "balanced".to_string(),
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                workers: 2,
                threads: 8,
            },
            redis: RedisConfig {
                host: String::new(),
                port: 6379,
                db: 0,
                password: None,
            },
            masking: MaskingConfig::default(),
            guardrails: GuardrailConfig::default(),
            use_prometheus: false,
            keepalive_check_interval_secs: 1,
            provider_monitor_interval_secs: 5,
            clear_buffers: true,
            minimum_mode: true,
        }
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Expand `${VAR}` / `${VAR:-default}` references inside configuration text.
///
/// Used for catalog files that embed tokens from the environment.
pub fn expand_env_vars(content: &str) -> String {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let inner = &after[..end];
                let (name, default) = match inner.split_once(":-").or_else(|| inner.split_once(':'))
                {
                    Some((n, d)) => (n, d),
                    None => (inner, ""),
                };
                let value = std::env::var(name).unwrap_or_else(|_| default.to_string());
                result.push_str(&value);
                rest = &after[end + 1..];
            }
            None => {
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    result
}

/// Summarize the environment toggles for startup logging, with secrets
/// masked.
pub fn summarize(config: &AppConfig) -> HashMap<&'static str, String> {
    let mut summary = HashMap::new();
    summary.insert("strategy", config.balance_strategy.clone());
    summary.insert("prefix", config.api_prefix.clone());
    summary.insert(
        "redis",
        if config.redis.is_configured() {
            format!("{}:{}/{}", config.redis.host, config.redis.port, config.redis.db)
        } else {
            "disabled".to_string()
        },
    );
    summary.insert("timeout_secs", config.request_timeout_secs.to_string());
    summary
}
