//! Keep-alive monitor.
//!
//! A single background task per process that pings idle providers so that
//! upstream model weights stay resident on their GPUs. Scheduling state
//! lives in the coordination store (see `store.rs` key shapes), which
//! makes the monitor safe to run in every worker: the sorted set is the
//! shared clock, and whichever worker observes a due entry first
//! reschedules it.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::core::catalog::{ModelCatalog, ProviderSpec};
use crate::core::dispatcher;
use crate::core::metrics::get_metrics;
use crate::services::store::{split_keepalive_member, RedisStore};

/// The literal prompt sent to keep a model warm.
pub const KEEP_ALIVE_PROMPT: &str = "Send an empty message.";

/// Upper bound on a single ping round-trip.
const PING_TIMEOUT: Duration = Duration::from_secs(30);

/// Token budget for the ping completion.
const PING_MAX_TOKENS: u32 = 56;

/// Background keep-alive loop.
pub struct KeepAliveMonitor {
    store: Arc<RedisStore>,
    catalog: Arc<ModelCatalog>,
    client: reqwest::Client,
    check_interval: Duration,
    clear_buffers: bool,
}

impl KeepAliveMonitor {
    pub fn new(
        store: Arc<RedisStore>,
        catalog: Arc<ModelCatalog>,
        client: reqwest::Client,
        check_interval_secs: u64,
        clear_buffers: bool,
    ) -> Self {
        KeepAliveMonitor {
            store,
            catalog,
            client,
            check_interval: Duration::from_secs(check_interval_secs.max(1)),
            clear_buffers,
        }
    }

    /// Spawn the monitor task. Called once at startup.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            if self.clear_buffers {
                if let Err(err) = self.store.clear_keepalive_buffers().await {
                    tracing::warn!(error = %err, "keep-alive buffer purge failed");
                }
            }
            tracing::debug!("keep-alive monitor started");

            let mut ticker = tokio::time::interval(self.check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = self.tick().await {
                    tracing::warn!(error = %err, "keep-alive tick failed");
                }
            }
        })
    }

    /// One pass over the due entries of the wakeup schedule.
    async fn tick(&self) -> crate::core::error::Result<()> {
        let now = chrono::Utc::now().timestamp();
        let due = self.store.due_keepalives(now).await?;

        for member in due {
            let Some((model, host)) = split_keepalive_member(&member) else {
                self.store.remove_keepalive(&member).await?;
                continue;
            };

            let keep_alive_seconds = self
                .store
                .keepalive_seconds(&model, &host)
                .await?
                .unwrap_or(0);
            if keep_alive_seconds == 0 {
                // Dangling score without a backing hash entry.
                self.store.remove_keepalive(&member).await?;
                continue;
            }

            if !self.store.host_is_free(&host).await? {
                // Host busy serving real traffic, no ping needed yet.
                self.store
                    .reschedule_keepalive(&member, now + keep_alive_seconds as i64)
                    .await?;
                continue;
            }

            let Some(provider) = self.catalog.provider_on_host(&model, &host) else {
                tracing::warn!(
                    model = %model,
                    host = %host,
                    "keep-alive entry without catalog provider, dropping"
                );
                self.store.remove_keepalive(&member).await?;
                continue;
            };

            let outcome = self.send_ping(&model, provider).await;
            let next = match outcome {
                Ok(()) => {
                    get_metrics()
                        .keepalive_pings
                        .with_label_values(&[&model, &host, "ok"])
                        .inc();
                    chrono::Utc::now().timestamp() + keep_alive_seconds as i64
                }
                Err(err) => {
                    get_metrics()
                        .keepalive_pings
                        .with_label_values(&[&model, &host, "error"])
                        .inc();
                    tracing::warn!(
                        model = %model,
                        host = %host,
                        error = %err,
                        "keep-alive ping failed"
                    );
                    chrono::Utc::now().timestamp() + keep_alive_seconds.max(30) as i64
                }
            };
            self.store.reschedule_keepalive(&member, next).await?;
        }

        Ok(())
    }

    async fn send_ping(&self, model: &str, provider: &ProviderSpec) -> anyhow::Result<()> {
        let url = dispatcher::chat_url(&provider.api_host, provider.api_type)?;
        let payload = ping_payload(model, provider);

        tracing::debug!(model = %model, url = %url, "sending keep-alive prompt");

        let mut request = self.client.post(&url).timeout(PING_TIMEOUT).json(&payload);
        if let Some(token) = &provider.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        response.error_for_status()?;
        Ok(())
    }
}

/// Minimal chat payload for a keep-alive ping.
pub fn ping_payload(model: &str, provider: &ProviderSpec) -> Value {
    let upstream_model = if provider.model_path.is_empty() {
        model
    } else {
        &provider.model_path
    };
    json!({
        "stream": false,
        "model": upstream_model,
        "messages": [{"role": "user", "content": KEEP_ALIVE_PROMPT}],
        "max_tokens": PING_MAX_TOKENS,
        "temperature": 0.0,
        "options": {},
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dispatcher::ApiType;

    fn provider(api_type: ApiType, model_path: &str) -> ProviderSpec {
        ProviderSpec {
            id: "p1".to_string(),
            api_host: "http://gpu-1:8000".to_string(),
            api_token: None,
            api_type,
            model_path: model_path.to_string(),
            input_size: 4096,
            weight: 1.0,
            keep_alive: Some("45m".to_string()),
            tool_calling: false,
        }
    }

    #[test]
    fn test_ping_payload_uses_model_path() {
        let payload = ping_payload("bielik", &provider(ApiType::Vllm, "org/bielik-11b"));
        assert_eq!(payload["model"], "org/bielik-11b");
        assert_eq!(payload["stream"], false);
        assert_eq!(payload["messages"][0]["content"], KEEP_ALIVE_PROMPT);
        assert_eq!(payload["options"], json!({}));
    }

    #[test]
    fn test_ping_payload_falls_back_to_model_name() {
        let payload = ping_payload("bielik", &provider(ApiType::Ollama, ""));
        assert_eq!(payload["model"], "bielik");
    }

    #[test]
    fn test_ping_targets_chat_path() {
        let p = provider(ApiType::Ollama, "");
        let url = dispatcher::chat_url(&p.api_host, p.api_type).unwrap();
        assert_eq!(url, "http://gpu-1:8000/api/chat");
    }
}
