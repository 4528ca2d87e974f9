//! Provider resolution for a single request.
//!
//! The chooser is the only caller of the strategy contract: it looks the
//! model up in the catalog, delegates the pick, registers keep-alive
//! bookkeeping and hands the endpoint layer a resolved [`ApiModel`].

use std::sync::Arc;
use std::time::Duration;

use crate::core::catalog::{ModelCatalog, ProviderSpec};
use crate::core::dispatcher::{self, ApiType};
use crate::core::duration::parse_duration_seconds;
use crate::core::error::{Result, RouterError};
use crate::core::metrics::get_metrics;
use crate::services::store::RedisStore;
use crate::services::strategies::ProviderStrategy;

/// The per-request view handed to the HTTP layer: the chosen provider
/// plus the logical model name the client asked for.
#[derive(Debug, Clone)]
pub struct ApiModel {
    pub name: String,
    pub provider: ProviderSpec,
}

impl ApiModel {
    /// Identifier to pass upstream in the `model` field.
    pub fn upstream_model(&self) -> &str {
        if self.provider.model_path.is_empty() {
            &self.name
        } else {
            &self.provider.model_path
        }
    }

    pub fn api_type(&self) -> ApiType {
        self.provider.api_type
    }

    /// Full upstream chat URL for this provider.
    pub fn chat_url(&self) -> Result<String> {
        dispatcher::chat_url(&self.provider.api_host, self.provider.api_type)
    }

    /// Full upstream embeddings URL for this provider.
    pub fn embeddings_url(&self) -> Result<String> {
        dispatcher::embeddings_url(&self.provider.api_host, self.provider.api_type)
    }

    /// Full upstream Responses API URL for this provider.
    pub fn responses_url(&self) -> Result<String> {
        dispatcher::responses_url(&self.provider.api_host, self.provider.api_type)
    }
}

/// Resolves model names to concrete providers through the configured
/// strategy. One instance per process, shared by every handler.
pub struct ProviderChooser {
    catalog: Arc<ModelCatalog>,
    strategy: Arc<dyn ProviderStrategy>,
    store: Option<Arc<RedisStore>>,
}

impl ProviderChooser {
    pub fn new(
        catalog: Arc<ModelCatalog>,
        strategy: Arc<dyn ProviderStrategy>,
        store: Option<Arc<RedisStore>>,
    ) -> Self {
        ProviderChooser {
            catalog,
            strategy,
            store,
        }
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Resolve `model_name` to a provider.
    pub async fn choose(&self, model_name: &str) -> Result<ApiModel> {
        let entry = self.catalog.entry(model_name).ok_or_else(|| {
            RouterError::NoProviderAvailable(model_name.to_string())
        })?;

        let metrics = get_metrics();
        let provider = match self.strategy.choose(model_name, &entry.providers).await {
            Ok(provider) => provider,
            Err(err) => {
                metrics
                    .selection_failures
                    .with_label_values(&[self.strategy.name(), model_name])
                    .inc();
                return Err(err);
            }
        };

        metrics
            .provider_selections
            .with_label_values(&[self.strategy.name(), model_name, &provider.id])
            .inc();

        self.register_keepalive(model_name, &provider).await;

        Ok(ApiModel {
            name: model_name.to_string(),
            provider,
        })
    }

    /// Release the provider; always safe to call, including on error
    /// paths. Release failures are logged, never surfaced.
    pub async fn release(&self, api_model: &ApiModel) {
        if let Err(err) = self
            .strategy
            .release(&api_model.name, &api_model.provider)
            .await
        {
            tracing::warn!(
                model = %api_model.name,
                provider = %api_model.provider.id,
                error = %err,
                "provider release failed"
            );
        }
    }

    /// Extend the provider acquisition before a long sub-request.
    pub async fn refresh(&self, api_model: &ApiModel) -> Result<()> {
        self.strategy
            .refresh(&api_model.name, &api_model.provider)
            .await
    }

    pub fn record_latency(&self, api_model: &ApiModel, latency: Duration) {
        self.strategy.record_latency(&api_model.provider, latency);
    }

    pub fn record_failure(&self, api_model: &ApiModel) {
        self.strategy.record_failure(&api_model.provider);
    }

    pub fn record_success(&self, api_model: &ApiModel) {
        self.strategy.record_success(&api_model.provider);
    }

    /// Schedule keep-alive pings for providers that request them. Missing
    /// store or a store hiccup only costs the warm-keeping, never the
    /// request.
    async fn register_keepalive(&self, model_name: &str, provider: &ProviderSpec) {
        let Some(keep_alive) = &provider.keep_alive else {
            return;
        };
        let Some(store) = &self.store else {
            return;
        };
        let Some(seconds) = parse_duration_seconds(keep_alive) else {
            tracing::warn!(
                model = %model_name,
                provider = %provider.id,
                keep_alive = %keep_alive,
                "invalid keep_alive duration"
            );
            return;
        };

        if let Err(err) = store
            .record_keepalive(model_name, &provider.host(), seconds)
            .await
        {
            tracing::warn!(
                model = %model_name,
                host = %provider.host(),
                error = %err,
                "keep-alive registration failed"
            );
        }
    }
}

/// Ownership token for a chosen provider.
///
/// The lease must be released exactly once, on response end, success or
/// error. Explicit release is preferred; if the lease is dropped while
/// still held (client disconnect mid-stream), the release is spawned as a
/// background task so locking strategies never leak a provider.
pub struct ProviderLease {
    chooser: Arc<ProviderChooser>,
    api_model: ApiModel,
    held: bool,
}

impl ProviderLease {
    pub fn new(chooser: Arc<ProviderChooser>, api_model: ApiModel) -> Self {
        ProviderLease {
            chooser,
            api_model,
            held: true,
        }
    }

    pub fn api_model(&self) -> &ApiModel {
        &self.api_model
    }

    /// Release the provider now.
    pub async fn release(mut self) {
        if self.held {
            self.held = false;
            self.chooser.release(&self.api_model).await;
        }
    }

    /// Extend the acquisition (multi-shot sub-requests).
    pub async fn refresh(&self) -> Result<()> {
        self.chooser.refresh(&self.api_model).await
    }
}

impl Drop for ProviderLease {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        let chooser = self.chooser.clone();
        let api_model = self.api_model.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                chooser.release(&api_model).await;
            });
        }
    }
}
