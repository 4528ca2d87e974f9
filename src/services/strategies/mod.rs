//! Provider-selection strategies.
//!
//! Each strategy implements the common [`ProviderStrategy`] contract and
//! keeps its own state behind that boundary. In-memory strategies guard
//! per-model counters with a mutex; the `first_available*` family keeps
//! all coordination state in the shared store so that multiple worker
//! processes agree on who holds which provider.

mod balanced;
mod first_available;
mod first_available_optim;
mod weighted;

pub use balanced::BalancedStrategy;
pub use first_available::FirstAvailableStrategy;
pub use first_available_optim::FirstAvailableOptimStrategy;
pub use weighted::WeightedStrategy;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::core::catalog::ProviderSpec;
use crate::core::error::{Result, RouterError};
use crate::services::store::RedisStore;

/// Common contract for picking one provider from a model's list.
///
/// Implementations must be safe under concurrent calls from many request
/// handlers, and must never hold an in-process mutex across store I/O.
#[async_trait]
pub trait ProviderStrategy: Send + Sync {
    /// Strategy name as configured via the environment.
    fn name(&self) -> &'static str;

    /// Pick one provider for `model` from `providers` (configuration
    /// order). Fails with `NoProviderAvailable` when the list is empty or
    /// every provider is busy.
    async fn choose(&self, model: &str, providers: &[ProviderSpec]) -> Result<ProviderSpec>;

    /// Release a previously chosen provider. A no-op for strategies
    /// without durable acquisition state.
    async fn release(&self, _model: &str, _provider: &ProviderSpec) -> Result<()> {
        Ok(())
    }

    /// Extend the acquisition before a long-running sub-request. A no-op
    /// for strategies without lock TTLs.
    async fn refresh(&self, _model: &str, _provider: &ProviderSpec) -> Result<()> {
        Ok(())
    }

    /// Feed back the observed upstream latency for a provider.
    fn record_latency(&self, _provider: &ProviderSpec, _latency: Duration) {}

    /// Feed back an upstream failure for a provider.
    fn record_failure(&self, _provider: &ProviderSpec) {}

    /// Feed back an upstream success for a provider.
    fn record_success(&self, _provider: &ProviderSpec) {}
}

/// Build the strategy named in the configuration.
///
/// `store` must be present for the `first_available*` family; the caller
/// verifies that before calling.
pub fn build_strategy(
    name: &str,
    store: Option<Arc<RedisStore>>,
    request_timeout_secs: u64,
) -> Result<Arc<dyn ProviderStrategy>> {
    match name {
        "balanced" => Ok(Arc::new(BalancedStrategy::new())),
        "weighted" => Ok(Arc::new(WeightedStrategy::new())),
        "dynamic_weighted" => Ok(Arc::new(WeightedStrategy::dynamic())),
        "first_available" => {
            let store = store.ok_or_else(|| {
                RouterError::StoreUnavailable("first_available requires the store".to_string())
            })?;
            Ok(Arc::new(FirstAvailableStrategy::new(
                store,
                request_timeout_secs,
            )))
        }
        "first_available_optim" => {
            let store = store.ok_or_else(|| {
                RouterError::StoreUnavailable(
                    "first_available_optim requires the store".to_string(),
                )
            })?;
            Ok(Arc::new(FirstAvailableOptimStrategy::new(
                store,
                request_timeout_secs,
            )))
        }
        other => Err(RouterError::Internal(format!(
            "unknown balance strategy '{}'",
            other
        ))),
    }
}

/// Selection key for a provider within one model's pool.
pub(crate) fn provider_key(provider: &ProviderSpec) -> &str {
    &provider.id
}
