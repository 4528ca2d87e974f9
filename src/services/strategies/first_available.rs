//! First-available selection backed by store locks.
//!
//! Ensures that at most one holder owns a `(model, provider-id)` pair at
//! any time, across every worker process. The lock carries a TTL so that
//! a crashed holder cannot occupy a provider forever.

use async_trait::async_trait;
use std::sync::Arc;

use super::ProviderStrategy;
use crate::core::catalog::ProviderSpec;
use crate::core::error::{Result, RouterError};
use crate::services::store::RedisStore;

/// Extra lock lifetime beyond the request timeout.
pub const LOCK_TTL_GRACE_SECS: u64 = 5;

/// Picks the first provider in list order whose lock can be acquired.
/// One full pass; no waiting.
pub struct FirstAvailableStrategy {
    store: Arc<RedisStore>,
    lock_ttl_secs: u64,
}

impl FirstAvailableStrategy {
    /// `request_timeout_secs` is the per-request deadline; the lock TTL is
    /// that plus a small grace period.
    pub fn new(store: Arc<RedisStore>, request_timeout_secs: u64) -> Self {
        FirstAvailableStrategy {
            store,
            lock_ttl_secs: request_timeout_secs + LOCK_TTL_GRACE_SECS,
        }
    }

    pub(crate) fn store(&self) -> &Arc<RedisStore> {
        &self.store
    }

    /// Try to lock one specific provider.
    pub(crate) async fn try_acquire(
        &self,
        model: &str,
        provider: &ProviderSpec,
    ) -> Result<bool> {
        self.store
            .acquire_provider(model, &provider.id, &provider.host(), self.lock_ttl_secs)
            .await
    }
}

#[async_trait]
impl ProviderStrategy for FirstAvailableStrategy {
    fn name(&self) -> &'static str {
        "first_available"
    }

    async fn choose(&self, model: &str, providers: &[ProviderSpec]) -> Result<ProviderSpec> {
        if providers.is_empty() {
            return Err(RouterError::NoProviderAvailable(model.to_string()));
        }

        for provider in providers {
            if self.try_acquire(model, provider).await? {
                tracing::debug!(
                    model = %model,
                    provider = %provider.id,
                    "provider lock acquired"
                );
                return Ok(provider.clone());
            }
        }

        Err(RouterError::NoProviderAvailable(model.to_string()))
    }

    async fn release(&self, model: &str, provider: &ProviderSpec) -> Result<()> {
        self.store
            .release_provider(model, &provider.id, &provider.host())
            .await
    }

    async fn refresh(&self, model: &str, provider: &ProviderSpec) -> Result<()> {
        self.store
            .refresh_provider_lock(model, &provider.id, self.lock_ttl_secs)
            .await
    }
}
