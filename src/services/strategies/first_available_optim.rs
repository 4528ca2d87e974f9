//! Host-affinity optimisation over the first-available strategy.
//!
//! Ordered attempts, first success wins:
//!
//! 1. re-use the host that most recently served the model,
//! 2. re-use any host already serving the model,
//! 3. spread to a host with no occupancy at all,
//! 4. fall back to the plain first-available pass.
//!
//! Every claimed success is witnessed by the same atomic lock acquisition
//! the base strategy uses, so steps 1-3 can never select an occupied
//! `(model, provider)` pair.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use super::first_available::FirstAvailableStrategy;
use super::ProviderStrategy;
use crate::core::catalog::ProviderSpec;
use crate::core::error::{Result, RouterError};
use crate::services::store::RedisStore;

pub struct FirstAvailableOptimStrategy {
    inner: FirstAvailableStrategy,
}

impl FirstAvailableOptimStrategy {
    pub fn new(store: Arc<RedisStore>, request_timeout_secs: u64) -> Self {
        FirstAvailableOptimStrategy {
            inner: FirstAvailableStrategy::new(store, request_timeout_secs),
        }
    }

    fn store(&self) -> &Arc<RedisStore> {
        self.inner.store()
    }

    /// Step 1: the host that served the model last, unless another model
    /// holds it or it disappeared from the catalog.
    async fn try_last_host(
        &self,
        model: &str,
        providers: &[ProviderSpec],
        attempted: &mut HashSet<String>,
    ) -> Result<Option<ProviderSpec>> {
        let Some(last_host) = self.store().last_host(model).await? else {
            return Ok(None);
        };

        let candidates: Vec<&ProviderSpec> = providers
            .iter()
            .filter(|p| p.host() == last_host)
            .collect();
        if candidates.is_empty() {
            // The remembered host no longer appears in the catalog.
            self.store().clear_last_host(model).await?;
            return Ok(None);
        }

        let occupants = self.store().host_occupants(&last_host).await?;
        let held_by_other = occupants
            .iter()
            .any(|(occupant, count)| occupant != model && *count > 0);
        if held_by_other {
            return Ok(None);
        }

        for provider in candidates {
            attempted.insert(provider.id.clone());
            if self.inner.try_acquire(model, provider).await? {
                return Ok(Some(provider.clone()));
            }
        }
        Ok(None)
    }

    /// Step 2: any host already serving the model, in list order.
    async fn try_known_hosts(
        &self,
        model: &str,
        providers: &[ProviderSpec],
        attempted: &mut HashSet<String>,
    ) -> Result<Option<ProviderSpec>> {
        let known: HashSet<String> = self.store().model_hosts(model).await?.into_iter().collect();
        if known.is_empty() {
            return Ok(None);
        }

        for provider in providers {
            if attempted.contains(&provider.id) || !known.contains(&provider.host()) {
                continue;
            }
            attempted.insert(provider.id.clone());
            if self.inner.try_acquire(model, provider).await? {
                return Ok(Some(provider.clone()));
            }
        }
        Ok(None)
    }

    /// Step 3: hosts with no occupancy at all, to spread load onto idle
    /// boxes before doubling up.
    async fn try_unused_hosts(
        &self,
        model: &str,
        providers: &[ProviderSpec],
        attempted: &mut HashSet<String>,
    ) -> Result<Option<ProviderSpec>> {
        let known: HashSet<String> = self.store().model_hosts(model).await?.into_iter().collect();

        for provider in providers {
            if attempted.contains(&provider.id) {
                continue;
            }
            let host = provider.host();
            if known.contains(&host) {
                continue;
            }
            if !self.store().host_is_free(&host).await? {
                continue;
            }
            attempted.insert(provider.id.clone());
            if self.inner.try_acquire(model, provider).await? {
                return Ok(Some(provider.clone()));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl ProviderStrategy for FirstAvailableOptimStrategy {
    fn name(&self) -> &'static str {
        "first_available_optim"
    }

    async fn choose(&self, model: &str, providers: &[ProviderSpec]) -> Result<ProviderSpec> {
        if providers.is_empty() {
            return Err(RouterError::NoProviderAvailable(model.to_string()));
        }

        let mut attempted: HashSet<String> = HashSet::new();

        if let Some(provider) = self.try_last_host(model, providers, &mut attempted).await? {
            tracing::debug!(model = %model, provider = %provider.id, "re-used last host");
            return Ok(provider);
        }

        if let Some(provider) = self.try_known_hosts(model, providers, &mut attempted).await? {
            tracing::debug!(model = %model, provider = %provider.id, "re-used known host");
            return Ok(provider);
        }

        if let Some(provider) = self.try_unused_hosts(model, providers, &mut attempted).await? {
            tracing::debug!(model = %model, provider = %provider.id, "spread to idle host");
            return Ok(provider);
        }

        // Step 4: plain pass over everything not yet attempted.
        for provider in providers {
            if attempted.contains(&provider.id) {
                continue;
            }
            if self.inner.try_acquire(model, provider).await? {
                return Ok(provider.clone());
            }
        }

        Err(RouterError::NoProviderAvailable(model.to_string()))
    }

    async fn release(&self, model: &str, provider: &ProviderSpec) -> Result<()> {
        self.inner.release(model, provider).await
    }

    async fn refresh(&self, model: &str, provider: &ProviderSpec) -> Result<()> {
        self.inner.refresh(model, provider).await
    }
}
