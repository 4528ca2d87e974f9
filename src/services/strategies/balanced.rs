//! Least-usage round-robin selection.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{provider_key, ProviderStrategy};
use crate::core::catalog::ProviderSpec;
use crate::core::error::{Result, RouterError};

/// Picks the provider with the smallest per-model usage counter, ties
/// broken by list order. Counters live for the process lifetime.
pub struct BalancedStrategy {
    usage_counters: Mutex<HashMap<String, HashMap<String, u64>>>,
}

impl BalancedStrategy {
    pub fn new() -> Self {
        BalancedStrategy {
            usage_counters: Mutex::new(HashMap::new()),
        }
    }

    /// Current usage counter for a `(model, provider)` pair.
    #[cfg(test)]
    fn usage(&self, model: &str, provider_id: &str) -> u64 {
        self.usage_counters
            .lock()
            .unwrap()
            .get(model)
            .and_then(|m| m.get(provider_id))
            .copied()
            .unwrap_or(0)
    }
}

impl Default for BalancedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderStrategy for BalancedStrategy {
    fn name(&self) -> &'static str {
        "balanced"
    }

    async fn choose(&self, model: &str, providers: &[ProviderSpec]) -> Result<ProviderSpec> {
        if providers.is_empty() {
            return Err(RouterError::NoProviderAvailable(model.to_string()));
        }

        let mut counters = self.usage_counters.lock().unwrap();
        let model_counters = counters.entry(model.to_string()).or_default();

        let mut chosen = &providers[0];
        let mut min_used = u64::MAX;
        for provider in providers {
            let used = model_counters
                .get(provider_key(provider))
                .copied()
                .unwrap_or(0);
            if used < min_used {
                min_used = used;
                chosen = provider;
            }
        }

        *model_counters
            .entry(provider_key(chosen).to_string())
            .or_insert(0) += 1;

        Ok(chosen.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::provider;
    use super::*;

    #[tokio::test]
    async fn test_round_robin_sequence() {
        let strategy = BalancedStrategy::new();
        let providers = vec![provider("A", 1.0), provider("B", 1.0)];

        let mut picked = Vec::new();
        for _ in 0..4 {
            picked.push(strategy.choose("m", &providers).await.unwrap().id);
        }
        assert_eq!(picked, vec!["A", "B", "A", "B"]);
    }

    #[tokio::test]
    async fn test_counts_differ_by_at_most_one() {
        let strategy = BalancedStrategy::new();
        let providers = vec![provider("A", 1.0), provider("B", 1.0), provider("C", 1.0)];

        for _ in 0..100 {
            strategy.choose("m", &providers).await.unwrap();
        }

        let counts = [
            strategy.usage("m", "A"),
            strategy.usage("m", "B"),
            strategy.usage("m", "C"),
        ];
        let max = counts.iter().max().unwrap();
        let min = counts.iter().min().unwrap();
        assert!(max - min <= 1, "counts: {:?}", counts);
    }

    #[tokio::test]
    async fn test_empty_providers() {
        let strategy = BalancedStrategy::new();
        let err = strategy.choose("m", &[]).await.unwrap_err();
        assert!(matches!(err, RouterError::NoProviderAvailable(_)));
    }

    #[tokio::test]
    async fn test_counters_are_per_model() {
        let strategy = BalancedStrategy::new();
        let providers = vec![provider("A", 1.0), provider("B", 1.0)];

        assert_eq!(strategy.choose("m1", &providers).await.unwrap().id, "A");
        // Fresh model starts from the first provider again.
        assert_eq!(strategy.choose("m2", &providers).await.unwrap().id, "A");
        assert_eq!(strategy.choose("m1", &providers).await.unwrap().id, "B");
    }

    #[tokio::test]
    async fn test_release_is_noop() {
        let strategy = BalancedStrategy::new();
        let p = provider("A", 1.0);
        strategy.choose("m", std::slice::from_ref(&p)).await.unwrap();
        assert!(strategy.release("m", &p).await.is_ok());
        assert_eq!(strategy.usage("m", "A"), 1);
    }

    #[tokio::test]
    async fn test_concurrent_choose() {
        use std::sync::Arc;

        let strategy = Arc::new(BalancedStrategy::new());
        let providers = Arc::new(vec![provider("A", 1.0), provider("B", 1.0)]);

        let mut handles = Vec::new();
        for _ in 0..50 {
            let strategy = strategy.clone();
            let providers = providers.clone();
            handles.push(tokio::spawn(async move {
                strategy.choose("m", &providers).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let a = strategy.usage("m", "A");
        let b = strategy.usage("m", "B");
        assert_eq!(a + b, 50);
        assert_eq!(a, 25);
        assert_eq!(b, 25);
    }
}
