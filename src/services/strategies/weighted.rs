//! Smooth weighted round-robin selection, with an optional dynamic mode
//! that penalizes slow or failing providers.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{provider_key, ProviderStrategy};
use crate::core::catalog::ProviderSpec;
use crate::core::error::{Result, RouterError};

/// EMA smoothing factor for observed latencies.
const LATENCY_EMA_ALPHA: f64 = 0.2;
/// Clamp bounds for the latency penalty multiplier.
const PENALTY_LO: f64 = 0.1;
const PENALTY_HI: f64 = 10.0;
/// Consecutive failures that trigger the backoff multiplier.
const FAILURE_STREAK_THRESHOLD: u32 = 3;
/// Weight multiplier applied while a provider is backed off.
const FAILURE_WEIGHT_FACTOR: f64 = 0.1;
/// How long the backoff multiplier stays in force.
const FAILURE_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Default)]
struct PenaltyState {
    ema_latency: Option<f64>,
    failure_streak: u32,
    backoff_until: Option<Instant>,
}

impl PenaltyState {
    fn multiplier(&self, now: Instant) -> f64 {
        let mut factor = match self.ema_latency {
            Some(ema) if ema > 0.0 => (1.0 / ema).clamp(PENALTY_LO, PENALTY_HI),
            _ => 1.0,
        };
        if let Some(until) = self.backoff_until {
            if now < until {
                factor *= FAILURE_WEIGHT_FACTOR;
            }
        }
        factor
    }
}

/// Deterministic weighted selection.
///
/// Per model, every provider carries a fractional debt. Each call adds
/// `weight_i / Σweight` to every debt, picks the provider with the largest
/// debt (ties to the first in list order) and subtracts 1 from it. Over
/// many calls the realized pick frequency matches the weight ratios.
pub struct WeightedStrategy {
    debts: Mutex<HashMap<String, HashMap<String, f64>>>,
    /// Present in dynamic mode: latency and failure feedback per provider.
    penalties: Option<Mutex<HashMap<String, PenaltyState>>>,
}

impl WeightedStrategy {
    /// Static weights only.
    pub fn new() -> Self {
        WeightedStrategy {
            debts: Mutex::new(HashMap::new()),
            penalties: None,
        }
    }

    /// Weights multiplied by a latency penalty updated from request
    /// feedback.
    pub fn dynamic() -> Self {
        WeightedStrategy {
            debts: Mutex::new(HashMap::new()),
            penalties: Some(Mutex::new(HashMap::new())),
        }
    }

    fn effective_weights(&self, providers: &[ProviderSpec]) -> Vec<f64> {
        match &self.penalties {
            None => providers.iter().map(|p| p.weight).collect(),
            Some(penalties) => {
                let penalties = penalties.lock().unwrap();
                let now = Instant::now();
                providers
                    .iter()
                    .map(|p| {
                        let multiplier = penalties
                            .get(provider_key(p))
                            .map(|state| state.multiplier(now))
                            .unwrap_or(1.0);
                        p.weight * multiplier
                    })
                    .collect()
            }
        }
    }
}

impl Default for WeightedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderStrategy for WeightedStrategy {
    fn name(&self) -> &'static str {
        if self.penalties.is_some() {
            "dynamic_weighted"
        } else {
            "weighted"
        }
    }

    async fn choose(&self, model: &str, providers: &[ProviderSpec]) -> Result<ProviderSpec> {
        if providers.is_empty() {
            return Err(RouterError::NoProviderAvailable(model.to_string()));
        }

        let weights = self.effective_weights(providers);
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            // All weights penalized to nothing; fall back to the first.
            return Ok(providers[0].clone());
        }

        let mut debts = self.debts.lock().unwrap();
        let model_debts = debts.entry(model.to_string()).or_default();

        let mut best_idx = 0;
        let mut best_debt = f64::MIN;
        for (idx, provider) in providers.iter().enumerate() {
            let debt = model_debts
                .entry(provider_key(provider).to_string())
                .or_insert(0.0);
            *debt += weights[idx] / total;
            if *debt > best_debt {
                best_debt = *debt;
                best_idx = idx;
            }
        }

        let chosen = &providers[best_idx];
        *model_debts
            .get_mut(provider_key(chosen))
            .expect("debt entry just inserted") -= 1.0;

        Ok(chosen.clone())
    }

    fn record_latency(&self, provider: &ProviderSpec, latency: Duration) {
        let Some(penalties) = &self.penalties else {
            return;
        };
        let mut penalties = penalties.lock().unwrap();
        let state = penalties
            .entry(provider_key(provider).to_string())
            .or_default();
        let sample = latency.as_secs_f64();
        state.ema_latency = Some(match state.ema_latency {
            Some(ema) => LATENCY_EMA_ALPHA * sample + (1.0 - LATENCY_EMA_ALPHA) * ema,
            None => sample,
        });
    }

    fn record_failure(&self, provider: &ProviderSpec) {
        let Some(penalties) = &self.penalties else {
            return;
        };
        let mut penalties = penalties.lock().unwrap();
        let state = penalties
            .entry(provider_key(provider).to_string())
            .or_default();
        state.failure_streak += 1;
        if state.failure_streak >= FAILURE_STREAK_THRESHOLD {
            state.backoff_until = Some(Instant::now() + FAILURE_BACKOFF);
            tracing::warn!(
                provider = %provider.id,
                streak = state.failure_streak,
                "provider backed off after repeated failures"
            );
        }
    }

    fn record_success(&self, provider: &ProviderSpec) {
        let Some(penalties) = &self.penalties else {
            return;
        };
        let mut penalties = penalties.lock().unwrap();
        if let Some(state) = penalties.get_mut(provider_key(provider)) {
            state.failure_streak = 0;
        }
    }
}
