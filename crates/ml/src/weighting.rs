//! Dynamic weight calculator: recent-accuracy multipliers on the static base
//! weights, smoothed by momentum and projected back onto the bounded simplex.

use std::collections::BTreeMap;

use forecast_models::{ModelAccuracyStats, ModelId, Result, WeightVector};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WeightingConfig {
    pub min_weight: f64,
    pub max_weight: f64,
    /// Share of the previous weight kept on each recomputation.
    pub momentum: f64,
    pub ema_span: usize,
    /// Resolved predictions needed before accuracy moves a weight.
    pub min_samples: usize,
    pub multiplier_exponent: f64,
    pub min_multiplier: f64,
    pub max_multiplier: f64,
}

impl Default for WeightingConfig {
    fn default() -> Self {
        Self {
            min_weight: 0.05,
            max_weight: 0.40,
            momentum: 0.7,
            ema_span: 10,
            min_samples: 5,
            multiplier_exponent: 2.0,
            min_multiplier: 0.25,
            max_multiplier: 2.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DynamicWeightCalculator {
    config: WeightingConfig,
    base: BTreeMap<ModelId, f64>,
}

impl DynamicWeightCalculator {
    pub fn new(config: WeightingConfig, base: BTreeMap<ModelId, f64>) -> Self {
        Self { config, base }
    }

    pub fn config(&self) -> &WeightingConfig {
        &self.config
    }

    /// Bounds that admit a feasible vector for `n` models.
    pub fn effective_bounds(&self, n: usize) -> (f64, f64) {
        if n == 0 {
            return (self.config.min_weight, self.config.max_weight);
        }
        let uniform = 1.0 / n as f64;
        let min = self.config.min_weight.min(uniform).max(0.0);
        let max = self.config.max_weight.max(uniform).min(1.0);
        (min, max)
    }

    /// Base weights projected onto the bounds.
    pub fn initial_weights(&self) -> Result<WeightVector> {
        let normalized = WeightVector::normalized(self.base.clone())?;
        let (min, max) = self.effective_bounds(normalized.len());
        let mut weights = normalized.clone();
        weights.replace(project(normalized.as_map(), min, max));
        Ok(weights)
    }

    /// EMA of correctness over the recent outcomes, seeded at a coin flip.
    pub fn recent_ema(&self, outcomes: &[bool]) -> f64 {
        let alpha = 2.0 / (self.config.ema_span.max(1) as f64 + 1.0);
        outcomes.iter().fold(0.5, |ema, hit| {
            let x = if *hit { 1.0 } else { 0.0 };
            alpha * x + (1.0 - alpha) * ema
        })
    }

    pub fn multiplier(&self, stats: Option<&ModelAccuracyStats>) -> f64 {
        let cfg = &self.config;
        match stats {
            Some(s) if s.has_samples(cfg.min_samples) => {
                let ema = self.recent_ema(&s.recent_outcomes);
                (ema / 0.5)
                    .powf(cfg.multiplier_exponent)
                    .clamp(cfg.min_multiplier, cfg.max_multiplier)
            }
            _ => 1.0,
        }
    }

    pub fn recompute(
        &self,
        previous: &WeightVector,
        stats: &BTreeMap<ModelId, ModelAccuracyStats>,
    ) -> Result<WeightVector> {
        let raw: BTreeMap<ModelId, f64> = self
            .base
            .iter()
            .map(|(model, base)| (*model, base * self.multiplier(stats.get(model))))
            .collect();
        let target = WeightVector::normalized(raw)?;

        let m = self.config.momentum.clamp(0.0, 1.0);
        let blended: BTreeMap<ModelId, f64> = target
            .iter()
            .map(|(model, fresh)| {
                let old = if previous.contains(model) {
                    previous.get(model)
                } else {
                    fresh
                };
                (model, m * old + (1.0 - m) * fresh)
            })
            .collect();

        let (min, max) = self.effective_bounds(blended.len());
        let mut next = previous.clone();
        next.replace(project(&blended, min, max));
        next.validate(min, max)?;

        tracing::debug!(
            "⚖️ Weights recomputed (rev {}): {}",
            next.revision,
            next.iter()
                .map(|(m, w)| format!("{m}={w:.3}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(next)
    }
}

/// Euclidean projection onto `{w : min <= w_i <= max, sum w = 1}`: finds the
/// shift τ with `sum clamp(w_i + τ) = 1` by bisection.
fn project(weights: &BTreeMap<ModelId, f64>, min: f64, max: f64) -> BTreeMap<ModelId, f64> {
    let total_at = |tau: f64| -> f64 { weights.values().map(|w| (w + tau).clamp(min, max)).sum() };

    let lo_w = weights.values().copied().fold(f64::INFINITY, f64::min);
    let hi_w = weights.values().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut lo = min - hi_w;
    let mut hi = max - lo_w;
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if total_at(mid) < 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let tau = 0.5 * (lo + hi);
    weights
        .iter()
        .map(|(m, w)| (*m, (w + tau).clamp(min, max)))
        .collect()
}
