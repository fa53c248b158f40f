use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};
use crate::predictions::ModelId;

const SUM_TOLERANCE: f64 = 1e-6;

/// Per-model ensemble weights. Each entry is within the configured bounds and
/// the entries sum to one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightVector {
    weights: BTreeMap<ModelId, f64>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub revision: u64,
}

impl WeightVector {
    /// Normalizes the given raw weights to sum to one. Non-finite or negative
    /// entries are rejected.
    pub fn normalized(raw: BTreeMap<ModelId, f64>) -> Result<Self> {
        if raw.is_empty() {
            return Err(ForecastError::InvalidWeights("no models".to_string()));
        }
        if let Some((model, w)) = raw.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
            return Err(ForecastError::InvalidWeights(format!("{model} has weight {w}")));
        }
        let total: f64 = raw.values().sum();
        if total <= 0.0 {
            return Err(ForecastError::InvalidWeights("weights sum to zero".to_string()));
        }

        Ok(Self {
            weights: raw.into_iter().map(|(m, w)| (m, w / total)).collect(),
            updated_at: Utc::now(),
            revision: 0,
        })
    }

    pub fn uniform(models: &[ModelId]) -> Result<Self> {
        Self::normalized(models.iter().map(|m| (*m, 1.0)).collect())
    }

    /// Missing models weigh nothing.
    pub fn get(&self, model: ModelId) -> f64 {
        self.weights.get(&model).copied().unwrap_or(0.0)
    }

    pub fn contains(&self, model: ModelId) -> bool {
        self.weights.contains_key(&model)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ModelId, f64)> + '_ {
        self.weights.iter().map(|(m, w)| (*m, *w))
    }

    pub fn models(&self) -> impl Iterator<Item = ModelId> + '_ {
        self.weights.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.weights.values().sum()
    }

    pub fn as_map(&self) -> &BTreeMap<ModelId, f64> {
        &self.weights
    }

    /// Replaces the entries and bumps the revision.
    pub fn replace(&mut self, next: BTreeMap<ModelId, f64>) {
        self.weights = next;
        self.updated_at = Utc::now();
        self.revision += 1;
    }

    pub fn validate(&self, min_weight: f64, max_weight: f64) -> Result<()> {
        if self.weights.is_empty() {
            return Err(ForecastError::InvalidWeights("no models".to_string()));
        }
        for (model, w) in &self.weights {
            if !w.is_finite() || *w < min_weight - SUM_TOLERANCE || *w > max_weight + SUM_TOLERANCE {
                return Err(ForecastError::InvalidWeights(format!(
                    "{model} weight {w} outside [{min_weight}, {max_weight}]"
                )));
            }
        }
        let total = self.sum();
        if (total - 1.0).abs() > SUM_TOLERANCE {
            return Err(ForecastError::InvalidWeights(format!("weights sum to {total}")));
        }
        Ok(())
    }
}
