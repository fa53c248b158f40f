// Model seam shared by every predictor in the ensemble

use forecast_models::{CompletedEventResult, Matchup, ModelId, ModelPrediction, Result};
use serde::{Deserialize, Serialize};

/// A completed event plus, when one was served, the feature snapshots the
/// pre-game prediction was made from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingExample {
    pub result: CompletedEventResult,
    pub features: Option<Matchup>,
}

impl TrainingExample {
    pub fn new(result: CompletedEventResult) -> Self {
        Self {
            result,
            features: None,
        }
    }

    pub fn with_features(mut self, features: Matchup) -> Self {
        self.features = Some(features);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum UpdateOutcome {
    /// State changed.
    Applied,
    /// Example buffered for a later batch.
    Queued { pending: usize },
    /// Nothing learned from this example.
    Skipped { reason: String },
}

impl UpdateOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    pub fn mutated_state(&self) -> bool {
        !matches!(self, Self::Skipped { .. })
    }
}

/// A learnable predictor. State lives behind interior locks so that
/// predictions can run concurrently with training.
pub trait PredictionModel: Send + Sync {
    fn id(&self) -> ModelId;

    fn model_version(&self) -> &str;

    fn predict(&self, matchup: &Matchup) -> Result<ModelPrediction>;

    fn update(&self, example: &TrainingExample) -> Result<UpdateOutcome>;

    /// Trains on anything buffered. Models without a buffer have nothing to do.
    fn flush(&self) -> Result<UpdateOutcome> {
        Ok(UpdateOutcome::skipped("no buffered examples"))
    }

    /// Model-specific detail for the admin report.
    fn diagnostics(&self) -> Option<serde_json::Value> {
        None
    }

    /// Copies the state under a read lock and serializes the copy.
    fn snapshot(&self) -> Result<serde_json::Value>;

    fn restore(&self, state: serde_json::Value) -> Result<()>;
}

pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigmoid_bounds() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert!(sigmoid(40.0) <= 1.0);
        assert!(sigmoid(-40.0) >= 0.0);
    }

    #[test]
    fn test_update_outcome_mutation_flag() {
        assert!(UpdateOutcome::Applied.mutated_state());
        assert!(UpdateOutcome::Queued { pending: 3 }.mutated_state());
        assert!(!UpdateOutcome::skipped("no features").mutated_state());
    }
}
