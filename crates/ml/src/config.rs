use std::collections::BTreeMap;

use forecast_models::ModelId;
use serde::{Deserialize, Serialize};

use crate::bayesian::BayesianConfig;
use crate::boosting::BoostingConfig;
use crate::elo::EloConfig;
use crate::ensemble::EnsembleConfig;
use crate::monte_carlo::MonteCarloConfig;
use crate::neural::NeuralConfig;
use crate::poisson::PoissonConfig;
use crate::statistical::StatisticalConfig;
use crate::weighting::WeightingConfig;

/// Static share of the ensemble per model before accuracy adjustments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BaseWeights {
    pub statistical: f64,
    pub elo: f64,
    pub poisson: f64,
    pub bayesian: f64,
    pub monte_carlo: f64,
    pub neural_network: f64,
    pub gradient_boosting: f64,
}

impl Default for BaseWeights {
    fn default() -> Self {
        Self {
            statistical: 0.20,
            elo: 0.20,
            poisson: 0.15,
            bayesian: 0.10,
            monte_carlo: 0.10,
            neural_network: 0.10,
            gradient_boosting: 0.15,
        }
    }
}

impl BaseWeights {
    pub fn get(&self, model: ModelId) -> f64 {
        match model {
            ModelId::Statistical => self.statistical,
            ModelId::Elo => self.elo,
            ModelId::Poisson => self.poisson,
            ModelId::Bayesian => self.bayesian,
            ModelId::MonteCarlo => self.monte_carlo,
            ModelId::NeuralNetwork => self.neural_network,
            ModelId::GradientBoosting => self.gradient_boosting,
            ModelId::Ensemble => 0.0,
        }
    }

    pub fn to_map(&self) -> BTreeMap<ModelId, f64> {
        ModelId::BASE_MODELS.iter().map(|m| (*m, self.get(*m))).collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelsConfig {
    pub base_weights: BaseWeights,
    pub elo: EloConfig,
    pub poisson: PoissonConfig,
    pub neural: NeuralConfig,
    pub boosting: BoostingConfig,
    pub bayesian: BayesianConfig,
    pub monte_carlo: MonteCarloConfig,
    pub statistical: StatisticalConfig,
    pub ensemble: EnsembleConfig,
    pub weighting: WeightingConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_base_weights_sum_to_one() {
        let map = BaseWeights::default().to_map();
        assert_eq!(map.len(), 7);
        assert!((map.values().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: ModelsConfig = serde_json::from_str(r#"{"elo": {"k_factor": 20.0}}"#).unwrap();
        assert_eq!(config.elo.k_factor, 20.0);
        assert_eq!(config.elo.initial_rating, 1500.0);
        assert_eq!(config.boosting.queue_capacity, 10);
    }
}
