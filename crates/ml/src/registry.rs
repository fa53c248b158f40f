use std::collections::BTreeMap;
use std::sync::Arc;

use forecast_models::ModelId;

use crate::bayesian::BayesianModel;
use crate::boosting::GradientBoostingModel;
use crate::config::ModelsConfig;
use crate::elo::EloModel;
use crate::models::PredictionModel;
use crate::monte_carlo::MonteCarloModel;
use crate::neural::NeuralNetworkModel;
use crate::poisson::PoissonModel;
use crate::statistical::StatisticalModel;

#[derive(Clone)]
pub struct ModelSlot {
    pub model: Arc<dyn PredictionModel>,
    pub base_weight: f64,
}

/// Ordered set of models the ensemble iterates.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    slots: Vec<ModelSlot>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the seven standard models in registry order.
    pub fn from_config(config: &ModelsConfig) -> Self {
        let weights = &config.base_weights;
        let models: Vec<Arc<dyn PredictionModel>> = vec![
            Arc::new(StatisticalModel::new(config.statistical.clone())),
            Arc::new(EloModel::new(config.elo.clone())),
            Arc::new(PoissonModel::new(config.poisson.clone())),
            Arc::new(BayesianModel::new(config.bayesian.clone())),
            Arc::new(MonteCarloModel::new(config.monte_carlo.clone())),
            Arc::new(NeuralNetworkModel::new(config.neural.clone())),
            Arc::new(GradientBoostingModel::new(config.boosting.clone())),
        ];

        let mut registry = Self::new();
        for model in models {
            let base_weight = weights.get(model.id());
            registry.register(model, base_weight);
        }
        registry
    }

    /// Replaces any model with the same id.
    pub fn register(&mut self, model: Arc<dyn PredictionModel>, base_weight: f64) {
        let id = model.id();
        let slot = ModelSlot { model, base_weight };
        match self.slots.iter_mut().find(|s| s.model.id() == id) {
            Some(existing) => *existing = slot,
            None => self.slots.push(slot),
        }
    }

    pub fn get(&self, id: ModelId) -> Option<Arc<dyn PredictionModel>> {
        self.slots.iter().find(|s| s.model.id() == id).map(|s| s.model.clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelSlot> {
        self.slots.iter()
    }

    pub fn ids(&self) -> Vec<ModelId> {
        self.slots.iter().map(|s| s.model.id()).collect()
    }

    pub fn base_weights(&self) -> BTreeMap<ModelId, f64> {
        self.slots.iter().map(|s| (s.model.id(), s.base_weight)).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
