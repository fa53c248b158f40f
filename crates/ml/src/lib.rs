pub mod bayesian;
pub mod boosting;
pub mod config;
pub mod elo;
pub mod ensemble;
pub mod features;
pub mod models;
pub mod monte_carlo;
pub mod neural;
pub mod poisson;
pub mod registry;
pub mod statistical;
pub mod weighting;

pub use bayesian::{BayesianConfig, BayesianModel};
pub use boosting::{BoostingConfig, GradientBoostingModel};
pub use config::{BaseWeights, ModelsConfig};
pub use elo::{EloConfig, EloModel};
pub use ensemble::{EnsembleCombiner, EnsembleConfig};
pub use features::FeatureEngineer;
pub use models::*;
pub use monte_carlo::{sample_poisson, MonteCarloConfig, MonteCarloModel};
pub use neural::{NeuralConfig, NeuralNetworkModel};
pub use poisson::{PoissonConfig, PoissonModel};
pub use registry::{ModelRegistry, ModelSlot};
pub use statistical::{StatisticalConfig, StatisticalModel};
pub use weighting::{DynamicWeightCalculator, WeightingConfig};
