//! Feed-forward network: ReLU hidden layers, sigmoid outputs
//! `[home win probability, home goals / scale, away goals / scale]`.

use forecast_models::{ForecastError, Matchup, ModelId, ModelPrediction, Result, Side};
use ndarray::{Array1, Array2, Axis};
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::features::FeatureEngineer;
use crate::models::{sigmoid, PredictionModel, TrainingExample, UpdateOutcome};

const OUTPUTS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NeuralConfig {
    pub hidden_layers: Vec<usize>,
    pub learning_rate: f64,
    /// Seed for weight initialisation; `None` draws from entropy.
    pub seed: Option<u64>,
    pub score_scale: f64,
    /// Training steps before confidence reaches its full value.
    pub maturity_steps: u64,
    pub max_confidence: f64,
}

impl Default for NeuralConfig {
    fn default() -> Self {
        Self {
            hidden_layers: vec![32, 16],
            learning_rate: 0.01,
            seed: Some(42),
            score_scale: 10.0,
            maturity_steps: 50,
            max_confidence: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DenseLayer {
    /// Shape (outputs, inputs).
    pub weights: Array2<f64>,
    pub biases: Array1<f64>,
}

impl DenseLayer {
    fn xavier(inputs: usize, outputs: usize, rng: &mut StdRng) -> Self {
        let limit = (6.0 / (inputs + outputs) as f64).sqrt();
        Self {
            weights: Array2::from_shape_fn((outputs, inputs), |_| rng.gen_range(-limit..limit)),
            biases: Array1::zeros(outputs),
        }
    }

    fn inputs(&self) -> usize {
        self.weights.ncols()
    }
}

/// Pre-activations and activations of every layer; `activations[0]` is the input.
#[derive(Debug, Clone)]
pub struct ForwardPass {
    pub zs: Vec<Array1<f64>>,
    pub activations: Vec<Array1<f64>>,
}

impl ForwardPass {
    pub fn output(&self) -> &Array1<f64> {
        // A pass always holds at least the input.
        &self.activations[self.activations.len() - 1]
    }
}

#[derive(Debug, Clone)]
pub struct Gradients {
    pub weights: Vec<Array2<f64>>,
    pub biases: Vec<Array1<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkState {
    pub layers: Vec<DenseLayer>,
    #[serde(default)]
    pub training_steps: u64,
}

impl NetworkState {
    pub fn new(inputs: usize, hidden: &[usize], outputs: usize, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut sizes = Vec::with_capacity(hidden.len() + 2);
        sizes.push(inputs);
        sizes.extend_from_slice(hidden);
        sizes.push(outputs);

        let layers = sizes
            .windows(2)
            .map(|pair| DenseLayer::xavier(pair[0], pair[1], &mut rng))
            .collect();
        Self {
            layers,
            training_steps: 0,
        }
    }

    pub fn input_len(&self) -> usize {
        self.layers.first().map_or(0, DenseLayer::inputs)
    }

    pub fn forward(&self, input: &Array1<f64>) -> ForwardPass {
        let mut zs = Vec::with_capacity(self.layers.len());
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(input.clone());

        let last = self.layers.len().saturating_sub(1);
        for (i, layer) in self.layers.iter().enumerate() {
            let z = layer.weights.dot(&activations[i]) + &layer.biases;
            let a = if i == last {
                z.mapv(sigmoid)
            } else {
                z.mapv(|v| v.max(0.0))
            };
            zs.push(z);
            activations.push(a);
        }
        ForwardPass { zs, activations }
    }

    /// Gradients of `0.5 * ||a_L - target||^2`.
    pub fn backward(&self, pass: &ForwardPass, target: &Array1<f64>) -> Gradients {
        let n = self.layers.len();
        let mut weights = Vec::with_capacity(n);
        let mut biases = Vec::with_capacity(n);

        let out_z = &pass.zs[n - 1];
        let mut delta: Array1<f64> = (pass.output() - target) * out_z.mapv(|z| {
            let s = sigmoid(z);
            s * (1.0 - s)
        });

        for l in (0..n).rev() {
            let prev = &pass.activations[l];
            let grad_w = delta
                .view()
                .insert_axis(Axis(1))
                .dot(&prev.view().insert_axis(Axis(0)));
            weights.push(grad_w);
            biases.push(delta.clone());

            if l > 0 {
                let back = self.layers[l].weights.t().dot(&delta);
                delta = back * pass.zs[l - 1].mapv(|z| if z > 0.0 { 1.0 } else { 0.0 });
            }
        }

        weights.reverse();
        biases.reverse();
        Gradients { weights, biases }
    }

    pub fn apply(&mut self, gradients: &Gradients, learning_rate: f64) {
        for ((layer, gw), gb) in self
            .layers
            .iter_mut()
            .zip(&gradients.weights)
            .zip(&gradients.biases)
        {
            layer.weights.scaled_add(-learning_rate, gw);
            layer.biases.scaled_add(-learning_rate, gb);
        }
    }

    pub fn loss(&self, input: &Array1<f64>, target: &Array1<f64>) -> f64 {
        let pass = self.forward(input);
        0.5 * (pass.output() - target).mapv(|d| d * d).sum()
    }

    /// One SGD step; returns the loss before the step.
    pub fn train_step(&mut self, input: &Array1<f64>, target: &Array1<f64>, learning_rate: f64) -> f64 {
        let pass = self.forward(input);
        let loss = 0.5 * (pass.output() - target).mapv(|d| d * d).sum();
        let gradients = self.backward(&pass, target);
        self.apply(&gradients, learning_rate);
        self.training_steps += 1;
        loss
    }
}

pub struct NeuralNetworkModel {
    config: NeuralConfig,
    engineer: FeatureEngineer,
    state: RwLock<NetworkState>,
}

impl NeuralNetworkModel {
    pub fn new(config: NeuralConfig) -> Self {
        let state = NetworkState::new(
            FeatureEngineer::input_len(),
            &config.hidden_layers,
            OUTPUTS,
            config.seed,
        );
        Self {
            config,
            engineer: FeatureEngineer::new(),
            state: RwLock::new(state),
        }
    }

    pub fn training_steps(&self) -> u64 {
        self.state.read().training_steps
    }

    fn target(&self, example: &TrainingExample) -> Array1<f64> {
        let result = &example.result;
        let scale = self.config.score_scale;
        let won = if result.winner() == Side::Home { 1.0 } else { 0.0 };
        Array1::from(vec![
            won,
            (f64::from(result.home_score) / scale).clamp(0.0, 1.0),
            (f64::from(result.away_score) / scale).clamp(0.0, 1.0),
        ])
    }
}

impl PredictionModel for NeuralNetworkModel {
    fn id(&self) -> ModelId {
        ModelId::NeuralNetwork
    }

    fn model_version(&self) -> &str {
        "ffnn-v3"
    }

    fn predict(&self, matchup: &Matchup) -> Result<ModelPrediction> {
        let input = Array1::from(self.engineer.vectorize(matchup));
        let (output, steps) = {
            let state = self.state.read();
            (state.forward(&input).output().clone(), state.training_steps)
        };
        if output.len() != OUTPUTS || output.iter().any(|v| !v.is_finite()) {
            return Err(ForecastError::ModelFailed {
                model: ModelId::NeuralNetwork,
                reason: "non-finite network output".to_string(),
            });
        }

        let probability = output[0];
        let maturity = (steps as f64 / self.config.maturity_steps.max(1) as f64).min(1.0);
        let confidence = ((probability - 0.5).abs() * 2.0 * maturity).min(self.config.max_confidence);

        ModelPrediction::new(
            ModelId::NeuralNetwork,
            probability,
            output[1] * self.config.score_scale,
            output[2] * self.config.score_scale,
            confidence,
        )
    }

    fn update(&self, example: &TrainingExample) -> Result<UpdateOutcome> {
        let Some(matchup) = &example.features else {
            return Ok(UpdateOutcome::skipped("no feature snapshot for event"));
        };
        let input = Array1::from(self.engineer.vectorize(matchup));
        let target = self.target(example);

        let mut state = self.state.write();
        let loss = state.train_step(&input, &target, self.config.learning_rate);
        tracing::debug!("🧠 Network step {} loss {:.5}", state.training_steps, loss);
        Ok(UpdateOutcome::Applied)
    }

    fn snapshot(&self) -> Result<serde_json::Value> {
        let copy = self.state.read().clone();
        Ok(serde_json::to_value(copy)?)
    }

    fn restore(&self, state: serde_json::Value) -> Result<()> {
        let restored: NetworkState = serde_json::from_value(state)?;
        if restored.input_len() != FeatureEngineer::input_len() {
            return Err(ForecastError::FeatureDimension {
                expected: FeatureEngineer::input_len(),
                actual: restored.input_len(),
            });
        }
        *self.state.write() = restored;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_set() -> Vec<(Array1<f64>, Array1<f64>)> {
        let mut rng = StdRng::seed_from_u64(7);
        (0..24)
            .map(|_| {
                let x: Vec<f64> = (0..4).map(|_| rng.gen_range(-1.0..1.0)).collect();
                let label = if x[0] + 0.5 * x[1] > 0.0 { 1.0 } else { 0.0 };
                let target = vec![label, 0.3 + 0.2 * x[2].abs(), 0.2 + 0.1 * x[3].abs()];
                (Array1::from(x), Array1::from(target))
            })
            .collect()
    }

    #[test]
    fn test_layer_shapes() {
        let net = NetworkState::new(28, &[32, 16], 3, Some(1));
        assert_eq!(net.layers.len(), 3);
        assert_eq!(net.layers[0].weights.dim(), (32, 28));
        assert_eq!(net.layers[2].weights.dim(), (3, 16));
        assert_eq!(net.input_len(), 28);

        let pass = net.forward(&Array1::zeros(28));
        assert_eq!(pass.zs.len(), 3);
        assert_eq!(pass.activations.len(), 4);
        assert!(pass.output().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_loss_decreases_over_epochs() {
        let data = synthetic_set();
        let mut net = NetworkState::new(4, &[8, 6], 3, Some(11));

        let mut epoch_losses = Vec::new();
        for _ in 0..300 {
            let total: f64 = data.iter().map(|(x, t)| net.train_step(x, t, 0.1)).sum();
            epoch_losses.push(total / data.len() as f64);
        }

        let first: f64 = epoch_losses[..10].iter().sum::<f64>() / 10.0;
        let last: f64 = epoch_losses[epoch_losses.len() - 10..].iter().sum::<f64>() / 10.0;
        assert!(last < first, "loss went from {first} to {last}");
        assert_eq!(net.training_steps, 300 * data.len() as u64);
    }

    #[test]
    fn test_backprop_matches_finite_differences() {
        let net = NetworkState::new(4, &[5, 4], 3, Some(3));
        let x = Array1::from(vec![0.3, -0.7, 0.9, 0.1]);
        let t = Array1::from(vec![1.0, 0.4, 0.2]);
        let grads = net.backward(&net.forward(&x), &t);
        let eps = 1e-6;

        for (l, layer) in net.layers.iter().enumerate() {
            for ((i, j), _) in layer.weights.indexed_iter().take(6) {
                let mut plus = net.clone();
                plus.layers[l].weights[[i, j]] += eps;
                let mut minus = net.clone();
                minus.layers[l].weights[[i, j]] -= eps;
                let numeric = (plus.loss(&x, &t) - minus.loss(&x, &t)) / (2.0 * eps);
                let analytic = grads.weights[l][[i, j]];
                assert!(
                    (numeric - analytic).abs() < 1e-6,
                    "layer {l} w[{i},{j}]: numeric {numeric} analytic {analytic}"
                );
            }
            for i in 0..layer.biases.len() {
                let mut plus = net.clone();
                plus.layers[l].biases[i] += eps;
                let mut minus = net.clone();
                minus.layers[l].biases[i] -= eps;
                let numeric = (plus.loss(&x, &t) - minus.loss(&x, &t)) / (2.0 * eps);
                assert!((numeric - grads.biases[l][i]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_untrained_model_has_zero_confidence() {
        use forecast_models::FeatureSnapshot;

        let model = NeuralNetworkModel::new(NeuralConfig::default());
        let matchup = Matchup::new(FeatureSnapshot::builder("A").build(), FeatureSnapshot::builder("B").build());
        let prediction = model.predict(&matchup).unwrap();

        assert_eq!(prediction.confidence, 0.0);
        assert_eq!(model.training_steps(), 0);
    }

    #[test]
    fn test_restore_rejects_wrong_input_size() {
        let model = NeuralNetworkModel::new(NeuralConfig::default());
        let other = NetworkState::new(5, &[4], 3, Some(1));
        let err = model.restore(serde_json::to_value(other).unwrap()).unwrap_err();
        assert!(matches!(err, ForecastError::FeatureDimension { expected: 28, actual: 5 }));
    }
}
