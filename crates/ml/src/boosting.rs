//! Gradient-boosted regression trees on the logistic loss, trained in
//! batches over a bounded window of recent examples.

use std::collections::VecDeque;

use forecast_models::{Matchup, ModelId, ModelPrediction, Result, Side};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::features::FeatureEngineer;
use crate::models::{sigmoid, PredictionModel, TrainingExample, UpdateOutcome};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BoostingConfig {
    pub learning_rate: f64,
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// A full queue forces a training pass.
    pub queue_capacity: usize,
    pub window_size: usize,
    pub league_average_goals: f64,
    /// Examples in the window before confidence reaches its full value.
    pub maturity_examples: usize,
}

impl Default for BoostingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            n_trees: 50,
            max_depth: 3,
            min_samples_leaf: 5,
            queue_capacity: 10,
            window_size: 500,
            league_average_goals: 3.0,
            maturity_examples: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum TreeNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    pub fn evaluate(&self, x: &[f64]) -> f64 {
        let mut node = self;
        loop {
            match node {
                Self::Leaf { value } => return *value,
                Self::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let v = x.get(*feature).copied().unwrap_or(0.0);
                    node = if v <= *threshold { left } else { right };
                }
            }
        }
    }

    fn count_splits(&self, importance: &mut [u64]) {
        if let Self::Split {
            feature, left, right, ..
        } = self
        {
            if let Some(slot) = importance.get_mut(*feature) {
                *slot += 1;
            }
            left.count_splits(importance);
            right.count_splits(importance);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoostExample {
    pub features: Vec<f64>,
    /// 1.0 for a home win.
    pub label: f64,
    pub home_goals: f64,
    pub away_goals: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TreeEnsembleState {
    pub trees: Vec<TreeNode>,
    pub feature_importance: Vec<u64>,
    pub window: VecDeque<BoostExample>,
    pub queue: Vec<BoostExample>,
    pub batches_trained: u64,
    pub mean_home_goals: Option<f64>,
    pub mean_away_goals: Option<f64>,
}

impl TreeEnsembleState {
    fn raw_score(&self, x: &[f64], learning_rate: f64) -> f64 {
        self.trees.iter().map(|t| learning_rate * t.evaluate(x)).sum()
    }
}

pub struct GradientBoostingModel {
    config: BoostingConfig,
    engineer: FeatureEngineer,
    state: RwLock<TreeEnsembleState>,
    // Serializes training passes; predictions never touch it.
    trainer: Mutex<()>,
}

impl GradientBoostingModel {
    pub fn new(config: BoostingConfig) -> Self {
        Self {
            config,
            engineer: FeatureEngineer::new(),
            state: RwLock::new(TreeEnsembleState::default()),
            trainer: Mutex::new(()),
        }
    }

    pub fn is_trained(&self) -> bool {
        !self.state.read().trees.is_empty()
    }

    pub fn queued(&self) -> usize {
        self.state.read().queue.len()
    }

    /// Split counts per named feature, most used first.
    pub fn feature_importance(&self) -> Vec<(String, u64)> {
        let counts = self.state.read().feature_importance.clone();
        let mut named: Vec<(String, u64)> = FeatureEngineer::feature_names()
            .into_iter()
            .zip(counts.into_iter().chain(std::iter::repeat(0)))
            .filter(|(_, c)| *c > 0)
            .collect();
        named.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        named
    }

    /// Moves the queue into the window, rebuilds the trees outside the lock
    /// and swaps them in.
    fn train_pass(&self) -> UpdateOutcome {
        let _guard = self.trainer.lock();

        let window: Vec<BoostExample> = {
            let mut state = self.state.write();
            if state.queue.is_empty() {
                return UpdateOutcome::skipped("queue empty");
            }
            let queued = std::mem::take(&mut state.queue);
            state.window.extend(queued);
            while state.window.len() > self.config.window_size {
                state.window.pop_front();
            }
            state.window.iter().cloned().collect()
        };

        let trees = fit_ensemble(&window, &self.config);
        let mut importance = vec![0u64; FeatureEngineer::input_len()];
        for tree in &trees {
            tree.count_splits(&mut importance);
        }
        let n = window.len() as f64;
        let mean_home = window.iter().map(|e| e.home_goals).sum::<f64>() / n;
        let mean_away = window.iter().map(|e| e.away_goals).sum::<f64>() / n;

        let mut state = self.state.write();
        state.trees = trees;
        state.feature_importance = importance;
        state.batches_trained += 1;
        state.mean_home_goals = Some(mean_home);
        state.mean_away_goals = Some(mean_away);
        tracing::info!(
            "🌲 Boosted ensemble retrained: {} trees over {} examples (batch #{})",
            state.trees.len(),
            window.len(),
            state.batches_trained
        );
        UpdateOutcome::Applied
    }
}

fn fit_ensemble(examples: &[BoostExample], config: &BoostingConfig) -> Vec<TreeNode> {
    let mut scores = vec![0.0; examples.len()];
    let mut trees = Vec::with_capacity(config.n_trees);
    let all: Vec<usize> = (0..examples.len()).collect();

    for _ in 0..config.n_trees {
        let residuals: Vec<f64> = examples
            .iter()
            .zip(&scores)
            .map(|(e, f)| e.label - sigmoid(*f))
            .collect();
        let tree = build_node(examples, &residuals, &all, 0, config);
        for (score, example) in scores.iter_mut().zip(examples) {
            *score += config.learning_rate * tree.evaluate(&example.features);
        }
        trees.push(tree);
    }
    trees
}

fn mean_of(residuals: &[f64], idx: &[usize]) -> f64 {
    if idx.is_empty() {
        return 0.0;
    }
    idx.iter().map(|i| residuals[*i]).sum::<f64>() / idx.len() as f64
}

fn build_node(
    examples: &[BoostExample],
    residuals: &[f64],
    idx: &[usize],
    depth: usize,
    config: &BoostingConfig,
) -> TreeNode {
    let leaf = TreeNode::Leaf {
        value: mean_of(residuals, idx),
    };
    if depth >= config.max_depth || idx.len() < 2 * config.min_samples_leaf.max(1) {
        return leaf;
    }

    let Some((feature, threshold)) = best_split(examples, residuals, idx, config.min_samples_leaf.max(1)) else {
        return leaf;
    };
    let (left, right): (Vec<usize>, Vec<usize>) = idx
        .iter()
        .copied()
        .partition(|i| examples[*i].features[feature] <= threshold);

    TreeNode::Split {
        feature,
        threshold,
        left: Box::new(build_node(examples, residuals, &left, depth + 1, config)),
        right: Box::new(build_node(examples, residuals, &right, depth + 1, config)),
    }
}

/// Greedy variance reduction: maximizes `S_l^2/n_l + S_r^2/n_r`.
fn best_split(examples: &[BoostExample], residuals: &[f64], idx: &[usize], min_leaf: usize) -> Option<(usize, f64)> {
    let n = idx.len();
    let total: f64 = idx.iter().map(|i| residuals[*i]).sum();
    let baseline = total * total / n as f64;
    let n_features = examples.get(idx[0])?.features.len();

    let mut best: Option<(usize, f64, f64)> = None;
    let mut order = idx.to_vec();
    for feature in 0..n_features {
        order.sort_by(|a, b| examples[*a].features[feature].total_cmp(&examples[*b].features[feature]));

        let mut left_sum = 0.0;
        for pos in 0..n - 1 {
            left_sum += residuals[order[pos]];
            let left_n = pos + 1;
            let right_n = n - left_n;
            if left_n < min_leaf || right_n < min_leaf {
                continue;
            }
            let here = examples[order[pos]].features[feature];
            let next = examples[order[pos + 1]].features[feature];
            if here == next {
                continue;
            }
            let right_sum = total - left_sum;
            let gain = left_sum * left_sum / left_n as f64 + right_sum * right_sum / right_n as f64 - baseline;
            if gain > 1e-12 && best.map_or(true, |(_, _, g)| gain > g) {
                best = Some((feature, (here + next) / 2.0, gain));
            }
        }
    }
    best.map(|(feature, threshold, _)| (feature, threshold))
}

impl PredictionModel for GradientBoostingModel {
    fn id(&self) -> ModelId {
        ModelId::GradientBoosting
    }

    fn model_version(&self) -> &str {
        "gbt-v2"
    }

    fn predict(&self, matchup: &Matchup) -> Result<ModelPrediction> {
        let x = self.engineer.vectorize(matchup);
        let state = self.state.read();
        if state.trees.is_empty() {
            return Ok(ModelPrediction::neutral(
                ModelId::GradientBoosting,
                self.config.league_average_goals,
            ));
        }

        let probability = sigmoid(state.raw_score(&x, self.config.learning_rate));
        let maturity = (state.window.len() as f64 / self.config.maturity_examples.max(1) as f64).min(1.0);
        let confidence = ((probability - 0.5).abs() * 2.0 * maturity).clamp(0.0, 1.0);

        // Score split around the window's average total, tilted by the probability.
        let home_avg = state.mean_home_goals.unwrap_or(self.config.league_average_goals);
        let away_avg = state.mean_away_goals.unwrap_or(self.config.league_average_goals);
        let tilt = (probability - 0.5) * 2.0;
        let home_score = (home_avg + tilt).max(0.0);
        let away_score = (away_avg - tilt).max(0.0);
        drop(state);

        ModelPrediction::new(ModelId::GradientBoosting, probability, home_score, away_score, confidence)
    }

    fn update(&self, example: &TrainingExample) -> Result<UpdateOutcome> {
        let Some(matchup) = &example.features else {
            return Ok(UpdateOutcome::skipped("no feature snapshot for event"));
        };
        let result = &example.result;
        let boost_example = BoostExample {
            features: self.engineer.vectorize(matchup),
            label: if result.winner() == Side::Home { 1.0 } else { 0.0 },
            home_goals: f64::from(result.home_score),
            away_goals: f64::from(result.away_score),
        };

        let pending = {
            let mut state = self.state.write();
            state.queue.push(boost_example);
            state.queue.len()
        };
        if pending >= self.config.queue_capacity {
            return Ok(self.train_pass());
        }
        Ok(UpdateOutcome::Queued { pending })
    }

    fn flush(&self) -> Result<UpdateOutcome> {
        Ok(self.train_pass())
    }

    fn diagnostics(&self) -> Option<serde_json::Value> {
        let mut importance = self.feature_importance();
        importance.truncate(10);
        Some(serde_json::json!({
            "trained": self.is_trained(),
            "queued": self.queued(),
            "feature_importance": importance,
        }))
    }

    fn snapshot(&self) -> Result<serde_json::Value> {
        let copy = self.state.read().clone();
        Ok(serde_json::to_value(copy)?)
    }

    fn restore(&self, state: serde_json::Value) -> Result<()> {
        let mut restored: TreeEnsembleState = serde_json::from_value(state)?;
        let width = FeatureEngineer::input_len();
        restored.window.retain(|e| e.features.len() == width);
        restored.queue.retain(|e| e.features.len() == width);
        restored.feature_importance.resize(width, 0);
        *self.state.write() = restored;
        Ok(())
    }
}
