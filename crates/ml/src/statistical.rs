//! Weighted statistical scorer: a logistic score over home-minus-away feature
//! differentials with online weight refinement.

use std::collections::BTreeMap;

use forecast_models::{keys, Matchup, ModelId, ModelPrediction, Result, Side};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::features::FeatureEngineer;
use crate::models::{sigmoid, PredictionModel, TrainingExample, UpdateOutcome};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatisticalConfig {
    pub learning_rate: f64,
    /// Initial logit offset for the home side.
    pub home_bias: f64,
    pub league_average_goals: f64,
    pub max_confidence: f64,
}

impl Default for StatisticalConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.02,
            home_bias: 0.15,
            league_average_goals: 3.0,
            max_confidence: 0.9,
        }
    }
}

fn initial_weights() -> BTreeMap<String, f64> {
    [
        (keys::WIN_PCT, 0.40),
        (keys::GOALS_FOR_PER_GAME, 0.25),
        (keys::GOALS_AGAINST_PER_GAME, -0.25),
        (keys::RECENT_FORM, 0.20),
        (keys::SHOTS_FOR_PER_GAME, 0.10),
        (keys::SHOTS_AGAINST_PER_GAME, -0.10),
        (keys::POWER_PLAY_PCT, 0.10),
        (keys::PENALTY_KILL_PCT, 0.10),
        (keys::GOALIE_SAVE_PCT, 0.15),
        (keys::REST_DAYS, 0.05),
        (keys::TRAVEL_FATIGUE, -0.10),
        (keys::BACK_TO_BACK, -0.10),
        (keys::HEAD_TO_HEAD_WIN_PCT, 0.10),
        (keys::STAR_POWER, 0.10),
    ]
    .into_iter()
    .map(|(k, w)| (k.to_string(), w))
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScorerState {
    pub weights: BTreeMap<String, f64>,
    pub bias: f64,
    pub updates: u64,
}

impl Default for ScorerState {
    fn default() -> Self {
        Self {
            weights: initial_weights(),
            bias: 0.15,
            updates: 0,
        }
    }
}

pub struct StatisticalModel {
    config: StatisticalConfig,
    engineer: FeatureEngineer,
    state: RwLock<ScorerState>,
}

impl StatisticalModel {
    pub fn new(config: StatisticalConfig) -> Self {
        let state = ScorerState {
            bias: config.home_bias,
            ..ScorerState::default()
        };
        Self {
            config,
            engineer: FeatureEngineer::new(),
            state: RwLock::new(state),
        }
    }

    pub fn weights(&self) -> BTreeMap<String, f64> {
        self.state.read().weights.clone()
    }

    fn logit(state: &ScorerState, diffs: &[(&'static str, f64)]) -> f64 {
        state.bias
            + diffs
                .iter()
                .map(|(k, d)| state.weights.get(*k).copied().unwrap_or(0.0) * d)
                .sum::<f64>()
    }
}

impl PredictionModel for StatisticalModel {
    fn id(&self) -> ModelId {
        ModelId::Statistical
    }

    fn model_version(&self) -> &str {
        "stat-v2"
    }

    fn predict(&self, matchup: &Matchup) -> Result<ModelPrediction> {
        let diffs = self.engineer.differentials(matchup);
        let probability = sigmoid(Self::logit(&self.state.read(), &diffs));

        let avg = self.config.league_average_goals;
        let home_score = matchup.home.get_or(keys::GOALS_FOR_PER_GAME, avg) * 0.5
            + matchup.away.get_or(keys::GOALS_AGAINST_PER_GAME, avg) * 0.5
            + (probability - 0.5);
        let away_score = matchup.away.get_or(keys::GOALS_FOR_PER_GAME, avg) * 0.5
            + matchup.home.get_or(keys::GOALS_AGAINST_PER_GAME, avg) * 0.5
            - (probability - 0.5);

        let coverage = matchup.coverage(&[keys::WIN_PCT, keys::GOALS_FOR_PER_GAME, keys::GOALS_AGAINST_PER_GAME]);
        let confidence = ((0.5 + (probability - 0.5).abs()) * (0.5 + 0.5 * coverage)).min(self.config.max_confidence);

        ModelPrediction::new(
            ModelId::Statistical,
            probability,
            home_score.max(0.0),
            away_score.max(0.0),
            confidence,
        )
    }

    fn update(&self, example: &TrainingExample) -> Result<UpdateOutcome> {
        let Some(matchup) = &example.features else {
            return Ok(UpdateOutcome::skipped("no feature snapshot for event"));
        };
        let diffs = self.engineer.differentials(matchup);
        let label = if example.result.winner() == Side::Home { 1.0 } else { 0.0 };
        let lr = self.config.learning_rate;

        let mut state = self.state.write();
        let error = label - sigmoid(Self::logit(&state, &diffs));
        for (key, diff) in &diffs {
            if let Some(w) = state.weights.get_mut(*key) {
                *w += lr * error * diff;
            }
        }
        state.bias += lr * error;
        state.updates += 1;
        Ok(UpdateOutcome::Applied)
    }

    fn snapshot(&self) -> Result<serde_json::Value> {
        let copy = self.state.read().clone();
        Ok(serde_json::to_value(copy)?)
    }

    fn restore(&self, state: serde_json::Value) -> Result<()> {
        let restored: ScorerState = serde_json::from_value(state)?;
        *self.state.write() = restored;
        Ok(())
    }
}
