//! Bayesian baseline: a Beta prior on the home-win rate, updated from every
//! result, combined with a feature likelihood per side.

use forecast_models::{keys, FeatureSnapshot, Matchup, ModelId, ModelPrediction, Result, Side};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::models::{PredictionModel, TrainingExample, UpdateOutcome};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BayesianConfig {
    /// Beta(alpha, beta) prior; 5.5/4.5 encodes a 55% home-win rate.
    pub prior_alpha: f64,
    pub prior_beta: f64,
    pub win_pct_weight: f64,
    pub form_weight: f64,
    pub head_to_head_weight: f64,
    pub league_average_goals: f64,
}

impl Default for BayesianConfig {
    fn default() -> Self {
        Self {
            prior_alpha: 5.5,
            prior_beta: 4.5,
            win_pct_weight: 0.5,
            form_weight: 0.3,
            head_to_head_weight: 0.2,
            league_average_goals: 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BetaPosterior {
    pub alpha: f64,
    pub beta: f64,
    pub observations: u64,
}

impl Default for BetaPosterior {
    fn default() -> Self {
        Self {
            alpha: 5.5,
            beta: 4.5,
            observations: 0,
        }
    }
}

impl BetaPosterior {
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }
}

pub struct BayesianModel {
    config: BayesianConfig,
    state: RwLock<BetaPosterior>,
}

impl BayesianModel {
    pub fn new(config: BayesianConfig) -> Self {
        let state = BetaPosterior {
            alpha: config.prior_alpha,
            beta: config.prior_beta,
            observations: 0,
        };
        Self {
            config,
            state: RwLock::new(state),
        }
    }

    pub fn posterior(&self) -> BetaPosterior {
        self.state.read().clone()
    }

    /// Weighted blend of win rate, form and head-to-head; neutral features read 0.5.
    fn likelihood(&self, snapshot: &FeatureSnapshot) -> f64 {
        let cfg = &self.config;
        let value = cfg.win_pct_weight * snapshot.get_or(keys::WIN_PCT, 0.5)
            + cfg.form_weight * snapshot.get_or(keys::RECENT_FORM, 0.5)
            + cfg.head_to_head_weight * snapshot.get_or(keys::HEAD_TO_HEAD_WIN_PCT, 0.5);
        if value.is_finite() {
            value.clamp(0.01, 2.0)
        } else {
            0.5
        }
    }
}

impl PredictionModel for BayesianModel {
    fn id(&self) -> ModelId {
        ModelId::Bayesian
    }

    fn model_version(&self) -> &str {
        "bayes-v2"
    }

    fn predict(&self, matchup: &Matchup) -> Result<ModelPrediction> {
        let posterior = self.posterior();
        let prior = posterior.mean();
        let home_likelihood = self.likelihood(&matchup.home);
        let away_likelihood = self.likelihood(&matchup.away);

        let evidence = home_likelihood * prior + away_likelihood * (1.0 - prior);
        let probability = if evidence > 0.0 {
            (home_likelihood * prior / evidence).clamp(0.0, 1.0)
        } else {
            0.5
        };

        let certainty = (probability - 0.5).abs() * 2.0;
        let n = posterior.observations as f64;
        let strength = n / (n + posterior.alpha.min(posterior.beta).max(1.0) * 4.0);
        let confidence = ((certainty + strength) / 2.0).clamp(0.0, 1.0);

        let avg = self.config.league_average_goals;
        let home_score = matchup.home.get_or(keys::GOALS_FOR_PER_GAME, avg) * (0.8 + probability * 0.4);
        let away_score = matchup.away.get_or(keys::GOALS_FOR_PER_GAME, avg) * (0.8 + (1.0 - probability) * 0.4);

        ModelPrediction::new(
            ModelId::Bayesian,
            probability,
            home_score.max(0.0),
            away_score.max(0.0),
            confidence,
        )
    }

    fn update(&self, example: &TrainingExample) -> Result<UpdateOutcome> {
        let mut state = self.state.write();
        if example.result.winner() == Side::Home {
            state.alpha += 1.0;
        } else {
            state.beta += 1.0;
        }
        state.observations += 1;
        Ok(UpdateOutcome::Applied)
    }

    fn snapshot(&self) -> Result<serde_json::Value> {
        let copy = self.state.read().clone();
        Ok(serde_json::to_value(copy)?)
    }

    fn restore(&self, state: serde_json::Value) -> Result<()> {
        let restored: BetaPosterior = serde_json::from_value(state)?;
        *self.state.write() = restored;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use forecast_models::{CompletedEventResult, EventId, ResultType};

    fn neutral_matchup() -> Matchup {
        Matchup::new(FeatureSnapshot::builder("H").build(), FeatureSnapshot::builder("A").build())
    }

    #[test]
    fn test_neutral_features_return_prior() {
        let model = BayesianModel::new(BayesianConfig::default());
        let prediction = model.predict(&neutral_matchup()).unwrap();

        assert!((prediction.home_win_probability - 0.55).abs() < 1e-12);
        assert!(prediction.home_score > prediction.away_score);
    }

    #[test]
    fn test_stronger_home_side_raises_posterior() {
        let model = BayesianModel::new(BayesianConfig::default());
        let matchup = Matchup::new(
            FeatureSnapshot::builder("H").feature(keys::WIN_PCT, 0.7).feature(keys::RECENT_FORM, 0.8).build(),
            FeatureSnapshot::builder("A").feature(keys::WIN_PCT, 0.4).build(),
        );
        let prediction = model.predict(&matchup).unwrap();
        assert!(prediction.home_win_probability > 0.6);
    }

    #[test]
    fn test_results_shift_prior_and_build_confidence() {
        let model = BayesianModel::new(BayesianConfig::default());
        let before = model.predict(&neutral_matchup()).unwrap();

        for i in 0..20 {
            let example = TrainingExample::new(CompletedEventResult {
                event_id: EventId::new(format!("g{i}")),
                date: Utc::now(),
                home_team: "H".to_string(),
                away_team: "A".to_string(),
                home_score: 2,
                away_score: 3,
                result_type: ResultType::Regulation,
                home_box: Default::default(),
                away_box: Default::default(),
            });
            model.update(&example).unwrap();
        }

        let after = model.predict(&neutral_matchup()).unwrap();
        assert!(after.home_win_probability < 0.5);
        assert!(after.confidence > before.confidence);
        assert_eq!(model.posterior().observations, 20);
    }
}
