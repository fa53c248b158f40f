//! Monte-Carlo baseline: simulates the game many times from Poisson goal
//! draws and counts outcomes.

use forecast_models::{keys, Matchup, ModelId, ModelPrediction, Result};
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::models::{PredictionModel, TrainingExample, UpdateOutcome};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonteCarloConfig {
    pub simulations: usize,
    pub league_average_goals: f64,
    pub home_edge: f64,
    /// Smoothing for the league environment learned from results.
    pub ema_alpha: f64,
    /// Share of tied simulations awarded to the home side.
    pub tie_share: f64,
    /// Fixed seed for reproducible runs; `None` uses the thread RNG.
    pub seed: Option<u64>,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            simulations: 2000,
            league_average_goals: 3.0,
            home_edge: 1.05,
            ema_alpha: 0.05,
            tie_share: 0.5,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationEnvironment {
    pub league_average_goals: f64,
    pub home_edge: f64,
    pub games_observed: u64,
}

impl Default for SimulationEnvironment {
    fn default() -> Self {
        Self {
            league_average_goals: 3.0,
            home_edge: 1.05,
            games_observed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationSummary {
    pub home_wins: f64,
    pub mean_home_goals: f64,
    pub mean_away_goals: f64,
}

pub struct MonteCarloModel {
    config: MonteCarloConfig,
    state: RwLock<SimulationEnvironment>,
}

/// Knuth's multiplication method.
pub fn sample_poisson<R: Rng>(lambda: f64, rng: &mut R) -> u32 {
    let limit = (-lambda.max(0.0)).exp();
    let mut k = 0u32;
    let mut p = 1.0;
    loop {
        p *= rng.gen::<f64>();
        if p <= limit || k >= 30 {
            return k;
        }
        k += 1;
    }
}

impl MonteCarloModel {
    pub fn new(config: MonteCarloConfig) -> Self {
        let state = SimulationEnvironment {
            league_average_goals: config.league_average_goals,
            home_edge: config.home_edge,
            games_observed: 0,
        };
        Self {
            config,
            state: RwLock::new(state),
        }
    }

    pub fn environment(&self) -> SimulationEnvironment {
        self.state.read().clone()
    }

    /// λ per side: team scoring rate against the opponent's concession rate,
    /// both relative to league average. Missing features are average.
    pub fn lambdas(&self, matchup: &Matchup) -> (f64, f64) {
        let env = self.environment();
        let avg = env.league_average_goals.max(0.1);
        let rate = |v: f64| (v / avg).clamp(0.2, 3.0);

        let home_for = rate(matchup.home.get_or(keys::GOALS_FOR_PER_GAME, avg));
        let home_against = rate(matchup.home.get_or(keys::GOALS_AGAINST_PER_GAME, avg));
        let away_for = rate(matchup.away.get_or(keys::GOALS_FOR_PER_GAME, avg));
        let away_against = rate(matchup.away.get_or(keys::GOALS_AGAINST_PER_GAME, avg));

        (
            avg * home_for * away_against * env.home_edge,
            avg * away_for * home_against,
        )
    }

    pub fn simulate<R: Rng>(&self, lambda_home: f64, lambda_away: f64, rng: &mut R) -> SimulationSummary {
        let n = self.config.simulations.max(1);
        let mut home_wins = 0.0;
        let mut home_goals = 0u64;
        let mut away_goals = 0u64;

        for _ in 0..n {
            let h = sample_poisson(lambda_home, rng);
            let a = sample_poisson(lambda_away, rng);
            home_goals += u64::from(h);
            away_goals += u64::from(a);
            if h > a {
                home_wins += 1.0;
            } else if h == a {
                home_wins += self.config.tie_share;
            }
        }

        SimulationSummary {
            home_wins,
            mean_home_goals: home_goals as f64 / n as f64,
            mean_away_goals: away_goals as f64 / n as f64,
        }
    }
}

impl PredictionModel for MonteCarloModel {
    fn id(&self) -> ModelId {
        ModelId::MonteCarlo
    }

    fn model_version(&self) -> &str {
        "montecarlo-v2"
    }

    fn predict(&self, matchup: &Matchup) -> Result<ModelPrediction> {
        let (lambda_home, lambda_away) = self.lambdas(matchup);
        let summary = match self.config.seed {
            Some(seed) => self.simulate(lambda_home, lambda_away, &mut StdRng::seed_from_u64(seed)),
            None => self.simulate(lambda_home, lambda_away, &mut rand::thread_rng()),
        };

        let n = self.config.simulations.max(1) as f64;
        let probability = (summary.home_wins / n).clamp(0.0, 1.0);
        let standard_error = (probability * (1.0 - probability) / n).sqrt();
        let confidence = ((1.0 - 4.0 * standard_error).max(0.0) * (0.5 + (probability - 0.5).abs())).clamp(0.0, 1.0);

        ModelPrediction::new(
            ModelId::MonteCarlo,
            probability,
            summary.mean_home_goals,
            summary.mean_away_goals,
            confidence,
        )
    }

    fn update(&self, example: &TrainingExample) -> Result<UpdateOutcome> {
        let result = &example.result;
        let alpha = self.config.ema_alpha;
        let per_team = f64::from(result.total_goals()) / 2.0;
        let edge = (f64::from(result.home_score) + 0.5) / (f64::from(result.away_score) + 0.5);

        let mut env = self.state.write();
        env.league_average_goals = (1.0 - alpha) * env.league_average_goals + alpha * per_team;
        env.home_edge = ((1.0 - alpha) * env.home_edge + alpha * edge).clamp(0.8, 1.3);
        env.games_observed += 1;
        Ok(UpdateOutcome::Applied)
    }

    fn snapshot(&self) -> Result<serde_json::Value> {
        let copy = self.state.read().clone();
        Ok(serde_json::to_value(copy)?)
    }

    fn restore(&self, state: serde_json::Value) -> Result<()> {
        let restored: SimulationEnvironment = serde_json::from_value(state)?;
        *self.state.write() = restored;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use forecast_models::{CompletedEventResult, EventId, FeatureSnapshot, ResultType};

    fn seeded() -> MonteCarloModel {
        MonteCarloModel::new(MonteCarloConfig {
            seed: Some(17),
            ..MonteCarloConfig::default()
        })
    }

    #[test]
    fn test_poisson_sampler_mean() {
        let mut rng = StdRng::seed_from_u64(5);
        let n = 20_000;
        let total: u32 = (0..n).map(|_| sample_poisson(3.0, &mut rng)).sum();
        let mean = f64::from(total) / f64::from(n);
        assert!((mean - 3.0).abs() < 0.1, "mean was {mean}");
    }

    #[test]
    fn test_stronger_offense_wins_more_simulations() {
        let model = seeded();
        let matchup = Matchup::new(
            FeatureSnapshot::builder("H").feature(keys::GOALS_FOR_PER_GAME, 4.2).build(),
            FeatureSnapshot::builder("A").feature(keys::GOALS_FOR_PER_GAME, 2.4).build(),
        );
        let prediction = model.predict(&matchup).unwrap();

        assert!(prediction.home_win_probability > 0.65);
        assert!(prediction.home_score > prediction.away_score);
        assert!(prediction.confidence > 0.5 && prediction.confidence <= 1.0);
    }

    #[test]
    fn test_results_move_environment() {
        let model = seeded();
        let example = TrainingExample::new(CompletedEventResult {
            event_id: EventId::from("g1"),
            date: Utc::now(),
            home_team: "H".to_string(),
            away_team: "A".to_string(),
            home_score: 7,
            away_score: 5,
            result_type: ResultType::Regulation,
            home_box: Default::default(),
            away_box: Default::default(),
        });
        model.update(&example).unwrap();

        let env = model.environment();
        assert!(env.league_average_goals > 3.0);
        assert_eq!(env.games_observed, 1);
    }
}
