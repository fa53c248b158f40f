//! Rate model: offensive and defensive multipliers per team feeding two
//! independent Poisson goal distributions.

use std::collections::BTreeMap;

use forecast_models::{CompletedEventResult, Matchup, ModelId, ModelPrediction, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::models::{PredictionModel, TrainingExample, UpdateOutcome};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoissonConfig {
    /// Goals per team per game.
    pub league_average_goals: f64,
    pub home_advantage: f64,
    pub base_learning_rate: f64,
    pub decay_games: f64,
    pub min_learning_rate: f64,
    pub max_learning_rate: f64,
    pub offense_bounds: (f64, f64),
    pub defense_bounds: (f64, f64),
    pub extra_time_damping: f64,
    pub max_goals: usize,
    /// Share of the regulation-tie mass credited to the home side.
    pub tie_share: f64,
}

impl Default for PoissonConfig {
    fn default() -> Self {
        Self {
            league_average_goals: 3.0,
            home_advantage: 1.05,
            base_learning_rate: 0.3,
            decay_games: 40.0,
            min_learning_rate: 0.03,
            max_learning_rate: 0.4,
            offense_bounds: (0.4, 2.0),
            defense_bounds: (0.5, 1.8),
            extra_time_damping: 0.8,
            max_goals: 15,
            tie_share: 0.5,
        }
    }
}

/// Multipliers relative to league average. Defense above one concedes more.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TeamRates {
    pub offense: f64,
    pub defense: f64,
    pub games_played: u32,
}

impl Default for TeamRates {
    fn default() -> Self {
        Self {
            offense: 1.0,
            defense: 1.0,
            games_played: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateState {
    pub teams: BTreeMap<String, TeamRates>,
    pub games_processed: u64,
}

pub struct PoissonModel {
    config: PoissonConfig,
    state: RwLock<RateState>,
}

impl PoissonModel {
    pub fn new(config: PoissonConfig) -> Self {
        Self {
            config,
            state: RwLock::new(RateState::default()),
        }
    }

    pub fn rates(&self, team: &str) -> TeamRates {
        self.state.read().teams.get(team).cloned().unwrap_or_default()
    }

    /// (λ_home, λ_away)
    pub fn expected_goals(&self, home: &str, away: &str) -> (f64, f64) {
        let state = self.state.read();
        let h = state.teams.get(home).cloned().unwrap_or_default();
        let a = state.teams.get(away).cloned().unwrap_or_default();
        self.lambdas(&h, &a)
    }

    fn lambdas(&self, home: &TeamRates, away: &TeamRates) -> (f64, f64) {
        let avg = self.config.league_average_goals;
        (
            home.offense * away.defense * avg * self.config.home_advantage,
            away.offense * home.defense * avg,
        )
    }

    fn learning_rate(&self, games_played: u32, extra_time: bool) -> f64 {
        let cfg = &self.config;
        let lr = (cfg.base_learning_rate / (1.0 + f64::from(games_played) / cfg.decay_games))
            .clamp(cfg.min_learning_rate, cfg.max_learning_rate);
        if extra_time {
            lr * cfg.extra_time_damping
        } else {
            lr
        }
    }

    /// Home win probability: P(home > away) plus the tie share of P(home = away).
    pub fn win_probability(&self, lambda_home: f64, lambda_away: f64) -> f64 {
        let home = poisson_pmf(lambda_home, self.config.max_goals);
        let away = poisson_pmf(lambda_away, self.config.max_goals);

        let mut home_wins = 0.0;
        let mut ties = 0.0;
        let mut total = 0.0;
        for (h, ph) in home.iter().enumerate() {
            for (a, pa) in away.iter().enumerate() {
                let p = ph * pa;
                total += p;
                if h > a {
                    home_wins += p;
                } else if h == a {
                    ties += p;
                }
            }
        }
        if total <= 0.0 {
            return 0.5;
        }
        ((home_wins + self.config.tie_share * ties) / total).clamp(0.0, 1.0)
    }

    fn apply(&self, state: &mut RateState, result: &CompletedEventResult) {
        let cfg = &self.config;
        let mut home = state.teams.get(&result.home_team).cloned().unwrap_or_default();
        let mut away = state.teams.get(&result.away_team).cloned().unwrap_or_default();

        let (lambda_home, lambda_away) = self.lambdas(&home, &away);
        let extra_time = result.result_type.is_extra_time();
        let lr_home = self.learning_rate(home.games_played, extra_time);
        let lr_away = self.learning_rate(away.games_played, extra_time);
        let home_err = (f64::from(result.home_score) - lambda_home) / cfg.league_average_goals;
        let away_err = (f64::from(result.away_score) - lambda_away) / cfg.league_average_goals;

        home.offense = (home.offense + lr_home * home_err).clamp(cfg.offense_bounds.0, cfg.offense_bounds.1);
        away.defense = (away.defense + lr_away * home_err).clamp(cfg.defense_bounds.0, cfg.defense_bounds.1);
        away.offense = (away.offense + lr_away * away_err).clamp(cfg.offense_bounds.0, cfg.offense_bounds.1);
        home.defense = (home.defense + lr_home * away_err).clamp(cfg.defense_bounds.0, cfg.defense_bounds.1);
        home.games_played += 1;
        away.games_played += 1;

        state.teams.insert(result.home_team.clone(), home);
        state.teams.insert(result.away_team.clone(), away);
        state.games_processed += 1;
    }
}

/// Probabilities for 0..=max_goals, built iteratively.
fn poisson_pmf(lambda: f64, max_goals: usize) -> Vec<f64> {
    let lambda = lambda.max(0.0);
    let mut out = Vec::with_capacity(max_goals + 1);
    let mut p = (-lambda).exp();
    out.push(p);
    for k in 1..=max_goals {
        p *= lambda / k as f64;
        out.push(p);
    }
    out
}

impl PredictionModel for PoissonModel {
    fn id(&self) -> ModelId {
        ModelId::Poisson
    }

    fn model_version(&self) -> &str {
        "poisson-v2"
    }

    fn predict(&self, matchup: &Matchup) -> Result<ModelPrediction> {
        let (lambda_home, lambda_away) = self.expected_goals(matchup.home_team(), matchup.away_team());
        let probability = self.win_probability(lambda_home, lambda_away);
        let confidence = (0.6 + (lambda_home - lambda_away).abs() * 0.08).clamp(0.65, 0.92);

        ModelPrediction::new(ModelId::Poisson, probability, lambda_home, lambda_away, confidence)
    }

    fn update(&self, example: &TrainingExample) -> Result<UpdateOutcome> {
        let mut state = self.state.write();
        self.apply(&mut state, &example.result);
        Ok(UpdateOutcome::Applied)
    }

    fn snapshot(&self) -> Result<serde_json::Value> {
        let copy = self.state.read().clone();
        Ok(serde_json::to_value(copy)?)
    }

    fn restore(&self, state: serde_json::Value) -> Result<()> {
        let restored: RateState = serde_json::from_value(state)?;
        *self.state.write() = restored;
        Ok(())
    }
}
