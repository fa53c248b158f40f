//! Rating model: one Elo rating per team, zero-sum updates with an adaptive K.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use forecast_models::{CompletedEventResult, EventId, Matchup, ModelId, ModelPrediction, Result, Side};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::models::{PredictionModel, TrainingExample, UpdateOutcome};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EloConfig {
    pub initial_rating: f64,
    pub k_factor: f64,
    /// Rating points added to the home side when computing expectations.
    pub home_advantage: f64,
    /// Outcome credited to the winner of an overtime or shootout game.
    pub extra_time_win_value: f64,
    pub k_decay_games: f64,
    /// Fraction of K that survives however many games a team has played.
    pub k_floor: f64,
    pub upset_gap: f64,
    pub expected_result_multiplier: f64,
    pub upset_multiplier: f64,
    pub extra_time_multiplier: f64,
    pub blowout_margin: u32,
    pub blowout_multiplier: f64,
    pub comfortable_margin: u32,
    pub comfortable_multiplier: f64,
    pub league_average_goals: f64,
    /// Rating gap worth one goal of projected margin.
    pub points_per_goal: f64,
    pub history_cap: usize,
    pub min_confidence: f64,
    pub max_confidence: f64,
}

impl Default for EloConfig {
    fn default() -> Self {
        Self {
            initial_rating: 1500.0,
            k_factor: 32.0,
            home_advantage: 100.0,
            extra_time_win_value: 0.75,
            k_decay_games: 30.0,
            k_floor: 0.7,
            upset_gap: 200.0,
            expected_result_multiplier: 0.9,
            upset_multiplier: 1.3,
            extra_time_multiplier: 0.8,
            blowout_margin: 4,
            blowout_multiplier: 1.2,
            comfortable_margin: 3,
            comfortable_multiplier: 1.1,
            league_average_goals: 3.0,
            points_per_goal: 200.0,
            history_cap: 82,
            min_confidence: 0.6,
            max_confidence: 0.95,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatingChange {
    pub event_id: EventId,
    pub opponent: String,
    pub before: f64,
    pub after: f64,
    pub k: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TeamRating {
    pub rating: f64,
    pub games_played: u32,
    /// Drops after large swings, creeps up after small ones.
    pub confidence: f64,
    pub history: VecDeque<RatingChange>,
}

impl TeamRating {
    fn fresh(rating: f64) -> Self {
        Self {
            rating,
            ..Self::default()
        }
    }
}

impl Default for TeamRating {
    fn default() -> Self {
        Self {
            rating: 1500.0,
            games_played: 0,
            confidence: 0.5,
            history: VecDeque::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RatingState {
    pub teams: BTreeMap<String, TeamRating>,
    pub games_processed: u64,
}

pub struct EloModel {
    config: EloConfig,
    state: RwLock<RatingState>,
}

impl EloModel {
    pub fn new(config: EloConfig) -> Self {
        Self {
            config,
            state: RwLock::new(RatingState::default()),
        }
    }

    /// Unknown teams sit at the initial rating.
    pub fn rating(&self, team: &str) -> f64 {
        self.state
            .read()
            .teams
            .get(team)
            .map_or(self.config.initial_rating, |t| t.rating)
    }

    pub fn team(&self, team: &str) -> Option<TeamRating> {
        self.state.read().teams.get(team).cloned()
    }

    pub fn ratings(&self) -> BTreeMap<String, f64> {
        self.state
            .read()
            .teams
            .iter()
            .map(|(code, t)| (code.clone(), t.rating))
            .collect()
    }

    /// Expected home score, home advantage included.
    pub fn expected_home(&self, home_rating: f64, away_rating: f64) -> f64 {
        1.0 / (1.0 + 10f64.powf((away_rating - home_rating - self.config.home_advantage) / 400.0))
    }

    fn effective_k(&self, result: &CompletedEventResult, home: &TeamRating, away: &TeamRating) -> f64 {
        let cfg = &self.config;
        let avg_games = f64::from(home.games_played + away.games_played) / 2.0;
        let decay = 1.0 / (1.0 + avg_games / cfg.k_decay_games);
        let mut k = cfg.k_factor * (cfg.k_floor + (1.0 - cfg.k_floor) * decay);

        if result.result_type.is_extra_time() {
            k *= cfg.extra_time_multiplier;
        }

        let margin = result.goal_margin();
        if margin >= cfg.blowout_margin {
            k *= cfg.blowout_multiplier;
        } else if margin >= cfg.comfortable_margin {
            k *= cfg.comfortable_multiplier;
        }

        if (home.rating - away.rating).abs() > cfg.upset_gap {
            let favourite = if home.rating > away.rating { Side::Home } else { Side::Away };
            k *= if favourite == result.winner() {
                cfg.expected_result_multiplier
            } else {
                cfg.upset_multiplier
            };
        }
        k
    }

    fn apply(&self, state: &mut RatingState, result: &CompletedEventResult) {
        let initial = self.config.initial_rating;
        let home = state
            .teams
            .get(&result.home_team)
            .cloned()
            .unwrap_or_else(|| TeamRating::fresh(initial));
        let away = state
            .teams
            .get(&result.away_team)
            .cloned()
            .unwrap_or_else(|| TeamRating::fresh(initial));

        let expected = self.expected_home(home.rating, away.rating);
        let actual = result.home_outcome_value(self.config.extra_time_win_value);
        let k = self.effective_k(result, &home, &away);
        // Same K on both sides keeps the update zero-sum.
        let delta = k * (actual - expected);

        let now = Utc::now();
        let cap = self.config.history_cap;
        for (code, mut team, change, opponent) in [
            (&result.home_team, home, delta, &result.away_team),
            (&result.away_team, away, -delta, &result.home_team),
        ] {
            let before = team.rating;
            team.rating += change;
            team.games_played += 1;
            team.confidence = adjust_confidence(team.confidence, change);
            team.history.push_back(RatingChange {
                event_id: result.event_id.clone(),
                opponent: opponent.clone(),
                before,
                after: team.rating,
                k,
                at: now,
            });
            while team.history.len() > cap {
                team.history.pop_front();
            }
            state.teams.insert(code.clone(), team);
        }
        state.games_processed += 1;

        tracing::debug!(
            "📈 Elo {} {:+.2} / {} {:+.2} (k={:.2})",
            result.home_team,
            delta,
            result.away_team,
            -delta,
            k
        );
    }
}

fn adjust_confidence(current: f64, change: f64) -> f64 {
    let impact = (change.abs() / 50.0).min(1.0);
    if impact > 0.2 {
        current * (1.0 - impact * 0.1)
    } else {
        (current + 0.01).min(1.0)
    }
}

impl PredictionModel for EloModel {
    fn id(&self) -> ModelId {
        ModelId::Elo
    }

    fn model_version(&self) -> &str {
        "elo-v2"
    }

    fn diagnostics(&self) -> Option<serde_json::Value> {
        let mut ratings: Vec<(String, f64)> = self.ratings().into_iter().collect();
        ratings.sort_by(|a, b| b.1.total_cmp(&a.1));
        Some(serde_json::json!({ "ratings": ratings }))
    }

    fn predict(&self, matchup: &Matchup) -> Result<ModelPrediction> {
        let home = self.rating(matchup.home_team());
        let away = self.rating(matchup.away_team());
        let cfg = &self.config;

        let probability = self.expected_home(home, away);
        let gap = home + cfg.home_advantage - away;
        let half_margin = gap / cfg.points_per_goal / 2.0;
        let home_score = (cfg.league_average_goals + half_margin).max(0.0);
        let away_score = (cfg.league_average_goals - half_margin).max(0.0);
        let confidence = (0.5 + (home - away).abs() / 800.0).clamp(cfg.min_confidence, cfg.max_confidence);

        ModelPrediction::new(ModelId::Elo, probability, home_score, away_score, confidence)
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
        let restored: RatingState = serde_json::from_value(state)?;
        *self.state.write() = restored;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forecast_models::{FeatureSnapshot, ResultType};
    use proptest::prelude::*;

    fn game(id: &str, home: &str, away: &str, hs: u32, aws: u32, kind: ResultType) -> TrainingExample {
        TrainingExample::new(CompletedEventResult {
            event_id: EventId::from(id),
            date: Utc::now(),
            home_team: home.to_string(),
            away_team: away.to_string(),
            home_score: hs,
            away_score: aws,
            result_type: kind,
            home_box: Default::default(),
            away_box: Default::default(),
        })
    }

    fn matchup(home: &str, away: &str) -> Matchup {
        Matchup::new(FeatureSnapshot::builder(home).build(), FeatureSnapshot::builder(away).build())
    }

    #[test]
    fn test_fresh_ratings_regulation_home_win() {
        let model = EloModel::new(EloConfig::default());
        model.update(&game("g1", "TOR", "MTL", 3, 2, ResultType::Regulation)).unwrap();

        let expected = 1.0 / (1.0 + 10f64.powf(-100.0 / 400.0));
        let delta = 32.0 * (1.0 - expected);
        assert!((model.rating("TOR") - (1500.0 + delta)).abs() < 1e-9);
        assert!((model.rating("MTL") - (1500.0 - delta)).abs() < 1e-9);
        assert!((delta - 11.518).abs() < 1e-3);
    }

    #[test]
    fn test_overtime_win_counts_partially() {
        let model = EloModel::new(EloConfig::default());
        model.update(&game("g1", "TOR", "MTL", 2, 3, ResultType::Overtime)).unwrap();

        let expected = 1.0 / (1.0 + 10f64.powf(-100.0 / 400.0));
        let delta = 32.0 * 0.8 * (0.25 - expected);
        assert!((model.rating("TOR") - (1500.0 + delta)).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_teams_predict_at_initial_rating() {
        let model = EloModel::new(EloConfig::default());
        let prediction = model.predict(&matchup("SEA", "UTA")).unwrap();

        assert!((prediction.home_win_probability - 0.640065).abs() < 1e-5);
        assert!(prediction.home_score > prediction.away_score);
        assert_eq!(prediction.confidence, 0.6);
    }

    #[test]
    fn test_upset_increases_k() {
        let model = EloModel::new(EloConfig::default());
        for i in 0..20 {
            model
                .update(&game(&format!("g{i}"), "BOS", "CHI", 6, 1, ResultType::Regulation))
                .unwrap();
        }
        let gap_before = model.rating("BOS") - model.rating("CHI");
        assert!(gap_before > 200.0);

        model.update(&game("upset", "BOS", "CHI", 1, 2, ResultType::Regulation)).unwrap();
        let last = model.team("CHI").unwrap().history.back().cloned().unwrap();
        assert!(last.after > last.before);
        assert!(last.k > 32.0 * 0.7);
    }

    #[test]
    fn test_history_is_capped_and_restorable() {
        let model = EloModel::new(EloConfig {
            history_cap: 3,
            ..EloConfig::default()
        });
        for i in 0..5 {
            model
                .update(&game(&format!("g{i}"), "TOR", "MTL", 4, 1, ResultType::Regulation))
                .unwrap();
        }
        assert_eq!(model.team("TOR").unwrap().history.len(), 3);
        assert_eq!(model.team("TOR").unwrap().games_played, 5);

        let snapshot = model.snapshot().unwrap();
        let restored = EloModel::new(EloConfig::default());
        restored.restore(snapshot).unwrap();
        assert_eq!(restored.ratings(), model.ratings());
    }

    proptest! {
        #[test]
        fn prop_updates_are_zero_sum(
            games in proptest::collection::vec((0usize..6, 0usize..6, 0u32..8, 0u32..8, 0u8..3), 1..60)
        ) {
            let teams = ["ANA", "BOS", "CGY", "DAL", "EDM", "FLA"];
            let model = EloModel::new(EloConfig::default());
            let mut seen = std::collections::BTreeSet::new();

            for (i, (h, a, hs, aws, kind)) in games.into_iter().enumerate() {
                if h == a || hs == aws {
                    continue;
                }
                let kind = match kind {
                    0 => ResultType::Regulation,
                    1 => ResultType::Overtime,
                    _ => ResultType::Shootout,
                };
                model.update(&game(&format!("g{i}"), teams[h], teams[a], hs, aws, kind)).unwrap();
                seen.insert(teams[h]);
                seen.insert(teams[a]);
            }

            let total: f64 = model.ratings().values().sum();
            prop_assert!((total - 1500.0 * seen.len() as f64).abs() < 1e-6);
        }
    }
}
