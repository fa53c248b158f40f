use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known feature names supplied by the enrichment layer.
///
/// Anything outside this list is carried along untouched; models only read
/// the keys they understand.
pub mod keys {
    pub const GOALS_FOR_PER_GAME: &str = "goals_for_per_game";
    pub const GOALS_AGAINST_PER_GAME: &str = "goals_against_per_game";
    pub const SHOTS_FOR_PER_GAME: &str = "shots_for_per_game";
    pub const SHOTS_AGAINST_PER_GAME: &str = "shots_against_per_game";
    pub const POWER_PLAY_PCT: &str = "power_play_pct";
    pub const PENALTY_KILL_PCT: &str = "penalty_kill_pct";
    pub const WIN_PCT: &str = "win_pct";
    pub const RECENT_FORM: &str = "recent_form";
    pub const REST_DAYS: &str = "rest_days";
    pub const TRAVEL_FATIGUE: &str = "travel_fatigue";
    pub const BACK_TO_BACK: &str = "back_to_back";
    pub const HEAD_TO_HEAD_WIN_PCT: &str = "head_to_head_win_pct";
    pub const STAR_POWER: &str = "star_power";
    pub const GOALIE_SAVE_PCT: &str = "goalie_save_pct";
}

/// Immutable numeric view of one team ahead of one event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureSnapshot {
    pub team: String,
    pub as_of: DateTime<Utc>,
    features: BTreeMap<String, f64>,
}

impl FeatureSnapshot {
    pub fn new(team: impl Into<String>, as_of: DateTime<Utc>, features: BTreeMap<String, f64>) -> Self {
        // Non-finite values are dropped so that every read is well defined.
        let features = features.into_iter().filter(|(_, v)| v.is_finite()).collect();
        Self {
            team: team.into(),
            as_of,
            features,
        }
    }

    pub fn builder(team: impl Into<String>) -> FeatureSnapshotBuilder {
        FeatureSnapshotBuilder {
            team: team.into(),
            as_of: Utc::now(),
            features: BTreeMap::new(),
        }
    }

    /// Missing features read as zero.
    pub fn get(&self, key: &str) -> f64 {
        self.get_or(key, 0.0)
    }

    pub fn get_or(&self, key: &str, default: f64) -> f64 {
        self.features.get(key).copied().unwrap_or(default)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.features.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.features.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

pub struct FeatureSnapshotBuilder {
    team: String,
    as_of: DateTime<Utc>,
    features: BTreeMap<String, f64>,
}

impl FeatureSnapshotBuilder {
    pub fn as_of(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = as_of;
        self
    }

    pub fn feature(mut self, key: impl Into<String>, value: f64) -> Self {
        self.features.insert(key.into(), value);
        self
    }

    pub fn build(self) -> FeatureSnapshot {
        FeatureSnapshot::new(self.team, self.as_of, self.features)
    }
}

/// Home and away snapshots for a single event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Matchup {
    pub home: FeatureSnapshot,
    pub away: FeatureSnapshot,
}

impl Matchup {
    pub fn new(home: FeatureSnapshot, away: FeatureSnapshot) -> Self {
        Self { home, away }
    }

    pub fn home_team(&self) -> &str {
        &self.home.team
    }

    pub fn away_team(&self) -> &str {
        &self.away.team
    }

    /// Fraction of `wanted` keys present on both sides.
    pub fn coverage(&self, wanted: &[&str]) -> f64 {
        if wanted.is_empty() {
            return 1.0;
        }
        let present = wanted
            .iter()
            .filter(|k| self.home.contains(k) && self.away.contains(k))
            .count();
        present as f64 / wanted.len() as f64
    }
}
