// Feature engineering for the vector-based models

use forecast_models::{keys, FeatureSnapshot, Matchup};

#[derive(Debug, Clone, Copy)]
pub struct FeatureSpec {
    pub key: &'static str,
    /// Typical league value; maps to zero after normalization.
    pub center: f64,
    pub scale: f64,
}

const fn spec(key: &'static str, center: f64, scale: f64) -> FeatureSpec {
    FeatureSpec { key, center, scale }
}

pub const FEATURE_SPECS: [FeatureSpec; 14] = [
    spec(keys::GOALS_FOR_PER_GAME, 3.0, 1.0),
    spec(keys::GOALS_AGAINST_PER_GAME, 3.0, 1.0),
    spec(keys::SHOTS_FOR_PER_GAME, 30.0, 5.0),
    spec(keys::SHOTS_AGAINST_PER_GAME, 30.0, 5.0),
    spec(keys::POWER_PLAY_PCT, 0.2, 0.05),
    spec(keys::PENALTY_KILL_PCT, 0.8, 0.05),
    spec(keys::WIN_PCT, 0.5, 0.15),
    spec(keys::RECENT_FORM, 0.5, 0.2),
    spec(keys::REST_DAYS, 1.5, 1.0),
    spec(keys::TRAVEL_FATIGUE, 0.3, 0.3),
    spec(keys::BACK_TO_BACK, 0.2, 0.4),
    spec(keys::HEAD_TO_HEAD_WIN_PCT, 0.5, 0.2),
    spec(keys::STAR_POWER, 0.5, 0.2),
    spec(keys::GOALIE_SAVE_PCT, 0.905, 0.01),
];

const CLIP: f64 = 5.0;

/// Turns a matchup into a fixed-length vector: every known feature for the
/// home side, then the same features for the away side.
#[derive(Debug, Clone, Default)]
pub struct FeatureEngineer;

impl FeatureEngineer {
    pub fn new() -> Self {
        Self
    }

    pub const fn input_len() -> usize {
        FEATURE_SPECS.len() * 2
    }

    pub fn feature_names() -> Vec<String> {
        let home = FEATURE_SPECS.iter().map(|s| format!("home_{}", s.key));
        let away = FEATURE_SPECS.iter().map(|s| format!("away_{}", s.key));
        home.chain(away).collect()
    }

    /// Missing features normalize to zero, the league-typical value.
    pub fn normalized(snapshot: &FeatureSnapshot, spec: &FeatureSpec) -> f64 {
        if !snapshot.contains(spec.key) {
            return 0.0;
        }
        ((snapshot.get(spec.key) - spec.center) / spec.scale).clamp(-CLIP, CLIP)
    }

    pub fn vectorize(&self, matchup: &Matchup) -> Vec<f64> {
        let mut out = Vec::with_capacity(Self::input_len());
        out.extend(FEATURE_SPECS.iter().map(|s| Self::normalized(&matchup.home, s)));
        out.extend(FEATURE_SPECS.iter().map(|s| Self::normalized(&matchup.away, s)));
        out
    }

    /// Home-minus-away differential per feature.
    pub fn differentials(&self, matchup: &Matchup) -> Vec<(&'static str, f64)> {
        FEATURE_SPECS
            .iter()
            .map(|s| (s.key, Self::normalized(&matchup.home, s) - Self::normalized(&matchup.away, s)))
            .collect()
    }
}
