use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ForecastError, Result};
use crate::events::{EventId, Side};
use crate::features::Matchup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelId {
    Elo,
    Poisson,
    NeuralNetwork,
    GradientBoosting,
    Bayesian,
    MonteCarlo,
    Statistical,
    /// The combined forecast; used only for accuracy bookkeeping.
    Ensemble,
}

impl ModelId {
    /// Every individually weighted model, in registry order.
    pub const BASE_MODELS: [ModelId; 7] = [
        ModelId::Statistical,
        ModelId::Elo,
        ModelId::Poisson,
        ModelId::Bayesian,
        ModelId::MonteCarlo,
        ModelId::NeuralNetwork,
        ModelId::GradientBoosting,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Elo => "elo",
            Self::Poisson => "poisson",
            Self::NeuralNetwork => "neural_network",
            Self::GradientBoosting => "gradient_boosting",
            Self::Bayesian => "bayesian",
            Self::MonteCarlo => "monte_carlo",
            Self::Statistical => "statistical",
            Self::Ensemble => "ensemble",
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One model's opinion about one matchup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelPrediction {
    pub model: ModelId,
    pub home_win_probability: f64,
    pub home_score: f64,
    pub away_score: f64,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl ModelPrediction {
    pub fn new(
        model: ModelId,
        home_win_probability: f64,
        home_score: f64,
        away_score: f64,
        confidence: f64,
    ) -> Result<Self> {
        if !home_win_probability.is_finite() || !(0.0..=1.0).contains(&home_win_probability) {
            return Err(ForecastError::InvalidProbability {
                prob: home_win_probability,
            });
        }
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(ForecastError::InvalidConfidence { value: confidence });
        }
        for score in [home_score, away_score] {
            if !score.is_finite() || score < 0.0 {
                return Err(ForecastError::InvalidScore { value: score });
            }
        }

        Ok(Self {
            model,
            home_win_probability,
            home_score,
            away_score,
            confidence,
            created_at: Utc::now(),
        })
    }

    /// Coin-flip answer with zero confidence, used by models with no state yet.
    pub fn neutral(model: ModelId, league_average_goals: f64) -> Self {
        let goals = if league_average_goals.is_finite() && league_average_goals >= 0.0 {
            league_average_goals
        } else {
            0.0
        };
        Self {
            model,
            home_win_probability: 0.5,
            home_score: goals,
            away_score: goals,
            confidence: 0.0,
            created_at: Utc::now(),
        }
    }

    pub fn predicted_winner(&self) -> Side {
        if self.home_win_probability >= 0.5 {
            Side::Home
        } else {
            Side::Away
        }
    }

    pub fn away_win_probability(&self) -> f64 {
        1.0 - self.home_win_probability
    }

    pub fn is_confident(&self, threshold: f64) -> bool {
        self.confidence >= threshold
    }
}

/// Weighted combination of every model that answered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnsemblePrediction {
    pub id: Uuid,
    pub event_id: Option<EventId>,
    pub home_team: String,
    pub away_team: String,
    pub model_predictions: Vec<ModelPrediction>,
    /// Effective weights actually applied, renormalized over the models present.
    pub weights: BTreeMap<ModelId, f64>,
    pub home_win_probability: f64,
    pub predicted_winner: Side,
    pub home_score: f64,
    pub away_score: f64,
    pub confidence: f64,
    pub agreement: f64,
    pub rationale: String,
    pub created_at: DateTime<Utc>,
}

impl EnsemblePrediction {
    pub fn predicted_winner_code(&self) -> &str {
        match self.predicted_winner {
            Side::Home => &self.home_team,
            Side::Away => &self.away_team,
        }
    }

    pub fn model(&self, id: ModelId) -> Option<&ModelPrediction> {
        self.model_predictions.iter().find(|p| p.model == id)
    }

    pub fn with_event_id(mut self, event_id: EventId) -> Self {
        self.event_id = Some(event_id);
        self
    }

    /// The combined forecast expressed as a single model prediction so that it
    /// can be graded like any other model.
    pub fn as_model_prediction(&self) -> ModelPrediction {
        ModelPrediction {
            model: ModelId::Ensemble,
            home_win_probability: self.home_win_probability,
            home_score: self.home_score,
            away_score: self.away_score,
            confidence: self.confidence,
            created_at: self.created_at,
        }
    }
}

/// A served forecast waiting for its event to finish.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingPrediction {
    pub event_id: EventId,
    pub prediction: EnsemblePrediction,
    pub matchup: Matchup,
    pub issued_at: DateTime<Utc>,
}

impl PendingPrediction {
    pub fn new(event_id: EventId, prediction: EnsemblePrediction, matchup: Matchup) -> Self {
        Self {
            event_id,
            prediction,
            matchup,
            issued_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_prediction_creation() {
        let prediction = ModelPrediction::new(ModelId::Elo, 0.64, 3.2, 2.7, 0.71).unwrap();

        assert_eq!(prediction.model, ModelId::Elo);
        assert_eq!(prediction.predicted_winner(), Side::Home);
        assert!((prediction.away_win_probability() - 0.36).abs() < 1e-12);
        assert!(prediction.is_confident(0.7));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            ModelPrediction::new(ModelId::Poisson, 1.5, 3.0, 3.0, 0.5),
            Err(ForecastError::InvalidProbability { .. })
        ));
        assert!(matches!(
            ModelPrediction::new(ModelId::Poisson, 0.5, 3.0, 3.0, -0.1),
            Err(ForecastError::InvalidConfidence { .. })
        ));
        assert!(matches!(
            ModelPrediction::new(ModelId::Poisson, f64::NAN, 3.0, 3.0, 0.5),
            Err(ForecastError::InvalidProbability { .. })
        ));
        assert!(matches!(
            ModelPrediction::new(ModelId::Poisson, 0.5, -1.0, 3.0, 0.5),
            Err(ForecastError::InvalidScore { .. })
        ));
    }

    #[test]
    fn test_neutral_prediction() {
        let neutral = ModelPrediction::neutral(ModelId::GradientBoosting, 3.0);

        assert_eq!(neutral.home_win_probability, 0.5);
        assert_eq!(neutral.confidence, 0.0);
        assert_eq!(neutral.home_score, 3.0);
    }

    #[test]
    fn test_model_id_serde_names() {
        let json = serde_json::to_string(&ModelId::NeuralNetwork).unwrap();
        assert_eq!(json, "\"neural_network\"");
        assert_eq!(ModelId::MonteCarlo.to_string(), "monte_carlo");
        assert!(!ModelId::BASE_MODELS.contains(&ModelId::Ensemble));
    }
}
