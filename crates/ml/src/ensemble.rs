//! Ensemble combiner: confidence-scaled weighted average with agreement
//! adjustments on the combined confidence.

use std::collections::BTreeMap;

use chrono::Utc;
use forecast_models::{
    EnsemblePrediction, ForecastError, ModelId, ModelPrediction, Result, Side, WeightVector,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Probability span below which agreement earns a bonus.
    pub agreement_span: f64,
    /// Largest share of the remaining confidence headroom the bonus adds.
    pub max_agreement_bonus: f64,
    /// Probability span above which the spread is penalized.
    pub disagreement_span: f64,
    pub max_disagreement_penalty: f64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            agreement_span: 0.3,
            max_agreement_bonus: 0.15,
            disagreement_span: 0.4,
            max_disagreement_penalty: 0.2,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnsembleCombiner {
    config: EnsembleConfig,
}

impl EnsembleCombiner {
    pub fn new(config: EnsembleConfig) -> Self {
        Self { config }
    }

    /// Combines whatever models answered. Entries with non-finite or
    /// out-of-range values are dropped; an empty set is an error.
    pub fn combine(
        &self,
        home_team: &str,
        away_team: &str,
        predictions: Vec<ModelPrediction>,
        weights: &WeightVector,
    ) -> Result<EnsemblePrediction> {
        let (usable, dropped): (Vec<ModelPrediction>, Vec<ModelPrediction>) =
            predictions.into_iter().partition(is_usable);
        for bad in &dropped {
            tracing::warn!("⚠️ Dropping unusable prediction from {}", bad.model);
        }
        if usable.is_empty() {
            return Err(ForecastError::NoPredictions);
        }

        let effective = effective_weights(&usable, weights);
        let probability: f64 = usable
            .iter()
            .zip(&effective)
            .map(|(p, w)| p.home_win_probability * w)
            .sum::<f64>()
            .clamp(0.0, 1.0);
        let home_score: f64 = usable.iter().zip(&effective).map(|(p, w)| p.home_score * w).sum();
        let away_score: f64 = usable.iter().zip(&effective).map(|(p, w)| p.away_score * w).sum();
        let base_confidence: f64 = usable.iter().zip(&effective).map(|(p, w)| p.confidence * w).sum();

        let (lo, hi) = usable.iter().fold((1.0f64, 0.0f64), |(lo, hi), p| {
            (lo.min(p.home_win_probability), hi.max(p.home_win_probability))
        });
        let span = hi - lo;
        let agreement = (1.0 - span).clamp(0.0, 1.0);

        let home_votes = usable.iter().filter(|p| p.predicted_winner() == Side::Home).count();
        let minority = home_votes.min(usable.len() - home_votes);
        let unanimous = minority == 0;

        let confidence = self.adjusted_confidence(&usable, base_confidence, span, minority);

        let weight_map: BTreeMap<ModelId, f64> = usable.iter().map(|p| p.model).zip(effective.iter().copied()).collect();
        let predicted_winner = if probability >= 0.5 { Side::Home } else { Side::Away };
        let rationale = rationale(
            home_team,
            away_team,
            &usable,
            &weight_map,
            probability,
            predicted_winner,
            agreement,
            unanimous,
        );

        Ok(EnsemblePrediction {
            id: Uuid::new_v4(),
            event_id: None,
            home_team: home_team.to_string(),
            away_team: away_team.to_string(),
            model_predictions: usable,
            weights: weight_map,
            home_win_probability: probability,
            predicted_winner,
            home_score,
            away_score,
            confidence,
            agreement,
            rationale,
            created_at: Utc::now(),
        })
    }
}

impl EnsembleCombiner {
    /// A unanimous ensemble starts from its most confident member and earns
    /// the agreement bonus on the remaining headroom; a spread in margins
    /// only shrinks that bonus. A split ensemble starts from the weighted
    /// confidence and pays the disagreement penalty.
    fn adjusted_confidence(&self, usable: &[ModelPrediction], base: f64, span: f64, minority: usize) -> f64 {
        let cfg = &self.config;
        let bonus = ((cfg.agreement_span - span) / cfg.agreement_span).max(0.0) * cfg.max_agreement_bonus;

        let (anchor, penalty) = if minority == 0 {
            (usable.iter().map(|p| p.confidence).fold(0.0, f64::max), 0.0)
        } else {
            let spread = ((span - cfg.disagreement_span) / (1.0 - cfg.disagreement_span)).clamp(0.0, 1.0);
            let split = 2.0 * minority as f64 / usable.len() as f64;
            (base, cfg.max_disagreement_penalty * spread.max(split))
        };

        (anchor + (1.0 - anchor) * bonus - penalty).clamp(0.0, 1.0)
    }
}

fn is_usable(p: &ModelPrediction) -> bool {
    p.home_win_probability.is_finite()
        && (0.0..=1.0).contains(&p.home_win_probability)
        && p.confidence.is_finite()
        && (0.0..=1.0).contains(&p.confidence)
        && p.home_score.is_finite()
        && p.away_score.is_finite()
}

/// Weight × confidence, renormalized. Falls back to plain weights when every
/// model reports zero confidence, then to uniform.
fn effective_weights(predictions: &[ModelPrediction], weights: &WeightVector) -> Vec<f64> {
    let scaled: Vec<f64> = predictions
        .iter()
        .map(|p| weights.get(p.model) * p.confidence)
        .collect();
    if let Some(normalized) = normalize(&scaled) {
        return normalized;
    }
    let plain: Vec<f64> = predictions.iter().map(|p| weights.get(p.model)).collect();
    normalize(&plain).unwrap_or_else(|| vec![1.0 / predictions.len() as f64; predictions.len()])
}

fn normalize(values: &[f64]) -> Option<Vec<f64>> {
    let total: f64 = values.iter().sum();
    if total > 0.0 && total.is_finite() {
        Some(values.iter().map(|v| v / total).collect())
    } else {
        None
    }
}

#[allow(clippy::too_many_arguments)]
fn rationale(
    home_team: &str,
    away_team: &str,
    predictions: &[ModelPrediction],
    weights: &BTreeMap<ModelId, f64>,
    probability: f64,
    winner: Side,
    agreement: f64,
    unanimous: bool,
) -> String {
    let favourite = match winner {
        Side::Home => home_team,
        Side::Away => away_team,
    };
    let backing = predictions.iter().filter(|p| p.predicted_winner() == winner).count();
    let (lead_model, lead_weight) = weights
        .iter()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map_or((ModelId::Ensemble, 0.0), |(m, w)| (*m, *w));

    let consensus = if unanimous { "unanimous" } else { "split" };
    format!(
        "{favourite} favoured ({:.1}% home win); {backing}/{} models agree ({consensus}, agreement {:.2}); heaviest weight {lead_model} at {:.2}",
        probability * 100.0,
        predictions.len(),
        agreement,
        lead_weight,
    )
}
