use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{CompletedEventResult, EventId, ResultType, Side};
use crate::predictions::{ModelId, ModelPrediction};

/// Graded outcome of a single prediction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccuracyRecord {
    pub model: ModelId,
    pub event_id: EventId,
    pub predicted_winner: Side,
    pub actual_winner: Side,
    pub correct: bool,
    /// |pred_home - actual_home| + |pred_away - actual_away|
    pub score_error: f64,
    /// |p_home - outcome|, outcome being 1 for a home win.
    pub probability_error: f64,
    /// |confidence - correctness|
    pub calibration_error: f64,
    pub confidence: f64,
    pub home_win_probability: f64,
    #[serde(default)]
    pub result_type: ResultType,
    pub recorded_at: DateTime<Utc>,
}

impl AccuracyRecord {
    pub fn grade(prediction: &ModelPrediction, result: &CompletedEventResult) -> Self {
        let actual_winner = result.winner();
        let predicted_winner = prediction.predicted_winner();
        let correct = predicted_winner == actual_winner;
        let outcome = if actual_winner == Side::Home { 1.0 } else { 0.0 };

        let score_error = (prediction.home_score - f64::from(result.home_score)).abs()
            + (prediction.away_score - f64::from(result.away_score)).abs();

        Self {
            model: prediction.model,
            event_id: result.event_id.clone(),
            predicted_winner,
            actual_winner,
            correct,
            score_error,
            probability_error: (prediction.home_win_probability - outcome).abs(),
            calibration_error: (prediction.confidence - if correct { 1.0 } else { 0.0 }).abs(),
            confidence: prediction.confidence,
            home_win_probability: prediction.home_win_probability,
            result_type: result.result_type,
            recorded_at: Utc::now(),
        }
    }

    pub fn brier(&self) -> f64 {
        let outcome = if self.actual_winner == Side::Home { 1.0 } else { 0.0 };
        (self.home_win_probability - outcome).powi(2)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyTrend {
    Improving,
    Declining,
    #[default]
    Stable,
}

/// Stated confidence against observed hit rate for one confidence band.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationBucket {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    pub mean_confidence: f64,
    pub observed_accuracy: f64,
}

/// Hit rate restricted to games decided a particular way.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultTypeAccuracy {
    pub result_type: ResultType,
    pub total: usize,
    pub correct: usize,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelAccuracyStats {
    pub model: ModelId,
    pub total: usize,
    pub correct: usize,
    pub accuracy: f64,
    pub recent_accuracy: f64,
    /// Oldest first.
    pub recent_outcomes: Vec<bool>,
    /// Positive for a run of hits, negative for a run of misses.
    pub current_streak: i32,
    pub longest_win_streak: u32,
    pub longest_loss_streak: u32,
    pub mean_score_error: f64,
    pub mean_probability_error: f64,
    pub mean_calibration_error: f64,
    pub brier_score: f64,
    pub calibration_curve: Vec<CalibrationBucket>,
    /// Only result types that occurred are listed.
    pub by_result_type: Vec<ResultTypeAccuracy>,
    pub trend: AccuracyTrend,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Half-window accuracy swing needed before a trend is reported.
const TREND_THRESHOLD: f64 = 0.05;
const MIN_TREND_SAMPLES: usize = 4;

impl ModelAccuracyStats {
    pub fn empty(model: ModelId) -> Self {
        Self {
            model,
            total: 0,
            correct: 0,
            accuracy: 0.0,
            recent_accuracy: 0.0,
            recent_outcomes: Vec::new(),
            current_streak: 0,
            longest_win_streak: 0,
            longest_loss_streak: 0,
            mean_score_error: 0.0,
            mean_probability_error: 0.0,
            mean_calibration_error: 0.0,
            brier_score: 0.0,
            calibration_curve: Vec::new(),
            by_result_type: Vec::new(),
            trend: AccuracyTrend::Stable,
            last_updated: None,
        }
    }

    /// Aggregates records given in chronological order. Records for other
    /// models are ignored.
    pub fn from_records<'a, I>(model: ModelId, records: I, recent_window: usize, buckets: usize) -> Self
    where
        I: IntoIterator<Item = &'a AccuracyRecord>,
    {
        let records: Vec<&AccuracyRecord> = records.into_iter().filter(|r| r.model == model).collect();
        if records.is_empty() {
            return Self::empty(model);
        }

        let total = records.len();
        let n = total as f64;
        let correct = records.iter().filter(|r| r.correct).count();

        let mut current_streak: i32 = 0;
        let mut longest_win_streak = 0u32;
        let mut longest_loss_streak = 0u32;
        for record in &records {
            current_streak = match (record.correct, current_streak) {
                (true, s) if s > 0 => s + 1,
                (true, _) => 1,
                (false, s) if s < 0 => s - 1,
                (false, _) => -1,
            };
            if current_streak > 0 {
                longest_win_streak = longest_win_streak.max(current_streak.unsigned_abs());
            } else {
                longest_loss_streak = longest_loss_streak.max(current_streak.unsigned_abs());
            }
        }

        let window = recent_window.max(1).min(total);
        let recent_outcomes: Vec<bool> = records[total - window..].iter().map(|r| r.correct).collect();
        let recent_accuracy = hit_rate(&recent_outcomes);

        Self {
            model,
            total,
            correct,
            accuracy: correct as f64 / n,
            recent_accuracy,
            trend: trend_of(&recent_outcomes),
            recent_outcomes,
            current_streak,
            longest_win_streak,
            longest_loss_streak,
            mean_score_error: records.iter().map(|r| r.score_error).sum::<f64>() / n,
            mean_probability_error: records.iter().map(|r| r.probability_error).sum::<f64>() / n,
            mean_calibration_error: records.iter().map(|r| r.calibration_error).sum::<f64>() / n,
            brier_score: records.iter().map(|r| r.brier()).sum::<f64>() / n,
            calibration_curve: calibration_curve(&records, buckets),
            by_result_type: by_result_type(&records),
            last_updated: records.last().map(|r| r.recorded_at),
        }
    }

    pub fn has_samples(&self, min_samples: usize) -> bool {
        self.total >= min_samples
    }
}

fn hit_rate(outcomes: &[bool]) -> f64 {
    if outcomes.is_empty() {
        return 0.0;
    }
    outcomes.iter().filter(|c| **c).count() as f64 / outcomes.len() as f64
}

fn trend_of(recent: &[bool]) -> AccuracyTrend {
    if recent.len() < MIN_TREND_SAMPLES {
        return AccuracyTrend::Stable;
    }
    let (older, newer) = recent.split_at(recent.len() / 2);
    let delta = hit_rate(newer) - hit_rate(older);
    if delta > TREND_THRESHOLD {
        AccuracyTrend::Improving
    } else if delta < -TREND_THRESHOLD {
        AccuracyTrend::Declining
    } else {
        AccuracyTrend::Stable
    }
}

/// Buckets on stated confidence; empty buckets are omitted.
fn calibration_curve(records: &[&AccuracyRecord], buckets: usize) -> Vec<CalibrationBucket> {
    let buckets = buckets.max(1);
    let mut sums = vec![(0usize, 0.0f64, 0usize); buckets];

    for record in records {
        let confidence = record.confidence.clamp(0.0, 1.0);
        let idx = ((confidence * buckets as f64) as usize).min(buckets - 1);
        let slot = &mut sums[idx];
        slot.0 += 1;
        slot.1 += confidence;
        slot.2 += usize::from(record.correct);
    }

    sums.into_iter()
        .enumerate()
        .filter(|(_, (count, _, _))| *count > 0)
        .map(|(i, (count, confidence_sum, hits))| CalibrationBucket {
            lower: i as f64 / buckets as f64,
            upper: (i + 1) as f64 / buckets as f64,
            count,
            mean_confidence: confidence_sum / count as f64,
            observed_accuracy: hits as f64 / count as f64,
        })
        .collect()
}

fn by_result_type(records: &[&AccuracyRecord]) -> Vec<ResultTypeAccuracy> {
    ResultType::ALL
        .into_iter()
        .filter_map(|result_type| {
            let outcomes: Vec<bool> = records
                .iter()
                .filter(|r| r.result_type == result_type)
                .map(|r| r.correct)
                .collect();
            if outcomes.is_empty() {
                return None;
            }
            Some(ResultTypeAccuracy {
                result_type,
                total: outcomes.len(),
                correct: outcomes.iter().filter(|c| **c).count(),
                accuracy: hit_rate(&outcomes),
            })
        })
        .collect()
}
