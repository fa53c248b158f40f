use thiserror::Error;

use crate::predictions::ModelId;

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("Invalid probability: {prob}, must be between 0.0 and 1.0")]
    InvalidProbability { prob: f64 },

    #[error("Invalid confidence: {value}, must be between 0.0 and 1.0")]
    InvalidConfidence { value: f64 },

    #[error("Invalid predicted score: {value}")]
    InvalidScore { value: f64 },

    #[error("Malformed result for event {event_id}: {reason}")]
    MalformedResult { event_id: String, reason: String },

    #[error("Model {model} has not been trained yet")]
    ModelNotTrained { model: ModelId },

    #[error("Model {model} failed: {reason}")]
    ModelFailed { model: ModelId, reason: String },

    #[error("Feature vector has {actual} entries, model expects {expected}")]
    FeatureDimension { expected: usize, actual: usize },

    #[error("No model produced a usable prediction")]
    NoPredictions,

    #[error("Invalid weight vector: {0}")]
    InvalidWeights(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ForecastError>;
