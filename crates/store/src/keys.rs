use std::fmt;
use std::str::FromStr;

use forecast_models::ModelId;

use crate::error::StoreError;

/// One persisted state file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StateKey {
    Model(ModelId),
    Weights,
    ProcessedIndex,
    AccuracyHistory,
    PendingPredictions,
}

impl StateKey {
    pub fn name(&self) -> String {
        match self {
            Self::Model(id) => format!("model_{id}"),
            Self::Weights => "weights".to_string(),
            Self::ProcessedIndex => "processed_events".to_string(),
            Self::AccuracyHistory => "accuracy_history".to_string(),
            Self::PendingPredictions => "pending_predictions".to_string(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.name())
    }

    /// Every shared key plus one per given model.
    pub fn all(models: &[ModelId]) -> Vec<StateKey> {
        let mut keys: Vec<StateKey> = models.iter().map(|m| Self::Model(*m)).collect();
        keys.extend([
            Self::Weights,
            Self::ProcessedIndex,
            Self::AccuracyHistory,
            Self::PendingPredictions,
        ]);
        keys
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for StateKey {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weights" => Ok(Self::Weights),
            "processed_events" => Ok(Self::ProcessedIndex),
            "accuracy_history" => Ok(Self::AccuracyHistory),
            "pending_predictions" => Ok(Self::PendingPredictions),
            other => {
                let model = other
                    .strip_prefix("model_")
                    .ok_or_else(|| StoreError::corruption(format!("unknown state key {other}")))?;
                let id: ModelId = serde_json::from_value(serde_json::Value::String(model.to_string()))
                    .map_err(|_| StoreError::corruption(format!("unknown model {model}")))?;
                Ok(Self::Model(id))
            }
        }
    }
}
