use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Home,
    Away,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Self::Home => Self::Away,
            Self::Away => Self::Home,
        }
    }
}

/// How the deciding goal was scored.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    #[default]
    Regulation,
    Overtime,
    Shootout,
}

impl ResultType {
    pub const ALL: [Self; 3] = [Self::Regulation, Self::Overtime, Self::Shootout];

    pub fn is_extra_time(self) -> bool {
        matches!(self, Self::Overtime | Self::Shootout)
    }
}

/// Status reported by the external schedule feed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExternalStatus {
    Scheduled,
    Live,
    Final,
    Postponed,
    Cancelled,
}

/// Where an event sits in the learning lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    Scheduled,
    Live,
    CompletedUnprocessed,
    CompletedProcessed,
}

impl EventState {
    pub fn from_external(status: ExternalStatus, processed: bool) -> Self {
        match (status, processed) {
            (_, true) => Self::CompletedProcessed,
            (ExternalStatus::Final, false) => Self::CompletedUnprocessed,
            (ExternalStatus::Live, false) => Self::Live,
            (ExternalStatus::Scheduled | ExternalStatus::Postponed | ExternalStatus::Cancelled, false) => {
                Self::Scheduled
            }
        }
    }

    pub fn needs_training(self) -> bool {
        matches!(self, Self::CompletedUnprocessed)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TeamBoxScore {
    pub shots: u32,
    pub power_play_goals: u32,
    pub power_play_opportunities: u32,
    pub penalty_minutes: u32,
    pub hits: u32,
    pub blocked_shots: u32,
    pub faceoff_win_pct: f64,
}

/// Ground truth for a finished event. Never mutated once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletedEventResult {
    pub event_id: EventId,
    pub date: DateTime<Utc>,
    pub home_team: String,
    pub away_team: String,
    pub home_score: u32,
    pub away_score: u32,
    pub result_type: ResultType,
    #[serde(default)]
    pub home_box: TeamBoxScore,
    #[serde(default)]
    pub away_box: TeamBoxScore,
}

impl CompletedEventResult {
    pub fn winner(&self) -> Side {
        if self.home_score > self.away_score {
            Side::Home
        } else {
            Side::Away
        }
    }

    pub fn winner_code(&self) -> &str {
        self.team_code(self.winner())
    }

    pub fn team_code(&self, side: Side) -> &str {
        match side {
            Side::Home => &self.home_team,
            Side::Away => &self.away_team,
        }
    }

    pub fn home_won(&self) -> bool {
        self.winner() == Side::Home
    }

    pub fn goal_margin(&self) -> u32 {
        self.home_score.abs_diff(self.away_score)
    }

    pub fn total_goals(&self) -> u32 {
        self.home_score + self.away_score
    }

    /// Home side's share of the result: 1/0 in regulation, the configured
    /// partial value when the game went past regulation.
    pub fn home_outcome_value(&self, extra_time_win_value: f64) -> f64 {
        let win_value = if self.result_type.is_extra_time() {
            extra_time_win_value
        } else {
            1.0
        };
        match self.winner() {
            Side::Home => win_value,
            Side::Away => 1.0 - win_value,
        }
    }
}

/// Poll record from the schedule feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventSummary {
    pub event_id: EventId,
    pub status: ExternalStatus,
    pub home_team: String,
    pub away_team: String,
    pub start_time: Option<DateTime<Utc>>,
}

impl EventSummary {
    pub fn is_final(&self) -> bool {
        matches!(self.status, ExternalStatus::Final)
    }
}

/// Detail record as delivered by the fetch collaborator; every field may be
/// missing and must be validated before it becomes training data.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RawEventResult {
    pub event_id: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
    pub result_type: Option<ResultType>,
    pub home_box: Option<TeamBoxScore>,
    pub away_box: Option<TeamBoxScore>,
}

impl RawEventResult {
    pub fn validate(self) -> Result<CompletedEventResult> {
        let event_id = match self.event_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => id,
            None => return Err(malformed("<unknown>", "missing event id")),
        };

        let home_team = required_team(self.home_team, &event_id, "home")?;
        let away_team = required_team(self.away_team, &event_id, "away")?;
        if home_team == away_team {
            return Err(malformed(&event_id, "home and away team are identical"));
        }

        let home_score = required_score(self.home_score, &event_id, "home_score")?;
        let away_score = required_score(self.away_score, &event_id, "away_score")?;
        if home_score == away_score {
            return Err(malformed(&event_id, "final score cannot be tied"));
        }

        let date = self
            .date
            .ok_or_else(|| malformed(&event_id, "missing date"))?;

        Ok(CompletedEventResult {
            event_id: EventId(event_id),
            date,
            home_team,
            away_team,
            home_score,
            away_score,
            result_type: self.result_type.unwrap_or(ResultType::Regulation),
            home_box: self.home_box.unwrap_or_default(),
            away_box: self.away_box.unwrap_or_default(),
        })
    }
}

fn malformed(event_id: &str, reason: &str) -> ForecastError {
    ForecastError::MalformedResult {
        event_id: event_id.to_string(),
        reason: reason.to_string(),
    }
}

fn required_team(team: Option<String>, event_id: &str, side: &str) -> Result<String> {
    match team.map(|t| t.trim().to_uppercase()) {
        Some(t) if !t.is_empty() => Ok(t),
        _ => Err(malformed(event_id, &format!("missing {side} team code"))),
    }
}

fn required_score(score: Option<i64>, event_id: &str, field: &str) -> Result<u32> {
    let score = score.ok_or_else(|| malformed(event_id, &format!("missing {field}")))?;
    u32::try_from(score).map_err(|_| malformed(event_id, &format!("{field} out of range: {score}")))
}

/// Event ids that have already been turned into training signals.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessedEventIndex {
    processed: BTreeSet<EventId>,
}

impl ProcessedEventIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &EventId) -> bool {
        self.processed.contains(id)
    }

    /// Returns false when the id was already present.
    pub fn mark_processed(&mut self, id: EventId) -> bool {
        self.processed.insert(id)
    }

    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }

    pub fn state_of(&self, summary: &EventSummary) -> EventState {
        EventState::from_external(summary.status, self.contains(&summary.event_id))
    }
}
