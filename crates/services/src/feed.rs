use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use forecast_ml::sample_poisson;
use forecast_models::{
    keys, EventId, EventSummary, ExternalStatus, FeatureSnapshot, Matchup, RawEventResult, ResultType,
    TeamBoxScore,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("No result available for event {0}")]
    NotAvailable(EventId),
}

/// Where completed games come from.
#[async_trait]
pub trait ResultSource: Send + Sync {
    async fn poll_events(&self) -> Result<Vec<EventSummary>, FeedError>;

    async fn fetch_result(&self, event_id: &EventId) -> Result<RawEventResult, FeedError>;
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeedMode {
    #[default]
    Simulated,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeedConfig {
    pub mode: FeedMode,
    pub base_url: String,
    pub request_timeout_secs: u64,
    /// New games the simulator schedules on every poll.
    pub games_per_poll: usize,
    pub retained_games: usize,
    pub seed: Option<u64>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            mode: FeedMode::Simulated,
            base_url: "http://localhost:9000".to_string(),
            request_timeout_secs: 10,
            games_per_poll: 3,
            retained_games: 200,
            seed: None,
        }
    }
}

/// JSON feed: `GET {base}/events` and `GET {base}/events/{id}/result`.
pub struct HttpResultSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpResultSource {
    pub fn new(config: &FeedConfig) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T, FeedError> {
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                url,
                status: status.as_u16(),
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl ResultSource for HttpResultSource {
    async fn poll_events(&self) -> Result<Vec<EventSummary>, FeedError> {
        self.get_json(self.url("events")).await
    }

    async fn fetch_result(&self, event_id: &EventId) -> Result<RawEventResult, FeedError> {
        self.get_json(self.url(&format!("events/{event_id}/result"))).await
    }
}

#[derive(Debug, Clone)]
struct SimTeam {
    code: &'static str,
    attack: f64,
    defense: f64,
}

#[derive(Debug, Clone, Default)]
struct TeamTally {
    games: u32,
    wins: u32,
    goals_for: u32,
    goals_against: u32,
    recent: VecDeque<bool>,
    last_played: Option<DateTime<Utc>>,
}

impl TeamTally {
    fn record(&mut self, scored: u32, conceded: u32, at: DateTime<Utc>) {
        let won = scored > conceded;
        self.games += 1;
        self.wins += u32::from(won);
        self.goals_for += scored;
        self.goals_against += conceded;
        self.recent.push_back(won);
        if self.recent.len() > 10 {
            self.recent.pop_front();
        }
        self.last_played = Some(at);
    }

    fn snapshot(&self, team: &str, now: DateTime<Utc>) -> FeatureSnapshot {
        let mut builder = FeatureSnapshot::builder(team).as_of(now);
        if self.games > 0 {
            let games = f64::from(self.games);
            builder = builder
                .feature(keys::GOALS_FOR_PER_GAME, f64::from(self.goals_for) / games)
                .feature(keys::GOALS_AGAINST_PER_GAME, f64::from(self.goals_against) / games)
                .feature(keys::WIN_PCT, f64::from(self.wins) / games);
        }
        if !self.recent.is_empty() {
            let wins = self.recent.iter().filter(|w| **w).count();
            builder = builder.feature(keys::RECENT_FORM, wins as f64 / self.recent.len() as f64);
        }
        if let Some(last) = self.last_played {
            builder = builder.feature(keys::REST_DAYS, (now - last).num_days() as f64);
        }
        builder.build()
    }
}

#[derive(Debug, Clone)]
struct SimGame {
    summary: EventSummary,
    result: Option<RawEventResult>,
}

/// Demo feed: schedules games between fixed-strength teams and plays them
/// out over successive polls (scheduled, then live, then final).
pub struct SimulatedResultSource {
    config: FeedConfig,
    teams: Vec<SimTeam>,
    games: DashMap<EventId, SimGame>,
    tallies: Mutex<HashMap<String, TeamTally>>,
    rng: Mutex<StdRng>,
    next_id: AtomicU64,
}

impl SimulatedResultSource {
    pub fn new(config: FeedConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        info!("🎮 Simulated result feed: {} games per poll", config.games_per_poll);
        Self {
            config,
            teams: Self::generate_teams(),
            games: DashMap::new(),
            tallies: Mutex::new(HashMap::new()),
            rng: Mutex::new(rng),
            next_id: AtomicU64::new(1),
        }
    }

    fn generate_teams() -> Vec<SimTeam> {
        [
            ("COL", 1.20, 0.90),
            ("EDM", 1.25, 1.05),
            ("BOS", 1.05, 0.85),
            ("TOR", 1.10, 1.00),
            ("NYR", 1.00, 0.95),
            ("VGK", 1.00, 0.90),
            ("MTL", 0.85, 1.15),
            ("CHI", 0.80, 1.20),
        ]
        .into_iter()
        .map(|(code, attack, defense)| SimTeam { code, attack, defense })
        .collect()
    }

    /// Scheduled games with feature snapshots from the results so far.
    pub fn upcoming(&self) -> Vec<(EventId, Matchup)> {
        let now = Utc::now();
        // Never hold a games shard while taking the tallies lock.
        let mut scheduled: Vec<EventSummary> = self
            .games
            .iter()
            .filter(|g| g.summary.status == ExternalStatus::Scheduled)
            .map(|g| g.summary.clone())
            .collect();
        scheduled.sort_by(|a, b| a.event_id.cmp(&b.event_id));

        let tallies = self.tallies.lock();
        scheduled
            .into_iter()
            .map(|s| {
                let home = tallies.get(&s.home_team).cloned().unwrap_or_default();
                let away = tallies.get(&s.away_team).cloned().unwrap_or_default();
                let matchup = Matchup::new(home.snapshot(&s.home_team, now), away.snapshot(&s.away_team, now));
                (s.event_id, matchup)
            })
            .collect()
    }

    fn advance(&self) {
        let mut ids: Vec<EventId> = self.games.iter().map(|g| g.key().clone()).collect();
        ids.sort();

        let mut rng = self.rng.lock();
        for id in &ids {
            let Some(summary) = self.games.get(id).map(|g| g.summary.clone()) else {
                continue;
            };
            match summary.status {
                ExternalStatus::Live => {
                    let result = self.play(&summary, &mut *rng);
                    debug!(
                        "🏒 {} final: {} {} - {} {}",
                        id,
                        summary.home_team,
                        result.home_score.unwrap_or_default(),
                        result.away_score.unwrap_or_default(),
                        summary.away_team
                    );
                    if let Some(mut game) = self.games.get_mut(id) {
                        game.result = Some(result);
                        game.summary.status = ExternalStatus::Final;
                    }
                }
                ExternalStatus::Scheduled => {
                    if let Some(mut game) = self.games.get_mut(id) {
                        game.summary.status = ExternalStatus::Live;
                    }
                }
                _ => {}
            }
        }

        for _ in 0..self.config.games_per_poll {
            let home = rng.gen_range(0..self.teams.len());
            let mut away = rng.gen_range(0..self.teams.len() - 1);
            if away >= home {
                away += 1;
            }
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            let event_id = EventId::new(format!("sim-{n:06}"));
            let summary = EventSummary {
                event_id: event_id.clone(),
                status: ExternalStatus::Scheduled,
                home_team: self.teams[home].code.to_string(),
                away_team: self.teams[away].code.to_string(),
                start_time: Some(Utc::now()),
            };
            self.games.insert(event_id, SimGame { summary, result: None });
        }

        let excess = self.games.len().saturating_sub(self.config.retained_games);
        for id in ids.iter().take(excess) {
            self.games.remove(id);
        }
    }

    fn play<R: Rng>(&self, summary: &EventSummary, rng: &mut R) -> RawEventResult {
        let strength = |code: &str| {
            self.teams
                .iter()
                .find(|t| t.code == code)
                .map_or((1.0, 1.0), |t| (t.attack, t.defense))
        };
        let (home_attack, home_defense) = strength(&summary.home_team);
        let (away_attack, away_defense) = strength(&summary.away_team);

        let mut home = sample_poisson(3.0 * home_attack * away_defense * 1.05, rng);
        let mut away = sample_poisson(3.0 * away_attack * home_defense, rng);
        let mut result_type = ResultType::Regulation;
        if home == away {
            result_type = if rng.gen_bool(0.7) {
                ResultType::Overtime
            } else {
                ResultType::Shootout
            };
            if rng.gen_bool(0.5) {
                home += 1;
            } else {
                away += 1;
            }
        }

        let now = Utc::now();
        {
            let mut tallies = self.tallies.lock();
            tallies.entry(summary.home_team.clone()).or_default().record(home, away, now);
            tallies.entry(summary.away_team.clone()).or_default().record(away, home, now);
        }

        let shots = |goals: u32, rng: &mut R| goals * 3 + rng.gen_range(18..30);
        RawEventResult {
            event_id: Some(summary.event_id.to_string()),
            date: Some(now),
            home_team: Some(summary.home_team.clone()),
            away_team: Some(summary.away_team.clone()),
            home_score: Some(i64::from(home)),
            away_score: Some(i64::from(away)),
            result_type: Some(result_type),
            home_box: Some(TeamBoxScore {
                shots: shots(home, rng),
                ..TeamBoxScore::default()
            }),
            away_box: Some(TeamBoxScore {
                shots: shots(away, rng),
                ..TeamBoxScore::default()
            }),
        }
    }
}

#[async_trait]
impl ResultSource for SimulatedResultSource {
    async fn poll_events(&self) -> Result<Vec<EventSummary>, FeedError> {
        self.advance();
        let mut summaries: Vec<EventSummary> = self.games.iter().map(|g| g.summary.clone()).collect();
        summaries.sort_by(|a, b| a.event_id.cmp(&b.event_id));
        Ok(summaries)
    }

    async fn fetch_result(&self, event_id: &EventId) -> Result<RawEventResult, FeedError> {
        self.games
            .get(event_id)
            .and_then(|g| g.result.clone())
            .ok_or_else(|| FeedError::NotAvailable(event_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SimulatedResultSource {
        SimulatedResultSource::new(FeedConfig {
            seed: Some(7),
            ..FeedConfig::default()
        })
    }

    #[tokio::test]
    async fn test_games_progress_to_final() {
        let feed = source();

        let first = feed.poll_events().await.unwrap();
        assert_eq!(first.len(), 3);
        assert!(first.iter().all(|e| e.status == ExternalStatus::Scheduled));
        assert!(first.iter().all(|e| e.home_team != e.away_team));

        feed.poll_events().await.unwrap();
        let third = feed.poll_events().await.unwrap();
        let finals: Vec<&EventSummary> = third.iter().filter(|e| e.is_final()).collect();
        assert_eq!(finals.len(), 3);

        let raw = feed.fetch_result(&finals[0].event_id).await.unwrap();
        let result = raw.validate().unwrap();
        assert_ne!(result.home_score, result.away_score);
        assert_eq!(result.event_id, finals[0].event_id);
    }

    #[tokio::test]
    async fn test_unfinished_game_has_no_result() {
        let feed = source();
        let events = feed.poll_events().await.unwrap();
        let err = feed.fetch_result(&events[0].event_id).await.unwrap_err();
        assert!(matches!(err, FeedError::NotAvailable(_)));
    }

    #[tokio::test]
    async fn test_upcoming_uses_played_results() {
        let feed = source();
        for _ in 0..4 {
            feed.poll_events().await.unwrap();
        }
        let upcoming = feed.upcoming();
        assert_eq!(upcoming.len(), 3);
        assert!(feed.tallies.lock().values().map(|t| t.games).sum::<u32>() >= 6);
    }

    #[test]
    fn test_polling_and_upcoming_run_concurrently() {
        let feed = std::sync::Arc::new(SimulatedResultSource::new(FeedConfig {
            seed: Some(5),
            games_per_poll: 20,
            ..FeedConfig::default()
        }));
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        let poller = {
            let feed = feed.clone();
            let done_tx = done_tx.clone();
            std::thread::spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
                for _ in 0..500 {
                    rt.block_on(feed.poll_events()).unwrap();
                }
                done_tx.send(()).unwrap();
            })
        };
        let reader = {
            let feed = feed.clone();
            std::thread::spawn(move || {
                for _ in 0..5000 {
                    feed.upcoming();
                }
                done_tx.send(()).unwrap();
            })
        };

        for _ in 0..2 {
            done_rx
                .recv_timeout(Duration::from_secs(30))
                .expect("poll and upcoming should not block each other");
        }
        poller.join().unwrap();
        reader.join().unwrap();
    }

    #[tokio::test]
    async fn test_old_games_are_pruned() {
        let feed = SimulatedResultSource::new(FeedConfig {
            seed: Some(1),
            retained_games: 5,
            ..FeedConfig::default()
        });
        for _ in 0..5 {
            feed.poll_events().await.unwrap();
        }
        assert!(feed.games.len() <= 5 + 3);
    }

    #[test]
    fn test_http_urls() {
        let feed = HttpResultSource::new(&FeedConfig {
            base_url: "http://feed.local/api/".to_string(),
            ..FeedConfig::default()
        })
        .unwrap();
        assert_eq!(feed.url("events"), "http://feed.local/api/events");
        assert_eq!(
            feed.url(&format!("events/{}/result", EventId::from("g1"))),
            "http://feed.local/api/events/g1/result"
        );
    }
}
