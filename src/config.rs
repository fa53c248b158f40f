use config::{Config, ConfigError, Environment, File};
use forecast_ml::ModelsConfig;
use forecast_services::{FeedConfig, PipelineConfig, TrackerConfig};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub models: ModelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub state_dir: PathBuf,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("storage.state_dir", "data/state")?
            .set_default("pipeline.poll_interval_secs", 300)?
            .set_default("pipeline.fetch_timeout_secs", 10)?
            .set_default("feed.mode", "simulated")?
            .set_default("feed.base_url", "http://localhost:9000")?
            .set_default("feed.request_timeout_secs", 10)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // e.g. FORECAST__MODELS__ELO__K_FACTOR=24
            .add_source(Environment::with_prefix("FORECAST").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
