//! Application-level configuration loading: round timings, scheduler cadence and content paths.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "ODD_ONE_OUT_CONFIG_PATH";
const DEFAULT_QUESTIONS_PATH: &str = "questions.json";
/// Environment variable that overrides the question catalog location.
const QUESTIONS_PATH_ENV: &str = "ODD_ONE_OUT_QUESTIONS_PATH";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Number of members receiving the alternate question each round.
    pub odd_one_count: usize,
    /// Length of the voting phase.
    pub voting_window: Duration,
    /// Period between two scheduler scans.
    pub scheduler_interval: Duration,
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
    pub room_code_length: usize,
    /// Bounds for the round duration requested by hosts, in seconds.
    pub min_round_secs: u64,
    pub max_round_secs: u64,
    pub questions_path: PathBuf,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_path(CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH);
        let config = match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(path = %path.display(), "loaded application config");
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        match env::var_os(QUESTIONS_PATH_ENV).filter(|value| !value.is_empty()) {
            Some(questions_path) => Self {
                questions_path: PathBuf::from(questions_path),
                ..config
            },
            None => config,
        }
    }

    /// Parse a JSON document; missing keys keep their default value.
    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }

    /// Whether `secs` is an acceptable round duration.
    pub fn round_duration_in_range(&self, secs: u64) -> bool {
        (self.min_round_secs..=self.max_round_secs).contains(&secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    odd_one_count: usize,
    voting_window_secs: u64,
    scheduler_interval_ms: u64,
    outbound_buffer: usize,
    room_code_length: usize,
    min_round_secs: u64,
    max_round_secs: u64,
    questions_path: String,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            odd_one_count: 1,
            voting_window_secs: 30,
            scheduler_interval_ms: 1000,
            outbound_buffer: 256,
            room_code_length: 4,
            min_round_secs: 5,
            max_round_secs: 600,
            questions_path: DEFAULT_QUESTIONS_PATH.into(),
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            odd_one_count: value.odd_one_count.max(1),
            voting_window: Duration::from_secs(value.voting_window_secs),
            scheduler_interval: Duration::from_millis(value.scheduler_interval_ms.max(1)),
            outbound_buffer: value.outbound_buffer.max(1),
            room_code_length: value.room_code_length.max(1),
            min_round_secs: value.min_round_secs,
            max_round_secs: value.max_round_secs.max(value.min_round_secs),
            questions_path: PathBuf::from(value.questions_path),
        }
    }
}

/// Resolve a path taking the environment override into account.
fn resolve_path(env_key: &str, default: &str) -> PathBuf {
    env::var_os(env_key)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(default))
}
