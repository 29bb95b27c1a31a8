use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unknown timezone {0:?}")]
    InvalidTimezone(String),
    #[error("{key}: cannot parse {value:?}")]
    InvalidValue { key: String, value: String },
    #[error("{key} out of range: {reason}")]
    OutOfRange { key: &'static str, reason: &'static str },
}

/// Collaborator call policy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub call_timeout_ms: u64,
    /// Retries after the first attempt, for timeouts and rate limits only.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 3_000,
            max_retries: 2,
            backoff_base_ms: 200,
            backoff_cap_ms: 2_000,
        }
    }
}

impl DispatcherConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CopilotConfig {
    /// IANA zone relative phrases resolve in.
    pub timezone: String,
    /// Intent candidates strictly below this are treated as UNKNOWN.
    pub intent_threshold: f32,
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub history_len: usize,
    pub max_clarifications: u8,
    pub max_fuzzy_edits: usize,
    pub default_origin: String,
    pub dispatcher: DispatcherConfig,
    pub gazetteer_path: Option<PathBuf>,
    pub generator_url: Option<String>,
}

impl Default for CopilotConfig {
    fn default() -> Self {
        Self {
            timezone: "America/New_York".to_string(),
            intent_threshold: 0.5,
            idle_timeout_secs: 30 * 60,
            sweep_interval_secs: 60,
            history_len: 8,
            max_clarifications: 2,
            max_fuzzy_edits: 2,
            default_origin: "Main Gate".to_string(),
            dispatcher: DispatcherConfig::default(),
            gazetteer_path: None,
            generator_url: None,
        }
    }
}

impl CopilotConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// `.env`, then the file named by `COPILOT_CONFIG` (if any), then individual
    /// `COPILOT_*` overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let mut config = match std::env::var("COPILOT_CONFIG") {
            Ok(path) => Self::load(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `COPILOT_*` values from `lookup`. Split from `from_env` so tests need
    /// not touch the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(tz) = lookup("COPILOT_TIMEZONE") {
            self.timezone = tz;
        }
        if let Some(v) = lookup("COPILOT_INTENT_THRESHOLD") {
            self.intent_threshold = parse("COPILOT_INTENT_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("COPILOT_IDLE_TIMEOUT_SECS") {
            self.idle_timeout_secs = parse("COPILOT_IDLE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("COPILOT_SWEEP_INTERVAL_SECS") {
            self.sweep_interval_secs = parse("COPILOT_SWEEP_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("COPILOT_CALL_TIMEOUT_MS") {
            self.dispatcher.call_timeout_ms = parse("COPILOT_CALL_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("COPILOT_MAX_RETRIES") {
            self.dispatcher.max_retries = parse("COPILOT_MAX_RETRIES", &v)?;
        }
        if let Some(url) = lookup("COPILOT_GENERATOR_URL") {
            self.generator_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tz()?;
        if !(0.0..=1.0).contains(&self.intent_threshold) {
            return Err(ConfigError::OutOfRange {
                key: "intent_threshold",
                reason: "must lie in [0, 1]",
            });
        }
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::OutOfRange {
                key: "idle_timeout_secs",
                reason: "must be positive",
            });
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::OutOfRange {
                key: "sweep_interval_secs",
                reason: "must be positive",
            });
        }
        if self.dispatcher.call_timeout_ms == 0 {
            return Err(ConfigError::OutOfRange {
                key: "dispatcher.call_timeout_ms",
                reason: "must be positive",
            });
        }
        if self.dispatcher.backoff_cap_ms < self.dispatcher.backoff_base_ms {
            return Err(ConfigError::OutOfRange {
                key: "dispatcher.backoff_cap_ms",
                reason: "must not be below backoff_base_ms",
            });
        }
        Ok(())
    }

    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(self.timezone.clone()))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
