use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::storage::{self, StateLoadError, StateSaveError};

pub const DEFAULT_AGENT_URL: &str = "http://127.0.0.1:8898";
pub const DATA_DIR_ENV: &str = "NATUN_CONSOLE_DIR";

const MAX_AGENT_URL_LEN: usize = 2048;
const POLL_INTERVAL_RANGE_MS: (u64, u64) = (100, 60_000);
const FEEDBACK_RANGE_MS: (u64, u64) = (100, 30_000);
const REQUEST_TIMEOUT_RANGE_MS: (u64, u64) = (500, 120_000);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Please fix the following:\n\n- {}", .0.join("\n- "))]
    Invalid(Vec<String>),
    #[error("failed to read config file {}: {source}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: StateLoadError,
    },
    #[error("failed to write config file {}: {source}", .path.display())]
    Save {
        path: PathBuf,
        #[source]
        source: StateSaveError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConsoleConfig {
    pub agent_url: String,
    pub poll_interval_ms: u64,
    pub feedback_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            agent_url: DEFAULT_AGENT_URL.to_owned(),
            poll_interval_ms: 1000,
            feedback_ms: 2000,
            request_timeout_ms: 10_000,
        }
    }
}

/// Values given on the command line; each one wins over the saved config.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub agent_url: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub feedback_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
}

impl ConsoleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let agent_url = self.agent_url.trim();
        if agent_url.is_empty() {
            errors.push("Agent URL is required.".to_string());
        } else if agent_url.len() > MAX_AGENT_URL_LEN {
            errors.push(format!(
                "Agent URL is too long ({} > {} chars).",
                agent_url.len(),
                MAX_AGENT_URL_LEN
            ));
        } else {
            match Url::parse(agent_url) {
                Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
                Ok(_) => errors.push("Agent URL must start with http:// or https://.".to_string()),
                Err(err) => errors.push(format!("Agent URL is invalid: {err}")),
            }
        }

        check_range(&mut errors, "Poll interval", self.poll_interval_ms, POLL_INTERVAL_RANGE_MS);
        check_range(&mut errors, "Feedback duration", self.feedback_ms, FEEDBACK_RANGE_MS);
        check_range(
            &mut errors,
            "Request timeout",
            self.request_timeout_ms,
            REQUEST_TIMEOUT_RANGE_MS,
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    pub fn apply(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(url) = &overrides.agent_url {
            self.agent_url = url.clone();
        }
        if let Some(ms) = overrides.poll_interval_ms {
            self.poll_interval_ms = ms;
        }
        if let Some(ms) = overrides.feedback_ms {
            self.feedback_ms = ms;
        }
        if let Some(ms) = overrides.request_timeout_ms {
            self.request_timeout_ms = ms;
        }
        self
    }

    /// Parsed agent URL. Call after [`ConsoleConfig::validate`].
    pub fn agent_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(self.agent_url.trim())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn feedback_duration(&self) -> Duration {
        Duration::from_millis(self.feedback_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn check_range(errors: &mut Vec<String>, name: &str, value: u64, (min, max): (u64, u64)) {
    if !(min..=max).contains(&value) {
        errors.push(format!("{name} must be between {min} and {max} ms (got {value})."));
    }
}

/// Data directory: explicit flag, then `NATUN_CONSOLE_DIR`, then the platform
/// local data location.
pub fn data_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    let base = std::env::var_os("LOCALAPPDATA")
        .or_else(|| std::env::var_os("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local").join("share")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("natun")
}

pub fn config_path(dir: &Path) -> PathBuf {
    dir.join("config.json")
}

pub fn state_path(dir: &Path) -> PathBuf {
    dir.join("state.json")
}

pub fn log_path(dir: &Path) -> PathBuf {
    dir.join("logs").join("natun-console.log")
}

/// `Ok(None)` when no config has been saved yet.
pub fn load_config(path: &Path) -> Result<Option<ConsoleConfig>, ConfigError> {
    let config: ConsoleConfig = match storage::load_json(path) {
        Ok(config) => config,
        Err(err) if err.is_missing() => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Load {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    config.validate()?;
    Ok(Some(config))
}

pub fn save_config(path: &Path, config: &ConsoleConfig) -> Result<(), ConfigError> {
    config.validate()?;
    storage::save_json_with_retry(path, config).map_err(|source| ConfigError::Save {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        ConsoleConfig::default().validate().expect("defaults validate");
    }

    #[test]
    fn validation_collects_every_problem() {
        let config = ConsoleConfig {
            agent_url: "ws://127.0.0.1:8898".to_owned(),
            poll_interval_ms: 5,
            feedback_ms: 2000,
            request_timeout_ms: 0,
        };
        let err = config.validate().expect_err("config is invalid");
        let ConfigError::Invalid(errors) = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(errors.len(), 3);
        assert!(err.to_string().starts_with("Please fix the following:"));
        assert!(errors[0].contains("http://"));
    }

    #[test]
    fn overrides_replace_saved_values() {
        let saved = ConsoleConfig {
            agent_url: "http://10.0.0.2:8898".to_owned(),
            ..ConsoleConfig::default()
        };
        let merged = saved.apply(&ConfigOverrides {
            poll_interval_ms: Some(250),
            ..ConfigOverrides::default()
        });
        assert_eq!(merged.agent_url, "http://10.0.0.2:8898");
        assert_eq!(merged.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn explicit_data_dir_wins() {
        let dir = data_dir(Some(Path::new("/tmp/natun-test")));
        assert_eq!(dir, PathBuf::from("/tmp/natun-test"));
        assert_eq!(
            log_path(&dir),
            PathBuf::from("/tmp/natun-test/logs/natun-console.log")
        );
    }

    #[test]
    fn partial_config_files_use_defaults() {
        let config: ConsoleConfig =
            serde_json::from_str(r#"{"agentUrl":"http://192.168.1.4:8898"}"#).expect("parse");
        assert_eq!(config.agent_url, "http://192.168.1.4:8898");
        assert_eq!(config.poll_interval_ms, 1000);
    }
}
