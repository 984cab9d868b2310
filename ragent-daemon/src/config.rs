//! Environment-variable configuration, following the same
//! `Config::from_env()` shape as [`ragent_gates::TrainingGateConfig`].

use std::path::PathBuf;
use thiserror::Error;

/// Everything the daemon needs to start that isn't owned by a single
/// downstream crate (gate thresholds are read by `ragent-gates` itself).
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Whether the reconciler loop drives new cycles at all.
    pub agent_enabled: bool,
    /// How often the reconciler loop ticks.
    pub trigger_interval_seconds: u64,
    /// Model identifier passed to the Anthropic provider.
    pub agent_model: String,
    /// Max tokens per model response.
    pub agent_max_tokens: u32,
    /// Per-request timeout for the agent loop.
    pub agent_timeout_seconds: u64,
    /// Max tool-use turns before a design/assessment run gives up.
    pub agent_max_iterations: u32,
    /// Cumulative input-token budget per run.
    pub agent_max_input_tokens: u64,
    /// Postgres connection string for the session store.
    pub database_url: String,
    /// Anthropic API key.
    pub anthropic_api_key: String,
    /// Base URL of the KTRDR API (indicators, symbols, training, backtest).
    pub ktrdr_api_url: String,
    /// Directory strategy configs and assessments are written under.
    pub strategies_dir: PathBuf,
}

/// Failure reading or parsing the daemon's environment configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable was absent.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    /// A variable was present but not parseable as the expected type.
    #[error("invalid value for {name}: {value}")]
    Invalid {
        /// The variable name.
        name: &'static str,
        /// The value that failed to parse.
        value: String,
    },
}

impl DaemonConfig {
    /// Build a config from the process environment, defaulting whatever
    /// spec.md's env-var table marks optional.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            agent_enabled: env_bool("AGENT_ENABLED", true)?,
            trigger_interval_seconds: env_u64("AGENT_TRIGGER_INTERVAL_SECONDS", 300)?,
            agent_model: std::env::var("AGENT_MODEL")
                .unwrap_or_else(|_| "claude-opus-4-20250514".to_string()),
            agent_max_tokens: env_u32("AGENT_MAX_TOKENS", 4096)?,
            agent_timeout_seconds: env_u64("AGENT_TIMEOUT_SECONDS", 300)?,
            agent_max_iterations: env_u32("AGENT_MAX_ITERATIONS", 10)?,
            agent_max_input_tokens: env_u64("AGENT_MAX_INPUT_TOKENS", 50_000)?,
            database_url: required_env("DATABASE_URL")?,
            anthropic_api_key: required_env("ANTHROPIC_API_KEY")?,
            ktrdr_api_url: std::env::var("KTRDR_API_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            strategies_dir: PathBuf::from(
                std::env::var("STRATEGIES_DIR").unwrap_or_else(|_| "strategies".to_string()),
            ),
        })
    }
}

fn required_env(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn env_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ConfigError::Invalid { name, value }),
        },
    }
}

fn env_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

fn env_u32(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_bool_accepts_common_spellings() {
        assert!(env_bool("UNSET_VAR_XYZ", true).unwrap());
        assert!(env_bool("UNSET_VAR_XYZ", false).unwrap() == false);
    }

    #[test]
    fn env_u64_rejects_garbage() {
        unsafe {
            std::env::set_var("RAGENT_TEST_U64", "not-a-number");
        }
        let err = env_u64("RAGENT_TEST_U64", 1).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        unsafe {
            std::env::remove_var("RAGENT_TEST_U64");
        }
    }
}
