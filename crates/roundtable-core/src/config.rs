use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{RoundtableError, SecretValue, require_env};

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const CONFIG_PATH_ENV: &str = "ROUNDTABLE_CONFIG";

/// Top-level configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub llm: LlmConfig,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub evidence: EvidenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Resolve the configured LLM secret value (from environment only).
    pub fn llm_api_key(&self) -> Result<SecretValue, RoundtableError> {
        require_env(&self.llm.api_key_env)
    }
}

/// Helper to load configuration with guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `ROUNDTABLE_CONFIG` environment variable.
    /// 3. `config.toml` in the current working directory.
    pub fn load(path: Option<PathBuf>) -> Result<Config, RoundtableError> {
        let candidate = resolve_path(path);
        let raw = fs::read_to_string(&candidate)
            .map_err(|err| RoundtableError::config_io(candidate.clone(), err))?;
        let config: Config = toml::from_str(&raw)
            .map_err(|err| RoundtableError::InvalidConfiguration(err.to_string()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &Config) -> Result<(), RoundtableError> {
        if config.llm.api_key_env.trim().is_empty() {
            return Err(RoundtableError::InvalidConfiguration(
                "llm.api_key_env must reference an environment variable".into(),
            ));
        }
        config.research.validate()?;

        // Ensure the environment variable exists at load time to discourage
        // inline secrets.
        require_env(&config.llm.api_key_env)?;
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = path {
        return path;
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return PathBuf::from(from_env);
        }
    }

    Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub api_key_env: String,
}

/// Limits governing a research run. Every bound the core honours is explicit
/// here; nothing is hardcoded at the call sites.
#[derive(Debug, Clone, Deserialize)]
pub struct ResearchConfig {
    #[serde(default = "ResearchConfig::default_max_analysts")]
    pub max_analysts: usize,
    #[serde(default = "ResearchConfig::default_max_turns")]
    pub max_turns_per_interview: usize,
    #[serde(default = "ResearchConfig::default_max_concurrent")]
    pub max_concurrent_sessions: usize,
    #[serde(default = "ResearchConfig::default_overall_timeout_secs")]
    pub overall_timeout_secs: u64,
    #[serde(default = "ResearchConfig::default_retry_count")]
    pub retry_count: usize,
    #[serde(default = "ResearchConfig::default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "ResearchConfig::default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl ResearchConfig {
    const fn default_max_analysts() -> usize {
        3
    }

    const fn default_max_turns() -> usize {
        2
    }

    const fn default_max_concurrent() -> usize {
        4
    }

    const fn default_overall_timeout_secs() -> u64 {
        300
    }

    const fn default_retry_count() -> usize {
        3
    }

    const fn default_initial_backoff_ms() -> u64 {
        500
    }

    const fn default_max_backoff_ms() -> u64 {
        8_000
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_secs(self.overall_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), RoundtableError> {
        if self.max_analysts == 0 {
            return Err(RoundtableError::InvalidConfiguration(
                "research.max_analysts must be at least 1".into(),
            ));
        }
        if self.max_turns_per_interview == 0 {
            return Err(RoundtableError::InvalidConfiguration(
                "research.max_turns_per_interview must be at least 1".into(),
            ));
        }
        if self.max_concurrent_sessions == 0 {
            return Err(RoundtableError::InvalidConfiguration(
                "research.max_concurrent_sessions must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_analysts: Self::default_max_analysts(),
            max_turns_per_interview: Self::default_max_turns(),
            max_concurrent_sessions: Self::default_max_concurrent(),
            overall_timeout_secs: Self::default_overall_timeout_secs(),
            retry_count: Self::default_retry_count(),
            initial_backoff_ms: Self::default_initial_backoff_ms(),
            max_backoff_ms: Self::default_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvidenceConfig {
    #[serde(default = "EvidenceConfig::default_sources")]
    pub sources: Vec<String>,
}

impl EvidenceConfig {
    fn default_sources() -> Vec<String> {
        vec!["google".to_string(), "twitter".to_string()]
    }
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            sources: Self::default_sources(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}
