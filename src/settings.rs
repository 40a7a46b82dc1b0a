//! Process configuration, loaded from environment variables (spec §6).
//!
//! The teacher declares the `config` crate as a dependency but never calls
//! it, loading its own JSON config by hand in `config::mod` instead. This
//! repo actually wires it up: `Settings::load` layers `config::Environment`
//! over compiled-in defaults.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub llm_endpoint: String,
    pub llm_api_key: String,
    pub llm_provider: String,
    pub max_concurrent_llm: usize,
    pub max_sessions: usize,
    pub idle_timeout_seconds: u64,
    pub store_path: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm_endpoint: "https://api.openai.com/v1/chat/completions".into(),
            llm_api_key: String::new(),
            llm_provider: "openai-compatible".into(),
            max_concurrent_llm: 3,
            max_sessions: 100,
            idle_timeout_seconds: 1800,
            store_path: None,
        }
    }
}

impl Settings {
    /// Loads settings from the environment variables enumerated in spec
    /// §6: `LLM_ENDPOINT`, `LLM_API_KEY`, `LLM_PROVIDER`,
    /// `MAX_CONCURRENT_LLM`, `MAX_SESSIONS`, `IDLE_TIMEOUT_SECONDS`,
    /// `STORE_PATH`. A malformed value is a configuration error, mapped by
    /// the CLI to exit code 64.
    pub fn load() -> CoreResult<Self> {
        let defaults = Settings::default();
        let built = config::Config::builder()
            .set_default("llm_endpoint", defaults.llm_endpoint.clone())
            .map_err(config_err)?
            .set_default("llm_api_key", defaults.llm_api_key.clone())
            .map_err(config_err)?
            .set_default("llm_provider", defaults.llm_provider.clone())
            .map_err(config_err)?
            .set_default("max_concurrent_llm", defaults.max_concurrent_llm as i64)
            .map_err(config_err)?
            .set_default("max_sessions", defaults.max_sessions as i64)
            .map_err(config_err)?
            .set_default("idle_timeout_seconds", defaults.idle_timeout_seconds as i64)
            .map_err(config_err)?
            .add_source(config::Environment::default().try_parsing(true))
            .build()
            .map_err(config_err)?;

        built.try_deserialize().map_err(config_err)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }
}

fn config_err(e: config::ConfigError) -> CoreError {
    CoreError::InvalidInput(format!("configuration error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let s = Settings::default();
        assert_eq!(s.max_concurrent_llm, 3);
        assert_eq!(s.max_sessions, 100);
        assert_eq!(s.idle_timeout_seconds, 1800);
    }
}
