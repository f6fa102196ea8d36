use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::core::prompt::NoteThresholds;
use crate::engine::codex::{
    EngineOptions, DEFAULT_ENGINE_COMMAND, DEFAULT_ENGINE_MODEL, DEFAULT_REASONING_EFFORT,
    DEFAULT_TIMEOUT_SECS,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub review: ReviewConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_command")]
    pub command: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_reasoning_effort")]
    pub reasoning_effort: String,

    pub profile: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    #[serde(default = "default_small_min_notes")]
    pub small_min_notes: usize,

    #[serde(default = "default_medium_min_notes")]
    pub medium_min_notes: usize,

    #[serde(default = "default_large_min_notes")]
    pub large_min_notes: usize,

    #[serde(default = "default_max_notes")]
    pub max_notes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            review: ReviewConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            model: default_model(),
            reasoning_effort: default_reasoning_effort(),
            profile: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            small_min_notes: default_small_min_notes(),
            medium_min_notes: default_medium_min_notes(),
            large_min_notes: default_large_min_notes(),
            max_notes: default_max_notes(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        // Try to load from .diffstory.yml in current directory
        let config_path = PathBuf::from(".diffstory.yml");
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_yaml::from_str(&content)?;
            return Ok(config);
        }

        let alt_config_path = PathBuf::from(".diffstory.yaml");
        if alt_config_path.exists() {
            let content = std::fs::read_to_string(&alt_config_path)?;
            let config: Config = serde_yaml::from_str(&content)?;
            return Ok(config);
        }

        // Try in home directory
        if let Some(home_dir) = dirs::home_dir() {
            let home_config = home_dir.join(".diffstory.yml");
            if home_config.exists() {
                let content = std::fs::read_to_string(&home_config)?;
                let config: Config = serde_yaml::from_str(&content)?;
                return Ok(config);
            }
        }

        Ok(Config::default())
    }

    pub fn merge_with_cli(
        &mut self,
        cli_model: Option<String>,
        cli_reasoning_effort: Option<String>,
        cli_profile: Option<String>,
        cli_timeout_secs: Option<u64>,
    ) {
        if let Some(model) = cli_model {
            self.engine.model = model;
        }
        if let Some(effort) = cli_reasoning_effort {
            self.engine.reasoning_effort = effort;
        }
        if let Some(profile) = cli_profile {
            self.engine.profile = Some(profile);
        }
        if let Some(timeout) = cli_timeout_secs {
            self.engine.timeout_secs = timeout;
        }
    }

    pub fn engine_options(&self, workdir: Option<String>) -> EngineOptions {
        EngineOptions {
            command: self.engine.command.clone(),
            model: self.engine.model.clone(),
            reasoning_effort: self.engine.reasoning_effort.clone(),
            profile: self.engine.profile.clone(),
            workdir,
            timeout: Duration::from_secs(self.engine.timeout_secs),
        }
    }

    pub fn note_thresholds(&self) -> NoteThresholds {
        NoteThresholds {
            small_min: self.review.small_min_notes,
            medium_min: self.review.medium_min_notes,
            large_min: self.review.large_min_notes,
            max_cap: self.review.max_notes,
        }
    }
}

fn default_command() -> String {
    DEFAULT_ENGINE_COMMAND.to_string()
}

fn default_model() -> String {
    DEFAULT_ENGINE_MODEL.to_string()
}

fn default_reasoning_effort() -> String {
    DEFAULT_REASONING_EFFORT.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_small_min_notes() -> usize {
    2
}

fn default_medium_min_notes() -> usize {
    4
}

fn default_large_min_notes() -> usize {
    6
}

fn default_max_notes() -> usize {
    12
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_constants() {
        let config = Config::default();
        assert_eq!(config.engine.command, "codex");
        assert_eq!(config.engine.timeout_secs, 600);
        assert_eq!(config.review.max_notes, 12);
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let config: Config = serde_yaml::from_str("engine:\n  model: custom\n").unwrap();
        assert_eq!(config.engine.model, "custom");
        assert_eq!(config.engine.reasoning_effort, "xhigh");
        assert_eq!(config.review.small_min_notes, 2);
    }

    #[test]
    fn cli_overrides_win() {
        let mut config = Config::default();
        config.merge_with_cli(Some("m2".to_string()), None, Some("fast".to_string()), Some(30));
        assert_eq!(config.engine.model, "m2");
        assert_eq!(config.engine.profile.as_deref(), Some("fast"));
        assert_eq!(config.engine.timeout_secs, 30);
        assert_eq!(config.engine.reasoning_effort, "xhigh");
    }
}
