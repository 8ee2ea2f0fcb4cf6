//! Daemon configuration. Loaded from TOML; a missing file falls back to
//! defaults so a bare `waggled --port 8000` works out of the box.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use waggle_core::config::RuntimeLimits;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_name: String,
    pub bind_host: String,
    pub data_dir: PathBuf,
    /// Shared across all nodes on the host; this is the swarm's discovery
    /// mechanism.
    pub registry_path: PathBuf,
    pub skills_dir: PathBuf,
    pub model: ModelConfig,
    pub limits: RuntimeLimits,
    pub dispatch: DispatchConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: "waggle".into(),
            bind_host: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            registry_path: PathBuf::from("./swarm_registry.db"),
            skills_dir: PathBuf::from("./skills"),
            model: ModelConfig::default(),
            limits: RuntimeLimits::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// OpenAI-compatible endpoint.
    pub api_base: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub model: String,
    /// Model for the compaction summarizer; the main model when unset.
    pub summarizer_model: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_base: "https://dashscope.aliyuncs.com/compatible-mode/v1".into(),
            api_key_env: "DASHSCOPE_API_KEY".into(),
            model: "qwen3-32b".into(),
            summarizer_model: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Timeout for a nested peer chat exchange, in seconds.
    pub chat_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            chat_timeout_secs: 180,
        }
    }
}

pub fn load_config(path: &Path) -> Result<NodeConfig> {
    if !path.exists() {
        info!(path = %path.display(), "no config file, using defaults");
        return Ok(NodeConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config: {}", path.display()))?;
    let config: NodeConfig =
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))?;
    Ok(config)
}

pub fn validate_config(config: &NodeConfig) -> Result<()> {
    if config.limits.predictive_pct <= 0.0 || config.limits.predictive_pct > 1.0 {
        anyhow::bail!(
            "limits.predictive_pct must be in (0, 1], got {}",
            config.limits.predictive_pct
        );
    }
    if config.limits.min_events > config.limits.max_events {
        anyhow::bail!(
            "limits.min_events ({}) must not exceed limits.max_events ({})",
            config.limits.min_events,
            config.limits.max_events
        );
    }
    if config.dispatch.chat_timeout_secs == 0 {
        anyhow::bail!("dispatch.chat_timeout_secs must be positive");
    }
    if config.model.model.is_empty() {
        anyhow::bail!("model.model must not be empty");
    }
    Ok(())
}
