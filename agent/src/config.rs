//! Configuration loading (.agentflow.toml)

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Config file name searched for on disk
pub const CONFIG_FILE: &str = ".agentflow.toml";

/// Find a config file by walking up the directory tree, then checking global config.
///
/// Search order:
/// 1. Current directory and parent directories (walking up to root)
/// 2. Global config at ~/.config/agentflow/
fn find_config_file(filename: &str) -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let candidate = current.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    let global_path = dirs::config_dir()?.join("agentflow").join(filename);
    global_path.exists().then_some(global_path)
}

/// Top-level configuration
#[derive(Debug, Default, Deserialize)]
pub struct AgentFlowConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub engine: EngineSection,
    /// Per-agent overrides merged over the built-in catalogue
    #[serde(default)]
    pub agents: Vec<AgentOverride>,
}

/// Model backend selection
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// `mock`, `ollama` or `openai`
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Endpoint base URL; each provider has its own default
    #[serde(default)]
    pub url: Option<String>,
    /// Default model for every agent; `[[agents]]` entries take precedence
    #[serde(default)]
    pub model: Option<String>,
    /// Environment variable holding the OpenAI API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Per-call model timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Conversation store location
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    /// Database file; `~` is expanded. Defaults to ~/.agentflow/conversations.db
    #[serde(default)]
    pub path: Option<String>,
}

/// Workflow engine settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineSection {
    /// Extra directory of TOML workflow definitions
    #[serde(default)]
    pub workflows_dir: Option<String>,
    /// Whole-run deadline; no further groups start once it passes
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
}

/// Overrides for one catalogue agent
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AgentOverride {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            url: None,
            model: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl StoreConfig {
    /// Resolved database path, if one is configured
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.as_deref().map(expand_path)
    }
}

impl EngineSection {
    pub fn resolved_workflows_dir(&self) -> Option<PathBuf> {
        self.workflows_dir.as_deref().map(expand_path)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

/// Expand `~` and environment variables; falls back to the raw string
pub fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(raw).as_ref()),
    }
}

impl AgentFlowConfig {
    /// Load `.agentflow.toml`, or defaults when none is found
    pub fn load() -> Result<Self> {
        if let Some(config_path) = find_config_file(CONFIG_FILE) {
            tracing::debug!("Loading config from: {}", config_path.display());
            return Self::load_from_path(&config_path);
        }

        tracing::debug!("No {} found, using defaults", CONFIG_FILE);
        Ok(Self::default())
    }

    /// Load from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
