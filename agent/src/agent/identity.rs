//! Agent identities
//!
//! Built once at process start from the static catalogue plus config
//! overrides, then shared read-only.

use serde::{Deserialize, Serialize};

use crate::llm::GenerateOptions;

/// Capability tags advertised by a persona
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Reasoning,
    DataAnalysis,
    ApiIntegration,
    DecisionMaking,
    ProcessAutomation,
}

impl Capability {
    pub fn label(&self) -> &'static str {
        match self {
            Capability::Reasoning => "reasoning",
            Capability::DataAnalysis => "data analysis",
            Capability::ApiIntegration => "API integration",
            Capability::DecisionMaking => "decision making",
            Capability::ProcessAutomation => "process automation",
        }
    }
}

/// Default model configuration bound to an agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSettings {
    #[serde(default = "default_model")]
    pub model_name: String,

    /// Sampling temperature (0.0 = deterministic)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default)]
    pub max_tokens: Option<u32>,
}

pub fn default_model() -> String {
    "qwen2.5:7b".to_string()
}

fn default_temperature() -> f32 {
    0.5
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_name: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

impl From<&ModelSettings> for GenerateOptions {
    fn from(settings: &ModelSettings) -> Self {
        GenerateOptions {
            model_name: settings.model_name.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        }
    }
}

/// A named persona
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentIdentity {
    /// Stable identifier (e.g. "customer_service")
    pub id: String,

    /// Display name, also used to address the persona in prompts
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub goal: String,

    #[serde(default)]
    pub capabilities: Vec<Capability>,

    /// Role-specific guidance appended to the persona header
    #[serde(default)]
    pub instructions: String,

    #[serde(default)]
    pub model: ModelSettings,
}

impl AgentIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            goal: String::new(),
            capabilities: Vec::new(),
            instructions: String::new(),
            model: ModelSettings::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = goal.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_model(mut self, model_name: impl Into<String>) -> Self {
        self.model.model_name = model_name.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.model.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.model.max_tokens = Some(max_tokens);
        self
    }
}
