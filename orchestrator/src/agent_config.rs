//! Agent catalogue
//!
//! The seven built-in business personas with per-agent model selection,
//! plus config overrides merged on top. Built once at startup and shared
//! read-only by the engine.

use std::collections::BTreeMap;

use agentflow_agent::config::AgentOverride;
use agentflow_agent::{AgentIdentity, Capability};

use crate::prompts;

/// Registry of available personas, keyed by agent id
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, AgentIdentity>,
}

impl AgentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in personas
    pub fn with_defaults() -> Self {
        use Capability::*;

        let mut registry = Self::new();

        registry.register(
            AgentIdentity::new("process_automation", "Process Automation Specialist")
                .with_description("An AI agent specialized in automating business processes")
                .with_goal("Identify and automate repetitive business processes to improve efficiency")
                .with_capabilities(vec![ProcessAutomation, DataAnalysis, ApiIntegration])
                .with_instructions(prompts::PROCESS_AUTOMATION_PROMPT)
                .with_model("mistral:7b")
                .with_temperature(0.3),
        );

        registry.register(
            AgentIdentity::new("decision_maker", "Decision Maker")
                .with_description("An AI agent that makes data-driven decisions autonomously")
                .with_goal("Analyze data and make optimal decisions based on business rules and objectives")
                .with_capabilities(vec![DecisionMaking, Reasoning, DataAnalysis])
                .with_instructions(prompts::DECISION_MAKER_PROMPT)
                .with_model("qwen2.5:14b")
                .with_temperature(0.5),
        );

        registry.register(
            AgentIdentity::new("customer_service", "Customer Service Specialist")
                .with_description(
                    "AI agent that handles customer inquiries, complaints, and provides support",
                )
                .with_goal("Resolve customer issues efficiently while maintaining high satisfaction")
                .with_capabilities(vec![Reasoning, DecisionMaking, ApiIntegration])
                .with_instructions(prompts::CUSTOMER_SERVICE_PROMPT)
                .with_model("llama3.1:8b")
                .with_temperature(0.7),
        );

        registry.register(
            AgentIdentity::new("data_analyst", "Data Analyst")
                .with_description("AI agent that analyzes business data and generates actionable insights")
                .with_goal("Transform raw data into meaningful insights for business decision-making")
                .with_capabilities(vec![DataAnalysis, Reasoning, DecisionMaking])
                .with_instructions(prompts::DATA_ANALYST_PROMPT)
                .with_model("qwen2.5:14b")
                .with_temperature(0.2),
        );

        registry.register(
            AgentIdentity::new("compliance_officer", "Compliance Officer")
                .with_description("AI agent that monitors regulatory compliance and identifies risks")
                .with_goal(
                    "Ensure all business processes comply with regulations and minimize risk exposure",
                )
                .with_capabilities(vec![Reasoning, DataAnalysis, DecisionMaking])
                .with_instructions(prompts::COMPLIANCE_OFFICER_PROMPT)
                .with_model("qwen2.5:7b")
                .with_temperature(0.1),
        );

        registry.register(
            AgentIdentity::new("hr_recruitment", "HR Recruitment Specialist")
                .with_description(
                    "AI agent that screens candidates, schedules interviews, and assists in hiring",
                )
                .with_goal("Identify and recruit top talent efficiently while ensuring fair evaluation")
                .with_capabilities(vec![DataAnalysis, DecisionMaking, ProcessAutomation])
                .with_instructions(prompts::HR_RECRUITMENT_PROMPT)
                .with_model("llama3.1:8b")
                .with_temperature(0.4),
        );

        registry.register(
            AgentIdentity::new("financial_analyst", "Financial Analyst")
                .with_description(
                    "AI agent that analyzes financial data, creates forecasts, and identifies trends",
                )
                .with_goal("Provide accurate financial insights and predictions to support business decisions")
                .with_capabilities(vec![DataAnalysis, Reasoning, DecisionMaking])
                .with_instructions(prompts::FINANCIAL_ANALYST_PROMPT)
                .with_model("qwen2.5:14b")
                .with_temperature(0.2),
        );

        registry
    }

    /// Register a persona, replacing any with the same id
    pub fn register(&mut self, identity: AgentIdentity) {
        self.agents.insert(identity.id.clone(), identity);
    }

    /// Get a persona by id
    pub fn get(&self, id: &str) -> Option<&AgentIdentity> {
        self.agents.get(id)
    }

    /// Check if a persona exists
    pub fn contains(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    /// All agent ids, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(|s| s.as_str())
    }

    /// Iterate over all personas, sorted by id
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AgentIdentity)> {
        self.agents.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Update model for a specific agent
    pub fn set_model(&mut self, id: &str, model: impl Into<String>) -> bool {
        if let Some(agent) = self.agents.get_mut(id) {
            agent.model.model_name = model.into();
            true
        } else {
            false
        }
    }

    /// Update model for all agents
    pub fn set_all_models(&mut self, model: impl Into<String>) {
        let model = model.into();
        for agent in self.agents.values_mut() {
            agent.model.model_name = model.clone();
        }
    }

    /// Merge `[[agents]]` config entries over the catalogue
    ///
    /// Entries naming an unknown agent are ignored with a warning.
    pub fn apply_overrides(&mut self, overrides: &[AgentOverride]) {
        for entry in overrides {
            let Some(agent) = self.agents.get_mut(&entry.id) else {
                tracing::warn!(agent_id = %entry.id, "ignoring override for unknown agent");
                continue;
            };

            if let Some(name) = &entry.name {
                agent.name = name.clone();
            }
            if let Some(description) = &entry.description {
                agent.description = description.clone();
            }
            if let Some(goal) = &entry.goal {
                agent.goal = goal.clone();
            }
            if let Some(model) = &entry.model {
                agent.model.model_name = model.clone();
            }
            if let Some(temperature) = entry.temperature {
                agent.model.temperature = temperature;
            }
            if entry.max_tokens.is_some() {
                agent.model.max_tokens = entry.max_tokens;
            }
        }
    }
}
