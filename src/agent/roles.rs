//! The three specialist role agents.
//!
//! Each is a thin configuration carrier over the shared [`RoleAgent`]
//! deliberation logic: a role tag, a model identifier, a sampling
//! temperature, and a system prompt. The behavior lives in the trait's
//! default `decide`.

use super::prompt::PromptSet;
use super::traits::{AgentRole, RoleAgent};

/// Agent for dataset and schema exploration goals.
#[derive(Debug, Clone)]
pub struct SchemaAgent {
    model: String,
    temperature: f32,
    system_prompt: String,
}

impl SchemaAgent {
    /// Creates a schema exploration agent.
    #[must_use]
    pub fn new(model: impl Into<String>, temperature: f32, prompts: &PromptSet) -> Self {
        Self {
            model: model.into(),
            temperature,
            system_prompt: prompts.schema_explorer.clone(),
        }
    }
}

impl RoleAgent for SchemaAgent {
    fn role(&self) -> AgentRole {
        AgentRole::SchemaExplorer
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn temperature(&self) -> f32 {
        self.temperature
    }
}

/// Agent for structured query and row-count goals.
#[derive(Debug, Clone)]
pub struct QueryAgent {
    model: String,
    temperature: f32,
    system_prompt: String,
}

impl QueryAgent {
    /// Creates a query building agent.
    #[must_use]
    pub fn new(model: impl Into<String>, temperature: f32, prompts: &PromptSet) -> Self {
        Self {
            model: model.into(),
            temperature,
            system_prompt: prompts.query_builder.clone(),
        }
    }
}

impl RoleAgent for QueryAgent {
    fn role(&self) -> AgentRole {
        AgentRole::QueryBuilder
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn temperature(&self) -> f32 {
        self.temperature
    }
}

/// Agent for statistics, labeling, and mapping goals.
#[derive(Debug, Clone)]
pub struct AnalyticsAgent {
    model: String,
    temperature: f32,
    system_prompt: String,
}

impl AnalyticsAgent {
    /// Creates an analytics agent.
    #[must_use]
    pub fn new(model: impl Into<String>, temperature: f32, prompts: &PromptSet) -> Self {
        Self {
            model: model.into(),
            temperature,
            system_prompt: prompts.analytics.clone(),
        }
    }
}

impl RoleAgent for AnalyticsAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Analytics
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn temperature(&self) -> f32 {
        self.temperature
    }
}

/// Creates the agent for a role with the given model and temperature.
#[must_use]
pub fn create_agent(
    role: AgentRole,
    model: &str,
    temperature: f32,
    prompts: &PromptSet,
) -> Box<dyn RoleAgent> {
    match role {
        AgentRole::SchemaExplorer => Box::new(SchemaAgent::new(model, temperature, prompts)),
        AgentRole::QueryBuilder => Box::new(QueryAgent::new(model, temperature, prompts)),
        AgentRole::Analytics => Box::new(AnalyticsAgent::new(model, temperature, prompts)),
    }
}
