//! Agent roles, decisions, and the role-agent trait.
//!
//! A role agent receives one sub-task plus a retrieved tool shortlist and
//! produces a [`Decision`]: either a concrete [`ToolCall`] with bound
//! arguments, or a deferral when no retrieved tool fits the goal. The
//! model's raw output is JSON; parsing and schema validation happen here,
//! with one corrective retry before giving up.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::message::{ChatRequest, system_message, user_message};
use super::prompt::{build_decide_prompt, build_retry_feedback};
use super::provider::LlmProvider;
use crate::error::AgentError;
use crate::plan::{SubTask, SubTaskId};
use crate::registry::{ToolDescriptor, ToolRegistry};

/// Specialist roles that sub-tasks are routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Explores dataset schemas, columns, and metadata.
    SchemaExplorer,
    /// Builds and executes structured queries against datasets.
    QueryBuilder,
    /// Statistics, semantic labeling, and mappings.
    Analytics,
}

impl AgentRole {
    /// Every role, in routing order.
    pub const ALL: [Self; 3] = [Self::SchemaExplorer, Self::QueryBuilder, Self::Analytics];

    /// Returns the snake_case name used in prompts and config.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SchemaExplorer => "schema_explorer",
            Self::QueryBuilder => "query_builder",
            Self::Analytics => "analytics",
        }
    }

    /// Parses a role name as produced by the decomposer. Case-insensitive.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "schema_explorer" | "schema" => Some(Self::SchemaExplorer),
            "query_builder" | "query" => Some(Self::QueryBuilder),
            "analytics" => Some(Self::Analytics),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated, executable tool call bound to a sub-task.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCall {
    /// Registered tool name.
    pub tool: String,
    /// Arguments, already validated against the tool's schema.
    pub arguments: Value,
    /// Sub-task this call satisfies.
    pub subtask: SubTaskId,
    /// Role that issued the call.
    pub role: AgentRole,
}

/// Outcome of one role-agent deliberation.
#[derive(Debug, Clone)]
pub enum Decision {
    /// Call this tool with these arguments.
    Call(ToolCall),
    /// No retrieved tool fits the goal; hand the sub-task back for
    /// re-decomposition.
    Defer {
        /// Why the agent could not act.
        reason: String,
    },
}

/// Wire shape of the model's decision JSON.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum RawDecision {
    ToolCall {
        tool: String,
        #[serde(default)]
        arguments: Value,
    },
    Defer {
        reason: String,
    },
}

/// Strips markdown code fences the model may wrap JSON in.
pub(crate) fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the fence line.
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start_matches(['\r', '\n'])
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

fn parse_raw_decision(content: &str) -> Result<RawDecision, AgentError> {
    let cleaned = strip_code_fences(content);
    match serde_json::from_str(cleaned) {
        Ok(decision) => Ok(decision),
        Err(first_err) => {
            // Lenient fallback: the model sometimes surrounds the JSON
            // object with prose. Take the outermost braces and retry.
            if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}'))
                && start < end
                && let Ok(decision) = serde_json::from_str(&cleaned[start..=end])
            {
                return Ok(decision);
            }
            Err(AgentError::MalformedDecision {
                message: first_err.to_string(),
                content: content.to_string(),
            })
        }
    }
}

/// Attempts (initial plus retries) a role agent makes per sub-task.
const DECIDE_ATTEMPTS: u32 = 2;

/// Trait implemented by the three specialist role agents.
///
/// The default [`RoleAgent::decide`] covers the whole deliberation:
/// prompt construction, JSON parsing, schema validation, and one
/// corrective retry when the model's output is malformed or violates
/// the chosen tool's schema.
#[async_trait]
pub trait RoleAgent: Send + Sync {
    /// Role this agent serves.
    fn role(&self) -> AgentRole;

    /// Model identifier to use for this agent.
    fn model(&self) -> &str;

    /// System prompt defining the agent's specialty.
    fn system_prompt(&self) -> &str;

    /// Sampling temperature.
    fn temperature(&self) -> f32 {
        0.0
    }

    /// Maximum tokens for the decision.
    fn max_tokens(&self) -> u32 {
        1024
    }

    /// Decides how to handle `subtask` given the retrieved `shortlist`.
    ///
    /// An empty shortlist defers immediately without a model call. A
    /// chosen tool must appear in the shortlist; arguments are validated
    /// against the registry schema with every violation reported back to
    /// the model on the single retry.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] on provider failures. Malformed output and
    /// schema violations are consumed by the retry loop and surface as a
    /// [`Decision::Defer`], never as an error.
    async fn decide(
        &self,
        provider: &dyn LlmProvider,
        registry: &ToolRegistry,
        subtask: &SubTask,
        shortlist: &[ToolDescriptor],
    ) -> Result<Decision, AgentError> {
        if shortlist.is_empty() {
            return Ok(Decision::Defer {
                reason: format!("no tools available for role {}", self.role()),
            });
        }

        let mut feedback: Option<String> = None;

        for attempt in 1..=DECIDE_ATTEMPTS {
            let prompt = build_decide_prompt(&subtask.goal, shortlist, feedback.as_deref());
            let request = ChatRequest {
                model: self.model().to_string(),
                messages: vec![system_message(self.system_prompt()), user_message(&prompt)],
                temperature: Some(self.temperature()),
                max_tokens: Some(self.max_tokens()),
                json_mode: true,
            };

            let response = provider.chat(&request).await?;

            match self.check_decision(registry, subtask, shortlist, &response.content) {
                Ok(decision) => return Ok(decision),
                Err(problem) => {
                    warn!(
                        role = %self.role(),
                        subtask = %subtask.id,
                        attempt,
                        %problem,
                        "decision rejected"
                    );
                    feedback = Some(build_retry_feedback(&response.content, &problem));
                }
            }
        }

        Ok(Decision::Defer {
            reason: feedback.unwrap_or_else(|| "decision attempts exhausted".to_string()),
        })
    }

    /// Parses and validates one raw model output into a decision.
    ///
    /// Returns the rejection reason as a plain string so the decide loop
    /// can feed it back verbatim.
    fn check_decision(
        &self,
        registry: &ToolRegistry,
        subtask: &SubTask,
        shortlist: &[ToolDescriptor],
        content: &str,
    ) -> Result<Decision, String> {
        let raw = parse_raw_decision(content).map_err(|e| e.to_string())?;

        match raw {
            RawDecision::Defer { reason } => Ok(Decision::Defer { reason }),
            RawDecision::ToolCall { tool, arguments } => {
                // An omitted arguments field means "no arguments".
                let arguments = if arguments.is_null() {
                    Value::Object(serde_json::Map::new())
                } else {
                    arguments
                };
                if !shortlist.iter().any(|d| d.name == tool) {
                    return Err(format!(
                        "tool '{tool}' is not in the retrieved shortlist"
                    ));
                }
                registry
                    .validate_arguments(&tool, &arguments)
                    .map_err(|e| e.to_string())?;

                debug!(role = %self.role(), subtask = %subtask.id, %tool, "tool call accepted");
                Ok(Decision::Call(ToolCall {
                    tool,
                    arguments,
                    subtask: subtask.id,
                    role: self.role(),
                }))
            }
        }
    }
}
