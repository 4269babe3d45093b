//! Query decomposition and bounded refinement.
//!
//! The decomposer turns a natural-language request into the sub-task DAG
//! and, when a role agent defers, re-plans the stuck sub-task into
//! finer-grained ones. Malformed plans get one corrective retry; if that
//! also fails, the whole query becomes a single query-builder sub-task so
//! a parse failure never kills the request outright.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::message::{ChatRequest, system_message, user_message};
use super::prompt::{PromptSet, build_decompose_prompt, build_refine_prompt, build_retry_feedback};
use super::provider::LlmProvider;
use super::traits::{AgentRole, strip_code_fences};
use crate::error::AgentError;
use crate::plan::{Plan, QueryRequest, SubTask, SubTaskId};

/// One planned sub-task as parsed from the decomposer's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecomposedTask {
    /// Goal description for the specialist.
    pub goal: String,
    /// Role the sub-task routes to.
    pub role: AgentRole,
    /// Indices of earlier tasks in the same batch this one depends on.
    pub depends_on: Vec<usize>,
}

/// Wire shape of one decomposer output entry.
#[derive(Debug, Deserialize)]
struct RawTask {
    goal: String,
    role: String,
    #[serde(default)]
    depends_on: Vec<usize>,
}

/// Planning attempts (initial plus retries) per decomposition.
const DECOMPOSE_ATTEMPTS: u32 = 2;

/// The query decomposer.
#[derive(Debug, Clone)]
pub struct DecomposerAgent {
    model: String,
    system_prompt: String,
}

impl DecomposerAgent {
    /// Creates a decomposer with the given model.
    #[must_use]
    pub fn new(model: impl Into<String>, prompts: &PromptSet) -> Self {
        Self {
            model: model.into(),
            system_prompt: prompts.decomposer.clone(),
        }
    }

    /// Decomposes a request into a plan.
    ///
    /// The returned plan is never empty and never cyclic: dependencies may
    /// only point at earlier entries, and a plan the model cannot produce
    /// falls back to one sub-task carrying the whole query.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] only on provider failures.
    pub async fn decompose(
        &self,
        provider: &dyn LlmProvider,
        request: &QueryRequest,
    ) -> Result<Plan, AgentError> {
        let prompt = build_decompose_prompt(&request.text, &request.context);
        let tasks = self.plan_tasks(provider, &prompt).await?;

        let tasks = if tasks.is_empty() {
            warn!(request = %request.id, "decomposition failed, falling back to single sub-task");
            vec![DecomposedTask {
                goal: request.text.clone(),
                role: AgentRole::QueryBuilder,
                depends_on: Vec::new(),
            }]
        } else {
            tasks
        };

        debug!(request = %request.id, subtasks = tasks.len(), "query decomposed");

        let mut plan = Plan::new();
        insert_batch(&mut plan, tasks, &[]);
        Ok(plan)
    }

    /// Re-plans one deferred sub-task into finer-grained tasks.
    ///
    /// Returns an empty vec when the model cannot produce a usable
    /// refinement; the caller then fails the sub-task rather than retrying
    /// forever.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] only on provider failures.
    pub async fn refine(
        &self,
        provider: &dyn LlmProvider,
        goal: &str,
        defer_reason: &str,
    ) -> Result<Vec<DecomposedTask>, AgentError> {
        let prompt = build_refine_prompt(goal, defer_reason);
        self.plan_tasks(provider, &prompt).await
    }

    /// Runs the plan prompt with one corrective retry on malformed output.
    async fn plan_tasks(
        &self,
        provider: &dyn LlmProvider,
        prompt: &str,
    ) -> Result<Vec<DecomposedTask>, AgentError> {
        let mut feedback: Option<String> = None;

        for attempt in 1..=DECOMPOSE_ATTEMPTS {
            let user = feedback
                .as_deref()
                .map_or_else(|| prompt.to_string(), |f| format!("{prompt}\n\n{f}"));
            let request = ChatRequest {
                model: self.model.clone(),
                messages: vec![system_message(&self.system_prompt), user_message(&user)],
                temperature: Some(0.0),
                max_tokens: Some(2048),
                json_mode: false,
            };

            let response = provider.chat(&request).await?;

            match parse_tasks(&response.content) {
                Ok(tasks) => return Ok(tasks),
                Err(problem) => {
                    warn!(attempt, %problem, "plan rejected");
                    feedback = Some(build_retry_feedback(&response.content, &problem));
                }
            }
        }

        Ok(Vec::new())
    }
}

/// Inserts a batch of decomposed tasks into the plan and returns their ids.
///
/// `extra_deps` is prepended to every task's dependency list; the refine
/// path uses it to keep the original sub-task's dependencies in force.
pub(crate) fn insert_batch(
    plan: &mut Plan,
    tasks: Vec<DecomposedTask>,
    extra_deps: &[SubTaskId],
) -> Vec<SubTaskId> {
    let mut batch_ids: Vec<SubTaskId> = Vec::with_capacity(tasks.len());
    for task in tasks {
        let id = plan.next_id();
        let mut deps: Vec<SubTaskId> = extra_deps.to_vec();
        deps.extend(task.depends_on.iter().filter_map(|&i| batch_ids.get(i).copied()));
        plan.insert(SubTask::new(id, task.goal, task.role, deps));
        batch_ids.push(id);
    }
    batch_ids
}

/// Parses the decomposer's JSON array, rejecting unknown roles, forward
/// dependencies, and empty goals. The rejection reason feeds the retry.
fn parse_tasks(content: &str) -> Result<Vec<DecomposedTask>, String> {
    let cleaned = strip_code_fences(content);

    let parsed: Result<Vec<RawTask>, _> = serde_json::from_str(cleaned);
    let raw = match parsed {
        Ok(raw) => raw,
        Err(first_err) => {
            // The model may surround the array with prose.
            let recovered = match (cleaned.find('['), cleaned.rfind(']')) {
                (Some(start), Some(end)) if start < end => {
                    serde_json::from_str::<Vec<RawTask>>(&cleaned[start..=end]).ok()
                }
                _ => None,
            };
            recovered.ok_or_else(|| first_err.to_string())?
        }
    };

    if raw.is_empty() {
        return Err("the plan must contain at least one sub-task".to_string());
    }

    let mut tasks = Vec::with_capacity(raw.len());
    for (index, task) in raw.into_iter().enumerate() {
        if task.goal.trim().is_empty() {
            return Err(format!("sub-task {index} has an empty goal"));
        }
        let Some(role) = AgentRole::parse(&task.role) else {
            return Err(format!(
                "sub-task {index} names unknown role '{}'",
                task.role
            ));
        };
        if let Some(&bad) = task.depends_on.iter().find(|&&d| d >= index) {
            return Err(format!(
                "sub-task {index} depends on {bad}, but dependencies may only point at earlier sub-tasks"
            ));
        }
        tasks.push(DecomposedTask {
            goal: task.goal,
            role,
            depends_on: task.depends_on,
        });
    }
    Ok(tasks)
}

/// Renders a backend payload compactly for prompts that reference
/// completed prerequisites.
#[must_use]
pub fn summarize_payload(payload: &Value) -> String {
    serde_json::to_string(payload).unwrap_or_else(|_| "null".to_string())
}
