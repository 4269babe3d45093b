//! The request state machine: decompose → dispatch → aggregate.
//!
//! One request moves through `Decomposing → Dispatching → Aggregating`
//! and ends `Completed` or `Failed`. Ready sub-tasks fan out concurrently
//! behind a semaphore; a deferral consumes re-decomposition budget; a
//! cancellation or deadline stops dispatch and still aggregates whatever
//! settled, so the caller always gets a trace.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::decompose::{insert_batch, summarize_payload};
use crate::agent::synthesizer::render_results;
use crate::agent::{
    AgentRole, Decision, DecomposerAgent, LlmProvider, PromptSet, RoleAgent, SynthesizerAgent,
    create_agent, create_provider,
};
use crate::answer::{Answer, StepOutcome, TraceStep};
use crate::backend::{Backend, HttpBackend};
use crate::catalog::default_registry;
use crate::config::OrchestratorConfig;
use crate::error::{AgentError, Result};
use crate::executor::ToolExecutor;
use crate::plan::{FailureReason, Plan, QueryRequest, SubTask, SubTaskId, SubTaskStatus};
use crate::registry::{ToolDescriptor, ToolRegistry};
use crate::retrieval::Retriever;

/// Phases a request passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Decomposing,
    Dispatching,
    Aggregating,
    Completed,
    Failed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Decomposing => "decomposing",
            Self::Dispatching => "dispatching",
            Self::Aggregating => "aggregating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What one dispatched sub-task came back with.
#[derive(Debug)]
enum TaskOutcome {
    Done {
        tool: String,
        arguments: Value,
        attempts: u32,
        payload: Value,
    },
    BackendFailed {
        tool: String,
        arguments: Value,
        attempts: u32,
        error: String,
    },
    Deferred {
        reason: String,
    },
    AgentFailed {
        message: String,
    },
}

/// Per-sub-task call record, kept for the trace.
#[derive(Debug, Clone, Default)]
struct StepRecord {
    tool: Option<String>,
    arguments: Option<Value>,
    attempts: u32,
    payload: Option<Value>,
}

/// Orchestrates the full query pipeline.
pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    retriever: Retriever,
    executor: Arc<ToolExecutor>,
    agents: HashMap<AgentRole, Arc<dyn RoleAgent>>,
    decomposer: DecomposerAgent,
    synthesizer: SynthesizerAgent,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Creates an orchestrator over an explicit provider, registry, and
    /// backend.
    ///
    /// Loads prompt templates from [`OrchestratorConfig::prompt_dir`],
    /// falling back to compiled-in defaults.
    #[must_use]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        registry: Arc<ToolRegistry>,
        backend: Arc<dyn Backend>,
        config: OrchestratorConfig,
    ) -> Self {
        let prompts = PromptSet::load(config.prompt_dir.as_deref());
        let executor = Arc::new(ToolExecutor::new(
            Arc::clone(&registry),
            backend,
            config.max_backend_retries,
            config.backoff_base,
        ));
        let agents: HashMap<AgentRole, Arc<dyn RoleAgent>> = AgentRole::ALL
            .into_iter()
            .map(|role| {
                let agent: Arc<dyn RoleAgent> = Arc::from(create_agent(
                    role,
                    config.model_for(role),
                    config.temperature,
                    &prompts,
                ));
                (role, agent)
            })
            .collect();

        Self {
            retriever: Retriever::new(Arc::clone(&registry)),
            decomposer: DecomposerAgent::new(&config.decomposer_model, &prompts),
            synthesizer: SynthesizerAgent::new(&config.synthesizer_model, &prompts),
            provider,
            registry,
            executor,
            agents,
            config,
        }
    }

    /// Creates an orchestrator from configuration alone: the default tool
    /// catalog, the configured LLM provider, and the HTTP backend.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] for an unsupported provider name or an
    /// unusable backend URL.
    pub fn from_config(config: OrchestratorConfig) -> Result<Self> {
        let registry = Arc::new(default_registry()?);
        let provider = create_provider(&config)?;
        let backend = Arc::new(HttpBackend::new(
            config.backend_url.clone(),
            config.backend_timeout,
        )?);
        Ok(Self::new(provider, registry, backend, config))
    }

    /// Handles one request end to end and returns the answer with its
    /// execution trace.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] when no plan could be produced at all
    /// (provider failure or cancellation during decomposition). Once a
    /// plan exists, sub-task failures become part of a partial answer
    /// instead of an error.
    pub async fn handle_query(&self, request: QueryRequest) -> Result<Answer> {
        self.handle_query_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Like [`Orchestrator::handle_query`], but observes an external
    /// cancellation token in addition to the configured deadline.
    #[allow(clippy::too_many_lines)]
    pub async fn handle_query_with_cancel(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> Result<Answer> {
        if request.text.trim().is_empty() {
            return Err(AgentError::InvalidArgument {
                message: "query text cannot be empty".to_string(),
            });
        }

        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.deadline;

        info!(request = %request.id, phase = %Phase::Decomposing, "handling query");
        let mut plan = tokio::select! {
            plan = self.decomposer.decompose(&*self.provider, &request) => plan?,
            () = cancel.cancelled() => return Err(AgentError::Cancelled),
            () = tokio::time::sleep_until(deadline) => return Err(AgentError::Cancelled),
        };
        if plan.is_empty() {
            return Err(AgentError::EmptyPlan);
        }
        if !plan.is_acyclic() {
            return Err(AgentError::Orchestration {
                message: "decomposition produced a cyclic plan".to_string(),
            });
        }

        debug!(request = %request.id, phase = %Phase::Dispatching, subtasks = plan.len(), "plan ready");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut records: HashMap<SubTaskId, StepRecord> = HashMap::new();
        let mut results: HashMap<SubTaskId, Value> = HashMap::new();
        let mut cancelled = false;

        while !cancelled && !plan.is_settled() {
            let ready = plan.ready();
            if ready.is_empty() {
                // Settlement is checked above and blocked sub-tasks are
                // failed after every round, so an empty ready set here
                // means the plan cannot make progress.
                warn!(request = %request.id, "plan stalled with no ready sub-tasks");
                let stalled: Vec<SubTaskId> = plan
                    .iter()
                    .filter(|t| !t.status().is_terminal())
                    .map(|t| t.id)
                    .collect();
                for id in stalled {
                    if let Some(task) = plan.get_mut(id) {
                        task.fail(FailureReason::Agent("unschedulable".to_string()));
                    }
                }
                break;
            }

            let mut join_set: JoinSet<(SubTaskId, TaskOutcome)> = JoinSet::new();
            for id in ready {
                let Some(task) = plan.get_mut(id) else { continue };
                task.start();

                let shortlist = match self.retriever.retrieve(
                    &task.goal,
                    task.role,
                    self.config.retrieve_top_k,
                ) {
                    Ok(shortlist) => shortlist,
                    Err(e) => {
                        task.fail(FailureReason::Agent(e.to_string()));
                        continue;
                    }
                };

                let mut snapshot = task.clone();
                snapshot.goal = augment_goal(&snapshot.goal, &snapshot.deps, &results);

                join_set.spawn(run_subtask(
                    Arc::clone(&semaphore),
                    Arc::clone(&self.provider),
                    Arc::clone(&self.registry),
                    Arc::clone(&self.executor),
                    Arc::clone(&self.agents[&snapshot.role]),
                    snapshot,
                    shortlist,
                ));
            }

            let mut outcomes: Vec<(SubTaskId, TaskOutcome)> = Vec::new();
            loop {
                tokio::select! {
                    joined = join_set.join_next() => match joined {
                        Some(Ok(pair)) => outcomes.push(pair),
                        Some(Err(e)) => {
                            if !e.is_cancelled() {
                                warn!(request = %request.id, error = %e, "sub-task join failed");
                            }
                        }
                        None => break,
                    },
                    () = cancel.cancelled(), if !cancelled => {
                        cancelled = true;
                        join_set.abort_all();
                    }
                    () = tokio::time::sleep_until(deadline), if !cancelled => {
                        warn!(request = %request.id, "deadline exceeded");
                        cancelled = true;
                        cancel.cancel();
                        join_set.abort_all();
                    }
                }
            }

            let mut deferred: Vec<(SubTaskId, String)> = Vec::new();
            for (id, outcome) in outcomes {
                let Some(task) = plan.get_mut(id) else { continue };
                match outcome {
                    TaskOutcome::Done {
                        tool,
                        arguments,
                        attempts,
                        payload,
                    } => {
                        task.complete();
                        results.insert(id, payload.clone());
                        records.insert(
                            id,
                            StepRecord {
                                tool: Some(tool),
                                arguments: Some(arguments),
                                attempts,
                                payload: Some(payload),
                            },
                        );
                    }
                    TaskOutcome::BackendFailed {
                        tool,
                        arguments,
                        attempts,
                        error,
                    } => {
                        task.fail(FailureReason::Backend(error));
                        records.insert(
                            id,
                            StepRecord {
                                tool: Some(tool),
                                arguments: Some(arguments),
                                attempts,
                                payload: None,
                            },
                        );
                    }
                    TaskOutcome::Deferred { reason } => deferred.push((id, reason)),
                    TaskOutcome::AgentFailed { message } => {
                        task.fail(FailureReason::Agent(message));
                    }
                }
            }

            for (id, reason) in deferred {
                if cancelled {
                    break;
                }
                self.replan_deferred(&mut plan, id, &reason, &cancel, &mut cancelled)
                    .await;
            }

            plan.fail_blocked();
        }

        if cancelled {
            let unfinished: Vec<SubTaskId> = plan
                .iter()
                .filter(|t| !t.status().is_terminal())
                .map(|t| t.id)
                .collect();
            for id in unfinished {
                if let Some(task) = plan.get_mut(id) {
                    task.fail(FailureReason::Cancelled);
                }
            }
        }

        debug!(request = %request.id, phase = %Phase::Aggregating, "plan settled");
        let trace = build_trace(&plan, &records);
        let unmet_goals: Vec<String> = plan
            .iter()
            .filter(|t| t.status() == SubTaskStatus::Failed)
            .filter(|t| !matches!(t.failure, Some(FailureReason::Superseded(_))))
            .map(|t| t.goal.clone())
            .collect();
        let partial = !unmet_goals.is_empty();

        let text = if cancelled {
            render_results(&trace)
        } else {
            let synthesis = tokio::select! {
                synthesis = self.synthesizer.synthesize(&*self.provider, &request.text, &trace) => synthesis,
                () = cancel.cancelled() => Err(AgentError::Cancelled),
                () = tokio::time::sleep_until(deadline) => Err(AgentError::Cancelled),
            };
            match synthesis {
                Ok(text) => text,
                Err(e) => {
                    warn!(request = %request.id, error = %e, "synthesis failed, using plain rendering");
                    render_results(&trace)
                }
            }
        };

        // A partial answer is still a completed request; Failed means
        // nothing at all could be done.
        let any_done = plan.iter().any(|t| t.status() == SubTaskStatus::Done);
        let phase = if any_done { Phase::Completed } else { Phase::Failed };
        info!(
            request = %request.id,
            %phase,
            subtasks = trace.len(),
            unmet = unmet_goals.len(),
            elapsed = ?start.elapsed(),
            "query finished"
        );

        Ok(Answer {
            request_id: request.id,
            text,
            partial,
            unmet_goals,
            trace,
            elapsed: start.elapsed(),
        })
    }

    /// Spends one unit of re-decomposition budget on a deferred sub-task.
    ///
    /// A usable refinement supersedes the sub-task: the refined sub-tasks
    /// inherit its dependencies, and a successor with a fresh id carries
    /// the original goal, depending on the refined ids. Dependents are
    /// rewired to the successor and the superseded sub-task is marked
    /// failed; it never dispatches again. An exhausted budget or an
    /// unusable refinement fails the sub-task outright.
    async fn replan_deferred(
        &self,
        plan: &mut Plan,
        id: SubTaskId,
        reason: &str,
        cancel: &CancellationToken,
        cancelled: &mut bool,
    ) {
        let Some(task) = plan.get(id) else { return };
        let goal = task.goal.clone();
        let inherited_deps = task.deps.clone();

        if task.redecompositions >= self.config.max_redecompose {
            let attempts = task.redecompositions;
            if let Some(task) = plan.get_mut(id) {
                task.fail(FailureReason::DeferExhausted(format!(
                    "{reason} (after {attempts} re-decomposition(s))"
                )));
            }
            return;
        }

        let refined = tokio::select! {
            refined = self.decomposer.refine(&*self.provider, &goal, reason) => refined,
            () = cancel.cancelled() => {
                *cancelled = true;
                return;
            }
        };

        match refined {
            Ok(tasks) if !tasks.is_empty() => {
                debug!(subtask = %id, refined = tasks.len(), "re-decomposing deferred sub-task");
                let new_ids = insert_batch(plan, tasks, &inherited_deps);
                let successor_id = plan.next_id();
                let mut deps = inherited_deps;
                deps.extend(new_ids);
                let successor = match plan.get(id) {
                    Some(task) => task.successor(successor_id, deps),
                    None => return,
                };
                plan.insert(successor);
                plan.rewire_dependents(id, successor_id);
                if let Some(task) = plan.get_mut(id) {
                    task.fail(FailureReason::Superseded(successor_id));
                }
            }
            Ok(_) => {
                if let Some(task) = plan.get_mut(id) {
                    task.fail(FailureReason::DeferExhausted(reason.to_string()));
                }
            }
            Err(e) => {
                if let Some(task) = plan.get_mut(id) {
                    task.fail(FailureReason::Agent(e.to_string()));
                }
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("provider", &self.provider.name())
            .field("tools", &self.registry.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Appends completed prerequisite results to a sub-task goal so the
/// specialist can bind arguments from them.
fn augment_goal(goal: &str, deps: &[SubTaskId], results: &HashMap<SubTaskId, Value>) -> String {
    let mut augmented = goal.to_string();
    let mut wrote_header = false;
    for dep in deps {
        if let Some(payload) = results.get(dep) {
            if !wrote_header {
                augmented.push_str("\n\nResults from prerequisite sub-tasks:");
                wrote_header = true;
            }
            let _ = write!(augmented, "\n{dep}: {}", summarize_payload(payload));
        }
    }
    augmented
}

/// Runs one sub-task: acquire a permit, deliberate, execute.
async fn run_subtask(
    semaphore: Arc<Semaphore>,
    provider: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    executor: Arc<ToolExecutor>,
    agent: Arc<dyn RoleAgent>,
    subtask: SubTask,
    shortlist: Vec<ToolDescriptor>,
) -> (SubTaskId, TaskOutcome) {
    let id = subtask.id;
    let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(e) => {
            return (
                id,
                TaskOutcome::AgentFailed {
                    message: format!("semaphore closed: {e}"),
                },
            );
        }
    };

    let decision = match agent
        .decide(&*provider, &registry, &subtask, &shortlist)
        .await
    {
        Ok(decision) => decision,
        Err(e) => {
            return (
                id,
                TaskOutcome::AgentFailed {
                    message: e.to_string(),
                },
            );
        }
    };

    match decision {
        Decision::Defer { reason } => (id, TaskOutcome::Deferred { reason }),
        Decision::Call(call) => match executor.execute(&call).await {
            Ok(result) if result.success => (
                id,
                TaskOutcome::Done {
                    tool: call.tool,
                    arguments: call.arguments,
                    attempts: result.attempts,
                    payload: result.payload.unwrap_or(Value::Null),
                },
            ),
            Ok(result) => (
                id,
                TaskOutcome::BackendFailed {
                    tool: call.tool,
                    arguments: call.arguments,
                    attempts: result.attempts,
                    error: result.error.unwrap_or_else(|| "backend failure".to_string()),
                },
            ),
            Err(e) => (
                id,
                TaskOutcome::AgentFailed {
                    message: e.to_string(),
                },
            ),
        },
    }
}

/// Builds the trace in sub-task id order from the settled plan.
fn build_trace(plan: &Plan, records: &HashMap<SubTaskId, StepRecord>) -> Vec<TraceStep> {
    plan.iter()
        .map(|task| {
            let record = records.get(&task.id).cloned().unwrap_or_default();
            let outcome = match task.status() {
                SubTaskStatus::Done => StepOutcome::Done {
                    payload: record.payload.clone().unwrap_or(Value::Null),
                },
                _ => StepOutcome::Failed {
                    reason: task
                        .failure
                        .as_ref()
                        .map_or_else(|| "not executed".to_string(), ToString::to_string),
                },
            };
            TraceStep {
                subtask: task.id,
                goal: task.goal.clone(),
                role: task.role,
                tool: record.tool,
                arguments: record.arguments,
                attempts: record.attempts,
                outcome,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use crate::agent::message::{ChatRequest, ChatResponse, TokenUsage};
    use crate::error::{BackendError, BackendErrorKind};
    use crate::plan::ContextTurn;

    /// Provider scripted by content markers: the first route whose marker
    /// appears in the user message answers. Each route's responses are
    /// consumed in order, with the last one sticky.
    struct MockProvider {
        routes: Vec<(&'static str, Mutex<VecDeque<String>>)>,
        requests: Mutex<Vec<String>>,
        hang_marker: Option<&'static str>,
    }

    impl MockProvider {
        fn new() -> Self {
            Self {
                routes: Vec::new(),
                requests: Mutex::new(Vec::new()),
                hang_marker: None,
            }
        }

        fn route(mut self, marker: &'static str, responses: &[&str]) -> Self {
            let queue = responses.iter().map(ToString::to_string).collect();
            self.routes.push((marker, Mutex::new(queue)));
            self
        }

        /// Requests whose user message contains this marker never resolve.
        fn hang_on(mut self, marker: &'static str) -> Self {
            self.hang_marker = Some(marker);
            self
        }

        fn recorded_requests(&self) -> Vec<String> {
            self.requests.lock().unwrap_or_else(|_| unreachable!()).clone()
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn chat(&self, request: &ChatRequest) -> std::result::Result<ChatResponse, AgentError> {
            let user = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            self.requests
                .lock()
                .unwrap_or_else(|_| unreachable!())
                .push(user.clone());

            if let Some(marker) = self.hang_marker
                && user.contains(marker)
            {
                std::future::pending::<()>().await;
            }

            for (marker, responses) in &self.routes {
                if user.contains(marker) {
                    let mut queue = responses.lock().unwrap_or_else(|_| unreachable!());
                    let content = if queue.len() > 1 {
                        queue.pop_front()
                    } else {
                        queue.front().cloned()
                    };
                    let Some(content) = content else { break };
                    return Ok(ChatResponse {
                        content,
                        usage: TokenUsage::default(),
                        finish_reason: Some("stop".to_string()),
                    });
                }
            }
            Err(AgentError::ApiRequest {
                message: format!("no scripted response for request: {user}"),
            })
        }
    }

    /// Backend scripted per tool. Unscripted tools succeed with a stub
    /// payload; scripted ones consume their outcomes in order, last sticky.
    struct ScriptedBackend {
        scripts: Mutex<HashMap<String, VecDeque<std::result::Result<Value, BackendErrorKind>>>>,
    }

    impl ScriptedBackend {
        fn new() -> Self {
            Self {
                scripts: Mutex::new(HashMap::new()),
            }
        }

        fn script(
            self,
            tool: &str,
            outcomes: Vec<std::result::Result<Value, BackendErrorKind>>,
        ) -> Self {
            self.scripts
                .lock()
                .unwrap_or_else(|_| unreachable!())
                .insert(tool.to_string(), outcomes.into());
            self
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn invoke(&self, tool: &str, _args: &Value) -> std::result::Result<Value, BackendError> {
            let mut scripts = self.scripts.lock().unwrap_or_else(|_| unreachable!());
            let Some(queue) = scripts.get_mut(tool) else {
                return Ok(json!({"ok": true, "tool": tool}));
            };
            let outcome = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            match outcome {
                Some(Ok(payload)) => Ok(payload),
                Some(Err(kind)) => Err(BackendError::new(tool, kind, "scripted failure")),
                None => Ok(json!({"ok": true, "tool": tool})),
            }
        }
    }

    fn test_config() -> OrchestratorConfig {
        OrchestratorConfig::builder()
            .api_key("test")
            .backoff_base(Duration::from_millis(1))
            .build()
            .unwrap_or_else(|_| unreachable!())
    }

    fn orchestrator(
        provider: Arc<MockProvider>,
        backend: Arc<ScriptedBackend>,
        config: OrchestratorConfig,
    ) -> Orchestrator {
        let registry = Arc::new(default_registry().unwrap_or_else(|_| unreachable!()));
        Orchestrator::new(provider, registry, backend, config)
    }

    #[tokio::test]
    async fn test_simple_query_end_to_end() {
        let provider = Arc::new(
            MockProvider::new()
                .route(
                    "Decompose this query.",
                    &[r#"[{"goal": "find datasets with a price column", "role": "schema_explorer", "depends_on": []}]"#],
                )
                .route(
                    "<goal>find datasets with a price column",
                    &[r#"{"action": "tool_call", "tool": "find_columns", "arguments": {"column": "price"}}"#],
                )
                .route("<results>", &["Two datasets contain a price column."]),
        );
        let backend = Arc::new(ScriptedBackend::new().script(
            "find_columns",
            vec![Ok(json!([{"dataset": "sales"}, {"dataset": "listings"}]))],
        ));
        let orch = orchestrator(provider, backend, test_config());

        let answer = orch
            .handle_query(QueryRequest::new("which datasets have a price column?", vec![]))
            .await
            .unwrap_or_else(|_| unreachable!());

        assert!(!answer.partial);
        assert!(answer.unmet_goals.is_empty());
        assert_eq!(answer.text, "Two datasets contain a price column.");
        assert_eq!(answer.tools_called(), vec!["find_columns"]);
        assert_eq!(answer.trace.len(), 1);
        assert_eq!(answer.trace[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_dependent_subtask_sees_prerequisite_results() {
        let provider = Arc::new(
            MockProvider::new()
                .route(
                    "Decompose this query.",
                    &[r#"[
                        {"goal": "find datasets with a price column", "role": "schema_explorer", "depends_on": []},
                        {"goal": "count the rows of each dataset found", "role": "query_builder", "depends_on": [0]}
                    ]"#],
                )
                .route(
                    "<goal>find datasets with a price column",
                    &[r#"{"action": "tool_call", "tool": "find_columns", "arguments": {"column": "price"}}"#],
                )
                .route(
                    "<goal>count the rows of each dataset",
                    &[r#"{"action": "tool_call", "tool": "dataset_row_count", "arguments": {"dataset": "sales"}}"#],
                )
                .route("<results>", &["The sales dataset has 42 rows."]),
        );
        let backend = Arc::new(
            ScriptedBackend::new()
                .script("find_columns", vec![Ok(json!([{"dataset": "sales"}]))])
                .script("dataset_row_count", vec![Ok(json!({"dataset": "sales", "rows": 42}))]),
        );
        let orch = orchestrator(Arc::clone(&provider), backend, test_config());

        let answer = orch
            .handle_query(QueryRequest::new(
                "how many rows does each dataset with a price column have?",
                vec![],
            ))
            .await
            .unwrap_or_else(|_| unreachable!());

        assert!(!answer.partial);
        assert_eq!(answer.trace[0].subtask, SubTaskId(0));
        assert_eq!(answer.trace[1].subtask, SubTaskId(1));
        assert_eq!(answer.tools_called(), vec!["find_columns", "dataset_row_count"]);

        // The dependent sub-task's prompt carried the prerequisite payload.
        let requests = provider.recorded_requests();
        assert!(requests.iter().any(|r| {
            r.contains("count the rows")
                && r.contains("Results from prerequisite sub-tasks")
                && r.contains("sales")
        }));
    }

    #[tokio::test]
    async fn test_schema_violation_feedback_then_success() {
        let provider = Arc::new(
            MockProvider::new()
                .route(
                    "Decompose this query.",
                    &[r#"[{"goal": "count the rows of dataset sales", "role": "query_builder", "depends_on": []}]"#],
                )
                .route(
                    "<goal>count the rows of dataset sales",
                    &[
                        r#"{"action": "tool_call", "tool": "dataset_row_count", "arguments": {"dataset": 42}}"#,
                        r#"{"action": "tool_call", "tool": "dataset_row_count", "arguments": {"dataset": "sales"}}"#,
                    ],
                )
                .route("<results>", &["42 rows."]),
        );
        let backend = Arc::new(ScriptedBackend::new().script(
            "dataset_row_count",
            vec![Ok(json!({"dataset": "sales", "rows": 42}))],
        ));
        let orch = orchestrator(Arc::clone(&provider), backend, test_config());

        let answer = orch
            .handle_query(QueryRequest::new("how many rows does sales have?", vec![]))
            .await
            .unwrap_or_else(|_| unreachable!());

        assert!(!answer.partial);
        assert_eq!(answer.tools_called(), vec!["dataset_row_count"]);

        // The retry prompt fed every violation back to the model.
        let requests = provider.recorded_requests();
        assert!(requests.iter().any(|r| {
            r.contains("resulted in this error") && r.contains("expected string")
        }));
    }

    #[tokio::test]
    async fn test_defer_triggers_bounded_redecomposition() {
        let provider = Arc::new(
            MockProvider::new()
                .route(
                    "Decompose this query.",
                    &[r#"[{"goal": "label the columns of sales semantically", "role": "analytics", "depends_on": []}]"#],
                )
                .route(
                    "Re-plan this sub-task",
                    &[r#"[{"goal": "discover the schema of dataset sales", "role": "schema_explorer", "depends_on": []}]"#],
                )
                .route(
                    "<goal>label the columns",
                    &[
                        r#"{"action": "defer", "reason": "the schema of sales is not known yet"}"#,
                        r#"{"action": "tool_call", "tool": "semantic_label_columns", "arguments": {"dataset": "sales", "ontology": "dbpedia"}}"#,
                    ],
                )
                .route(
                    "<goal>discover the schema",
                    &[r#"{"action": "tool_call", "tool": "get_dataset_schema", "arguments": {"dataset": "sales"}}"#],
                )
                .route("<results>", &["Columns labeled."]),
        );
        let backend = Arc::new(ScriptedBackend::new());
        let orch = orchestrator(provider, backend, test_config());

        let answer = orch
            .handle_query(QueryRequest::new("label the sales columns", vec![]))
            .await
            .unwrap_or_else(|_| unreachable!());

        assert!(!answer.partial);
        assert!(answer.unmet_goals.is_empty());
        // Id order: the superseded original, the refined sub-task, then
        // the successor that carried the goal to completion.
        assert_eq!(answer.trace.len(), 3);
        assert!(answer.trace[0].tool.is_none());
        let StepOutcome::Failed { ref reason } = answer.trace[0].outcome else {
            unreachable!("expected the original sub-task to be superseded");
        };
        assert!(reason.contains("superseded by re-plan as t2"));
        assert_eq!(answer.trace[1].tool.as_deref(), Some("get_dataset_schema"));
        assert_eq!(answer.trace[2].tool.as_deref(), Some("semantic_label_columns"));
        assert_eq!(answer.trace[2].goal, answer.trace[0].goal);
        let StepOutcome::Done { .. } = answer.trace[2].outcome else {
            unreachable!("expected the successor to complete");
        };
    }

    #[tokio::test]
    async fn test_defer_exhausted_yields_partial_answer() {
        let config = OrchestratorConfig::builder()
            .api_key("test")
            .max_redecompose(0)
            .build()
            .unwrap_or_else(|_| unreachable!());
        let provider = Arc::new(
            MockProvider::new()
                .route(
                    "Decompose this query.",
                    &[r#"[
                        {"goal": "find datasets tagged weather", "role": "schema_explorer", "depends_on": []},
                        {"goal": "forecast next week's temperature", "role": "analytics", "depends_on": []}
                    ]"#],
                )
                .route(
                    "<goal>find datasets tagged weather",
                    &[r#"{"action": "tool_call", "tool": "list_datasets", "arguments": {"name_filter": "weather"}}"#],
                )
                .route(
                    "<goal>forecast",
                    &[r#"{"action": "defer", "reason": "no forecasting capability"}"#],
                )
                .route("<results>", &["Found one weather dataset; forecasting is not supported."]),
        );
        let backend = Arc::new(ScriptedBackend::new());
        let orch = orchestrator(provider, backend, config);

        let answer = orch
            .handle_query(QueryRequest::new(
                "list weather datasets and forecast next week",
                vec![],
            ))
            .await
            .unwrap_or_else(|_| unreachable!());

        assert!(answer.partial);
        assert_eq!(answer.unmet_goals, vec!["forecast next week's temperature"]);
        assert_eq!(answer.tools_called(), vec!["list_datasets"]);
        let StepOutcome::Failed { ref reason } = answer.trace[1].outcome else {
            unreachable!("expected failed outcome");
        };
        assert!(reason.contains("no usable tool"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_backend_failure_retried_to_success() {
        let provider = Arc::new(
            MockProvider::new()
                .route(
                    "Decompose this query.",
                    &[r#"[{"goal": "count the rows of dataset sales", "role": "query_builder", "depends_on": []}]"#],
                )
                .route(
                    "<goal>count the rows",
                    &[r#"{"action": "tool_call", "tool": "dataset_row_count", "arguments": {"dataset": "sales"}}"#],
                )
                .route("<results>", &["42 rows."]),
        );
        let backend = Arc::new(ScriptedBackend::new().script(
            "dataset_row_count",
            vec![
                Err(BackendErrorKind::Timeout),
                Err(BackendErrorKind::TransientNetwork),
                Ok(json!({"rows": 42})),
            ],
        ));
        let orch = orchestrator(provider, backend, test_config());

        let answer = orch
            .handle_query(QueryRequest::new("row count of sales", vec![]))
            .await
            .unwrap_or_else(|_| unreachable!());

        assert!(!answer.partial);
        assert_eq!(answer.trace[0].attempts, 3);
        let StepOutcome::Done { ref payload } = answer.trace[0].outcome else {
            unreachable!("expected done outcome");
        };
        assert_eq!(payload["rows"], 42);
    }

    #[tokio::test]
    async fn test_backend_failure_cascades_to_dependents() {
        let provider = Arc::new(
            MockProvider::new()
                .route(
                    "Decompose this query.",
                    &[r#"[
                        {"goal": "run the join query over sales", "role": "query_builder", "depends_on": []},
                        {"goal": "compute statistics over the join result", "role": "analytics", "depends_on": [0]}
                    ]"#],
                )
                .route(
                    "<goal>run the join query",
                    &[r#"{"action": "tool_call", "tool": "run_query", "arguments": {"query": "select *"}}"#],
                )
                .route("<results>", &["The query was rejected."]),
        );
        let backend = Arc::new(
            ScriptedBackend::new().script("run_query", vec![Err(BackendErrorKind::RemoteRejected)]),
        );
        let orch = orchestrator(provider, backend, test_config());

        let answer = orch
            .handle_query(QueryRequest::new("join and analyze", vec![]))
            .await
            .unwrap_or_else(|_| unreachable!());

        assert!(answer.partial);
        assert_eq!(answer.unmet_goals.len(), 2);
        assert_eq!(answer.trace[0].attempts, 1);
        let StepOutcome::Failed { ref reason } = answer.trace[1].outcome else {
            unreachable!("expected failed outcome");
        };
        assert!(reason.contains("dependency t0 failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_yields_partial_answer() {
        let provider = Arc::new(
            MockProvider::new()
                .route(
                    "Decompose this query.",
                    &[r#"[{"goal": "count the rows of dataset sales", "role": "query_builder", "depends_on": []}]"#],
                )
                .hang_on("<goal>count the rows"),
        );
        let backend = Arc::new(ScriptedBackend::new());
        let orch = orchestrator(provider, backend, test_config());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let answer = orch
            .handle_query_with_cancel(
                QueryRequest::new("row count of sales", vec![]),
                cancel,
            )
            .await
            .unwrap_or_else(|_| unreachable!());

        assert!(answer.partial);
        assert_eq!(answer.unmet_goals, vec!["count the rows of dataset sales"]);
        let StepOutcome::Failed { ref reason } = answer.trace[0].outcome else {
            unreachable!("expected failed outcome");
        };
        assert!(reason.contains("cancelled"));
        // No synthesis after cancellation: the plain rendering names the gap.
        assert!(answer.text.contains("could not be answered"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_the_request() {
        let config = OrchestratorConfig::builder()
            .api_key("test")
            .deadline(Duration::from_secs(1))
            .build()
            .unwrap_or_else(|_| unreachable!());
        let provider = Arc::new(
            MockProvider::new()
                .route(
                    "Decompose this query.",
                    &[r#"[{"goal": "count the rows of dataset sales", "role": "query_builder", "depends_on": []}]"#],
                )
                .hang_on("<goal>count the rows"),
        );
        let backend = Arc::new(ScriptedBackend::new());
        let orch = orchestrator(provider, backend, config);

        let answer = orch
            .handle_query(QueryRequest::new("row count of sales", vec![]))
            .await
            .unwrap_or_else(|_| unreachable!());

        assert!(answer.partial);
        let StepOutcome::Failed { ref reason } = answer.trace[0].outcome else {
            unreachable!("expected failed outcome");
        };
        assert!(reason.contains("cancelled"));
    }

    #[tokio::test]
    async fn test_synthesis_failure_falls_back_to_plain_rendering() {
        // No "<results>" route: the synthesis call errors out.
        let provider = Arc::new(
            MockProvider::new()
                .route(
                    "Decompose this query.",
                    &[r#"[{"goal": "count the rows of dataset sales", "role": "query_builder", "depends_on": []}]"#],
                )
                .route(
                    "<goal>count the rows",
                    &[r#"{"action": "tool_call", "tool": "dataset_row_count", "arguments": {"dataset": "sales"}}"#],
                ),
        );
        let backend = Arc::new(ScriptedBackend::new().script(
            "dataset_row_count",
            vec![Ok(json!({"rows": 42}))],
        ));
        let orch = orchestrator(provider, backend, test_config());

        let answer = orch
            .handle_query(QueryRequest::new("row count of sales", vec![]))
            .await
            .unwrap_or_else(|_| unreachable!());

        assert!(!answer.partial);
        assert!(answer.text.contains("42"));
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let provider = Arc::new(MockProvider::new());
        let backend = Arc::new(ScriptedBackend::new());
        let orch = orchestrator(provider, backend, test_config());

        let result = orch
            .handle_query(QueryRequest::new("   ", vec![]))
            .await;
        assert!(matches!(result, Err(AgentError::InvalidArgument { .. })));
    }

    #[tokio::test]
    async fn test_context_turns_reach_the_decomposer() {
        let provider = Arc::new(
            MockProvider::new()
                .route(
                    "Decompose this query.",
                    &[r#"[{"goal": "count the rows of dataset sales", "role": "query_builder", "depends_on": []}]"#],
                )
                .route(
                    "<goal>count the rows",
                    &[r#"{"action": "tool_call", "tool": "dataset_row_count", "arguments": {"dataset": "sales"}}"#],
                )
                .route("<results>", &["42 rows."]),
        );
        let backend = Arc::new(ScriptedBackend::new());
        let orch = orchestrator(Arc::clone(&provider), backend, test_config());

        let context = vec![ContextTurn {
            speaker: "user".to_string(),
            text: "we were talking about the sales dataset".to_string(),
        }];
        let answer = orch
            .handle_query(QueryRequest::new("how many rows does it have?", context))
            .await
            .unwrap_or_else(|_| unreachable!());

        assert!(!answer.partial);
        let requests = provider.recorded_requests();
        assert!(requests.iter().any(|r| {
            r.contains("<conversation>") && r.contains("talking about the sales dataset")
        }));
    }

    #[tokio::test]
    async fn test_independent_subtasks_merged_in_id_order() {
        let provider = Arc::new(
            MockProvider::new()
                .route(
                    "Decompose this query.",
                    &[r#"[
                        {"goal": "list datasets tagged sales", "role": "schema_explorer", "depends_on": []},
                        {"goal": "count the rows of dataset sales", "role": "query_builder", "depends_on": []}
                    ]"#],
                )
                .route(
                    "<goal>list datasets tagged sales",
                    &[r#"{"action": "tool_call", "tool": "list_datasets", "arguments": {"name_filter": "sales"}}"#],
                )
                .route(
                    "<goal>count the rows",
                    &[r#"{"action": "tool_call", "tool": "dataset_row_count", "arguments": {"dataset": "sales"}}"#],
                )
                .route("<results>", &["One sales dataset with 42 rows."]),
        );
        let backend = Arc::new(
            ScriptedBackend::new()
                .script("list_datasets", vec![Ok(json!([{"name": "sales"}]))])
                .script("dataset_row_count", vec![Ok(json!({"rows": 42}))]),
        );
        let orch = orchestrator(provider, backend, test_config());

        let answer = orch
            .handle_query(QueryRequest::new("list sales datasets and their sizes", vec![]))
            .await
            .unwrap_or_else(|_| unreachable!());

        assert!(!answer.partial);
        // Both ran in the same round; the trace merges by sub-task id,
        // not by which finished first.
        assert_eq!(answer.trace[0].subtask, SubTaskId(0));
        assert_eq!(answer.trace[0].tool.as_deref(), Some("list_datasets"));
        assert_eq!(answer.trace[1].subtask, SubTaskId(1));
        assert_eq!(answer.trace[1].tool.as_deref(), Some("dataset_row_count"));
        assert_eq!(answer.tools_called(), vec!["list_datasets", "dataset_row_count"]);
    }

    #[tokio::test]
    async fn test_paraphrases_select_the_same_tools() {
        let provider = Arc::new(
            MockProvider::new()
                .route(
                    "Decompose this query.",
                    &[r#"[{"goal": "find datasets with a price column", "role": "schema_explorer", "depends_on": []}]"#],
                )
                .route(
                    "<goal>find datasets with a price column",
                    &[r#"{"action": "tool_call", "tool": "find_columns", "arguments": {"column": "price"}}"#],
                )
                .route("<results>", &["Two datasets contain a price column."]),
        );
        let backend = Arc::new(ScriptedBackend::new());
        let orch = orchestrator(provider, backend, test_config());

        let first = orch
            .handle_query(QueryRequest::new("which datasets have a price column?", vec![]))
            .await
            .unwrap_or_else(|_| unreachable!());
        let second = orch
            .handle_query(QueryRequest::new(
                "show me every dataset that contains a price column",
                vec![],
            ))
            .await
            .unwrap_or_else(|_| unreachable!());

        assert_eq!(first.tools_called(), second.tools_called());
        assert_eq!(first.trace.len(), second.trace.len());
        assert_eq!(first.trace[0].arguments, second.trace[0].arguments);
        assert_eq!(first.partial, second.partial);
    }

    #[tokio::test]
    async fn test_identical_rerun_is_deterministic() {
        let provider = Arc::new(
            MockProvider::new()
                .route(
                    "Decompose this query.",
                    &[r#"[
                        {"goal": "find datasets with a price column", "role": "schema_explorer", "depends_on": []},
                        {"goal": "count the rows of each dataset found", "role": "query_builder", "depends_on": [0]}
                    ]"#],
                )
                .route(
                    "<goal>find datasets with a price column",
                    &[r#"{"action": "tool_call", "tool": "find_columns", "arguments": {"column": "price"}}"#],
                )
                .route(
                    "<goal>count the rows of each dataset",
                    &[r#"{"action": "tool_call", "tool": "dataset_row_count", "arguments": {"dataset": "sales"}}"#],
                )
                .route("<results>", &["The sales dataset has 42 rows."]),
        );
        let backend = Arc::new(ScriptedBackend::new());
        let orch = orchestrator(provider, backend, test_config());

        let query = "how many rows does each dataset with a price column have?";
        let first = orch
            .handle_query(QueryRequest::new(query, vec![]))
            .await
            .unwrap_or_else(|_| unreachable!());
        let second = orch
            .handle_query(QueryRequest::new(query, vec![]))
            .await
            .unwrap_or_else(|_| unreachable!());

        assert_eq!(first.tools_called(), second.tools_called());
        let shape = |a: &Answer| {
            a.trace
                .iter()
                .map(|s| (s.subtask, s.goal.clone(), s.arguments.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(shape(&first), shape(&second));
        assert_eq!(first.text, second.text);
    }
}
