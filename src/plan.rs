//! Request, sub-task, and plan types.
//!
//! A [`Plan`] is the sub-task DAG for one request. It is owned exclusively
//! by the orchestrator for the request's lifetime; nothing here is shared
//! across requests.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentRole;

/// Identifier of a sub-task within one plan.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SubTaskId(pub u32);

impl std::fmt::Display for SubTaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// One prior turn of the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextTurn {
    /// Who produced the turn (`"user"` or `"assistant"`).
    pub speaker: String,
    /// Turn text.
    pub text: String,
}

/// An incoming natural-language request. Immutable once created.
#[derive(Debug, Clone, Serialize)]
pub struct QueryRequest {
    /// Unique request id.
    pub id: Uuid,
    /// Raw query text.
    pub text: String,
    /// Ordered prior turns, oldest first.
    pub context: Vec<ContextTurn>,
}

impl QueryRequest {
    /// Creates a request with a fresh id.
    #[must_use]
    pub fn new(text: impl Into<String>, context: Vec<ContextTurn>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            context,
        }
    }
}

/// Lifecycle of a sub-task: `Pending → InProgress → {Done | Failed}`.
/// Transitions are monotonic and terminal states are final. A re-plan
/// never moves a sub-task backward: the deferred sub-task fails as
/// [`FailureReason::Superseded`] and a successor with a fresh id carries
/// its goal forward ([`SubTask::successor`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskStatus {
    /// Not yet dispatched.
    Pending,
    /// Dispatched to an agent.
    InProgress,
    /// Completed with a result.
    Done,
    /// Terminally failed.
    Failed,
}

impl SubTaskStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Why a sub-task failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum FailureReason {
    /// No usable tool after bounded re-decomposition.
    DeferExhausted(String),
    /// Backend failure that exhausted its retry budget.
    Backend(String),
    /// The request was cancelled while this sub-task was pending or in flight.
    Cancelled,
    /// A dependency of this sub-task failed, so it can never dispatch.
    DependencyFailed(SubTaskId),
    /// Deferred and replaced by a re-plan; the named successor carries
    /// the same goal.
    Superseded(SubTaskId),
    /// Agent-side failure (provider error, repeated malformed output).
    Agent(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeferExhausted(detail) => write!(f, "no usable tool: {detail}"),
            Self::Backend(detail) => write!(f, "backend failure: {detail}"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::DependencyFailed(id) => write!(f, "dependency {id} failed"),
            Self::Superseded(id) => write!(f, "superseded by re-plan as {id}"),
            Self::Agent(detail) => write!(f, "agent failure: {detail}"),
        }
    }
}

/// One unit of work derived from the query.
#[derive(Debug, Clone, Serialize)]
pub struct SubTask {
    /// Identifier within the plan.
    pub id: SubTaskId,
    /// Goal description handed to the agent.
    pub goal: String,
    /// Role responsible for this sub-task.
    pub role: AgentRole,
    /// Sub-tasks that must be `Done` before this one dispatches.
    pub deps: Vec<SubTaskId>,
    /// Current status.
    status: SubTaskStatus,
    /// Re-decompositions consumed so far (bounded by config).
    pub redecompositions: u32,
    /// Failure reason, set exactly when status becomes `Failed`.
    pub failure: Option<FailureReason>,
}

impl SubTask {
    /// Creates a pending sub-task. Duplicate dependency edges are
    /// collapsed; the decomposer is not required to deduplicate.
    #[must_use]
    pub fn new(id: SubTaskId, goal: impl Into<String>, role: AgentRole, mut deps: Vec<SubTaskId>) -> Self {
        let mut seen = BTreeSet::new();
        deps.retain(|d| seen.insert(*d));
        Self {
            id,
            goal: goal.into(),
            role,
            deps,
            status: SubTaskStatus::Pending,
            redecompositions: 0,
            failure: None,
        }
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> SubTaskStatus {
        self.status
    }

    /// Marks the sub-task in progress. No-op unless it is pending.
    pub fn start(&mut self) -> bool {
        if self.status == SubTaskStatus::Pending {
            self.status = SubTaskStatus::InProgress;
            true
        } else {
            false
        }
    }

    /// Marks the sub-task done. No-op once terminal.
    pub fn complete(&mut self) -> bool {
        if self.status.is_terminal() {
            false
        } else {
            self.status = SubTaskStatus::Done;
            true
        }
    }

    /// Creates the successor that carries this sub-task's goal after a
    /// re-plan. The successor starts pending under the given id and
    /// dependencies, one unit of re-decomposition budget further along.
    #[must_use]
    pub fn successor(&self, id: SubTaskId, deps: Vec<SubTaskId>) -> Self {
        let mut next = Self::new(id, self.goal.clone(), self.role, deps);
        next.redecompositions = self.redecompositions + 1;
        next
    }

    /// Marks the sub-task failed with a reason. No-op once terminal.
    pub fn fail(&mut self, reason: FailureReason) -> bool {
        if self.status.is_terminal() {
            false
        } else {
            self.status = SubTaskStatus::Failed;
            self.failure = Some(reason);
            true
        }
    }
}

/// The sub-task DAG for one request.
///
/// Iteration is in id order (`BTreeMap`), which makes dispatch order among
/// equally-ready sub-tasks deterministic.
#[derive(Debug, Default)]
pub struct Plan {
    subtasks: BTreeMap<SubTaskId, SubTask>,
    next_id: u32,
}

impl Plan {
    /// Creates an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next sub-task id.
    #[must_use]
    pub fn next_id(&mut self) -> SubTaskId {
        let id = SubTaskId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Inserts a sub-task. Ids are allocated via [`Plan::next_id`], so
    /// collisions indicate a caller bug and the insert is rejected.
    pub fn insert(&mut self, subtask: SubTask) -> bool {
        if self.subtasks.contains_key(&subtask.id) {
            return false;
        }
        self.subtasks.insert(subtask.id, subtask);
        true
    }

    /// Returns the sub-task with the given id.
    #[must_use]
    pub fn get(&self, id: SubTaskId) -> Option<&SubTask> {
        self.subtasks.get(&id)
    }

    /// Mutable access to a sub-task.
    pub fn get_mut(&mut self, id: SubTaskId) -> Option<&mut SubTask> {
        self.subtasks.get_mut(&id)
    }

    /// All sub-tasks in id order.
    pub fn iter(&self) -> impl Iterator<Item = &SubTask> {
        self.subtasks.values()
    }

    /// Number of sub-tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subtasks.len()
    }

    /// Whether the plan has no sub-tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }

    /// Ids of pending sub-tasks whose dependencies are all done, in id order.
    #[must_use]
    pub fn ready(&self) -> Vec<SubTaskId> {
        self.subtasks
            .values()
            .filter(|t| t.status() == SubTaskStatus::Pending)
            .filter(|t| {
                t.deps.iter().all(|d| {
                    self.subtasks
                        .get(d)
                        .is_some_and(|dep| dep.status() == SubTaskStatus::Done)
                })
            })
            .map(|t| t.id)
            .collect()
    }

    /// Pending sub-tasks with at least one failed dependency can never run;
    /// marks them failed and returns their ids. Repeats until a fixpoint so
    /// failure cascades through dependency chains.
    pub fn fail_blocked(&mut self) -> Vec<SubTaskId> {
        let mut all_newly_failed = Vec::new();
        loop {
            let blocked: Vec<(SubTaskId, SubTaskId)> = self
                .subtasks
                .values()
                .filter(|t| t.status() == SubTaskStatus::Pending)
                .filter_map(|t| {
                    t.deps
                        .iter()
                        .find(|d| {
                            self.subtasks
                                .get(d)
                                .is_some_and(|dep| dep.status() == SubTaskStatus::Failed)
                        })
                        .map(|&d| (t.id, d))
                })
                .collect();
            if blocked.is_empty() {
                break;
            }
            for (id, dep) in blocked {
                if let Some(task) = self.subtasks.get_mut(&id)
                    && task.fail(FailureReason::DependencyFailed(dep))
                {
                    all_newly_failed.push(id);
                }
            }
        }
        all_newly_failed
    }

    /// Replaces every dependency on `from` with `to` across the plan,
    /// returning how many edges were rewired. Used when a re-plan
    /// supersedes a sub-task, so its dependents wait on the successor
    /// instead of cascading off the superseded failure.
    pub fn rewire_dependents(&mut self, from: SubTaskId, to: SubTaskId) -> usize {
        let mut rewired = 0;
        for task in self.subtasks.values_mut() {
            if task.id == to {
                continue;
            }
            for dep in &mut task.deps {
                if *dep == from {
                    *dep = to;
                    rewired += 1;
                }
            }
            let mut seen = BTreeSet::new();
            task.deps.retain(|d| seen.insert(*d));
        }
        rewired
    }

    /// Whether every sub-task is terminal.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.subtasks.values().all(|t| t.status().is_terminal())
    }

    /// Whether the dependency graph is acyclic.
    ///
    /// Decomposition emits edges that point at earlier sub-tasks, so cycles
    /// indicate a bug upstream; the orchestrator checks before dispatching.
    #[must_use]
    pub fn is_acyclic(&self) -> bool {
        // Kahn's algorithm over deduplicated edge sets, so a repeated
        // dependency entry counts as one edge.
        let dep_sets: BTreeMap<SubTaskId, BTreeSet<SubTaskId>> = self
            .subtasks
            .values()
            .map(|t| {
                let deps = t
                    .deps
                    .iter()
                    .copied()
                    .filter(|d| self.subtasks.contains_key(d))
                    .collect();
                (t.id, deps)
            })
            .collect();

        let mut in_degree: BTreeMap<SubTaskId, usize> = dep_sets
            .iter()
            .map(|(&id, deps)| (id, deps.len()))
            .collect();

        let mut queue: Vec<SubTaskId> = in_degree
            .iter()
            .filter(|&(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut visited = 0usize;

        while let Some(id) = queue.pop() {
            visited += 1;
            for (&task_id, deps) in &dep_sets {
                if deps.contains(&id)
                    && let Some(deg) = in_degree.get_mut(&task_id)
                {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push(task_id);
                    }
                }
            }
        }

        visited == self.subtasks.len()
    }
}
