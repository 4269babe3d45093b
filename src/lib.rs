//! Multi-agent orchestration core for natural-language queries against a
//! semantic data lake.
//!
//! Translates a free-form question into a plan of role-routed sub-tasks,
//! grounds each sub-task in a shortlist of backend tools, executes
//! validated tool calls with bounded retry, and synthesizes the results
//! into one answer with a structured trace.
//!
//! # Architecture
//!
//! ```text
//! User query → Orchestrator
//!   ├── DecomposerAgent (query → sub-task DAG)
//!   ├── Retriever (role-scoped tool shortlists)
//!   ├── Fan-out → concurrent RoleAgents
//!   │   └── Each decides one tool call (or defers)
//!   ├── ToolExecutor (validation + backend retry)
//!   ├── Bounded re-decomposition of deferred sub-tasks
//!   └── SynthesizerAgent → final answer + trace
//! ```
//!
//! Sub-tasks run as soon as their dependencies complete, capped by a
//! concurrency limit; a failed sub-task fails its dependents but never
//! the whole request, which still produces a partial answer.

pub mod agent;
pub mod answer;
pub mod backend;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod plan;
pub mod registry;
pub mod retrieval;

pub use agent::{AgentRole, Decision, LlmProvider, PromptSet, RoleAgent, ToolCall};
pub use answer::{Answer, StepOutcome, TraceStep};
pub use backend::{Backend, HttpBackend};
pub use catalog::default_registry;
pub use config::{OrchestratorConfig, OrchestratorConfigBuilder};
pub use error::{AgentError, BackendError, BackendErrorKind, RegistryError, Result};
pub use executor::{ToolExecutor, ToolResult};
pub use orchestrator::Orchestrator;
pub use plan::{ContextTurn, Plan, QueryRequest, SubTask, SubTaskId, SubTaskStatus};
pub use registry::{ParamSpec, ParamType, ToolDescriptor, ToolRegistry};
pub use retrieval::{LexicalSimilarity, Retriever, Similarity};
