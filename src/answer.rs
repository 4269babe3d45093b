//! Final answer and the structured execution trace.
//!
//! The trace records every tool call with its arguments, attempt count,
//! and outcome — enough for an external evaluation driver to score a run
//! without re-executing it. Steps are ordered by sub-task id, never by
//! completion order.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::agent::AgentRole;
use crate::plan::SubTaskId;

/// Outcome of one sub-task, as recorded in the trace.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum StepOutcome {
    /// The sub-task completed; the backend payload is attached.
    Done {
        /// Payload returned by the backend.
        payload: Value,
    },
    /// The sub-task failed terminally.
    Failed {
        /// Failure description.
        reason: String,
    },
}

/// One sub-task's entry in the execution trace.
#[derive(Debug, Clone, Serialize)]
pub struct TraceStep {
    /// Sub-task id within the plan.
    pub subtask: SubTaskId,
    /// Goal the sub-task carried.
    pub goal: String,
    /// Role that handled it.
    pub role: AgentRole,
    /// Tool that was called, if a decision was reached.
    pub tool: Option<String>,
    /// Bound arguments of the call, if a decision was reached.
    pub arguments: Option<Value>,
    /// Backend attempts made (retries included). Zero if no call was issued.
    pub attempts: u32,
    /// Terminal outcome.
    pub outcome: StepOutcome,
}

/// Synthesized answer for one request.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    /// Request this answer belongs to.
    pub request_id: Uuid,
    /// Synthesized response text.
    pub text: String,
    /// Whether any sub-goal could not be satisfied.
    pub partial: bool,
    /// Goals of failed sub-tasks, in sub-task id order. Never silently
    /// dropped from the narrative.
    pub unmet_goals: Vec<String>,
    /// Per-sub-task execution trace, in sub-task id order.
    pub trace: Vec<TraceStep>,
    /// Wall-clock time for the request.
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_duration<S>(d: &Duration, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_f64(d.as_secs_f64())
}

impl Answer {
    /// Names of tools called during the request, in sub-task id order.
    ///
    /// Useful for paraphrase-equivalence checks in evaluation.
    #[must_use]
    pub fn tools_called(&self) -> Vec<&str> {
        self.trace
            .iter()
            .filter_map(|s| s.tool.as_deref())
            .collect()
    }
}
