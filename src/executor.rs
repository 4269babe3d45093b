//! Validated tool execution with bounded retry.
//!
//! The executor is the only component that touches the backend. Contract
//! violations (unknown tool, wrong role, schema mismatch) are errors and
//! never reach the backend; backend failures are data, returned as an
//! unsuccessful [`ToolResult`] once the retry budget for retryable kinds
//! is spent.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::agent::ToolCall;
use crate::backend::Backend;
use crate::error::{AgentError, Result};
use crate::registry::ToolRegistry;

/// Outcome of one tool execution, success or not.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// Whether the backend call succeeded.
    pub success: bool,
    /// Backend payload on success.
    pub payload: Option<Value>,
    /// Failure description when `success` is false.
    pub error: Option<String>,
    /// Backend attempts made, retries included.
    pub attempts: u32,
}

/// Executes validated tool calls against the backend.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    backend: Arc<dyn Backend>,
    max_retries: u32,
    backoff_base: Duration,
}

impl ToolExecutor {
    /// Creates an executor.
    ///
    /// `max_retries` bounds re-attempts after the first call, so a call
    /// makes at most `max_retries + 1` backend attempts.
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        backend: Arc<dyn Backend>,
        max_retries: u32,
        backoff_base: Duration,
    ) -> Self {
        Self {
            registry,
            backend,
            max_retries,
            backoff_base,
        }
    }

    /// Executes a tool call.
    ///
    /// Retries only failures whose kind is retryable, with exponential
    /// backoff from `backoff_base`. A failure that survives the budget is
    /// still `Ok`: it comes back as an unsuccessful result with the
    /// attempt count.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Registry`] for an unknown tool or schema
    /// violation and [`AgentError::InvalidArgument`] when the call's role
    /// does not own the tool. These are caller bugs, not backend weather.
    pub async fn execute(&self, call: &ToolCall) -> Result<ToolResult> {
        let descriptor = self.registry.lookup(&call.tool)?;
        if descriptor.role != call.role {
            return Err(AgentError::InvalidArgument {
                message: format!(
                    "tool '{}' belongs to role {}, but the call came from {}",
                    call.tool, descriptor.role, call.role
                ),
            });
        }
        self.registry.validate_arguments(&call.tool, &call.arguments)?;

        let max_attempts = self.max_retries + 1;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self.backend.invoke(&call.tool, &call.arguments).await {
                Ok(payload) => {
                    debug!(tool = %call.tool, subtask = %call.subtask, attempts, "tool call succeeded");
                    return Ok(ToolResult {
                        success: true,
                        payload: Some(payload),
                        error: None,
                        attempts,
                    });
                }
                Err(err) if err.kind.is_retryable() && attempts < max_attempts => {
                    let delay = self.backoff_base * 2u32.saturating_pow(attempts - 1);
                    warn!(
                        tool = %call.tool,
                        subtask = %call.subtask,
                        kind = %err.kind,
                        attempts,
                        ?delay,
                        "retrying backend call"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(
                        tool = %call.tool,
                        subtask = %call.subtask,
                        kind = %err.kind,
                        attempts,
                        "tool call failed"
                    );
                    return Ok(ToolResult {
                        success: false,
                        payload: None,
                        error: Some(err.to_string()),
                        attempts,
                    });
                }
            }
        }
    }
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("backend", &self.backend.name())
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}
