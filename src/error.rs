//! Error types for the orchestration core.
//!
//! Programming-contract violations (unknown tool, duplicate registration,
//! schema mismatch, invalid call arguments) are surfaced immediately and
//! never retried. Backend failures carry a [`BackendErrorKind`] so the
//! executor can decide what is worth retrying.

use thiserror::Error;

/// A single offending field found during argument validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// Parameter name that failed validation.
    pub field: String,
    /// What was wrong with it.
    pub problem: String,
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.problem)
    }
}

/// Errors raised by the tool registry. All are caller bugs.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A tool with this name is already registered.
    #[error("tool '{name}' is already registered")]
    DuplicateTool {
        /// Name of the conflicting tool.
        name: String,
    },

    /// No tool with this name exists.
    #[error("unknown tool '{name}'")]
    UnknownTool {
        /// The name that was looked up.
        name: String,
    },

    /// Arguments did not satisfy the tool's parameter schema.
    ///
    /// Carries every offending field, not just the first, so an agent
    /// can correct all of them in one retry.
    #[error("arguments for '{tool}' violate its schema: {}", format_violations(violations))]
    SchemaViolation {
        /// Tool whose schema was violated.
        tool: String,
        /// Complete list of offending fields.
        violations: Vec<SchemaViolation>,
    },
}

fn format_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Classification of a backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendErrorKind {
    /// Connection-level failure that may succeed on retry.
    TransientNetwork,
    /// The request did not complete within the deadline.
    Timeout,
    /// The backend understood the request and refused it. Not retried.
    RemoteRejected,
}

impl BackendErrorKind {
    /// Whether the executor should retry a failure of this kind.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::TransientNetwork | Self::Timeout)
    }

    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TransientNetwork => "transient_network",
            Self::Timeout => "timeout",
            Self::RemoteRejected => "remote_rejected",
        }
    }
}

impl std::fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure from the backend data-lake API.
#[derive(Debug, Clone, Error)]
#[error("backend call '{tool}' failed ({kind}): {message}")]
pub struct BackendError {
    /// Tool whose backend operation failed.
    pub tool: String,
    /// Failure classification.
    pub kind: BackendErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl BackendError {
    /// Creates a new classified backend error.
    #[must_use]
    pub fn new(tool: impl Into<String>, kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Crate-level error for the orchestration core.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Registry contract violation (caller bug).
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Classified backend failure that exhausted its retry budget.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// An argument to a core operation was out of contract (e.g. `top_k == 0`).
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was invalid.
        message: String,
    },

    /// The LLM produced output that could not be parsed into a decision.
    #[error("malformed decision: {message}")]
    MalformedDecision {
        /// Parse diagnostic.
        message: String,
        /// The raw model output, kept for the retry feedback prompt.
        content: String,
    },

    /// The request was cancelled (global timeout or explicit cancellation).
    #[error("request cancelled")]
    Cancelled,

    /// Decomposition produced no sub-tasks at all.
    #[error("decomposition produced no sub-tasks for the query")]
    EmptyPlan,

    /// LLM provider API failure.
    #[error("provider request failed: {message}")]
    ApiRequest {
        /// Provider diagnostic.
        message: String,
    },

    /// No API key was configured for the provider.
    #[error("no API key configured (set OPENAI_API_KEY or LAKEQUERY_API_KEY)")]
    ApiKeyMissing,

    /// The configured provider name is not supported.
    #[error("unsupported provider '{name}'")]
    UnsupportedProvider {
        /// The unrecognized provider name.
        name: String,
    },

    /// Orchestration-level failure not covered by a more specific variant.
    #[error("orchestration error: {message}")]
    Orchestration {
        /// What went wrong.
        message: String,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AgentError>;
