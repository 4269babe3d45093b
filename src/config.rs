//! Orchestrator configuration with builder pattern and environment variable support.
//!
//! Configuration is resolved in order: explicit values → environment variables → defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::agent::AgentRole;
use crate::error::AgentError;

/// Default maximum concurrently executing sub-tasks.
const DEFAULT_MAX_CONCURRENCY: usize = 4;
/// Default retrieval shortlist size.
const DEFAULT_RETRIEVE_TOP_K: usize = 5;
/// Default re-decompositions allowed per sub-task.
const DEFAULT_MAX_REDECOMPOSE: u32 = 2;
/// Default retry attempts for a retryable backend failure.
const DEFAULT_MAX_BACKEND_RETRIES: u32 = 3;
/// Default base delay for exponential backend backoff, in milliseconds.
const DEFAULT_BACKOFF_BASE_MS: u64 = 200;
/// Default per-call backend timeout in seconds.
const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 30;
/// Default wall-clock budget for one request in seconds.
const DEFAULT_DEADLINE_SECS: u64 = 300;
/// Default sampling temperature for the role agents.
const DEFAULT_TEMPERATURE: f32 = 0.0;
/// Default backend base URL.
const DEFAULT_BACKEND_URL: &str = "http://localhost:5000";
/// Default model for every agent.
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Configuration for the orchestrator and its agents.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// LLM provider name (e.g., "openai").
    pub provider: String,
    /// API key for the provider.
    pub api_key: String,
    /// Optional base URL override (for proxies or compatible APIs).
    pub base_url: Option<String>,
    /// Base URL of the data-lake backend API.
    pub backend_url: String,
    /// Model for the decomposer.
    pub decomposer_model: String,
    /// Model for the schema exploration agent.
    pub schema_model: String,
    /// Model for the query building agent.
    pub query_model: String,
    /// Model for the analytics agent.
    pub analytics_model: String,
    /// Model for the synthesizer.
    pub synthesizer_model: String,
    /// Sampling temperature for the role agents.
    pub temperature: f32,
    /// Maximum concurrently executing sub-tasks.
    pub max_concurrency: usize,
    /// Retrieval shortlist size handed to each role agent.
    pub retrieve_top_k: usize,
    /// Re-decompositions allowed per sub-task before it fails.
    pub max_redecompose: u32,
    /// Retry attempts for a retryable backend failure.
    pub max_backend_retries: u32,
    /// Base delay for exponential backend backoff.
    pub backoff_base: Duration,
    /// Per-call backend timeout.
    pub backend_timeout: Duration,
    /// Wall-clock budget for one request end to end.
    pub deadline: Duration,
    /// Directory containing prompt template files.
    ///
    /// When set, system prompts are loaded from markdown files in this
    /// directory, falling back to compiled-in defaults for missing files.
    pub prompt_dir: Option<PathBuf>,
}

impl OrchestratorConfig {
    /// Creates a new builder for `OrchestratorConfig`.
    #[must_use]
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ApiKeyMissing`] if no API key is found.
    pub fn from_env() -> Result<Self, AgentError> {
        Self::builder().from_env().build()
    }

    /// Returns the model configured for a role.
    #[must_use]
    pub fn model_for(&self, role: AgentRole) -> &str {
        match role {
            AgentRole::SchemaExplorer => &self.schema_model,
            AgentRole::QueryBuilder => &self.query_model,
            AgentRole::Analytics => &self.analytics_model,
        }
    }
}

/// Builder for [`OrchestratorConfig`].
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfigBuilder {
    provider: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    backend_url: Option<String>,
    decomposer_model: Option<String>,
    schema_model: Option<String>,
    query_model: Option<String>,
    analytics_model: Option<String>,
    synthesizer_model: Option<String>,
    temperature: Option<f32>,
    max_concurrency: Option<usize>,
    retrieve_top_k: Option<usize>,
    max_redecompose: Option<u32>,
    max_backend_retries: Option<u32>,
    backoff_base: Option<Duration>,
    backend_timeout: Option<Duration>,
    deadline: Option<Duration>,
    prompt_dir: Option<PathBuf>,
}

impl OrchestratorConfigBuilder {
    /// Populates unset fields from environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if self.provider.is_none() {
            self.provider = std::env::var("LAKEQUERY_PROVIDER").ok();
        }
        if self.api_key.is_none() {
            self.api_key = std::env::var("OPENAI_API_KEY")
                .or_else(|_| std::env::var("LAKEQUERY_API_KEY"))
                .ok();
        }
        if self.base_url.is_none() {
            self.base_url = std::env::var("OPENAI_BASE_URL")
                .or_else(|_| std::env::var("LAKEQUERY_BASE_URL"))
                .ok();
        }
        if self.backend_url.is_none() {
            self.backend_url = std::env::var("LAKEQUERY_BACKEND_URL").ok();
        }
        if self.decomposer_model.is_none() {
            self.decomposer_model = std::env::var("LAKEQUERY_DECOMPOSER_MODEL").ok();
        }
        if self.schema_model.is_none() {
            self.schema_model = std::env::var("LAKEQUERY_SCHEMA_MODEL").ok();
        }
        if self.query_model.is_none() {
            self.query_model = std::env::var("LAKEQUERY_QUERY_MODEL").ok();
        }
        if self.analytics_model.is_none() {
            self.analytics_model = std::env::var("LAKEQUERY_ANALYTICS_MODEL").ok();
        }
        if self.synthesizer_model.is_none() {
            self.synthesizer_model = std::env::var("LAKEQUERY_SYNTHESIZER_MODEL").ok();
        }
        if self.temperature.is_none() {
            self.temperature = std::env::var("LAKEQUERY_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        if self.max_concurrency.is_none() {
            self.max_concurrency = std::env::var("LAKEQUERY_MAX_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        if self.retrieve_top_k.is_none() {
            self.retrieve_top_k = std::env::var("LAKEQUERY_RETRIEVE_TOP_K")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        if self.deadline.is_none() {
            self.deadline = std::env::var("LAKEQUERY_DEADLINE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs);
        }
        if self.prompt_dir.is_none() {
            self.prompt_dir = std::env::var("LAKEQUERY_PROMPT_DIR").ok().map(PathBuf::from);
        }
        self
    }

    /// Sets the LLM provider name.
    #[must_use]
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the base URL override.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the data-lake backend base URL.
    #[must_use]
    pub fn backend_url(mut self, url: impl Into<String>) -> Self {
        self.backend_url = Some(url.into());
        self
    }

    /// Sets the decomposer model.
    #[must_use]
    pub fn decomposer_model(mut self, model: impl Into<String>) -> Self {
        self.decomposer_model = Some(model.into());
        self
    }

    /// Sets the schema exploration agent model.
    #[must_use]
    pub fn schema_model(mut self, model: impl Into<String>) -> Self {
        self.schema_model = Some(model.into());
        self
    }

    /// Sets the query building agent model.
    #[must_use]
    pub fn query_model(mut self, model: impl Into<String>) -> Self {
        self.query_model = Some(model.into());
        self
    }

    /// Sets the analytics agent model.
    #[must_use]
    pub fn analytics_model(mut self, model: impl Into<String>) -> Self {
        self.analytics_model = Some(model.into());
        self
    }

    /// Sets the synthesizer model.
    #[must_use]
    pub fn synthesizer_model(mut self, model: impl Into<String>) -> Self {
        self.synthesizer_model = Some(model.into());
        self
    }

    /// Sets the sampling temperature for the role agents.
    #[must_use]
    pub const fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    /// Sets the maximum concurrently executing sub-tasks.
    #[must_use]
    pub const fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = Some(n);
        self
    }

    /// Sets the retrieval shortlist size.
    #[must_use]
    pub const fn retrieve_top_k(mut self, n: usize) -> Self {
        self.retrieve_top_k = Some(n);
        self
    }

    /// Sets the re-decompositions allowed per sub-task.
    #[must_use]
    pub const fn max_redecompose(mut self, n: u32) -> Self {
        self.max_redecompose = Some(n);
        self
    }

    /// Sets the retry attempts for retryable backend failures.
    #[must_use]
    pub const fn max_backend_retries(mut self, n: u32) -> Self {
        self.max_backend_retries = Some(n);
        self
    }

    /// Sets the base delay for backend backoff.
    #[must_use]
    pub const fn backoff_base(mut self, delay: Duration) -> Self {
        self.backoff_base = Some(delay);
        self
    }

    /// Sets the per-call backend timeout.
    #[must_use]
    pub const fn backend_timeout(mut self, duration: Duration) -> Self {
        self.backend_timeout = Some(duration);
        self
    }

    /// Sets the wall-clock budget for one request.
    #[must_use]
    pub const fn deadline(mut self, duration: Duration) -> Self {
        self.deadline = Some(duration);
        self
    }

    /// Sets the prompt template directory.
    #[must_use]
    pub fn prompt_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prompt_dir = Some(dir.into());
        self
    }

    /// Builds the [`OrchestratorConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ApiKeyMissing`] if no API key was set.
    pub fn build(self) -> Result<OrchestratorConfig, AgentError> {
        let api_key = self.api_key.ok_or(AgentError::ApiKeyMissing)?;
        let default_model = || DEFAULT_MODEL.to_string();

        Ok(OrchestratorConfig {
            provider: self.provider.unwrap_or_else(|| "openai".to_string()),
            api_key,
            base_url: self.base_url,
            backend_url: self
                .backend_url
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            decomposer_model: self.decomposer_model.unwrap_or_else(default_model),
            schema_model: self.schema_model.unwrap_or_else(default_model),
            query_model: self.query_model.unwrap_or_else(default_model),
            analytics_model: self.analytics_model.unwrap_or_else(default_model),
            synthesizer_model: self.synthesizer_model.unwrap_or_else(default_model),
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_concurrency: self.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY),
            retrieve_top_k: self.retrieve_top_k.unwrap_or(DEFAULT_RETRIEVE_TOP_K),
            max_redecompose: self.max_redecompose.unwrap_or(DEFAULT_MAX_REDECOMPOSE),
            max_backend_retries: self
                .max_backend_retries
                .unwrap_or(DEFAULT_MAX_BACKEND_RETRIES),
            backoff_base: self
                .backoff_base
                .unwrap_or(Duration::from_millis(DEFAULT_BACKOFF_BASE_MS)),
            backend_timeout: self
                .backend_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_BACKEND_TIMEOUT_SECS)),
            deadline: self
                .deadline
                .unwrap_or(Duration::from_secs(DEFAULT_DEADLINE_SECS)),
            prompt_dir: self.prompt_dir,
        })
    }
}
