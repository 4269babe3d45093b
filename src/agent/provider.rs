//! Pluggable LLM provider trait.
//!
//! Implementations translate the provider-agnostic [`ChatRequest`] and
//! [`ChatResponse`] into provider-specific SDK calls, keeping agent logic
//! decoupled from any particular vendor. The reasoning call is a
//! suspending operation with nondeterministic but bounded-latency output.

use async_trait::async_trait;

use super::message::{ChatRequest, ChatResponse};
use crate::error::AgentError;

/// Trait for LLM provider backends.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g. `"openai"`).
    fn name(&self) -> &'static str;

    /// Executes a chat completion request.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ApiRequest`] on API failures or timeouts.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError>;
}
