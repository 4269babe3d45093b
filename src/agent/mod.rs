//! Agents: decomposition, role specialists, synthesis, and the LLM seam.
//!
//! Every agent talks to the model through the provider-agnostic
//! [`LlmProvider`] trait and parses its own JSON out of plain text
//! responses. The three specialist roles share one deliberation loop
//! ([`RoleAgent::decide`]) and differ only in prompt, model, and the
//! slice of the tool catalog they own.

pub mod client;
pub mod decompose;
pub mod message;
pub mod prompt;
pub mod provider;
pub mod providers;
pub mod roles;
pub mod synthesizer;
pub mod traits;

pub use client::create_provider;
pub use decompose::{DecomposedTask, DecomposerAgent};
pub use message::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage};
pub use prompt::PromptSet;
pub use provider::LlmProvider;
pub use roles::{AnalyticsAgent, QueryAgent, SchemaAgent, create_agent};
pub use synthesizer::SynthesizerAgent;
pub use traits::{AgentRole, Decision, RoleAgent, ToolCall};
