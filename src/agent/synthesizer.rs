//! Answer synthesis.
//!
//! Turns the settled trace into one natural-language answer. Failed
//! sub-tasks are part of the input so the narrative names what could not
//! be answered instead of dropping it.

use std::fmt::Write;

use super::message::{ChatRequest, system_message, user_message};
use super::prompt::{PromptSet, build_synthesize_prompt};
use super::provider::LlmProvider;
use crate::answer::{StepOutcome, TraceStep};
use crate::error::AgentError;

/// The answer synthesizer.
#[derive(Debug, Clone)]
pub struct SynthesizerAgent {
    model: String,
    system_prompt: String,
}

impl SynthesizerAgent {
    /// Creates a synthesizer with the given model.
    #[must_use]
    pub fn new(model: impl Into<String>, prompts: &PromptSet) -> Self {
        Self {
            model: model.into(),
            system_prompt: prompts.synthesizer.clone(),
        }
    }

    /// Synthesizes the final answer text from the settled trace.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] on provider failures; callers fall back to
    /// [`render_results`] so an answer is still produced.
    pub async fn synthesize(
        &self,
        provider: &dyn LlmProvider,
        query: &str,
        trace: &[TraceStep],
    ) -> Result<String, AgentError> {
        let results = serde_json::to_string_pretty(trace)
            .map_err(|e| AgentError::Orchestration {
                message: format!("trace serialization failed: {e}"),
            })?;
        let prompt = build_synthesize_prompt(query, &results);

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![system_message(&self.system_prompt), user_message(&prompt)],
            temperature: Some(0.0),
            max_tokens: Some(2048),
            json_mode: false,
        };

        let response = provider.chat(&request).await?;
        Ok(response.content.trim().to_string())
    }
}

/// Deterministic plain-text rendering of the trace.
///
/// Used as the answer when the synthesis call itself fails, so the caller
/// still sees every result and every unmet goal.
#[must_use]
pub fn render_results(trace: &[TraceStep]) -> String {
    let mut text = String::new();
    for step in trace {
        match &step.outcome {
            StepOutcome::Done { payload } => {
                let _ = writeln!(
                    text,
                    "{}: {}",
                    step.goal,
                    serde_json::to_string(payload).unwrap_or_else(|_| "null".to_string())
                );
            }
            StepOutcome::Failed { reason } => {
                let _ = writeln!(text, "{}: could not be answered ({reason})", step.goal);
            }
        }
    }
    text.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentRole;
    use crate::plan::SubTaskId;
    use serde_json::json;

    fn trace() -> Vec<TraceStep> {
        vec![
            TraceStep {
                subtask: SubTaskId(0),
                goal: "count rows of sales".to_string(),
                role: AgentRole::QueryBuilder,
                tool: Some("dataset_row_count".to_string()),
                arguments: Some(json!({"dataset": "sales"})),
                attempts: 1,
                outcome: StepOutcome::Done {
                    payload: json!({"dataset": "sales", "rows": 420}),
                },
            },
            TraceStep {
                subtask: SubTaskId(1),
                goal: "label columns".to_string(),
                role: AgentRole::Analytics,
                tool: None,
                arguments: None,
                attempts: 0,
                outcome: StepOutcome::Failed {
                    reason: "no usable tool".to_string(),
                },
            },
        ]
    }

    #[test]
    fn test_render_results_names_failures() {
        let text = render_results(&trace());
        assert!(text.contains("420"));
        assert!(text.contains("label columns: could not be answered"));
    }

    #[test]
    fn test_render_results_empty_trace() {
        assert_eq!(render_results(&[]), "");
    }
}
