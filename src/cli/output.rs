//! Output formatting for CLI commands.

use std::fmt::Write as FmtWrite;

use crate::answer::{Answer, StepOutcome};
use crate::registry::ToolDescriptor;

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl OutputFormat {
    /// Parses a format string, defaulting to text for anything unknown.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Renders a finished answer.
///
/// Text output always carries the unmet goals when the answer is
/// partial; the trace is opt-in via `with_trace`.
#[must_use]
pub fn format_answer(answer: &Answer, format: OutputFormat, with_trace: bool) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(answer).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Text => {
            let mut out = String::new();
            out.push_str(&answer.text);
            if !out.ends_with('\n') {
                out.push('\n');
            }

            if answer.partial {
                out.push_str("\nUnanswered sub-goals:\n");
                for goal in &answer.unmet_goals {
                    let _ = writeln!(out, "  - {goal}");
                }
            }

            if with_trace {
                out.push_str("\nTrace:\n");
                for step in &answer.trace {
                    let call = step.tool.as_deref().map_or_else(
                        || "(no tool call)".to_string(),
                        |tool| {
                            let args = step
                                .arguments
                                .as_ref()
                                .and_then(|a| serde_json::to_string(a).ok())
                                .unwrap_or_else(|| "{}".to_string());
                            format!("{tool} {args}")
                        },
                    );
                    let outcome = match &step.outcome {
                        StepOutcome::Done { .. } => "done".to_string(),
                        StepOutcome::Failed { reason } => format!("failed: {reason}"),
                    };
                    let _ = writeln!(
                        out,
                        "  {} [{}] {} -> {} ({} attempt{})",
                        step.subtask,
                        step.role,
                        call,
                        outcome,
                        step.attempts,
                        if step.attempts == 1 { "" } else { "s" }
                    );
                }
            }

            let _ = writeln!(out, "\nElapsed: {:.2}s", answer.elapsed.as_secs_f64());
            out
        }
    }
}

/// Renders the tool catalog.
#[must_use]
pub fn format_tools(tools: &[&ToolDescriptor], format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(tools).unwrap_or_else(|_| "[]".to_string())
        }
        OutputFormat::Text => {
            let mut out = String::new();
            let _ = writeln!(out, "{} tool(s):\n", tools.len());
            for tool in tools {
                let _ = writeln!(out, "{}  [{}]", tool.signature(), tool.role);
                let _ = writeln!(out, "    {}", tool.description);
                for param in &tool.parameters {
                    let req = if param.required { "required" } else { "optional" };
                    let _ = writeln!(
                        out,
                        "    - {} ({}, {req}): {}",
                        param.name, param.ty, param.description
                    );
                }
                let _ = writeln!(out, "    Returns: {}\n", tool.output);
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use test_case::test_case;
    use uuid::Uuid;

    use crate::agent::AgentRole;
    use crate::catalog::default_registry;
    use crate::answer::TraceStep;
    use crate::plan::SubTaskId;

    #[test_case("text", OutputFormat::Text; "text")]
    #[test_case("json", OutputFormat::Json; "json")]
    #[test_case("JSON", OutputFormat::Json; "case insensitive")]
    #[test_case("yaml", OutputFormat::Text; "unknown falls back to text")]
    fn test_parse_format(input: &str, expected: OutputFormat) {
        assert_eq!(OutputFormat::parse(input), expected);
    }

    fn sample_answer() -> Answer {
        Answer {
            request_id: Uuid::new_v4(),
            text: "The sales dataset has 120 rows.".to_string(),
            partial: true,
            unmet_goals: vec!["row count of events".to_string()],
            trace: vec![TraceStep {
                subtask: SubTaskId(0),
                goal: "count rows".to_string(),
                role: AgentRole::QueryBuilder,
                tool: Some("dataset_row_count".to_string()),
                arguments: Some(json!({"dataset": "sales"})),
                attempts: 2,
                outcome: StepOutcome::Done {
                    payload: json!({"rows": 120}),
                },
            }],
            elapsed: Duration::from_millis(420),
        }
    }

    #[test]
    fn test_text_answer_lists_unmet_goals() {
        let out = format_answer(&sample_answer(), OutputFormat::Text, false);
        assert!(out.contains("The sales dataset has 120 rows."));
        assert!(out.contains("Unanswered sub-goals:"));
        assert!(out.contains("row count of events"));
        assert!(!out.contains("Trace:"));
    }

    #[test]
    fn test_text_answer_with_trace() {
        let out = format_answer(&sample_answer(), OutputFormat::Text, true);
        assert!(out.contains("Trace:"));
        assert!(out.contains("t0 [query_builder] dataset_row_count"));
        assert!(out.contains("(2 attempts)"));
    }

    #[test]
    fn test_json_answer_is_valid_json() {
        let out = format_answer(&sample_answer(), OutputFormat::Json, false);
        let value: serde_json::Value =
            serde_json::from_str(&out).unwrap_or_else(|_| unreachable!());
        assert_eq!(value["partial"], true);
        assert_eq!(value["trace"][0]["tool"], "dataset_row_count");
    }

    #[test]
    fn test_format_tools_text() {
        let registry = default_registry().unwrap_or_else(|_| unreachable!());
        let tools = registry.list_by_role(AgentRole::SchemaExplorer);
        let out = format_tools(&tools, OutputFormat::Text);
        assert!(out.contains("find_columns"));
        assert!(out.contains("[schema_explorer]"));
        assert!(out.contains("Returns:"));
    }
}
