//! System prompts and template builders for agents.
//!
//! Prompts define each agent's role and its strict JSON output contract.
//! Template builders format the user messages with goals, tool shortlists,
//! and retry feedback.

use std::fmt::Write;
use std::path::Path;

use crate::plan::ContextTurn;
use crate::registry::ToolDescriptor;

/// System prompt for the query decomposer.
pub const DECOMPOSER_SYSTEM_PROMPT: &str = r#"You are a query planning expert for a semantic data lake. You break a user's natural-language question into the smallest set of concrete sub-tasks, each handled by one specialist:

- "schema_explorer": finds datasets, columns, schemas, and metadata.
- "query_builder": builds and executes structured queries, counts rows.
- "analytics": computes statistics, assigns semantic labels, creates mappings.

## Instructions

1. Read the query and any prior conversation turns.
2. Produce one sub-task per distinct goal. A simple question is ONE sub-task — do not pad the plan.
3. A sub-task that needs another's result lists that sub-task's index in "depends_on". Dependencies may only point at earlier entries.
4. Phrase each goal as a self-contained instruction the specialist can act on without seeing the original query.

## Output Format (JSON)

Return ONLY a JSON array, no surrounding text:
```json
[
  {"goal": "find all datasets with a price column", "role": "schema_explorer", "depends_on": []},
  {"goal": "count the rows of each dataset found", "role": "query_builder", "depends_on": [0]}
]
```"#;

/// System prompt for the schema exploration agent.
pub const SCHEMA_SYSTEM_PROMPT: &str = r#"You are a data-lake schema specialist. You answer one goal about datasets, columns, or metadata by choosing exactly one of the tools offered to you and binding its arguments, or by deferring when none of the offered tools can satisfy the goal.

## Output Format (JSON)

Return ONLY one JSON object, no surrounding text. Either a tool call:
```json
{"action": "tool_call", "tool": "<name from the offered list>", "arguments": {"<param>": <value>}}
```
or a deferral:
```json
{"action": "defer", "reason": "<why none of the offered tools fits>"}
```

## Rules

- Choose only from the offered tools; never invent a tool name.
- Bind every required parameter with the type its signature states.
- Do not add parameters the signature does not list.
- Defer rather than force an ill-fitting tool onto the goal."#;

/// System prompt for the query building agent.
pub const QUERY_SYSTEM_PROMPT: &str = r#"You are a data-lake query specialist. You satisfy one goal by executing a structured query or count through exactly one of the tools offered to you, or by deferring when none of the offered tools can satisfy the goal.

## Output Format (JSON)

Return ONLY one JSON object, no surrounding text. Either a tool call:
```json
{"action": "tool_call", "tool": "<name from the offered list>", "arguments": {"<param>": <value>}}
```
or a deferral:
```json
{"action": "defer", "reason": "<why none of the offered tools fits>"}
```

## Rules

- Choose only from the offered tools; never invent a tool name.
- Bind every required parameter with the type its signature states.
- Use results from completed prerequisite sub-tasks when the goal refers to them.
- Defer rather than force an ill-fitting tool onto the goal."#;

/// System prompt for the analytics agent.
pub const ANALYTICS_SYSTEM_PROMPT: &str = r#"You are a data-lake analytics specialist. You satisfy one goal about statistics, semantic labeling, or mappings by choosing exactly one of the tools offered to you, or by deferring when none of the offered tools can satisfy the goal.

## Output Format (JSON)

Return ONLY one JSON object, no surrounding text. Either a tool call:
```json
{"action": "tool_call", "tool": "<name from the offered list>", "arguments": {"<param>": <value>}}
```
or a deferral:
```json
{"action": "defer", "reason": "<why none of the offered tools fits>"}
```

## Rules

- Choose only from the offered tools; never invent a tool name.
- Bind every required parameter with the type its signature states.
- Defer rather than force an ill-fitting tool onto the goal."#;

/// System prompt for the answer synthesizer.
pub const SYNTHESIZER_SYSTEM_PROMPT: &str = r"You are a synthesis expert for a data-lake assistant. You turn the results of executed sub-tasks into one clear natural-language answer to the user's original question.

## Instructions

1. Review every sub-task result in order.
2. Answer the original question directly, citing the concrete values, dataset names, columns, and counts the results contain.
3. If any sub-task failed, say plainly which part of the question could not be answered and why. Never pretend a failed part succeeded and never silently drop it.
4. Do not invent data that is not present in the results.

## Output Format

Plain prose. No JSON, no markdown headers, no tool syntax.";

/// Default prompt directory under user config.
const DEFAULT_PROMPT_DIR: &str = ".config/lakequery/prompts";

/// Filename for the decomposer prompt template.
const DECOMPOSER_FILENAME: &str = "decomposer.md";
/// Filename for the schema agent prompt template.
const SCHEMA_FILENAME: &str = "schema_explorer.md";
/// Filename for the query agent prompt template.
const QUERY_FILENAME: &str = "query_builder.md";
/// Filename for the analytics agent prompt template.
const ANALYTICS_FILENAME: &str = "analytics.md";
/// Filename for the synthesizer prompt template.
const SYNTHESIZER_FILENAME: &str = "synthesizer.md";

/// A set of system prompts for all agents.
///
/// Loaded from external template files when available, falling back to
/// compiled-in defaults. Use [`PromptSet::load`] to resolve the prompt
/// directory from CLI flags, environment variables, or the default path.
#[derive(Debug, Clone)]
pub struct PromptSet {
    /// System prompt for the decomposer.
    pub decomposer: String,
    /// System prompt for the schema exploration agent.
    pub schema_explorer: String,
    /// System prompt for the query building agent.
    pub query_builder: String,
    /// System prompt for the analytics agent.
    pub analytics: String,
    /// System prompt for the synthesizer.
    pub synthesizer: String,
}

impl PromptSet {
    /// Loads prompts from the given directory, falling back to compiled-in defaults.
    ///
    /// Resolution order for `prompt_dir`:
    /// 1. Explicit `prompt_dir` argument (from `--prompt-dir` CLI flag)
    /// 2. `LAKEQUERY_PROMPT_DIR` environment variable
    /// 3. `~/.config/lakequery/prompts/`
    ///
    /// Each file is loaded independently — a missing file uses its default.
    #[must_use]
    pub fn load(prompt_dir: Option<&Path>) -> Self {
        let resolved_dir = prompt_dir
            .map(std::path::PathBuf::from)
            .or_else(|| {
                std::env::var("LAKEQUERY_PROMPT_DIR")
                    .ok()
                    .map(std::path::PathBuf::from)
            })
            .or_else(|| dirs::home_dir().map(|h| h.join(DEFAULT_PROMPT_DIR)));

        let load_file = |filename: &str, default: &str| -> String {
            resolved_dir
                .as_ref()
                .map(|dir| dir.join(filename))
                .and_then(|path| std::fs::read_to_string(&path).ok())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            decomposer: load_file(DECOMPOSER_FILENAME, DECOMPOSER_SYSTEM_PROMPT),
            schema_explorer: load_file(SCHEMA_FILENAME, SCHEMA_SYSTEM_PROMPT),
            query_builder: load_file(QUERY_FILENAME, QUERY_SYSTEM_PROMPT),
            analytics: load_file(ANALYTICS_FILENAME, ANALYTICS_SYSTEM_PROMPT),
            synthesizer: load_file(SYNTHESIZER_FILENAME, SYNTHESIZER_SYSTEM_PROMPT),
        }
    }

    /// Returns compiled-in defaults without checking the filesystem.
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            decomposer: DECOMPOSER_SYSTEM_PROMPT.to_string(),
            schema_explorer: SCHEMA_SYSTEM_PROMPT.to_string(),
            query_builder: QUERY_SYSTEM_PROMPT.to_string(),
            analytics: ANALYTICS_SYSTEM_PROMPT.to_string(),
            synthesizer: SYNTHESIZER_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Writes the compiled-in default prompts to the given directory.
    ///
    /// Creates the directory if it does not exist. Existing files are
    /// **not** overwritten — use this for initial scaffolding only.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if directory creation or file writing fails.
    pub fn write_defaults(dir: &Path) -> std::io::Result<Vec<std::path::PathBuf>> {
        std::fs::create_dir_all(dir)?;

        let templates = [
            (DECOMPOSER_FILENAME, DECOMPOSER_SYSTEM_PROMPT),
            (SCHEMA_FILENAME, SCHEMA_SYSTEM_PROMPT),
            (QUERY_FILENAME, QUERY_SYSTEM_PROMPT),
            (ANALYTICS_FILENAME, ANALYTICS_SYSTEM_PROMPT),
            (SYNTHESIZER_FILENAME, SYNTHESIZER_SYSTEM_PROMPT),
        ];

        let mut written = Vec::new();
        for (filename, content) in &templates {
            let path = dir.join(filename);
            if !path.exists() {
                std::fs::write(&path, content)?;
                written.push(path);
            }
        }

        Ok(written)
    }

    /// Returns the default prompt directory under the user's home.
    ///
    /// Returns `None` if the home directory cannot be determined.
    #[must_use]
    pub fn default_dir() -> Option<std::path::PathBuf> {
        dirs::home_dir().map(|h| h.join(DEFAULT_PROMPT_DIR))
    }
}

/// Builds the user message for the decomposer.
#[must_use]
pub fn build_decompose_prompt(query: &str, context: &[ContextTurn]) -> String {
    let mut prompt = String::new();
    if !context.is_empty() {
        prompt.push_str("<conversation>\n");
        for turn in context {
            let _ = writeln!(prompt, "{}: {}", turn.speaker, turn.text);
        }
        prompt.push_str("</conversation>\n\n");
    }
    let _ = write!(prompt, "<query>{query}</query>\n\nDecompose this query.");
    prompt
}

/// Builds the user message asking the decomposer to refine one sub-task
/// whose agent deferred.
#[must_use]
pub fn build_refine_prompt(goal: &str, defer_reason: &str) -> String {
    format!(
        "The sub-task below could not be completed. The specialist reported:\n\
         {defer_reason}\n\n\
         <subtask>{goal}</subtask>\n\n\
         Re-plan this sub-task as one or more finer-grained sub-tasks that \
         the specialists can act on. Return the same JSON array format."
    )
}

/// Builds the user message for a role agent's decision.
///
/// Lists each offered tool with its signature, description, and output so
/// the model can bind arguments without seeing the whole catalog.
#[must_use]
pub fn build_decide_prompt(
    goal: &str,
    shortlist: &[ToolDescriptor],
    feedback: Option<&str>,
) -> String {
    let mut prompt = format!("<goal>{goal}</goal>\n\n<tools>\n");
    for tool in shortlist {
        let _ = write!(prompt, "- {}\n  {}\n", tool.signature(), tool.description);
        for param in &tool.parameters {
            let _ = writeln!(prompt, "    {}: {}", param.name, param.description);
        }
        let _ = writeln!(prompt, "  Returns: {}", tool.output);
    }
    prompt.push_str("</tools>\n\nDecide.");

    if let Some(feedback) = feedback {
        let _ = write!(prompt, "\n\n{feedback}");
    }
    prompt
}

/// Builds the corrective feedback appended to a retried decision prompt.
#[must_use]
pub fn build_retry_feedback(last_output: &str, problem: &str) -> String {
    format!(
        "Your last output:\n{last_output}\n\n\
         resulted in this error:\n{problem}\n\n\
         Correct every listed problem and answer again in the required JSON format."
    )
}

/// Builds the user message for the synthesizer.
///
/// `results` is the JSON rendering of every sub-task outcome, failures
/// included, in sub-task id order.
#[must_use]
pub fn build_synthesize_prompt(query: &str, results: &str) -> String {
    format!(
        "<query>{query}</query>\n\n\
         <results>\n{results}\n</results>\n\n\
         Answer the query from these results."
    )
}
