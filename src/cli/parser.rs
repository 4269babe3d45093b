//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// lakequery: multi-agent natural-language queries against a semantic data lake.
///
/// Decomposes a question into role-routed sub-tasks, selects backend
/// tools per sub-task, and synthesizes the results into one answer.
#[derive(Parser, Debug)]
#[command(name = "lakequery")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Answer a natural-language question over the data lake.
    #[command(after_help = r#"Examples:
  lakequery query "How many rows does the sales dataset have?"
  lakequery query "Which datasets have a price column?" --top-k 8
  lakequery query "Average order value by month" --deadline 120
  lakequery query "And for Q2?" -c "user: show 2024 revenue" -c "assistant: 2024 revenue was 1.2M"
  lakequery --format json query "row count of events" | jq '.trace[].tool'
"#)]
    Query {
        /// The question to answer.
        text: String,

        /// Prior conversation turn, as "speaker: text". Repeatable, oldest first.
        #[arg(short, long = "context")]
        context: Vec<String>,

        /// Model for every agent (overrides per-role environment settings).
        #[arg(short, long)]
        model: Option<String>,

        /// Base URL of the data-lake backend API.
        #[arg(long, env = "LAKEQUERY_BACKEND_URL")]
        backend_url: Option<String>,

        /// Directory containing prompt template files.
        #[arg(long, env = "LAKEQUERY_PROMPT_DIR")]
        prompt_dir: Option<PathBuf>,

        /// Maximum concurrently executing sub-tasks.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Tool shortlist size handed to each role agent.
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Re-decompositions allowed per sub-task.
        #[arg(long)]
        max_redecompose: Option<u32>,

        /// Wall-clock budget for the request, in seconds.
        #[arg(long)]
        deadline: Option<u64>,

        /// Include the per-sub-task trace in text output.
        #[arg(short, long)]
        trace: bool,
    },

    /// List the backend tool catalog.
    #[command(after_help = r#"Examples:
  lakequery tools                          # Full catalog
  lakequery tools --role schema_explorer   # One role's tools
  lakequery --format json tools | jq '.[].name'
"#)]
    Tools {
        /// Filter by role (schema_explorer, query_builder, analytics).
        #[arg(short, long)]
        role: Option<String>,
    },

    /// Write the default prompt templates to a directory for editing.
    ///
    /// Existing files are left untouched. Without `--dir` the templates
    /// go to the per-user config directory.
    #[command(name = "init-prompts")]
    InitPrompts {
        /// Target directory for the template files.
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}
