//! CLI command implementations.
//!
//! Contains the business logic for each CLI command.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::agent::{AgentRole, PromptSet};
use crate::catalog::default_registry;
use crate::cli::output::{OutputFormat, format_answer, format_tools};
use crate::cli::parser::{Cli, Commands};
use crate::config::OrchestratorConfig;
use crate::orchestrator::Orchestrator;
use crate::plan::{ContextTurn, QueryRequest};

/// Parameters for the query command.
#[derive(Debug, Clone, Default)]
pub struct QueryParams<'a> {
    /// The question to answer.
    pub text: &'a str,
    /// Prior conversation turns as "speaker: text" strings, oldest first.
    pub context: &'a [String],
    /// Model override for every agent.
    pub model: Option<&'a str>,
    /// Backend base URL override.
    pub backend_url: Option<&'a str>,
    /// Prompt template directory override.
    pub prompt_dir: Option<&'a Path>,
    /// Maximum concurrently executing sub-tasks.
    pub concurrency: Option<usize>,
    /// Tool shortlist size per role agent.
    pub top_k: Option<usize>,
    /// Re-decompositions allowed per sub-task.
    pub max_redecompose: Option<u32>,
    /// Wall-clock budget in seconds.
    pub deadline: Option<u64>,
    /// Include the trace in text output.
    pub trace: bool,
}

/// Executes the CLI command.
///
/// # Errors
///
/// Returns an error when configuration is incomplete (e.g. missing API
/// key) or the request fails before producing an answer.
pub async fn execute(cli: &Cli) -> Result<String> {
    let format = OutputFormat::parse(&cli.format);

    match &cli.command {
        Commands::Query {
            text,
            context,
            model,
            backend_url,
            prompt_dir,
            concurrency,
            top_k,
            max_redecompose,
            deadline,
            trace,
        } => {
            let params = QueryParams {
                text,
                context,
                model: model.as_deref(),
                backend_url: backend_url.as_deref(),
                prompt_dir: prompt_dir.as_deref(),
                concurrency: *concurrency,
                top_k: *top_k,
                max_redecompose: *max_redecompose,
                deadline: *deadline,
                trace: *trace || cli.verbose,
            };
            cmd_query(&params, format).await
        }
        Commands::Tools { role } => cmd_tools(role.as_deref(), format),
        Commands::InitPrompts { dir } => cmd_init_prompts(dir.as_deref()),
    }
}

async fn cmd_query(params: &QueryParams<'_>, format: OutputFormat) -> Result<String> {
    let mut builder = OrchestratorConfig::builder();
    if let Some(model) = params.model {
        builder = builder
            .decomposer_model(model)
            .schema_model(model)
            .query_model(model)
            .analytics_model(model)
            .synthesizer_model(model);
    }
    if let Some(url) = params.backend_url {
        builder = builder.backend_url(url);
    }
    if let Some(dir) = params.prompt_dir {
        builder = builder.prompt_dir(dir);
    }
    if let Some(n) = params.concurrency {
        builder = builder.max_concurrency(n);
    }
    if let Some(k) = params.top_k {
        builder = builder.retrieve_top_k(k);
    }
    if let Some(n) = params.max_redecompose {
        builder = builder.max_redecompose(n);
    }
    if let Some(secs) = params.deadline {
        builder = builder.deadline(Duration::from_secs(secs));
    }
    let config = builder
        .from_env()
        .build()
        .context("configuration is incomplete")?;

    let turns = parse_context_turns(params.context)?;
    let orchestrator =
        Orchestrator::from_config(config).context("failed to build the orchestrator")?;
    let answer = orchestrator
        .handle_query(QueryRequest::new(params.text, turns))
        .await
        .context("query failed")?;

    Ok(format_answer(&answer, format, params.trace))
}

fn cmd_tools(role: Option<&str>, format: OutputFormat) -> Result<String> {
    let registry = default_registry().context("tool catalog failed validation")?;
    let tools = match role {
        Some(name) => {
            let Some(role) = AgentRole::parse(name) else {
                bail!(
                    "unknown role '{name}' (expected one of: schema_explorer, query_builder, analytics)"
                );
            };
            registry.list_by_role(role)
        }
        None => registry.all().iter().collect(),
    };
    Ok(format_tools(&tools, format))
}

fn cmd_init_prompts(dir: Option<&Path>) -> Result<String> {
    let dir: PathBuf = match dir {
        Some(dir) => dir.to_path_buf(),
        None => PromptSet::default_dir()
            .context("no user config directory available; pass --dir")?,
    };

    let written = PromptSet::write_defaults(&dir)
        .with_context(|| format!("failed to write templates to {}", dir.display()))?;

    if written.is_empty() {
        return Ok(format!(
            "All prompt templates already exist in {}\n",
            dir.display()
        ));
    }

    let mut out = format!("Wrote {} prompt template(s):\n", written.len());
    for path in written {
        out.push_str("  ");
        out.push_str(&path.display().to_string());
        out.push('\n');
    }
    Ok(out)
}

/// Parses "speaker: text" turn strings. A turn without a colon is
/// attributed to the user.
fn parse_context_turns(raw: &[String]) -> Result<Vec<ContextTurn>> {
    raw.iter()
        .map(|turn| {
            let (speaker, text) = match turn.split_once(':') {
                Some((speaker, text)) if !speaker.trim().is_empty() => {
                    (speaker.trim(), text.trim())
                }
                _ => ("user", turn.trim()),
            };
            if text.is_empty() {
                bail!("context turn '{turn}' has no text");
            }
            Ok(ContextTurn {
                speaker: speaker.to_string(),
                text: text.to_string(),
            })
        })
        .collect()
}
