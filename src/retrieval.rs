//! Retrieval-augmented tool selection.
//!
//! Ranks a role's tools by similarity between a sub-task description and
//! each tool's description text. The scoring algorithm is pluggable behind
//! [`Similarity`]; the default is a deterministic lexical term-frequency
//! cosine so that identical inputs always produce identical shortlists.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::agent::AgentRole;
use crate::error::{AgentError, Result};
use crate::registry::{ToolDescriptor, ToolRegistry};

/// Pluggable similarity scoring between a task description and a tool
/// description.
///
/// Implementations must be deterministic for the same inputs; ranking
/// stability is what makes paraphrase evaluation reproducible.
pub trait Similarity: Send + Sync {
    /// Scores the similarity of `task` to `tool_text` in `[0.0, 1.0]`.
    fn score(&self, task: &str, tool_text: &str) -> f64;
}

/// Term-frequency cosine over lowercased alphanumeric tokens.
///
/// Dependency-free and deterministic. An embedding-backed implementation
/// can be swapped in without touching the retriever contract.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalSimilarity;

impl LexicalSimilarity {
    fn term_frequencies(text: &str) -> HashMap<String, f64> {
        let mut freqs = HashMap::new();
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            *freqs.entry(token.to_lowercase()).or_insert(0.0) += 1.0;
        }
        freqs
    }
}

impl Similarity for LexicalSimilarity {
    fn score(&self, task: &str, tool_text: &str) -> f64 {
        let a = Self::term_frequencies(task);
        let b = Self::term_frequencies(tool_text);
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }

        let dot: f64 = a
            .iter()
            .filter_map(|(term, &fa)| b.get(term).map(|&fb| fa * fb))
            .sum();
        let norm_a: f64 = a.values().map(|f| f * f).sum::<f64>().sqrt();
        let norm_b: f64 = b.values().map(|f| f * f).sum::<f64>().sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            0.0
        } else {
            dot / (norm_a * norm_b)
        }
    }
}

/// Retrieves ranked tool shortlists from the registry.
pub struct Retriever {
    registry: Arc<ToolRegistry>,
    similarity: Box<dyn Similarity>,
}

impl Retriever {
    /// Creates a retriever with the default lexical scorer.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self::with_similarity(registry, Box::new(LexicalSimilarity))
    }

    /// Creates a retriever with a custom similarity implementation.
    #[must_use]
    pub fn with_similarity(registry: Arc<ToolRegistry>, similarity: Box<dyn Similarity>) -> Self {
        Self {
            registry,
            similarity,
        }
    }

    /// Returns up to `top_k` descriptors for `role`, ranked by similarity
    /// to `description`. Ties break by registration order.
    ///
    /// An empty result is not an error: callers interpret emptiness as
    /// "no tool available for this role".
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::InvalidArgument`] if `top_k == 0`.
    pub fn retrieve(
        &self,
        description: &str,
        role: AgentRole,
        top_k: usize,
    ) -> Result<Vec<ToolDescriptor>> {
        if top_k == 0 {
            return Err(AgentError::InvalidArgument {
                message: "top_k must be at least 1".to_string(),
            });
        }

        // Candidates come out of the registry in registration order, so a
        // stable sort on score alone preserves that order among ties.
        let mut scored: Vec<(f64, &ToolDescriptor)> = self
            .registry
            .list_by_role(role)
            .into_iter()
            .map(|d| {
                let text = format!("{} {}", d.name, d.description);
                (self.similarity.score(description, &text), d)
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let shortlist: Vec<ToolDescriptor> = scored
            .into_iter()
            .take(top_k)
            .map(|(score, d)| {
                debug!(tool = %d.name, %role, score, "retrieval candidate");
                d.clone()
            })
            .collect();

        Ok(shortlist)
    }
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("registry_tools", &self.registry.len())
            .finish_non_exhaustive()
    }
}
