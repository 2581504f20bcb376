//! Contracts over external collaborators and the retry/timeout layer.
//!
//! The core never talks to a vendor API directly; it consumes these traits.
//! Adapters absorb transient failures with bounded exponential backoff and
//! enforce a per-call timeout. Anything that survives retry surfaces as a
//! typed error; malformed responses must never panic.

mod mock;
mod reader;
mod retry;

pub use mock::*;
pub use reader::*;
pub use retry::*;

use std::time::Duration;

use async_trait::async_trait;

use crate::agent::{ActionPermissions, AgentAction, AgentPrompt};
use crate::error::DelveResult;
use crate::evaluate::{EvaluationJudgment, EvaluationType, PromptPair};
use crate::types::{Reference, SerpQuery, TokenUsage};

// ─── LLM ─────────────────────────────────────────────────────────────────────

/// An action decision returned by the LLM, with its usage record.
#[derive(Debug, Clone)]
pub struct LlmDecision {
    pub action: AgentAction,
    pub usage: TokenUsage,
}

/// A generated answer with its citations and usage record.
#[derive(Debug, Clone)]
pub struct LlmAnswer {
    pub answer: String,
    pub references: Vec<Reference>,
    pub usage: TokenUsage,
}

/// The LLM contract. Structured output is enforced at this boundary:
/// implementations must return a typed contract-violation error on schema
/// mismatch, never an untyped map or a parse panic.
#[async_trait]
pub trait LlmContract: Send + Sync {
    /// Choose the next action. The returned variant should be in the
    /// allowed set; the step executor verifies and re-prompts once if not.
    async fn decide_action(
        &self,
        prompt: &AgentPrompt,
        permissions: &ActionPermissions,
    ) -> DelveResult<LlmDecision>;

    /// Generate an answer directly (beast mode uses elevated temperature).
    async fn generate_answer(&self, prompt: &AgentPrompt, temperature: f32)
        -> DelveResult<LlmAnswer>;

    /// Structured evaluator judgment for one prompt pair.
    async fn judge(&self, prompt: &PromptPair) -> DelveResult<EvaluationJudgment>;

    /// Optional LLM fallback for required-evaluation determination when the
    /// deterministic rules miss. The default adds nothing beyond Definitive.
    async fn determine_eval_types(&self, _question: &str) -> DelveResult<Vec<EvaluationType>> {
        Ok(vec![EvaluationType::Definitive])
    }
}

// ─── Embeddings ──────────────────────────────────────────────────────────────

/// Embedding provider. Output preserves input order and every vector has
/// the declared dimension.
#[async_trait]
pub trait EmbeddingContract: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> DelveResult<Vec<Vec<f32>>>;
}

// ─── Search ──────────────────────────────────────────────────────────────────

/// One search hit.
#[derive(Debug, Clone)]
pub struct SearchSnippet {
    pub title: String,
    pub url: String,
    pub excerpt: String,
}

/// Response from one search call.
#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub snippets: Vec<SearchSnippet>,
    pub raw_latency: Duration,
}

/// Web search contract. `SerpQuery.tbs` is passed through opaque; the core
/// does not parse the provider's recency grammar.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &SerpQuery) -> DelveResult<SearchResponse>;

    /// Optional relevance reranking of candidate URLs. Default is a no-op
    /// passthrough.
    async fn rerank(&self, _query: &str, candidates: &[String]) -> DelveResult<Vec<String>> {
        Ok(candidates.to_vec())
    }
}

// ─── Sandbox ─────────────────────────────────────────────────────────────────

/// Output of a sandboxed code execution.
#[derive(Debug, Clone)]
pub struct SandboxResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Code execution contract with wall-clock and memory limits enforced by
/// the implementation.
#[async_trait]
pub trait CodeSandbox: Send + Sync {
    async fn execute(&self, code: &str) -> DelveResult<SandboxResult>;
}
