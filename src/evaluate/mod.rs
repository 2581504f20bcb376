//! Multi-dimensional answer evaluation.
//!
//! An answer only completes the run after passing an ordered, fail-fast
//! pipeline of evaluators. A failure is a value, not an error: it becomes
//! an Error knowledge item and the loop continues.

mod determiner;
mod pipeline;

pub use determiner::*;
pub use pipeline::*;

use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::budget::TokenLedger;
use crate::types::{KnowledgeItem, TokenUsage, TopicCategory};

/// The five evaluation dimensions, in pipeline execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationType {
    Definitive,
    Freshness,
    Plurality,
    Completeness,
    Strict,
}

impl EvaluationType {
    /// Canonical pipeline order.
    pub const ORDERED: [EvaluationType; 5] = [
        EvaluationType::Definitive,
        EvaluationType::Freshness,
        EvaluationType::Plurality,
        EvaluationType::Completeness,
        EvaluationType::Strict,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationType::Definitive => "definitive",
            EvaluationType::Freshness => "freshness",
            EvaluationType::Plurality => "plurality",
            EvaluationType::Completeness => "completeness",
            EvaluationType::Strict => "strict",
        }
    }

    /// Maximum acceptable staleness of dated information per topic.
    /// `None` means unbounded.
    pub fn freshness_threshold(topic: &TopicCategory) -> Option<Duration> {
        match topic {
            TopicCategory::Finance => Some(Duration::from_secs(60 * 60 * 2)),
            TopicCategory::News => Some(Duration::from_secs(60 * 60 * 24)),
            TopicCategory::Technology => Some(Duration::from_secs(60 * 60 * 24 * 30)),
            TopicCategory::Science => Some(Duration::from_secs(60 * 60 * 24 * 365)),
            TopicCategory::History => None,
            _ => Some(Duration::from_secs(60 * 60 * 24 * 7)),
        }
    }
}

impl std::fmt::Display for EvaluationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// System + user prompt pair sent to the LLM for a judgment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

/// Structured judgment returned by the LLM contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationJudgment {
    pub passed: bool,
    pub confidence: f32,
    pub reasoning: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub usage: TokenUsage,
}

impl EvaluationJudgment {
    pub fn pass_default() -> Self {
        Self {
            passed: true,
            confidence: 0.9,
            reasoning: "acceptable".into(),
            suggestions: Vec::new(),
            usage: TokenUsage::default(),
        }
    }

    pub fn pass(confidence: f32, reasoning: impl Into<String>) -> Self {
        Self {
            passed: true,
            confidence,
            reasoning: reasoning.into(),
            suggestions: Vec::new(),
            usage: TokenUsage::default(),
        }
    }

    pub fn fail(
        confidence: f32,
        reasoning: impl Into<String>,
        suggestions: Vec<String>,
    ) -> Self {
        Self {
            passed: false,
            confidence,
            reasoning: reasoning.into(),
            suggestions,
            usage: TokenUsage::default(),
        }
    }
}

/// Outcome of one evaluator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub eval_type: EvaluationType,
    pub passed: bool,
    /// Evaluator confidence in [0, 1].
    pub confidence: f32,
    pub reasoning: String,
    /// Improvement suggestions; populated only on failure.
    pub suggestions: Vec<String>,
    pub duration: Duration,
}

impl EvaluationResult {
    pub fn success(eval_type: EvaluationType, confidence: f32, reasoning: impl Into<String>) -> Self {
        Self {
            eval_type,
            passed: true,
            confidence,
            reasoning: reasoning.into(),
            suggestions: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn failure(
        eval_type: EvaluationType,
        confidence: f32,
        reasoning: impl Into<String>,
        suggestions: Vec<String>,
    ) -> Self {
        Self {
            eval_type,
            passed: false,
            confidence,
            reasoning: reasoning.into(),
            suggestions,
            duration: Duration::ZERO,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// Immutable snapshot handed to the evaluators.
#[derive(Clone)]
pub struct EvaluationContext {
    pub topic: TopicCategory,
    /// Injectable clock for freshness checks.
    pub current_date: NaiveDate,
    pub knowledge: Vec<KnowledgeItem>,
    /// Strict only applies to answers targeting the original question.
    pub question_is_original: bool,
    /// Ledger charged for LLM-backed judgments, when present.
    pub ledger: Option<TokenLedger>,
}

impl EvaluationContext {
    pub fn new(topic: TopicCategory, current_date: NaiveDate) -> Self {
        Self {
            topic,
            current_date,
            knowledge: Vec::new(),
            question_is_original: true,
            ledger: None,
        }
    }
}
