use serde::{Deserialize, Serialize};

use crate::types::{KnowledgeItem, Reference, TokenUsage};

/// The agent's lifecycle state. Transitions are exactly:
/// Processing→Processing, Processing→BeastMode, Processing→Completed,
/// BeastMode→BeastMode, BeastMode→Completed, BeastMode→Failed.
#[derive(Debug, Clone)]
pub enum AgentState {
    Processing {
        step: u32,
        total_step: u32,
        current_question: String,
        budget_used: f64,
    },
    /// Emergency phase: only Answer is allowed and an answer is forced
    /// from existing knowledge.
    BeastMode { attempts: u32, last_failure: String },
    Completed {
        answer: String,
        references: Vec<Reference>,
        trivial: bool,
    },
    Failed {
        reason: String,
        partial_knowledge: Vec<KnowledgeItem>,
    },
}

impl AgentState {
    pub fn initial() -> Self {
        AgentState::Processing {
            step: 0,
            total_step: 0,
            current_question: String::new(),
            budget_used: 0.0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Completed { .. } | AgentState::Failed { .. })
    }

    pub fn is_processing(&self) -> bool {
        matches!(self, AgentState::Processing { .. })
    }

    pub fn is_beast_mode(&self) -> bool {
        matches!(self, AgentState::BeastMode { .. })
    }

    pub fn can_transition_to(&self, target: &AgentState) -> bool {
        matches!(
            (self, target),
            (AgentState::Processing { .. }, AgentState::Processing { .. })
                | (AgentState::Processing { .. }, AgentState::BeastMode { .. })
                | (AgentState::Processing { .. }, AgentState::Completed { .. })
                | (AgentState::BeastMode { .. }, AgentState::BeastMode { .. })
                | (AgentState::BeastMode { .. }, AgentState::Completed { .. })
                | (AgentState::BeastMode { .. }, AgentState::Failed { .. })
        )
    }
}

/// Result of executing one step.
#[derive(Debug)]
pub enum StepResult {
    Continue,
    Completed(AnswerOutcome),
    /// Recoverable step failure: logged, total_step advances, step does not.
    Error(String),
    /// Two contract violations in one step force the emergency phase.
    EnterBeastMode(String),
}

/// An answer accepted by the evaluation pipeline.
#[derive(Debug, Clone)]
pub struct AnswerOutcome {
    pub answer: String,
    pub references: Vec<Reference>,
    /// Answered directly on the first step without research.
    pub trivial: bool,
}

/// Per-phase wall-clock totals for one run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunTiming {
    pub total_ms: u64,
    pub search_ms: u64,
    pub read_ms: u64,
    pub llm_ms: u64,
}

/// Final result of a research run.
#[derive(Debug, Clone)]
pub struct ResearchOutcome {
    pub success: bool,
    pub answer: Option<String>,
    pub references: Vec<Reference>,
    pub trivial: bool,
    pub token_usage: TokenUsage,
    pub visited_urls: Vec<String>,
    pub error: Option<String>,
    pub steps: u32,
    pub urls_found: usize,
    pub timing: RunTiming,
}
