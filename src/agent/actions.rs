use serde::{Deserialize, Serialize};

use crate::types::{Reference, SerpQuery};

/// One step's chosen operation. Each variant carries the parameters it
/// needs, so a Search without queries cannot be represented.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AgentAction {
    /// Search the web. Queries are expanded by the personas and deduped
    /// before execution.
    Search {
        queries: Vec<SerpQuery>,
        think: String,
    },
    /// Read up to the per-step cap of URLs in depth.
    Read { urls: Vec<String>, think: String },
    /// Enqueue gap questions for later rotation.
    Reflect {
        gap_questions: Vec<String>,
        think: String,
    },
    /// Propose the final answer. Runs the evaluation pipeline.
    Answer {
        answer: String,
        references: Vec<Reference>,
        think: String,
    },
    /// Run code in the sandbox and keep its output as knowledge.
    Coding { code: String, think: String },
}

impl AgentAction {
    pub fn name(&self) -> &'static str {
        match self {
            AgentAction::Search { .. } => "search",
            AgentAction::Read { .. } => "read",
            AgentAction::Reflect { .. } => "reflect",
            AgentAction::Answer { .. } => "answer",
            AgentAction::Coding { .. } => "coding",
        }
    }

    pub fn think(&self) -> &str {
        match self {
            AgentAction::Search { think, .. }
            | AgentAction::Read { think, .. }
            | AgentAction::Reflect { think, .. }
            | AgentAction::Answer { think, .. }
            | AgentAction::Coding { think, .. } => think,
        }
    }
}

/// Ordered log of what the agent did, rendered into the prompt so the LLM
/// sees its own history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum DiaryEntry {
    Search {
        queries: Vec<SerpQuery>,
        think: String,
        urls_found: usize,
    },
    Read {
        urls: Vec<String>,
        think: String,
    },
    Reflect {
        questions_added: Vec<String>,
        think: String,
    },
    FailedAnswer {
        eval_type: String,
        reason: String,
    },
    Coding {
        think: String,
        exit_code: i32,
    },
    StepError {
        message: String,
    },
}

impl DiaryEntry {
    /// One-line rendering for the prompt.
    pub fn format(&self) -> String {
        match self {
            DiaryEntry::Search {
                queries,
                think,
                urls_found,
            } => format!(
                "[SEARCH] {} queries -> {} URLs known\nThink: {}",
                queries.len(),
                urls_found,
                think
            ),
            DiaryEntry::Read { urls, think } => {
                format!("[READ] {} URLs\nThink: {}", urls.len(), think)
            }
            DiaryEntry::Reflect {
                questions_added,
                think,
            } => {
                if questions_added.is_empty() {
                    format!("[REFLECT] no new questions (all duplicates)\nThink: {think}")
                } else {
                    format!(
                        "[REFLECT] {} new questions\nThink: {}",
                        questions_added.len(),
                        think
                    )
                }
            }
            DiaryEntry::FailedAnswer { eval_type, reason } => {
                format!("[FAILED] {eval_type} evaluation rejected the answer\nReason: {reason}")
            }
            DiaryEntry::Coding { think, exit_code } => {
                format!("[CODING] exit code {exit_code}\nThink: {think}")
            }
            DiaryEntry::StepError { message } => format!("[ERROR] {message}"),
        }
    }
}

/// Prompt handed to the LLM for the next action decision.
#[derive(Debug, Clone, Default)]
pub struct AgentPrompt {
    pub system: String,
    pub user: String,
    /// Rendered diary, oldest first.
    pub diary: Vec<String>,
}
