use std::collections::VecDeque;

use super::DiaryEntry;
use crate::store::{KnowledgeLog, UrlStore};
use crate::types::Question;

/// All mutable state of one research run. Exclusively owned by the agent
/// loop; parallel sub-tasks get immutable snapshots and their results are
/// merged back at step boundaries.
#[derive(Debug)]
pub struct AgentContext {
    pub original_question: Question,
    /// FIFO rotation queue. The front question is the current one; rotated
    /// questions are re-enqueued so every question stays reachable.
    queue: VecDeque<Question>,
    pub knowledge: KnowledgeLog,
    pub urls: UrlStore,
    pub diary: Vec<DiaryEntry>,
    /// Meaningful steps completed. Error steps do not advance this.
    pub step: u32,
    /// Every executed step, including error steps.
    pub total_step: u32,
    /// Gap questions accepted during the current step; bounds Reflect.
    pub gap_questions_added_this_step: usize,
    /// Texts of queries already sent to search, for degraded-mode dedup.
    pub executed_queries: Vec<String>,
    /// Embeddings parallel to `executed_queries` (shorter if a batch ran
    /// degraded).
    pub executed_embeddings: Vec<Vec<f32>>,
}

impl AgentContext {
    pub fn new(original_question: Question) -> Self {
        let mut queue = VecDeque::new();
        queue.push_back(original_question.clone());
        Self {
            original_question,
            queue,
            knowledge: KnowledgeLog::new(),
            urls: UrlStore::new(),
            diary: Vec::new(),
            step: 0,
            total_step: 0,
            gap_questions_added_this_step: 0,
            executed_queries: Vec::new(),
            executed_embeddings: Vec::new(),
        }
    }

    /// Rotate to the next question: the front of the queue becomes current
    /// and is re-enqueued at the back.
    pub fn rotate_question(&mut self) -> Question {
        let question = self
            .queue
            .pop_front()
            .unwrap_or_else(|| self.original_question.clone());
        self.queue.push_back(question.clone());
        question
    }

    /// Add a gap question unless an equivalent one is already queued.
    /// Returns whether it was accepted.
    pub fn enqueue_gap_question(&mut self, text: &str) -> bool {
        let normalized = normalize_question(text);
        if normalized.is_empty() {
            return false;
        }
        let duplicate = self
            .queue
            .iter()
            .any(|q| normalize_question(&q.text) == normalized)
            || normalize_question(&self.original_question.text) == normalized;
        if duplicate {
            return false;
        }
        self.queue.push_back(Question::gap(text));
        self.gap_questions_added_this_step += 1;
        true
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queued_questions(&self) -> impl Iterator<Item = &Question> {
        self.queue.iter()
    }

    pub fn record_executed_queries(&mut self, texts: Vec<String>, embeddings: Vec<Vec<f32>>) {
        self.executed_queries.extend(texts);
        self.executed_embeddings.extend(embeddings);
    }
}

fn normalize_question(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
