//! Session persistence format.
//!
//! A finished run serialises to one JSON object; the same record also
//! renders to a human-readable text log with section banners. The record
//! is rebuilt from the run outcome plus the drained event stream, so
//! persistence stays outside the step loop.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::{PersonaTally, ResearchOutcome, RunTiming};
use crate::error::DelveResult;
use crate::event::ProgressEvent;
use crate::types::{LogLevel, LogLine};

/// Per-persona counters as persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonaRecord {
    pub searches: usize,
    pub reads: usize,
    pub answers: usize,
    pub tokens: u64,
}

impl From<&PersonaTally> for PersonaRecord {
    fn from(tally: &PersonaTally) -> Self {
        Self {
            searches: tally.searches,
            reads: tally.reads,
            answers: tally.answers,
            tokens: tally.tokens,
        }
    }
}

/// Counters for the whole session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub steps: u32,
    pub urls_found: usize,
    pub tokens_used: u64,
}

/// A parallel batch as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub batch_id: String,
    pub batch_type: String,
    pub task_count: usize,
    pub total_ms: u64,
    pub success_count: usize,
    pub fail_count: usize,
}

/// One parallel task as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub batch_id: String,
    pub description: String,
    pub status: String,
    pub elapsed_ms: u64,
}

/// The session record written to disk by front-ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    /// Rendered as "Title — URL".
    pub references: Vec<String>,
    pub visited_urls: Vec<String>,
    pub logs: Vec<LogLine>,
    pub personas: BTreeMap<String, PersonaRecord>,
    pub timing: RunTiming,
    pub stats: SessionStats,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub parallel_batches: Vec<BatchRecord>,
    pub all_tasks: Vec<TaskRecord>,
}

impl SessionRecord {
    /// Assemble the record from a finished run. `events` is the drained
    /// bus stream, in emission order.
    pub fn assemble(
        question: impl Into<String>,
        outcome: &ResearchOutcome,
        personas: &std::collections::HashMap<String, PersonaTally>,
        events: &[ProgressEvent],
        started_at: DateTime<Utc>,
    ) -> Self {
        let mut logs = Vec::new();
        let mut batches: Vec<BatchRecord> = Vec::new();
        let mut tasks = Vec::new();

        for event in events {
            match event {
                ProgressEvent::Info(m) => logs.push(LogLine::new(LogLevel::Info, m.clone())),
                ProgressEvent::Success(m) => {
                    logs.push(LogLine::new(LogLevel::Success, m.clone()))
                }
                ProgressEvent::Warning(m) => {
                    logs.push(LogLine::new(LogLevel::Warning, m.clone()))
                }
                ProgressEvent::Error(m) => logs.push(LogLine::new(LogLevel::Error, m.clone())),
                ProgressEvent::BatchStart {
                    batch_id,
                    batch_type,
                    task_count,
                } => batches.push(BatchRecord {
                    batch_id: batch_id.clone(),
                    batch_type: batch_type.clone(),
                    task_count: *task_count,
                    total_ms: 0,
                    success_count: 0,
                    fail_count: 0,
                }),
                ProgressEvent::BatchEnd {
                    batch_id,
                    total_ms,
                    success_count,
                    fail_count,
                } => {
                    if let Some(batch) = batches.iter_mut().find(|b| &b.batch_id == batch_id) {
                        batch.total_ms = *total_ms;
                        batch.success_count = *success_count;
                        batch.fail_count = *fail_count;
                    }
                }
                ProgressEvent::TaskUpdate {
                    task_id,
                    batch_id,
                    description,
                    status,
                    elapsed_ms,
                } => tasks.push(TaskRecord {
                    task_id: task_id.clone(),
                    batch_id: batch_id.clone(),
                    description: description.clone(),
                    status: status.clone(),
                    elapsed_ms: *elapsed_ms,
                }),
                _ => {}
            }
        }

        Self {
            id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            question: question.into(),
            answer: outcome.answer.clone(),
            references: outcome
                .references
                .iter()
                .map(|r| {
                    format!(
                        "{} — {}",
                        r.title.as_deref().unwrap_or("Untitled"),
                        r.source_url
                    )
                })
                .collect(),
            visited_urls: outcome.visited_urls.clone(),
            logs,
            personas: personas
                .iter()
                .map(|(name, tally)| (name.clone(), PersonaRecord::from(tally)))
                .collect(),
            timing: outcome.timing,
            stats: SessionStats {
                steps: outcome.steps,
                urls_found: outcome.urls_found,
                tokens_used: outcome.token_usage.total(),
            },
            success: outcome.success,
            error: outcome.error.clone(),
            parallel_batches: batches,
            all_tasks: tasks,
        }
    }

    pub fn to_json(&self) -> DelveResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> DelveResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Human-readable text rendering with section banners.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let banner = |title: &str| format!("\n========== {title} ==========\n");

        out.push_str(&banner("SESSION"));
        out.push_str(&format!("id: {}\n", self.id));
        out.push_str(&format!("question: {}\n", self.question));
        out.push_str(&format!(
            "success: {} | steps: {} | urls: {} | tokens: {}\n",
            self.success, self.stats.steps, self.stats.urls_found, self.stats.tokens_used
        ));

        out.push_str(&banner("ANSWER"));
        match &self.answer {
            Some(answer) => out.push_str(answer),
            None => out.push_str(&format!(
                "(none) {}",
                self.error.as_deref().unwrap_or("unknown failure")
            )),
        }
        out.push('\n');

        if !self.references.is_empty() {
            out.push_str(&banner("REFERENCES"));
            for reference in &self.references {
                out.push_str(&format!("- {reference}\n"));
            }
        }

        if !self.visited_urls.is_empty() {
            out.push_str(&banner("VISITED URLS"));
            for url in &self.visited_urls {
                out.push_str(&format!("- {url}\n"));
            }
        }

        if !self.personas.is_empty() {
            out.push_str(&banner("PERSONAS"));
            for (name, stats) in &self.personas {
                out.push_str(&format!(
                    "{name}: {} searches, {} reads, {} answers\n",
                    stats.searches, stats.reads, stats.answers
                ));
            }
        }

        out.push_str(&banner("TIMING"));
        out.push_str(&format!(
            "total: {}ms | search: {}ms | read: {}ms | llm: {}ms\n",
            self.timing.total_ms, self.timing.search_ms, self.timing.read_ms, self.timing.llm_ms
        ));

        out.push_str(&banner("LOG"));
        for line in &self.logs {
            out.push_str(&format!(
                "{} [{}] {}\n",
                line.timestamp.format("%H:%M:%S%.3f"),
                line.level,
                line.message
            ));
        }

        out
    }
}
