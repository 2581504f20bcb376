//! Structured traces and evidence reports.
//!
//! Every search call and every evaluator run leaves a trace; aggregators
//! turn them into latency percentiles and success rates, and the evidence
//! reports bundle a session's traces for comparison and observability.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::evaluate::EvaluationType;
use crate::types::SerpQuery;

/// Where a search query originated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryOrigin {
    User,
    Persona { name: String },
    Reflection,
}

/// Record of one search call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchTrace {
    pub trace_id: Uuid,
    pub origin: QueryOrigin,
    pub query: SerpQuery,
    pub api: String,
    pub request_ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_ts: Option<DateTime<Utc>>,
    pub results_count: usize,
    pub bytes: usize,
    pub urls_extracted: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchTrace {
    pub fn start(query: SerpQuery, origin: QueryOrigin, api: impl Into<String>) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            origin,
            query,
            api: api.into(),
            request_ts: Utc::now(),
            response_ts: None,
            results_count: 0,
            bytes: 0,
            urls_extracted: 0,
            error: None,
        }
    }

    pub fn complete(&mut self, results_count: usize, bytes: usize, urls_extracted: usize) {
        self.response_ts = Some(Utc::now());
        self.results_count = results_count;
        self.bytes = bytes;
        self.urls_extracted = urls_extracted;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.response_ts = Some(Utc::now());
        self.error = Some(error.into());
    }

    pub fn is_success(&self) -> bool {
        self.response_ts.is_some() && self.error.is_none()
    }

    pub fn latency_ms(&self) -> Option<u64> {
        self.response_ts
            .map(|end| (end - self.request_ts).num_milliseconds().max(0) as u64)
    }
}

/// Record of one evaluator run. The answer is stored as a hash so traces
/// stay small and comparable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationTrace {
    pub trace_id: Uuid,
    pub eval_type: EvaluationType,
    pub question: String,
    pub answer_hash: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub tokens_used: u64,
    pub passed: bool,
    pub confidence: f32,
    pub reasoning_length: usize,
}

impl EvaluationTrace {
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        eval_type: EvaluationType,
        question: &str,
        answer: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        tokens_used: u64,
        passed: bool,
        confidence: f32,
        reasoning_length: usize,
    ) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            eval_type,
            question: question.to_string(),
            answer_hash: hash_answer(answer),
            start,
            end,
            tokens_used,
            passed,
            confidence,
            reasoning_length,
        }
    }

    pub fn latency_ms(&self) -> u64 {
        (self.end - self.start).num_milliseconds().max(0) as u64
    }
}

/// SHA-256 hex digest of an answer.
pub fn hash_answer(answer: &str) -> String {
    let digest = Sha256::digest(answer.as_bytes());
    format!("{digest:x}")
}

/// Latency percentiles in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
}

impl LatencySummary {
    /// Nearest-rank percentiles over the sample set.
    pub fn from_samples(mut samples: Vec<u64>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_unstable();
        let rank = |p: f64| {
            let idx = ((p / 100.0) * samples.len() as f64).ceil() as usize;
            samples[idx.clamp(1, samples.len()) - 1]
        };
        Self {
            p50: rank(50.0),
            p95: rank(95.0),
            p99: rank(99.0),
        }
    }
}

/// Bundle of a session's search traces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchEvidenceReport {
    pub session_id: Uuid,
    pub traces: Vec<SearchTrace>,
    pub success_rate: f32,
    pub total_bytes: usize,
    pub total_urls: usize,
    pub latency: LatencySummary,
}

impl SearchEvidenceReport {
    pub fn from_traces(session_id: Uuid, traces: Vec<SearchTrace>) -> Self {
        let total = traces.len();
        let successes = traces.iter().filter(|t| t.is_success()).count();
        let success_rate = if total == 0 {
            0.0
        } else {
            successes as f32 / total as f32
        };
        let latency = LatencySummary::from_samples(
            traces.iter().filter_map(|t| t.latency_ms()).collect(),
        );
        Self {
            session_id,
            success_rate,
            total_bytes: traces.iter().map(|t| t.bytes).sum(),
            total_urls: traces.iter().map(|t| t.urls_extracted).sum(),
            latency,
            traces,
        }
    }
}

/// Bundle of a session's evaluation traces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationEvidenceReport {
    pub session_id: Uuid,
    pub traces: Vec<EvaluationTrace>,
    pub pass_rate: f32,
    pub total_tokens: u64,
    pub avg_tokens_per_eval: u64,
    pub latency: LatencySummary,
}

impl EvaluationEvidenceReport {
    pub fn from_traces(session_id: Uuid, traces: Vec<EvaluationTrace>) -> Self {
        let total = traces.len();
        let passes = traces.iter().filter(|t| t.passed).count();
        let total_tokens: u64 = traces.iter().map(|t| t.tokens_used).sum();
        Self {
            session_id,
            pass_rate: if total == 0 {
                0.0
            } else {
                passes as f32 / total as f32
            },
            total_tokens,
            avg_tokens_per_eval: if total == 0 {
                0
            } else {
                total_tokens / total as u64
            },
            latency: LatencySummary::from_samples(
                traces.iter().map(|t| t.latency_ms()).collect(),
            ),
            traces,
        }
    }
}
