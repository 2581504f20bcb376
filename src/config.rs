use serde::{Deserialize, Serialize};

use crate::error::{DelveError, DelveResult};

/// Default token budget for one research session.
pub const DEFAULT_TOKEN_BUDGET: u64 = 1_000_000;

/// Fraction of the budget that triggers beast mode.
pub const BEAST_MODE_THRESHOLD: f64 = 0.85;

/// Cosine similarity at or above this is a duplicate query.
pub const QUERY_DEDUP_THRESHOLD: f32 = 0.86;

/// Configuration for one research session.
///
/// Values come from the builder or from the environment once at startup;
/// the step loop never consults the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Total token ceiling for the session.
    #[serde(default = "default_budget")]
    pub token_budget: u64,

    /// Allow a direct (trivial) answer on the first step.
    #[serde(default)]
    pub allow_direct_answer: bool,

    /// Enable the coding action (sandbox contract must be wired).
    #[serde(default)]
    pub enable_coding: bool,

    /// Multiplier on the estimated token charge of a search call.
    /// Kept at 1.0; the upstream scaling experiment is disabled.
    #[serde(default = "default_scaler")]
    pub search_token_scaler: f64,

    /// Maximum forced-answer attempts in beast mode.
    #[serde(default = "default_beast_attempts")]
    pub max_beast_attempts: u32,

    /// Optional wall-clock deadline for the whole run, in milliseconds.
    /// Defaults to a heuristic derived from the token budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,

    /// API key for the LLM contract (unused in library-only runs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_api_key: Option<String>,

    /// API key for the search/embedding services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_api_key: Option<String>,
}

fn default_budget() -> u64 {
    DEFAULT_TOKEN_BUDGET
}

fn default_scaler() -> f64 {
    1.0
}

fn default_beast_attempts() -> u32 {
    3
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            token_budget: DEFAULT_TOKEN_BUDGET,
            allow_direct_answer: false,
            enable_coding: false,
            search_token_scaler: 1.0,
            max_beast_attempts: 3,
            deadline_ms: None,
            llm_api_key: None,
            search_api_key: None,
        }
    }
}

impl ResearchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_budget(mut self, tokens: u64) -> Self {
        self.token_budget = tokens;
        self
    }

    pub fn with_direct_answer(mut self, allow: bool) -> Self {
        self.allow_direct_answer = allow;
        self
    }

    pub fn with_coding(mut self, enable: bool) -> Self {
        self.enable_coding = enable;
        self
    }

    pub fn with_deadline_ms(mut self, ms: u64) -> Self {
        self.deadline_ms = Some(ms);
        self
    }

    /// Read optional configuration from the environment. Called once at
    /// startup; safe to skip entirely in library use.
    pub fn from_env() -> DelveResult<Self> {
        let mut config = Self::default();

        if let Ok(budget) = std::env::var("DELVE_TOKEN_BUDGET") {
            config.token_budget = budget
                .parse()
                .map_err(|_| DelveError::Init(format!("invalid DELVE_TOKEN_BUDGET: {budget}")))?;
        }
        if config.token_budget == 0 {
            return Err(DelveError::Init("token budget must be positive".into()));
        }
        config.llm_api_key = std::env::var("DELVE_LLM_API_KEY").ok();
        config.search_api_key = std::env::var("DELVE_SEARCH_API_KEY").ok();

        Ok(config)
    }

    /// Wall-clock deadline heuristic: roughly one minute per 100k tokens of
    /// budget, floor of two minutes.
    pub fn effective_deadline_ms(&self) -> u64 {
        self.deadline_ms
            .unwrap_or_else(|| (self.token_budget / 100_000).max(2) * 60_000)
    }
}
