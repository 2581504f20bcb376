//! Token budget tracker.
//!
//! Accumulates per-tool usage records and exposes the fraction of the
//! budget consumed. One ledger per session, passed in by value, never a
//! process-wide global. Appends are thread-safe and readers always see a
//! consistent snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::BEAST_MODE_THRESHOLD;
use crate::event::{EventBus, ProgressEvent};
use crate::types::TokenUsage;

/// One recorded external call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub tool: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Aggregate usage for one tool.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ToolUsage {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl ToolUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Thread-safe token ledger for one session.
#[derive(Clone)]
pub struct TokenLedger {
    inner: Arc<LedgerInner>,
}

struct LedgerInner {
    budget: u64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    per_tool: DashMap<String, ToolUsage>,
    history: Mutex<Vec<UsageRecord>>,
    bus: EventBus,
}

impl TokenLedger {
    pub fn new(budget: u64, bus: EventBus) -> Self {
        Self {
            inner: Arc::new(LedgerInner {
                budget,
                prompt_tokens: AtomicU64::new(0),
                completion_tokens: AtomicU64::new(0),
                per_tool: DashMap::new(),
                history: Mutex::new(Vec::new()),
                bus,
            }),
        }
    }

    /// Record one call's usage and emit a TokenUsage event.
    pub fn record(&self, tool: &str, usage: TokenUsage) {
        self.inner
            .prompt_tokens
            .fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.inner
            .completion_tokens
            .fetch_add(usage.completion_tokens, Ordering::Relaxed);

        self.inner
            .per_tool
            .entry(tool.to_string())
            .and_modify(|t| {
                t.calls += 1;
                t.prompt_tokens += usage.prompt_tokens;
                t.completion_tokens += usage.completion_tokens;
            })
            .or_insert(ToolUsage {
                calls: 1,
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            });

        self.inner.history.lock().unwrap().push(UsageRecord {
            tool: tool.to_string(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total(),
        });

        let total = self.total_tokens();
        log::debug!(
            "token usage: {tool} +{} ({:.1}% of budget)",
            usage.total(),
            self.fraction_used() * 100.0
        );
        self.inner.bus.emit(ProgressEvent::TokenUsage(total));
    }

    pub fn budget(&self) -> u64 {
        self.inner.budget
    }

    pub fn prompt_tokens(&self) -> u64 {
        self.inner.prompt_tokens.load(Ordering::Relaxed)
    }

    pub fn completion_tokens(&self) -> u64 {
        self.inner.completion_tokens.load(Ordering::Relaxed)
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens() + self.completion_tokens()
    }

    pub fn remaining_tokens(&self) -> u64 {
        self.inner.budget.saturating_sub(self.total_tokens())
    }

    /// Fraction of the budget consumed, in [0.0, ∞).
    pub fn fraction_used(&self) -> f64 {
        if self.inner.budget == 0 {
            return 1.0;
        }
        self.total_tokens() as f64 / self.inner.budget as f64
    }

    /// True at or above the 85% beast-mode threshold.
    pub fn should_enter_beast_mode(&self) -> bool {
        self.fraction_used() >= BEAST_MODE_THRESHOLD
    }

    pub fn is_exhausted(&self) -> bool {
        self.total_tokens() >= self.inner.budget
    }

    /// Per-tool breakdown snapshot.
    pub fn per_tool(&self) -> Vec<(String, ToolUsage)> {
        let mut tools: Vec<_> = self
            .inner
            .per_tool
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        tools.sort_by(|a, b| a.0.cmp(&b.0));
        tools
    }

    /// Every recorded call, in append order.
    pub fn history(&self) -> Vec<UsageRecord> {
        self.inner.history.lock().unwrap().clone()
    }

    pub fn total_usage(&self) -> TokenUsage {
        TokenUsage::new(self.prompt_tokens(), self.completion_tokens())
    }
}
