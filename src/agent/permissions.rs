use serde::{Deserialize, Serialize};

use super::AgentContext;
use crate::config::ResearchConfig;

/// Gap questions a single Reflect may add.
pub const MAX_REFLECT_PER_STEP: usize = 5;
/// URL count at which search shuts off.
pub const MAX_URLS_BEFORE_SEARCH_DISABLED: usize = 50;
/// URLs a single Read may take.
pub const MAX_URLS_PER_STEP: usize = 5;

/// The allowed-action set for one step. A pure function of context,
/// recomputed at the top of every step; disabling actions whose
/// preconditions cannot be met keeps the loop out of dead ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPermissions {
    pub search: bool,
    pub read: bool,
    pub reflect: bool,
    pub answer: bool,
    pub coding: bool,
}

impl ActionPermissions {
    pub fn from_context(ctx: &AgentContext, config: &ResearchConfig) -> Self {
        Self {
            search: ctx.urls.len() < MAX_URLS_BEFORE_SEARCH_DISABLED,
            read: ctx.urls.unvisited_count() > 0,
            reflect: ctx.gap_questions_added_this_step <= MAX_REFLECT_PER_STEP,
            // total_step is the 1-based index of the executing step, so the
            // first step can only answer in direct mode.
            answer: ctx.total_step > 1 || config.allow_direct_answer,
            coding: config.enable_coding,
        }
    }

    pub fn all_enabled() -> Self {
        Self {
            search: true,
            read: true,
            reflect: true,
            answer: true,
            coding: true,
        }
    }

    /// Beast mode: answer only.
    pub fn beast_mode() -> Self {
        Self {
            search: false,
            read: false,
            reflect: false,
            answer: true,
            coding: false,
        }
    }

    pub fn is_allowed(&self, action_name: &str) -> bool {
        match action_name {
            "search" => self.search,
            "read" => self.read,
            "reflect" => self.reflect,
            "answer" => self.answer,
            "coding" => self.coding,
            _ => false,
        }
    }

    pub fn allowed_actions(&self) -> Vec<&'static str> {
        let mut actions = Vec::with_capacity(5);
        if self.search {
            actions.push("search");
        }
        if self.read {
            actions.push("read");
        }
        if self.reflect {
            actions.push("reflect");
        }
        if self.answer {
            actions.push("answer");
        }
        if self.coding {
            actions.push("coding");
        }
        actions
    }

    pub fn has_any_allowed(&self) -> bool {
        self.search || self.read || self.reflect || self.answer || self.coding
    }
}

impl std::fmt::Display for ActionPermissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.allowed_actions().join(", "))
    }
}
