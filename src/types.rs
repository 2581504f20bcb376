use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Questions ───────────────────────────────────────────────────────────────

/// Where a question in the rotation queue came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionOrigin {
    /// The user's question. Immutable for the session lifetime.
    Original,
    /// A gap question produced by a Reflect action.
    GapReflection,
    /// A rephrasing produced while forcing an answer in beast mode.
    BeastModeRewrite,
}

/// A natural-language question plus its origin tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    pub origin: QuestionOrigin,
}

impl Question {
    pub fn original(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            origin: QuestionOrigin::Original,
        }
    }

    pub fn gap(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            origin: QuestionOrigin::GapReflection,
        }
    }

    pub fn is_original(&self) -> bool {
        self.origin == QuestionOrigin::Original
    }
}

// ─── Search Queries ──────────────────────────────────────────────────────────

/// A web search query. Equality is structural.
///
/// `tbs` carries the upstream provider's recency-filter grammar (e.g.
/// "qdr:m") and is passed through opaque.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SerpQuery {
    pub q: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tbs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl SerpQuery {
    pub fn new(q: impl Into<String>) -> Self {
        Self {
            q: q.into(),
            tbs: None,
            location: None,
        }
    }

    pub fn with_recency(mut self, tbs: impl Into<String>) -> Self {
        self.tbs = Some(tbs.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Lowercased, punctuation-stripped, whitespace-collapsed form used for
    /// tie-breaking identical persona expansions and string-level dedup.
    pub fn normalized(&self) -> String {
        self.q
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A persona-expanded query with its ranking weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedQuery {
    pub query: SerpQuery,
    /// Weight in [0.0, 2.0]; defaults to 1.0.
    pub weight: f32,
    pub source_persona: String,
}

// ─── Topics ──────────────────────────────────────────────────────────────────

/// Topic category detected for a question; drives freshness thresholds and
/// the Globalizer persona's region choice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicCategory {
    #[default]
    General,
    Technology,
    Finance,
    News,
    Science,
    History,
    Automotive(String),
    Cuisine(String),
    Health,
    Entertainment,
    Sports,
}

// ─── References and Knowledge ────────────────────────────────────────────────

/// A citation backing part of an answer.
///
/// References are linked to the URL store by the canonical URL string, not
/// by ownership; validity means the store has that URL with visited=true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub excerpt: String,
    pub source_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Reference {
    pub fn new(excerpt: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            excerpt: excerpt.into(),
            source_url: source_url.into(),
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// One unit of accumulated knowledge. Insertion order is preserved and is
/// part of the prompt's temporal context; items are never mutated after
/// insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KnowledgeItem {
    /// A question answered during research, with its citations.
    Qa {
        question: String,
        answer: String,
        references: Vec<Reference>,
    },
    /// Incidental information (search snippets, page excerpts, sandbox output).
    SideInfo {
        question: String,
        answer: String,
        source_url: Option<String>,
    },
    /// A rejected answer attempt. The sole mechanism by which the agent
    /// learns from evaluator rejection.
    Error {
        question: String,
        attempted_answer: String,
        eval_type_failed: String,
        reason: String,
        suggestions: Vec<String>,
    },
}

impl KnowledgeItem {
    pub fn kind(&self) -> &'static str {
        match self {
            KnowledgeItem::Qa { .. } => "qa",
            KnowledgeItem::SideInfo { .. } => "side-info",
            KnowledgeItem::Error { .. } => "error",
        }
    }

    pub fn question(&self) -> &str {
        match self {
            KnowledgeItem::Qa { question, .. }
            | KnowledgeItem::SideInfo { question, .. }
            | KnowledgeItem::Error { question, .. } => question,
        }
    }

    /// The textual body used when rendering knowledge into a prompt.
    pub fn body(&self) -> &str {
        match self {
            KnowledgeItem::Qa { answer, .. } | KnowledgeItem::SideInfo { answer, .. } => answer,
            KnowledgeItem::Error { reason, .. } => reason,
        }
    }

    pub fn source_url(&self) -> Option<&str> {
        match self {
            KnowledgeItem::SideInfo { source_url, .. } => source_url.as_deref(),
            KnowledgeItem::Qa { references, .. } => {
                references.first().map(|r| r.source_url.as_str())
            }
            KnowledgeItem::Error { .. } => None,
        }
    }
}

// ─── Token Usage ─────────────────────────────────────────────────────────────

/// Token counts reported by one external call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

// ─── Session Log Lines ───────────────────────────────────────────────────────

/// Severity of a session log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Success => write!(f, "SUCCESS"),
            LogLevel::Warning => write!(f, "WARNING"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// A timestamped line in the session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogLine {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }
}
