//! Cognitive persona query expansion.
//!
//! A persona rewrites the user's query from a fixed perspective (skeptic,
//! analyst, historian, ...). Expansion runs all active personas truly in
//! parallel on the work-stealing pool and yields weighted queries plus one
//! execution-metrics record per persona.

mod builtin;
mod orchestrator;
mod registry;

pub use builtin::*;
pub use orchestrator::*;
pub use registry::*;

use chrono::NaiveDate;
use std::sync::Arc;

use crate::types::{SerpQuery, TopicCategory};

/// A query-expansion strategy with a fixed focus and weight.
///
/// `Send + Sync` because expansions run concurrently across OS threads.
/// For a given (persona, query, context) the output must be identical
/// across runs; personas that consume the current date read it from the
/// injectable [`QueryContext::current_date`].
pub trait CognitivePersona: Send + Sync {
    /// Unique persona name.
    fn name(&self) -> &str;

    /// What this persona looks for. At least 10 characters.
    fn focus(&self) -> &str;

    /// Ranking weight in [0.0, 2.0]; 1.0 is neutral.
    fn weight(&self) -> f32 {
        1.0
    }

    /// Whether this persona applies to the given context.
    fn is_applicable(&self, _context: &QueryContext) -> bool {
        true
    }

    /// Produce the perspective-shifted query.
    fn expand(&self, original: &str, context: &QueryContext) -> SerpQuery;
}

/// Pluggable translation backend for the Globalizer persona. The identity
/// translator is valid and is what tests use.
pub trait Translator: Send + Sync {
    fn translate(&self, text: &str, target: &str) -> String;
}

/// Leaves text untranslated.
#[derive(Debug, Default)]
pub struct IdentityTranslator;

impl Translator for IdentityTranslator {
    fn translate(&self, text: &str, _target: &str) -> String {
        text.to_string()
    }
}

/// Deterministic stand-in translator: appends fixed target-language search
/// terms so native-language sources surface.
#[derive(Debug, Default)]
pub struct PhrasebookTranslator;

impl Translator for PhrasebookTranslator {
    fn translate(&self, text: &str, target: &str) -> String {
        let suffix = match target {
            "de" => "Erfahrungen Probleme",
            "ja" => "問題 レビュー",
            "it" => "problemi recensioni",
            "fr" => "problèmes avis",
            _ => return text.to_string(),
        };
        format!("{} {}", extract_main_topic(text), suffix)
    }
}

/// Shared context for one round of query expansion. Cloneable immutable
/// snapshot handed to parallel workers.
#[derive(Clone)]
pub struct QueryContext {
    pub original_query: String,
    /// Snippets from earlier searches, available as background.
    pub soundbites: Vec<String>,
    /// Injectable clock for date-consuming personas.
    pub current_date: NaiveDate,
    pub topic: TopicCategory,
    pub translator: Arc<dyn Translator>,
}

impl QueryContext {
    pub fn new(original_query: impl Into<String>, current_date: NaiveDate) -> Self {
        Self {
            original_query: original_query.into(),
            soundbites: Vec::new(),
            current_date,
            topic: TopicCategory::General,
            translator: Arc::new(IdentityTranslator),
        }
    }

    pub fn with_topic(mut self, topic: TopicCategory) -> Self {
        self.topic = topic;
        self
    }

    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = translator;
        self
    }
}

impl std::fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryContext")
            .field("original_query", &self.original_query)
            .field("current_date", &self.current_date)
            .field("topic", &self.topic)
            .finish()
    }
}

/// Strip question scaffolding (interrogatives, auxiliaries, articles) while
/// preserving the full topical content of the query.
pub fn extract_main_topic(query: &str) -> String {
    const STOP_WORDS: [&str; 45] = [
        "the", "a", "an", "this", "that", "these", "those", "is", "are", "was", "were", "be",
        "been", "being", "do", "does", "did", "have", "has", "had", "will", "would", "could",
        "should", "can", "may", "might", "what", "how", "why", "when", "where", "which", "who",
        "whom", "to", "for", "of", "in", "on", "at", "by", "with", "please", "tell",
    ];

    let result: String = query
        .split_whitespace()
        .filter(|word| {
            let lower = word.to_lowercase();
            let clean = lower.trim_matches(|c: char| !c.is_alphanumeric());
            !STOP_WORDS.contains(&clean)
        })
        .collect::<Vec<_>>()
        .join(" ");

    if result.is_empty() {
        query.to_string()
    } else {
        result
    }
}

/// Flip a value-laden query to hunt for contrary evidence.
pub fn negate_assumption(query: &str) -> String {
    let topic = extract_main_topic(query);
    if query.contains("best") {
        topic.replace("best", "worst")
    } else if query.contains("good") {
        topic.replace("good", "bad")
    } else if query.contains("benefit") {
        topic.replace("benefit", "drawback")
    } else {
        topic
    }
}
