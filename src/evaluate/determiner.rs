use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use regex::Regex;

use super::EvaluationType;
use crate::adapter::LlmContract;
use crate::error::DelveResult;
use crate::types::TopicCategory;

/// Keyword-based topic detection; drives freshness thresholds and the
/// Globalizer persona.
pub fn detect_topic(question: &str) -> TopicCategory {
    let q = question.to_lowercase();
    const FINANCE: [&str; 6] = ["stock", "price", "market", "crypto", "exchange rate", "interest rate"];
    const NEWS: [&str; 4] = ["news", "breaking", "headline", "announced"];
    const TECH: [&str; 7] = [
        "software", "programming", "framework", "api", "rust", "database", "computer",
    ];
    const SCIENCE: [&str; 5] = ["research", "study", "physics", "biology", "chemistry"];
    const HISTORY: [&str; 4] = ["history", "historical", "ancient", "century"];

    if FINANCE.iter().any(|k| q.contains(k)) {
        TopicCategory::Finance
    } else if NEWS.iter().any(|k| q.contains(k)) {
        TopicCategory::News
    } else if HISTORY.iter().any(|k| q.contains(k)) {
        TopicCategory::History
    } else if SCIENCE.iter().any(|k| q.contains(k)) {
        TopicCategory::Science
    } else if TECH.iter().any(|k| q.contains(k)) {
        TopicCategory::Technology
    } else {
        TopicCategory::General
    }
}

/// Extract the item count a question asks for, if any ("list 5 ...",
/// "top 10 ...", "3 examples of ...").
pub fn requested_item_count(question: &str) -> Option<usize> {
    let q = question.to_lowercase();

    let leading = Regex::new(r"(?:list|top|name|give me|give|best|pick)\s+(\d+)\b").unwrap();
    if let Some(caps) = leading.captures(&q) {
        return caps[1].parse().ok();
    }

    let trailing = Regex::new(
        r"(\d+)\s+(?:examples?|items?|things|ways|reasons?|options?|tools?|books?|tips|languages?|frameworks?|databases?|libraries)\b",
    )
    .unwrap();
    if let Some(caps) = trailing.captures(&q) {
        return caps[1].parse().ok();
    }

    const WORDS: [(&str, usize); 8] = [
        ("two", 2),
        ("three", 3),
        ("four", 4),
        ("five", 5),
        ("six", 6),
        ("seven", 7),
        ("eight", 8),
        ("ten", 10),
    ];
    for (word, n) in WORDS {
        let pattern = format!(r"(?:list|top|name|give me|best)\s+{word}\b");
        if Regex::new(&pattern).unwrap().is_match(&q) {
            return Some(n);
        }
    }
    None
}

/// Whether the question needs up-to-date information.
fn needs_freshness(question: &str) -> bool {
    let q = question.to_lowercase();
    const TEMPORAL: [&str; 10] = [
        "latest", "current", "recent", "today", "now", "this year", "this month", "newest",
        "up to date", "state of the art",
    ];
    if TEMPORAL.iter().any(|kw| q.contains(kw)) {
        return true;
    }
    Regex::new(r"\b20\d{2}\b").unwrap().is_match(&q)
}

/// Aspects of a multi-part question, split on coordinating structure.
pub fn question_aspects(question: &str) -> Vec<String> {
    let body = question.trim_end_matches(['?', '.', '!']);
    let mut aspects: Vec<String> = Vec::new();

    for part in body.split(" and ") {
        for piece in part.split(" as well as ") {
            let piece = piece.trim();
            let content_words = piece
                .split_whitespace()
                .filter(|w| w.len() > 3)
                .count();
            if content_words >= 1 {
                aspects.push(piece.to_string());
            }
        }
    }

    aspects
}

/// Deterministic keyword-and-structure rules for which evaluations a
/// question requires. Definitive is always on; Strict is appended by the
/// caller for the original question only.
pub fn determine_required_evaluations(question: &str) -> Vec<EvaluationType> {
    let mut required = vec![EvaluationType::Definitive];

    if needs_freshness(question) {
        required.push(EvaluationType::Freshness);
    }
    if requested_item_count(question).is_some() {
        required.push(EvaluationType::Plurality);
    }
    if question_aspects(question).len() >= 2 {
        required.push(EvaluationType::Completeness);
    }

    required
}

/// Rule-based determiner with an optional, cached LLM fallback for
/// questions the rules say nothing about beyond Definitive.
pub struct RequiredEvals {
    fallback: Option<Arc<dyn LlmContract>>,
    cache: Mutex<HashMap<String, Vec<EvaluationType>>>,
}

impl RequiredEvals {
    pub fn rules_only() -> Self {
        Self {
            fallback: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_fallback(llm: Arc<dyn LlmContract>) -> Self {
        Self {
            fallback: Some(llm),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Required evaluations for a question. The LLM fallback only fires on
    /// a rule miss, and each question is asked at most once.
    pub async fn determine(&self, question: &str) -> DelveResult<Vec<EvaluationType>> {
        if let Some(cached) = self.cache.lock().unwrap().get(question) {
            return Ok(cached.clone());
        }

        let mut required = determine_required_evaluations(question);

        if required == [EvaluationType::Definitive] {
            if let Some(llm) = &self.fallback {
                if let Ok(from_llm) = llm.determine_eval_types(question).await {
                    for eval_type in from_llm {
                        if !required.contains(&eval_type) {
                            required.push(eval_type);
                        }
                    }
                }
            }
        }

        self.cache
            .lock()
            .unwrap()
            .insert(question.to_string(), required.clone());
        Ok(required)
    }
}
