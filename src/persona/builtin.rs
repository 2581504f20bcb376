//! The seven built-in cognitive personas.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::Datelike;

use super::{extract_main_topic, negate_assumption, CognitivePersona, QueryContext};
use crate::types::{SerpQuery, TopicCategory};

/// Hunts for problems, limitations and counter-evidence.
pub struct ExpertSkeptic;

impl CognitivePersona for ExpertSkeptic {
    fn name(&self) -> &str {
        "Expert Skeptic"
    }

    fn focus(&self) -> &str {
        "edge cases, limitations, counter-evidence, potential failures"
    }

    fn expand(&self, original: &str, _context: &QueryContext) -> SerpQuery {
        const SKEPTIC_TERMS: [&str; 5] =
            ["problems", "issues", "failures", "limitations", "drawbacks"];
        let topic = extract_main_topic(original);

        // Stable hash keeps the choice varied across topics but identical
        // across runs for the same query.
        let mut hasher = DefaultHasher::new();
        topic.hash(&mut hasher);
        let term = SKEPTIC_TERMS[(hasher.finish() % SKEPTIC_TERMS.len() as u64) as usize];

        SerpQuery::new(format!("{topic} {term} real experiences"))
    }
}

/// Focuses on precise specifications and measurable parameters.
pub struct DetailAnalyst;

impl CognitivePersona for DetailAnalyst {
    fn name(&self) -> &str {
        "Detail Analyst"
    }

    fn focus(&self) -> &str {
        "precise specifications, technical details, exact parameters"
    }

    fn expand(&self, original: &str, _context: &QueryContext) -> SerpQuery {
        let topic = extract_main_topic(original);
        SerpQuery::new(format!("{topic} specifications technical details comparison"))
    }
}

/// Looks at how the subject evolved over time.
pub struct HistoricalResearcher;

impl CognitivePersona for HistoricalResearcher {
    fn name(&self) -> &str {
        "Historical Researcher"
    }

    fn focus(&self) -> &str {
        "evolution over time, previous iterations, historical context"
    }

    fn expand(&self, original: &str, context: &QueryContext) -> SerpQuery {
        let topic = extract_main_topic(original);
        let year = context.current_date.year();
        SerpQuery::new(format!("{topic} history evolution {} changes", year - 5))
            .with_recency("qdr:y")
    }
}

/// Compares the subject against its alternatives.
pub struct ComparativeThinker;

impl CognitivePersona for ComparativeThinker {
    fn name(&self) -> &str {
        "Comparative Thinker"
    }

    fn focus(&self) -> &str {
        "alternatives, competitors, contrasts, trade-offs"
    }

    fn expand(&self, original: &str, _context: &QueryContext) -> SerpQuery {
        let topic = extract_main_topic(original);
        SerpQuery::new(format!("{topic} vs alternatives comparison pros cons"))
    }
}

/// Anchors the query to the current date and attaches a recency filter.
pub struct TemporalContext;

impl CognitivePersona for TemporalContext {
    fn name(&self) -> &str {
        "Temporal Context"
    }

    fn focus(&self) -> &str {
        "time-sensitive queries, recency, current state"
    }

    fn weight(&self) -> f32 {
        1.2
    }

    fn expand(&self, original: &str, context: &QueryContext) -> SerpQuery {
        let topic = extract_main_topic(original);
        let year = context.current_date.year();
        let month = context.current_date.month();
        SerpQuery::new(format!("{topic} {year} {month}")).with_recency("qdr:m")
    }
}

/// Searches in the language and region most authoritative for the topic.
pub struct Globalizer;

impl CognitivePersona for Globalizer {
    fn name(&self) -> &str {
        "Globalizer"
    }

    fn focus(&self) -> &str {
        "authoritative language and region for the subject matter"
    }

    fn expand(&self, original: &str, context: &QueryContext) -> SerpQuery {
        let translator = context.translator.as_ref();
        let (query, location) = match &context.topic {
            TopicCategory::Automotive(brand) => match brand.as_str() {
                "BMW" | "Mercedes" | "Audi" | "Volkswagen" | "Porsche" => {
                    (translator.translate(original, "de"), Some("Germany"))
                }
                "Toyota" | "Honda" | "Nissan" | "Mazda" | "Subaru" => {
                    (translator.translate(original, "ja"), Some("Japan"))
                }
                _ => (original.to_string(), None),
            },
            TopicCategory::Cuisine(cuisine) => match cuisine.as_str() {
                "Italian" | "Pizza" | "Pasta" => {
                    (translator.translate(original, "it"), Some("Italy"))
                }
                "French" | "Wine" => (translator.translate(original, "fr"), Some("France")),
                "Japanese" | "Sushi" | "Ramen" => {
                    (translator.translate(original, "ja"), Some("Japan"))
                }
                _ => (original.to_string(), None),
            },
            TopicCategory::Technology => (original.to_string(), Some("San Francisco")),
            TopicCategory::Finance => (original.to_string(), Some("New York")),
            _ => (original.to_string(), None),
        };

        let mut serp = SerpQuery::new(query);
        if let Some(loc) = location {
            serp = serp.with_location(loc);
        }
        serp
    }
}

/// Tries to disprove the question's assumption.
pub struct RealitySkepticalist;

impl CognitivePersona for RealitySkepticalist {
    fn name(&self) -> &str {
        "Reality Skepticalist"
    }

    fn focus(&self) -> &str {
        "contradicting evidence, disprove assumptions, contrary perspectives"
    }

    fn expand(&self, original: &str, _context: &QueryContext) -> SerpQuery {
        let negated = negate_assumption(original);
        SerpQuery::new(format!("{negated} wrong myth debunked evidence against"))
    }
}
