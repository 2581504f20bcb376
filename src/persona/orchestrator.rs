use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{PersonaRegistry, QueryContext};
use crate::types::{SerpQuery, WeightedQuery};

/// Timing and I/O record for one persona expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaExecutionMetrics {
    pub persona_name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub input: String,
    pub output_query: SerpQuery,
}

impl PersonaExecutionMetrics {
    pub fn duration_ms(&self) -> i64 {
        (self.end - self.start).num_milliseconds()
    }
}

/// Result of one expansion round: the weighted queries that survived the
/// same-query tie-break, plus one metrics record per persona that ran.
#[derive(Debug, Clone)]
pub struct Expansion {
    pub queries: Vec<WeightedQuery>,
    pub metrics: Vec<PersonaExecutionMetrics>,
}

/// Runs every applicable persona against input queries, truly in parallel
/// across CPU cores.
pub struct PersonaOrchestrator {
    registry: PersonaRegistry,
}

impl PersonaOrchestrator {
    pub fn new(registry: PersonaRegistry) -> Self {
        Self { registry }
    }

    pub fn with_defaults() -> Self {
        Self::new(PersonaRegistry::with_defaults())
    }

    pub fn registry(&self) -> &PersonaRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut PersonaRegistry {
        &mut self.registry
    }

    /// Expand one query with every applicable persona concurrently.
    ///
    /// When two personas produce the same normalized query string, the
    /// instance with the highest weight survives; registration order
    /// breaks remaining ties. Output order follows registration order.
    pub fn expand_parallel(&self, original: &str, context: &QueryContext) -> Expansion {
        let raw: Vec<(WeightedQuery, PersonaExecutionMetrics)> = self
            .registry
            .personas()
            .par_iter()
            .filter(|persona| persona.is_applicable(context))
            .map(|persona| {
                let start = Utc::now();
                let query = persona.expand(original, context);
                let end = Utc::now();
                let weighted = WeightedQuery {
                    query: query.clone(),
                    weight: persona.weight(),
                    source_persona: persona.name().to_string(),
                };
                let metrics = PersonaExecutionMetrics {
                    persona_name: persona.name().to_string(),
                    start,
                    end,
                    input: original.to_string(),
                    output_query: query,
                };
                (weighted, metrics)
            })
            .collect();

        let mut metrics = Vec::with_capacity(raw.len());
        let mut queries = Vec::with_capacity(raw.len());
        for (weighted, m) in raw {
            metrics.push(m);
            queries.push(weighted);
        }

        Expansion {
            queries: dedup_same_query(queries),
            metrics,
        }
    }

    /// Expand a batch of input queries, parallel across queries as well as
    /// across personas. Results keep input-query order.
    pub fn expand_batch(&self, originals: &[String], context: &QueryContext) -> Expansion {
        let per_query: Vec<Expansion> = originals
            .par_iter()
            .map(|q| self.expand_parallel(q, context))
            .collect();

        let mut queries = Vec::new();
        let mut metrics = Vec::new();
        for expansion in per_query {
            queries.extend(expansion.queries);
            metrics.extend(expansion.metrics);
        }
        Expansion { queries, metrics }
    }

    pub fn persona_count(&self) -> usize {
        self.registry.len()
    }
}

impl Default for PersonaOrchestrator {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Keep one instance per normalized query string: highest weight wins,
/// earlier (registration-order) position wins on equal weight.
fn dedup_same_query(queries: Vec<WeightedQuery>) -> Vec<WeightedQuery> {
    let mut best: HashMap<String, usize> = HashMap::new();
    for (idx, wq) in queries.iter().enumerate() {
        let key = wq.query.normalized();
        match best.get(&key) {
            Some(&existing) if queries[existing].weight >= wq.weight => {}
            _ => {
                best.insert(key, idx);
            }
        }
    }

    let mut keep: Vec<usize> = best.into_values().collect();
    keep.sort_unstable();
    keep.into_iter().map(|i| queries[i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::{CognitivePersona, PersonaRegistry};
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn ctx() -> QueryContext {
        QueryContext::new("test", NaiveDate::from_ymd_opt(2025, 6, 15).unwrap())
    }

    struct FixedPersona {
        name: &'static str,
        output: &'static str,
        weight: f32,
    }

    impl CognitivePersona for FixedPersona {
        fn name(&self) -> &str {
            self.name
        }
        fn focus(&self) -> &str {
            "a fixed test perspective"
        }
        fn weight(&self) -> f32 {
            self.weight
        }
        fn expand(&self, _original: &str, _ctx: &QueryContext) -> SerpQuery {
            SerpQuery::new(self.output)
        }
    }

    #[test]
    fn expands_with_all_default_personas() {
        let orchestrator = PersonaOrchestrator::with_defaults();
        let expansion = orchestrator.expand_parallel("rust web frameworks", &ctx());

        assert_eq!(expansion.queries.len(), 7);
        assert_eq!(expansion.metrics.len(), 7);

        let sources: Vec<_> = expansion
            .queries
            .iter()
            .map(|wq| wq.source_persona.as_str())
            .collect();
        assert!(sources.contains(&"Expert Skeptic"));
        assert!(sources.contains(&"Temporal Context"));
    }

    #[test]
    fn batch_expands_every_input() {
        let orchestrator = PersonaOrchestrator::with_defaults();
        let inputs = vec!["rust".to_string(), "tokio".to_string()];
        let expansion = orchestrator.expand_batch(&inputs, &ctx());
        assert_eq!(expansion.queries.len(), 14);
        assert_eq!(expansion.metrics.len(), 14);
    }

    #[test]
    fn metrics_record_input_and_output() {
        let orchestrator = PersonaOrchestrator::with_defaults();
        let expansion = orchestrator.expand_parallel("embedded rust", &ctx());
        for m in &expansion.metrics {
            assert_eq!(m.input, "embedded rust");
            assert!(!m.output_query.q.is_empty());
            assert!(m.end >= m.start);
        }
    }

    #[test]
    fn expansion_is_deterministic_given_fixed_clock() {
        let orchestrator = PersonaOrchestrator::with_defaults();
        let a = orchestrator.expand_parallel("quantum computing", &ctx());
        let b = orchestrator.expand_parallel("quantum computing", &ctx());
        let qa: Vec<_> = a.queries.iter().map(|w| &w.query.q).collect();
        let qb: Vec<_> = b.queries.iter().map(|w| &w.query.q).collect();
        assert_eq!(qa, qb);
    }

    #[test]
    fn same_query_keeps_highest_weight() {
        let mut registry = PersonaRegistry::new();
        registry
            .register(Arc::new(FixedPersona {
                name: "Light",
                output: "same query",
                weight: 0.8,
            }))
            .unwrap();
        registry
            .register(Arc::new(FixedPersona {
                name: "Heavy",
                output: "Same Query!",
                weight: 1.5,
            }))
            .unwrap();

        let orchestrator = PersonaOrchestrator::new(registry);
        let expansion = orchestrator.expand_parallel("x", &ctx());
        assert_eq!(expansion.queries.len(), 1);
        assert_eq!(expansion.queries[0].source_persona, "Heavy");
        // Both personas still ran and were measured
        assert_eq!(expansion.metrics.len(), 2);
    }

    #[test]
    fn same_query_equal_weight_keeps_registration_order() {
        let mut registry = PersonaRegistry::new();
        registry
            .register(Arc::new(FixedPersona {
                name: "First",
                output: "identical",
                weight: 1.0,
            }))
            .unwrap();
        registry
            .register(Arc::new(FixedPersona {
                name: "Second",
                output: "identical",
                weight: 1.0,
            }))
            .unwrap();

        let orchestrator = PersonaOrchestrator::new(registry);
        let expansion = orchestrator.expand_parallel("x", &ctx());
        assert_eq!(expansion.queries.len(), 1);
        assert_eq!(expansion.queries[0].source_persona, "First");
    }
}
