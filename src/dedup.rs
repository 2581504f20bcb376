//! Query dedup gate.
//!
//! Before searching, candidate queries are embedded and rejected when they
//! are near-duplicates of anything already executed or already accepted in
//! the same batch. If the embedding provider fails, the gate degrades to
//! exact-string dedup and says so on the event bus.

use std::collections::HashSet;
use std::sync::Arc;

use crate::adapter::EmbeddingContract;
use crate::config::QUERY_DEDUP_THRESHOLD;
use crate::event::{EventBus, ProgressEvent};
use crate::similarity::dedup_against;
use crate::types::SerpQuery;

/// Result of one gate pass. Accepted queries preserve input order;
/// `embeddings` is empty when the gate ran in degraded string mode.
#[derive(Debug)]
pub struct DedupOutcome {
    pub accepted: Vec<SerpQuery>,
    pub embeddings: Vec<Vec<f32>>,
    pub removed: usize,
    pub degraded: bool,
}

/// Semantic dedup gate over the embedding contract.
pub struct QueryDedupGate {
    embedder: Arc<dyn EmbeddingContract>,
    threshold: f32,
}

impl QueryDedupGate {
    pub fn new(embedder: Arc<dyn EmbeddingContract>) -> Self {
        Self {
            embedder,
            threshold: QUERY_DEDUP_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Filter a candidate batch against previously executed queries.
    ///
    /// `executed_texts` and `executed_embeddings` are parallel histories of
    /// what already ran (embeddings may be shorter when earlier batches
    /// degraded).
    pub async fn filter(
        &self,
        candidates: Vec<SerpQuery>,
        executed_texts: &[String],
        executed_embeddings: &[Vec<f32>],
        bus: &EventBus,
    ) -> DedupOutcome {
        let original_count = candidates.len();
        if candidates.is_empty() {
            return DedupOutcome {
                accepted: candidates,
                embeddings: Vec::new(),
                removed: 0,
                degraded: false,
            };
        }

        let texts: Vec<String> = candidates.iter().map(|q| q.q.clone()).collect();
        let outcome = match self.embedder.embed(&texts).await {
            Ok(candidate_embeddings) => {
                self.semantic_filter(candidates, candidate_embeddings, executed_embeddings)
            }
            Err(e) => {
                log::warn!("embedding provider failed, degrading to string dedup: {e}");
                bus.warning(format!("query dedup degraded to string matching: {e}"));
                Self::string_filter(candidates, executed_texts)
            }
        };

        bus.emit(ProgressEvent::Dedup {
            original_count,
            unique_count: outcome.accepted.len(),
            removed_count: outcome.removed,
            threshold: self.threshold,
            degraded: outcome.degraded,
        });
        outcome
    }

    fn semantic_filter(
        &self,
        candidates: Vec<SerpQuery>,
        candidate_embeddings: Vec<Vec<f32>>,
        executed: &[Vec<f32>],
    ) -> DedupOutcome {
        let original_count = candidates.len();
        let mut accepted = Vec::new();
        let mut embeddings: Vec<Vec<f32>> = Vec::new();

        for (query, embedding) in candidates.into_iter().zip(candidate_embeddings) {
            let dup_executed = dedup_against(&embedding, executed, self.threshold);
            let dup_accepted = dedup_against(&embedding, &embeddings, self.threshold);
            if dup_executed || dup_accepted {
                continue;
            }
            accepted.push(query);
            embeddings.push(embedding);
        }

        DedupOutcome {
            removed: original_count - accepted.len(),
            accepted,
            embeddings,
            degraded: false,
        }
    }

    fn string_filter(candidates: Vec<SerpQuery>, executed_texts: &[String]) -> DedupOutcome {
        let original_count = candidates.len();
        let executed: HashSet<String> = executed_texts
            .iter()
            .map(|t| SerpQuery::new(t.clone()).normalized())
            .collect();

        let mut seen = HashSet::new();
        let mut accepted = Vec::new();
        for query in candidates {
            let normalized = query.normalized();
            if normalized.is_empty()
                || executed.contains(&normalized)
                || seen.contains(&normalized)
            {
                continue;
            }
            seen.insert(normalized);
            accepted.push(query);
        }

        DedupOutcome {
            removed: original_count - accepted.len(),
            accepted,
            embeddings: Vec::new(),
            degraded: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::HashEmbedder;

    fn gate() -> QueryDedupGate {
        QueryDedupGate::new(Arc::new(HashEmbedder::new(128)))
    }

    fn queries(texts: &[&str]) -> Vec<SerpQuery> {
        texts.iter().map(|t| SerpQuery::new(*t)).collect()
    }

    #[tokio::test]
    async fn accepts_distinct_queries_in_order() {
        let bus = EventBus::new();
        let outcome = gate()
            .filter(
                queries(&["rust web frameworks", "solar panel efficiency"]),
                &[],
                &[],
                &bus,
            )
            .await;
        assert_eq!(outcome.accepted.len(), 2);
        assert_eq!(outcome.accepted[0].q, "rust web frameworks");
        assert_eq!(outcome.embeddings.len(), 2);
        assert!(!outcome.degraded);
    }

    #[tokio::test]
    async fn rejects_near_duplicates_within_batch() {
        let bus = EventBus::new();
        // Stop-word-only difference: same bag of content words
        let outcome = gate()
            .filter(
                queries(&["rust web frameworks", "the rust web frameworks"]),
                &[],
                &[],
                &bus,
            )
            .await;
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.removed, 1);
    }

    #[tokio::test]
    async fn rejects_against_executed_history() {
        let bus = EventBus::new();
        let embedder = Arc::new(HashEmbedder::new(128));
        let executed_embs = embedder.embed(&["rust async runtime".into()]).await.unwrap();

        let outcome = QueryDedupGate::new(embedder)
            .filter(
                queries(&["rust async runtime", "baking sourdough bread"]),
                &["rust async runtime".into()],
                &executed_embs,
                &bus,
            )
            .await;
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].q, "baking sourdough bread");
    }

    #[tokio::test]
    async fn degrades_to_string_dedup_on_embedding_failure() {
        let bus = EventBus::new();
        let embedder = Arc::new(HashEmbedder::new(128));
        embedder.set_failing(true);

        let outcome = QueryDedupGate::new(embedder)
            .filter(
                queries(&["Rust Web Frameworks!", "rust web frameworks", "other topic"]),
                &[],
                &[],
                &bus,
            )
            .await;

        assert!(outcome.degraded);
        assert_eq!(outcome.accepted.len(), 2);
        assert!(outcome.embeddings.is_empty());

        let events = bus.drain();
        assert!(events
            .iter()
            .any(|e| matches!(e, ProgressEvent::Warning(_))));
        assert!(events
            .iter()
            .any(|e| matches!(e, ProgressEvent::Dedup { degraded: true, .. })));
    }

    #[tokio::test]
    async fn string_mode_rejects_executed_texts() {
        let bus = EventBus::new();
        let embedder = Arc::new(HashEmbedder::new(128));
        embedder.set_failing(true);

        let outcome = QueryDedupGate::new(embedder)
            .filter(
                queries(&["already ran", "brand new"]),
                &["Already ran!".into()],
                &[],
                &bus,
            )
            .await;
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].q, "brand new");
    }

    #[tokio::test]
    async fn idempotent_on_accepted_set() {
        let bus = EventBus::new();
        let gate = gate();
        let first = gate
            .filter(
                queries(&["alpha beta", "alpha beta gamma", "delta epsilon"]),
                &[],
                &[],
                &bus,
            )
            .await;
        let second = gate.filter(first.accepted.clone(), &[], &[], &bus).await;
        assert_eq!(
            first.accepted.iter().map(|q| &q.q).collect::<Vec<_>>(),
            second.accepted.iter().map(|q| &q.q).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn empty_batch_is_noop() {
        let bus = EventBus::new();
        let outcome = gate().filter(vec![], &[], &[], &bus).await;
        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.removed, 0);
    }
}
