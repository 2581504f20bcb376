//! Knowledge and URL store.
//!
//! Two per-session tables shared between the agent loop and its parallel
//! sub-tasks: a dedup set of discovered URLs with deterministic scores, and
//! an insertion-ordered knowledge log. Writes happen at step-merge
//! boundaries; each table serialises its own writes and no lock is held
//! across a suspension point.

mod knowledge;
mod urls;

pub use knowledge::*;
pub use urls::*;

use std::collections::HashSet;

use crate::types::Reference;

/// Minimum word-overlap (Jaccard) between an answer sentence and a
/// knowledge sentence for a citation match.
const REFERENCE_OVERLAP_THRESHOLD: f32 = 0.3;

/// Split text into rough sentences for overlap matching.
fn split_sentences(text: &str) -> Vec<&str> {
    text.split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| s.len() > 20)
        .collect()
}

fn word_set(sentence: &str) -> HashSet<String> {
    sentence
        .split_whitespace()
        .map(|w| {
            w.to_lowercase()
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_string()
        })
        .filter(|w| w.len() > 2)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f32 / union as f32
}

/// Extract references for an answer by sentence-level overlap against
/// knowledge items that carry a source URL.
///
/// Each matching knowledge sentence becomes the excerpt of a `Reference`
/// pointing at that item's source. Only URLs present in the store with
/// `visited = true` survive; one reference per URL, first match wins.
pub fn extract_references(
    answer: &str,
    knowledge: &KnowledgeLog,
    urls: &UrlStore,
) -> Vec<Reference> {
    let answer_sentences: Vec<HashSet<String>> = split_sentences(answer)
        .into_iter()
        .map(word_set)
        .collect();
    if answer_sentences.is_empty() {
        return Vec::new();
    }

    let mut references = Vec::new();
    let mut cited: HashSet<String> = HashSet::new();

    for item in knowledge.items() {
        let Some(source_url) = item.source_url() else {
            continue;
        };
        let canonical = canonicalize(source_url);
        if cited.contains(&canonical) {
            continue;
        }
        let Some(record) = urls.get(&canonical) else {
            continue;
        };
        if !record.visited {
            continue;
        }

        let matched = split_sentences(item.body()).into_iter().find(|sentence| {
            let words = word_set(sentence);
            answer_sentences
                .iter()
                .any(|ans| jaccard(&words, ans) >= REFERENCE_OVERLAP_THRESHOLD)
        });

        if let Some(excerpt) = matched {
            let mut reference = Reference::new(excerpt, canonical.clone());
            if !record.title.is_empty() {
                reference = reference.with_title(record.title.clone());
            }
            cited.insert(canonical);
            references.push(reference);
        }
    }

    references
}

/// Drop references whose URL is not a visited store entry.
pub fn validate_references(references: Vec<Reference>, urls: &UrlStore) -> Vec<Reference> {
    references
        .into_iter()
        .filter_map(|mut r| {
            let canonical = canonicalize(&r.source_url);
            let record = urls.get(&canonical)?;
            if !record.visited {
                return None;
            }
            r.source_url = canonical;
            if r.title.is_none() && !record.title.is_empty() {
                r.title = Some(record.title.clone());
            }
            Some(r)
        })
        .collect()
}
