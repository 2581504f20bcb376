//! Similarity kernel: cosine similarity over float vectors and batched
//! dedup checks. Pure computation with no I/O or shared state; the batch
//! paths fan out over a work-stealing pool and are safe to call from any
//! thread.

use rayon::prelude::*;

/// Cosine similarity between two equal-length vectors.
///
/// Returns 0.0 when either vector has zero norm. Numerically consistent
/// with the naive formulation to within 1e-5 for 32-bit inputs of length
/// up to 4096.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vectors must have the same length");

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// True iff any accepted embedding has similarity >= threshold with the
/// candidate. The threshold boundary itself counts as a duplicate.
pub fn dedup_against(new_emb: &[f32], accepted: &[Vec<f32>], threshold: f32) -> bool {
    accepted
        .par_iter()
        .any(|existing| cosine(new_emb, existing) >= threshold)
}

/// Indices of embeddings similar to the query at or above the threshold,
/// with their similarity scores.
pub fn find_similar(query: &[f32], existing: &[Vec<f32>], threshold: f32) -> Vec<(usize, f32)> {
    existing
        .par_iter()
        .enumerate()
        .filter_map(|(idx, emb)| {
            let sim = cosine(query, emb);
            (sim >= threshold).then_some((idx, sim))
        })
        .collect()
}

/// Greedy order-preserving dedup of a batch of embeddings against an
/// existing pool and against earlier accepted members of the same batch.
/// Returns the indices of the unique entries, in input order.
///
/// Idempotent: running the result set through again yields the same set.
pub fn dedup_batch(
    new_embeddings: &[Vec<f32>],
    existing: &[Vec<f32>],
    threshold: f32,
) -> Vec<usize> {
    let mut unique = Vec::new();
    let mut accepted: Vec<&[f32]> = Vec::new();

    for (idx, emb) in new_embeddings.iter().enumerate() {
        if dedup_against(emb, existing, threshold) {
            continue;
        }
        let dup_in_batch = accepted.iter().any(|acc| cosine(emb, acc) >= threshold);
        if !dup_in_batch {
            unique.push(idx);
            accepted.push(emb.as_slice());
        }
    }

    unique
}

/// L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}
