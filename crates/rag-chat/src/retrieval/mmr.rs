//! Maximal Marginal Relevance (MMR) selection
//!
//! MMR = λ × similarity(query, doc) - (1-λ) × max(similarity(doc, selected))
//!
//! λ = 1.0: pure relevance, λ = 0.0: pure diversity.

use simsimd::SpatialSimilarity;

/// Cosine similarity; 0.0 when either vector has zero magnitude or lengths differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.iter().all(|x| *x == 0.0) || b.iter().all(|x| *x == 0.0) {
        return 0.0;
    }
    match <f32 as SpatialSimilarity>::cosine(a, b) {
        Some(distance) if distance.is_finite() => (1.0 - distance) as f32,
        _ => 0.0,
    }
}

/// Greedily pick `k` candidates, returning their indices in pick order
///
/// The first pick is always the candidate most similar to the query.
pub fn mmr_select(query: &[f32], candidates: &[&[f32]], k: usize, lambda: f32) -> Vec<usize> {
    let k = k.min(candidates.len());
    if k == 0 {
        return Vec::new();
    }

    let relevance: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity(query, c))
        .collect();
    // Highest similarity of each remaining candidate to the picked set
    let mut redundancy = vec![f32::NEG_INFINITY; candidates.len()];
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut selected = Vec::with_capacity(k);

    while selected.len() < k {
        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;
        for (pos, &idx) in remaining.iter().enumerate() {
            let score = if selected.is_empty() {
                relevance[idx]
            } else {
                lambda * relevance[idx] - (1.0 - lambda) * redundancy[idx]
            };
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }

        let picked = remaining.remove(best_pos);
        selected.push(picked);
        for &idx in &remaining {
            let sim = cosine_similarity(candidates[idx], candidates[picked]);
            if sim > redundancy[idx] {
                redundancy[idx] = sim;
            }
        }
    }

    selected
}
