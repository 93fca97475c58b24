use std::cmp::Ordering;

use serde::Serialize;

/// Weights used for linear score fusion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FusionWeights {
    pub similarity: f64,
    pub pagerank: f64,
}

impl FusionWeights {
    pub const FIXED: Self = Self {
        similarity: 0.7,
        pagerank: 0.3,
    };
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self::FIXED
    }
}

/// Entity considered during one query, with every signal it was scored on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalCandidate {
    pub entity_name: String,
    pub description: String,
    pub similarity: f64,
    pub pagerank: f64,
    pub fused_score: f64,
}

impl RetrievalCandidate {
    pub fn new(entity_name: String, description: String, similarity: f64) -> Self {
        Self {
            entity_name,
            description,
            similarity,
            pagerank: 0.0,
            fused_score: 0.0,
        }
    }

    pub fn update_fused(&mut self, pagerank: f64, weights: FusionWeights) {
        self.pagerank = pagerank;
        self.fused_score = fuse_scores(self.similarity, pagerank, weights);
    }
}

/// Cosine similarity, 0.0 when either vector is empty, zero or of a
/// different dimension.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator <= 0.0 || !denominator.is_finite() {
        return 0.0;
    }
    dot / denominator
}

pub fn fuse_scores(similarity: f64, pagerank: f64, weights: FusionWeights) -> f64 {
    weights.similarity * similarity + weights.pagerank * pagerank
}

fn descending(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Stable sort, so equal scores keep store order.
pub fn sort_by_similarity_desc(candidates: &mut [RetrievalCandidate]) {
    candidates.sort_by(|a, b| descending(a.similarity, b.similarity));
}

/// Stable sort, so equal scores keep their incoming order.
pub fn sort_by_fused_desc(candidates: &mut [RetrievalCandidate]) {
    candidates.sort_by(|a, b| descending(a.fused_score, b.fused_score));
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    fn candidate(name: &str, similarity: f64) -> RetrievalCandidate {
        RetrievalCandidate::new(name.to_string(), String::new(), similarity)
    }

    #[test]
    fn test_cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]) + 1.0).abs() < 1e-9);
        assert!((cosine_similarity(&[3.0, 4.0], &[6.0, 8.0]) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_similarity_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_fusion_prefers_similarity_over_pagerank() {
        let mut strong = candidate("strong", 0.9);
        let mut central = candidate("central", 0.1);
        strong.update_fused(0.0, FusionWeights::default());
        central.update_fused(0.9, FusionWeights::default());

        assert!((strong.fused_score - 0.63).abs() < 1e-9);
        assert!((central.fused_score - 0.34).abs() < 1e-9);

        let mut ranked = vec![central, strong];
        sort_by_fused_desc(&mut ranked);
        assert_eq!(ranked[0].entity_name, "strong");
    }

    #[test]
    fn test_fusion_is_monotonic_in_both_signals() {
        let weights = FusionWeights::FIXED;
        let grid = [0.0, 0.1, 0.25, 0.5, 0.75, 1.0];
        for &similarity in &grid {
            for &pagerank in &grid {
                let base = fuse_scores(similarity, pagerank, weights);
                assert!(fuse_scores(similarity + 0.05, pagerank, weights) > base);
                assert!(fuse_scores(similarity, pagerank + 0.05, weights) > base);
            }
        }
    }

    #[test]
    fn test_sorting_is_stable_on_ties() {
        let mut candidates = vec![
            candidate("first", 0.5),
            candidate("second", 0.8),
            candidate("third", 0.5),
            candidate("fourth", 0.8),
        ];
        sort_by_similarity_desc(&mut candidates);

        let names: Vec<&str> = candidates.iter().map(|c| c.entity_name.as_str()).collect();
        assert_eq!(names, vec!["second", "fourth", "first", "third"]);
    }
}
