use serde::Serialize;

use crate::{
    graph::{PAGERANK_DAMPING, PAGERANK_MAX_ITER, PAGERANK_TOLERANCE},
    scoring::FusionWeights,
};

pub const SEED_LIMIT: usize = 10;
pub const MAX_HOPS: usize = 2;
pub const FINAL_LIMIT: usize = 20;

/// Retrieval constants. Fixed for every query; kept in one place so logs
/// and tests can read them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetrievalTuning {
    pub seed_limit: usize,
    pub max_hops: usize,
    pub final_limit: usize,
    pub fusion: FusionWeights,
    pub pagerank_damping: f64,
    pub pagerank_tolerance: f64,
    pub pagerank_max_iter: usize,
}

impl Default for RetrievalTuning {
    fn default() -> Self {
        Self {
            seed_limit: SEED_LIMIT,
            max_hops: MAX_HOPS,
            final_limit: FINAL_LIMIT,
            fusion: FusionWeights::FIXED,
            pagerank_damping: PAGERANK_DAMPING,
            pagerank_tolerance: PAGERANK_TOLERANCE,
            pagerank_max_iter: PAGERANK_MAX_ITER,
        }
    }
}
