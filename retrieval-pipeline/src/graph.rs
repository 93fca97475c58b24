use std::collections::HashMap;

use common::storage::graph_store::NeighborPair;
use petgraph::graph::{NodeIndex, UnGraph};
use tracing::debug;

pub const PAGERANK_DAMPING: f64 = 0.85;
pub const PAGERANK_TOLERANCE: f64 = 1e-6;
pub const PAGERANK_MAX_ITER: usize = 100;

/// Undirected projection of a k-hop neighbourhood. Relation types are
/// dropped and nodes only exist through the edges that touch them.
#[derive(Debug, Default)]
pub struct LocalGraph {
    graph: UnGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
}

impl LocalGraph {
    pub fn from_pairs(pairs: &[NeighborPair]) -> Self {
        let mut local = Self::default();
        for pair in pairs {
            let a = local.node(&pair.name);
            let b = local.node(&pair.neighbor_name);
            // Self relations add the node but carry no rank.
            if a != b {
                local.graph.update_edge(a, b, ());
            }
        }
        local
    }

    fn node(&mut self, name: &str) -> NodeIndex {
        if let Some(index) = self.nodes.get(name) {
            return *index;
        }
        let index = self.graph.add_node(name.to_string());
        self.nodes.insert(name.to_string(), index);
        index
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Power-iteration PageRank. Dangling mass is spread uniformly and the
    /// run stops once the L1 change drops below `tolerance * node_count`.
    #[allow(clippy::cast_precision_loss)]
    pub fn pagerank(&self, damping: f64, tolerance: f64, max_iter: usize) -> HashMap<String, f64> {
        let n = self.graph.node_count();
        if n == 0 {
            return HashMap::new();
        }

        let uniform = 1.0 / n as f64;
        let degrees: Vec<usize> = self
            .graph
            .node_indices()
            .map(|node| self.graph.neighbors(node).count())
            .collect();
        let mut scores = vec![uniform; n];
        let mut converged = false;

        for iteration in 0..max_iter {
            let dangling_sum: f64 = scores
                .iter()
                .zip(&degrees)
                .filter(|(_, degree)| **degree == 0)
                .map(|(score, _)| *score)
                .sum();
            let shares: Vec<f64> = scores
                .iter()
                .zip(&degrees)
                .map(|(score, degree)| {
                    if *degree == 0 {
                        0.0
                    } else {
                        score / *degree as f64
                    }
                })
                .collect();

            let base = (1.0 - damping) * uniform + damping * dangling_sum * uniform;
            let next: Vec<f64> = self
                .graph
                .node_indices()
                .map(|node| {
                    let inflow: f64 = self
                        .graph
                        .neighbors(node)
                        .filter_map(|neighbor| shares.get(neighbor.index()))
                        .sum();
                    base + damping * inflow
                })
                .collect();

            let delta: f64 = next
                .iter()
                .zip(&scores)
                .map(|(new, old)| (new - old).abs())
                .sum();
            scores = next;

            if delta < tolerance * n as f64 {
                debug!(iteration, delta, "pagerank converged");
                converged = true;
                break;
            }
        }

        if !converged {
            debug!(max_iter, "pagerank hit the iteration cap");
        }

        self.graph
            .node_indices()
            .filter_map(|node| {
                let name = self.graph.node_weight(node)?;
                let score = scores.get(node.index())?;
                Some((name.clone(), *score))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(a: &str, b: &str) -> NeighborPair {
        NeighborPair {
            name: a.to_string(),
            description: String::new(),
            neighbor_name: b.to_string(),
            neighbor_description: String::new(),
        }
    }

    fn rank(pairs: &[NeighborPair]) -> HashMap<String, f64> {
        LocalGraph::from_pairs(pairs).pagerank(
            PAGERANK_DAMPING,
            PAGERANK_TOLERANCE,
            PAGERANK_MAX_ITER,
        )
    }

    #[test]
    fn test_empty_graph_has_no_scores() {
        let graph = LocalGraph::from_pairs(&[]);
        assert_eq!(graph.node_count(), 0);
        assert!(rank(&[]).is_empty());
    }

    #[test]
    fn test_reverse_edges_collapse() {
        let graph = LocalGraph::from_pairs(&[pair("a", "b"), pair("b", "a")]);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.contains("a"));
        assert!(!graph.contains("c"));
    }

    #[test]
    fn test_scores_sum_to_one() {
        let scores = rank(&[pair("a", "b"), pair("b", "c"), pair("c", "d")]);
        let total: f64 = scores.values().sum();
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_star_center_ranks_highest() {
        let scores = rank(&[
            pair("hub", "a"),
            pair("hub", "b"),
            pair("c", "hub"),
            pair("hub", "d"),
        ]);
        let hub = scores["hub"];
        for leaf in ["a", "b", "c", "d"] {
            assert!(hub > scores[leaf]);
        }
        assert!((scores["a"] - scores["d"]).abs() < 1e-9);
    }

    #[test]
    fn test_symmetric_pair_splits_evenly() {
        let scores = rank(&[pair("a", "b")]);
        assert!((scores["a"] - 0.5).abs() < 1e-9);
        assert!((scores["b"] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_self_loop_node_is_dangling() {
        let scores = rank(&[pair("solo", "solo"), pair("a", "b")]);
        assert_eq!(scores.len(), 3);
        let total: f64 = scores.values().sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!(scores["a"] > scores["solo"]);
    }
}
