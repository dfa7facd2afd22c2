//! Ward agglomeration of features.
//!
//! Every feature (a column of the design, i.e. a point in sample space)
//! starts as its own cluster. At each step the pair of clusters whose merge
//! least increases the within-cluster sum of squares is joined:
//!
//! ```text
//! Δ(A, B) = |A||B| / (|A| + |B|) · ‖μ_A − μ_B‖²
//! ```
//!
//! With a [`Connectivity`] only adjacent clusters are candidates, which keeps
//! the candidate set sparse and the clusters spatially contiguous. Candidates
//! sit in a binary heap and are invalidated lazily: every cluster carries a
//! version that bumps when it absorbs another, and stale heap entries are
//! skipped when popped.

use crate::cluster::{ClusterAssignment, ClusterError, Connectivity, FeatureClusterer};
use ahash::{AHashMap, AHashSet};
use ndarray::{Array1, ArrayView2, Axis};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Clone, Debug)]
pub struct WardAgglomeration {
    pub n_clusters: usize,
    pub connectivity: Option<Connectivity>,
}

impl WardAgglomeration {
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            connectivity: None,
        }
    }

    pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = Some(connectivity);
        self
    }
}

#[derive(Debug, PartialEq)]
struct Candidate {
    cost: f64,
    a: usize,
    b: usize,
    version_a: u32,
    version_b: u32,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    // Reversed so that `BinaryHeap` pops the cheapest merge, lowest indices first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| (other.a, other.b).cmp(&(self.a, self.b)))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Forest {
    sums: Vec<Array1<f64>>,
    sizes: Vec<usize>,
    versions: Vec<u32>,
    active: Vec<bool>,
    parent: Vec<usize>,
}

impl Forest {
    fn new(x: ArrayView2<f64>) -> Self {
        let p = x.ncols();
        Self {
            sums: x.axis_iter(Axis(1)).map(|col| col.to_owned()).collect(),
            sizes: vec![1; p],
            versions: vec![0; p],
            active: vec![true; p],
            parent: (0..p).collect(),
        }
    }

    fn merge_cost(&self, a: usize, b: usize) -> f64 {
        let size_a = self.sizes[a] as f64;
        let size_b = self.sizes[b] as f64;
        let dist_sq: f64 = self.sums[a]
            .iter()
            .zip(self.sums[b].iter())
            .map(|(sa, sb)| {
                let diff = sa / size_a - sb / size_b;
                diff * diff
            })
            .sum();
        size_a * size_b / (size_a + size_b) * dist_sq
    }

    fn candidate(&self, a: usize, b: usize) -> Candidate {
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        Candidate {
            cost: self.merge_cost(a, b),
            a,
            b,
            version_a: self.versions[a],
            version_b: self.versions[b],
        }
    }

    fn is_current(&self, candidate: &Candidate) -> bool {
        self.active[candidate.a]
            && self.active[candidate.b]
            && self.versions[candidate.a] == candidate.version_a
            && self.versions[candidate.b] == candidate.version_b
    }

    /// Folds `absorbed` into `keep`.
    fn merge(&mut self, keep: usize, absorbed: usize) {
        let moved = std::mem::take(&mut self.sums[absorbed]);
        self.sums[keep] += &moved;
        self.sizes[keep] += self.sizes[absorbed];
        self.versions[keep] += 1;
        self.active[absorbed] = false;
        self.parent[absorbed] = keep;
    }

    fn root(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    /// Flat labels numbered by the first feature of each cluster.
    fn labels(&mut self) -> Vec<usize> {
        let mut numbering: AHashMap<usize, usize> = AHashMap::new();
        let mut labels = Vec::with_capacity(self.parent.len());
        for feature in 0..self.parent.len() {
            let root = self.root(feature);
            let next = numbering.len();
            labels.push(*numbering.entry(root).or_insert(next));
        }
        labels
    }
}

impl FeatureClusterer for WardAgglomeration {
    fn n_clusters(&self) -> usize {
        self.n_clusters
    }

    fn fit(&self, x: ArrayView2<f64>) -> Result<ClusterAssignment, ClusterError> {
        let n_features = x.ncols();
        if self.n_clusters == 0 || self.n_clusters > n_features {
            return Err(ClusterError::InvalidClusterCount {
                n_clusters: self.n_clusters,
                n_features,
            });
        }
        if let Some(graph) = &self.connectivity {
            if graph.n_nodes() != n_features {
                return Err(ClusterError::ConnectivityMismatch {
                    graph_nodes: graph.n_nodes(),
                    n_features,
                });
            }
        }

        let mut forest = Forest::new(x);
        let mut adjacency: Option<Vec<AHashSet<usize>>> = self.connectivity.as_ref().map(|graph| {
            (0..n_features)
                .map(|node| graph.neighbors(node).iter().copied().collect())
                .collect()
        });

        let initial_pairs: Vec<(usize, usize)> = match &self.connectivity {
            Some(graph) => graph.edges().collect(),
            None => (0..n_features)
                .flat_map(|a| ((a + 1)..n_features).map(move |b| (a, b)))
                .collect(),
        };
        let initial: Vec<Candidate> = initial_pairs
            .par_iter()
            .map(|&(a, b)| forest.candidate(a, b))
            .collect();
        let mut heap = BinaryHeap::from(initial);

        let mut remaining = n_features;
        while remaining > self.n_clusters {
            let Some(best) = heap.pop() else {
                return Err(ClusterError::DisconnectedGraph {
                    remaining,
                    requested: self.n_clusters,
                });
            };
            if !forest.is_current(&best) {
                continue;
            }
            let (keep, absorbed) = (best.a, best.b);
            forest.merge(keep, absorbed);
            remaining -= 1;

            let neighbours: Vec<usize> = match adjacency.as_mut() {
                Some(adjacency) => {
                    let absorbed_links = std::mem::take(&mut adjacency[absorbed]);
                    for &other in &absorbed_links {
                        adjacency[other].remove(&absorbed);
                        if other != keep {
                            adjacency[other].insert(keep);
                            adjacency[keep].insert(other);
                        }
                    }
                    adjacency[keep].remove(&absorbed);
                    let mut list: Vec<usize> = adjacency[keep].iter().copied().collect();
                    list.sort_unstable();
                    list
                }
                None => (0..n_features)
                    .filter(|&other| other != keep && forest.active[other])
                    .collect(),
            };

            let refreshed: Vec<Candidate> = neighbours
                .par_iter()
                .map(|&other| forest.candidate(keep, other))
                .collect();
            heap.extend(refreshed);
        }

        let labels = forest.labels();
        log::debug!(
            "Ward agglomeration reduced {} features to {} clusters",
            n_features,
            self.n_clusters
        );
        ClusterAssignment::from_labels(labels, self.n_clusters)
    }
}
