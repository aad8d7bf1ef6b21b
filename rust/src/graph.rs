//! Dense, immutable CSR graph used by every search.

use std::fmt;
use std::hash::Hasher;

use rustc_hash::{FxHashMap, FxHasher};

use crate::interner::{NodeId, NodeIndex, NodeInterner};
use crate::network::{CanonicalGraph, GraphError};

/// Stable identity of a canonical graph.
///
/// FxHash is not randomly seeded, so the same graph yields the same value in
/// every process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphFingerprint(pub u64);

impl GraphFingerprint {
    pub fn of(graph: &CanonicalGraph) -> Self {
        let mut hasher = FxHasher::default();
        hasher.write_usize(graph.nodes.len());
        for &node in &graph.nodes {
            hasher.write_i64(node);
        }
        hasher.write_usize(graph.edges.len());
        for edge in &graph.edges {
            hasher.write_i64(edge.source);
            hasher.write_i64(edge.target);
            hasher.write_u64(edge.minutes.to_bits());
        }
        Self(hasher.finish())
    }
}

impl fmt::Display for GraphFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Integer-indexed adjacency in compressed sparse row form.
///
/// Out-edges of node `u` live in `targets[offsets[u]..offsets[u + 1]]`,
/// sorted by target index, with matching `weights`. Never mutated after
/// [`IndexedGraph::build`], so it can be shared across threads as-is.
#[derive(Debug, Clone)]
pub struct IndexedGraph {
    interner: NodeInterner,
    offsets: Vec<u32>,
    targets: Vec<NodeIndex>,
    weights: Vec<f64>,
    fingerprint: GraphFingerprint,
}

/// CSR offsets are `u32`, so the edge count must fit one.
fn check_edge_count(edges: usize) -> Result<(), GraphError> {
    if edges > u32::MAX as usize {
        return Err(GraphError::TooManyEdges(edges));
    }
    Ok(())
}

impl IndexedGraph {
    /// Build the CSR structure from a canonical graph.
    ///
    /// Node indices follow the order of `graph.nodes`. Of several parallel
    /// edges only the cheapest is kept; self-loops are dropped since they
    /// can never shorten a path.
    pub fn build(graph: &CanonicalGraph) -> Result<Self, GraphError> {
        let n = graph.nodes.len();
        if n > u32::MAX as usize {
            return Err(GraphError::TooManyNodes(n));
        }

        let mut interner = NodeInterner::with_capacity(n);
        for &node in &graph.nodes {
            // Normalization rejects duplicates; hand-built input may not.
            if interner.get(node).is_some() {
                return Err(GraphError::DuplicateNode(node));
            }
            interner.intern(node);
        }

        // Cheapest weight per (source, target) pair.
        let mut cheapest: FxHashMap<(NodeIndex, NodeIndex), f64> =
            FxHashMap::with_capacity_and_hasher(graph.edges.len(), Default::default());
        for (position, edge) in graph.edges.iter().enumerate() {
            let resolve = |id: NodeId| {
                interner.get(id).ok_or(GraphError::UnknownEndpoint {
                    position,
                    source_id: edge.source,
                    target: edge.target,
                    missing: id,
                })
            };
            let u = resolve(edge.source)?;
            let v = resolve(edge.target)?;
            if !edge.minutes.is_finite() || edge.minutes < 0.0 {
                return Err(GraphError::InvalidWeight {
                    position,
                    source_id: edge.source,
                    target: edge.target,
                    weight: edge.minutes,
                });
            }
            if u == v {
                continue;
            }
            cheapest
                .entry((u, v))
                .and_modify(|w| *w = w.min(edge.minutes))
                .or_insert(edge.minutes);
        }

        let mut adjacency: Vec<(NodeIndex, NodeIndex, f64)> = cheapest
            .into_iter()
            .map(|((u, v), w)| (u, v, w))
            .collect();
        adjacency.sort_unstable_by_key(|&(u, v, _)| (u, v));
        check_edge_count(adjacency.len())?;

        let mut offsets = vec![0u32; n + 1];
        for &(u, _, _) in &adjacency {
            offsets[u as usize + 1] += 1;
        }
        for i in 0..n {
            offsets[i + 1] += offsets[i];
        }
        let targets = adjacency.iter().map(|&(_, v, _)| v).collect();
        let weights = adjacency.iter().map(|&(_, _, w)| w).collect();

        Ok(Self {
            interner,
            offsets,
            targets,
            weights,
            fingerprint: GraphFingerprint::of(graph),
        })
    }

    /// Internal index of an external node id.
    #[inline]
    pub fn index_of(&self, id: NodeId) -> Option<NodeIndex> {
        self.interner.get(id)
    }

    /// External node id of an internal index.
    #[inline]
    pub fn external_id_of(&self, index: NodeIndex) -> Option<NodeId> {
        self.interner.resolve(index)
    }

    /// Out-neighbours of `index` as `(target, minutes)` pairs.
    ///
    /// Empty for an out-of-range index.
    #[inline]
    pub fn neighbors(&self, index: NodeIndex) -> impl Iterator<Item = (NodeIndex, f64)> + '_ {
        let (lo, hi) = self.edge_range(index);
        self.targets[lo..hi]
            .iter()
            .copied()
            .zip(self.weights[lo..hi].iter().copied())
    }

    #[inline]
    pub fn out_degree(&self, index: NodeIndex) -> usize {
        let (lo, hi) = self.edge_range(index);
        hi - lo
    }

    #[inline]
    fn edge_range(&self, index: NodeIndex) -> (usize, usize) {
        let i = index as usize;
        if i + 1 >= self.offsets.len() {
            return (0, 0);
        }
        (self.offsets[i] as usize, self.offsets[i + 1] as usize)
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.interner.len()
    }

    /// Number of stored edges (after dropping parallels and self-loops).
    #[inline]
    pub fn edge_count(&self) -> usize {
        self.targets.len()
    }

    pub fn fingerprint(&self) -> GraphFingerprint {
        self.fingerprint
    }

    /// External ids ordered by internal index.
    pub fn node_ids(&self) -> &[NodeId] {
        self.interner.ids()
    }
}
