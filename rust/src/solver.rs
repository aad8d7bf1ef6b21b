//! Bounded multi-threshold reachability search.
//!
//! One Dijkstra pass per origin, cut off at the largest time budget. Each
//! destination is classified into its threshold bin the moment it is
//! settled, so the graph is traversed once no matter how many budgets are
//! requested.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use thiserror::Error;

use crate::graph::IndexedGraph;
use crate::interner::{NodeId, NodeIndex};
use crate::thresholds::ThresholdSet;

/// Why a single origin could not be processed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OriginError {
    #[error("Origin {0} is not a node of the graph")]
    UnknownOrigin(NodeId),
    #[error("Invariant violated while searching from origin {origin}: {detail}")]
    Invariant { origin: NodeId, detail: String },
    #[error("Search from origin {origin} panicked: {message}")]
    Panicked { origin: NodeId, message: String },
}

/// Destinations of interest, as a membership mask over internal indices.
#[derive(Debug, Clone)]
pub struct DestinationSet {
    mask: Vec<bool>,
    count: usize,
}

impl DestinationSet {
    /// Resolve destination ids against the graph.
    ///
    /// Returns the set and the ids that are not nodes of the graph, in input
    /// order. Repeated ids count once.
    pub fn resolve(graph: &IndexedGraph, ids: &[NodeId]) -> (Self, Vec<NodeId>) {
        let mut mask = vec![false; graph.node_count()];
        let mut count = 0;
        let mut missing = Vec::new();
        for &id in ids {
            match graph.index_of(id) {
                Some(index) => {
                    let slot = &mut mask[index as usize];
                    if !*slot {
                        *slot = true;
                        count += 1;
                    }
                }
                None => missing.push(id),
            }
        }
        (Self { mask, count }, missing)
    }

    #[inline]
    pub fn contains(&self, index: NodeIndex) -> bool {
        self.mask.get(index as usize).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Heap entry ordered by (minutes, node index).
///
/// Ordering on the index makes tie-breaking, and therefore the settle order,
/// identical across runs.
#[derive(Debug, Clone, Copy)]
struct FrontierEntry {
    minutes: f64,
    node: NodeIndex,
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FrontierEntry {}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.minutes
            .total_cmp(&other.minutes)
            .then(self.node.cmp(&other.node))
    }
}

/// Per-worker search buffers.
///
/// Sized to the graph once and reset between searches by walking only the
/// entries the previous search touched, so a search costs time proportional
/// to the explored area rather than to the whole network.
#[derive(Debug, Default)]
pub struct SearchScratch {
    dist: Vec<f64>,
    settled: Vec<bool>,
    touched: Vec<NodeIndex>,
    frontier: BinaryHeap<Reverse<FrontierEntry>>,
}

impl SearchScratch {
    pub fn new() -> Self {
        Self::default()
    }

    fn prepare(&mut self, node_count: usize) {
        for &node in &self.touched {
            let i = node as usize;
            if i < self.dist.len() {
                self.dist[i] = f64::INFINITY;
                self.settled[i] = false;
            }
        }
        self.touched.clear();
        self.frontier.clear();
        if self.dist.len() != node_count {
            self.dist = vec![f64::INFINITY; node_count];
            self.settled = vec![false; node_count];
        }
    }

    #[inline]
    fn improve(&mut self, node: NodeIndex, minutes: f64) -> bool {
        let i = node as usize;
        if minutes < self.dist[i] {
            if self.dist[i] == f64::INFINITY {
                self.touched.push(node);
            }
            self.dist[i] = minutes;
            self.frontier.push(Reverse(FrontierEntry { minutes, node }));
            true
        } else {
            false
        }
    }
}

/// Work counters for one search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub settled: usize,
    pub relaxed: usize,
    /// The search stopped because every destination was settled.
    pub early_exit: bool,
}

/// Destinations reached from one origin.
#[derive(Debug, Clone, Default)]
pub struct OriginReach {
    /// `(destination index, threshold bin)` in settle order.
    pub hits: Vec<(NodeIndex, f64)>,
    pub stats: SearchStats,
}

/// Options that do not change the result of a search, only its cost.
#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub early_exit: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { early_exit: true }
    }
}

/// Run the bounded search from `origin` and bin every reachable destination.
///
/// An origin without out-edges reaches nothing and yields an empty result.
/// Destinations further than the largest threshold are omitted.
pub fn solve_origin(
    graph: &IndexedGraph,
    origin: NodeIndex,
    destinations: &DestinationSet,
    thresholds: &ThresholdSet,
    scratch: &mut SearchScratch,
    options: SearchOptions,
) -> Result<OriginReach, OriginError> {
    let n = graph.node_count();
    let origin_id = graph
        .external_id_of(origin)
        .ok_or_else(|| OriginError::Invariant {
            origin: i64::from(origin),
            detail: format!("index {} outside graph of {} nodes", origin, n),
        })?;

    let mut reach = OriginReach::default();
    if destinations.is_empty() || graph.out_degree(origin) == 0 {
        return Ok(reach);
    }

    let limit = thresholds.max();
    scratch.prepare(n);
    scratch.improve(origin, 0.0);

    let mut last_settled = 0.0_f64;
    let mut destinations_left = destinations.len();

    while let Some(Reverse(FrontierEntry { minutes, node })) = scratch.frontier.pop() {
        let i = node as usize;
        if scratch.settled[i] {
            continue;
        }
        // Everything closer has already been settled.
        if minutes > limit {
            break;
        }
        if minutes < last_settled {
            return Err(OriginError::Invariant {
                origin: origin_id,
                detail: format!(
                    "node {} settled at {} after a node at {}",
                    node, minutes, last_settled
                ),
            });
        }
        last_settled = minutes;
        scratch.settled[i] = true;
        reach.stats.settled += 1;

        if destinations.contains(node) {
            let bin = thresholds.bin_for(minutes).ok_or_else(|| OriginError::Invariant {
                origin: origin_id,
                detail: format!("settled time {} exceeds limit {}", minutes, limit),
            })?;
            reach.hits.push((node, bin));
            destinations_left -= 1;
            if options.early_exit && destinations_left == 0 {
                reach.stats.early_exit = true;
                break;
            }
        }

        for (next, weight) in graph.neighbors(node) {
            if next as usize >= n {
                return Err(OriginError::Invariant {
                    origin: origin_id,
                    detail: format!("edge {} -> {} leaves the graph", node, next),
                });
            }
            if scratch.settled[next as usize] {
                continue;
            }
            let candidate = minutes + weight;
            if candidate <= limit && scratch.improve(next, candidate) {
                reach.stats.relaxed += 1;
            }
        }
    }

    Ok(reach)
}

/// [`solve_origin`] addressed by external node id.
pub fn solve_origin_id(
    graph: &IndexedGraph,
    origin: NodeId,
    destinations: &DestinationSet,
    thresholds: &ThresholdSet,
    scratch: &mut SearchScratch,
    options: SearchOptions,
) -> Result<OriginReach, OriginError> {
    let index = graph
        .index_of(origin)
        .ok_or(OriginError::UnknownOrigin(origin))?;
    solve_origin(graph, index, destinations, thresholds, scratch, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawEdge;
    use crate::network::{normalize, RawNetwork};

    const A: NodeId = 1;
    const B: NodeId = 2;
    const C: NodeId = 3;
    const D: NodeId = 4;
    const E: NodeId = 5;

    fn make_graph(nodes: Vec<NodeId>, edges: Vec<(NodeId, NodeId, f64)>) -> IndexedGraph {
        let raw = RawNetwork::new(
            nodes,
            edges
                .into_iter()
                .map(|(u, v, w)| RawEdge::timed(u, v, w))
                .collect(),
        );
        IndexedGraph::build(&normalize(&raw, 4.5).unwrap()).unwrap()
    }

    /// A -> B -> C -> D -> E with weights 3, 4, 2, 5.
    fn make_line() -> IndexedGraph {
        make_graph(
            vec![A, B, C, D, E],
            vec![(A, B, 3.0), (B, C, 4.0), (C, D, 2.0), (D, E, 5.0)],
        )
    }

    fn reach_ids(
        graph: &IndexedGraph,
        origin: NodeId,
        destinations: &[NodeId],
        thresholds: &[f64],
    ) -> Vec<(NodeId, f64)> {
        let (dests, missing) = DestinationSet::resolve(graph, destinations);
        assert!(missing.is_empty());
        let thresholds = ThresholdSet::new(thresholds.to_vec()).unwrap();
        let mut scratch = SearchScratch::new();
        let reach = solve_origin_id(
            graph,
            origin,
            &dests,
            &thresholds,
            &mut scratch,
            SearchOptions::default(),
        )
        .unwrap();
        let mut hits: Vec<(NodeId, f64)> = reach
            .hits
            .into_iter()
            .map(|(index, bin)| (graph.external_id_of(index).unwrap(), bin))
            .collect();
        hits.sort_by_key(|&(id, _)| id);
        hits
    }

    #[test]
    fn test_line_graph_three_thresholds() {
        let graph = make_line();
        let hits = reach_ids(&graph, A, &[C, D, E], &[5.0, 10.0, 15.0]);
        assert_eq!(hits, vec![(C, 10.0), (D, 10.0), (E, 15.0)]);
    }

    #[test]
    fn test_line_graph_drops_beyond_max() {
        let graph = make_line();
        let hits = reach_ids(&graph, A, &[C, D, E], &[5.0, 10.0]);
        assert_eq!(hits, vec![(C, 10.0), (D, 10.0)]);
    }

    #[test]
    fn test_origin_without_out_edges_reaches_nothing() {
        let graph = make_line();
        assert!(reach_ids(&graph, E, &[C, D, E], &[5.0, 10.0, 15.0]).is_empty());
    }

    #[test]
    fn test_unknown_origin() {
        let graph = make_line();
        let (dests, _) = DestinationSet::resolve(&graph, &[C]);
        let result = solve_origin_id(
            &graph,
            42,
            &dests,
            &ThresholdSet::default(),
            &mut SearchScratch::new(),
            SearchOptions::default(),
        );
        assert_eq!(result.unwrap_err(), OriginError::UnknownOrigin(42));
    }

    #[test]
    fn test_out_of_range_index_is_invariant_error() {
        let graph = make_line();
        let (dests, _) = DestinationSet::resolve(&graph, &[C]);
        let result = solve_origin(
            &graph,
            99,
            &dests,
            &ThresholdSet::default(),
            &mut SearchScratch::new(),
            SearchOptions::default(),
        );
        assert!(matches!(result, Err(OriginError::Invariant { .. })));
    }

    #[test]
    fn test_one_way_edges_not_traversed_backwards() {
        let graph = make_line();
        // Everything is downstream of A; nothing leads back to it.
        assert!(reach_ids(&graph, C, &[A, B], &[60.0]).is_empty());
        assert_eq!(reach_ids(&graph, C, &[D], &[60.0]), vec![(D, 60.0)]);
    }

    #[test]
    fn test_shortest_of_several_routes_wins() {
        // Direct edge is slower than the detour.
        let graph = make_graph(
            vec![A, B, C],
            vec![(A, C, 12.0), (A, B, 2.0), (B, C, 2.0)],
        );
        assert_eq!(reach_ids(&graph, A, &[C], &[5.0, 15.0]), vec![(C, 5.0)]);
    }

    #[test]
    fn test_exact_threshold_boundary_is_inclusive() {
        let graph = make_graph(vec![A, B], vec![(A, B, 10.0)]);
        assert_eq!(reach_ids(&graph, A, &[B], &[5.0, 10.0]), vec![(B, 10.0)]);
    }

    #[test]
    fn test_origin_that_is_destination_gets_smallest_bin() {
        let graph = make_line();
        let hits = reach_ids(&graph, A, &[A, B], &[5.0, 10.0]);
        assert_eq!(hits, vec![(A, 5.0), (B, 5.0)]);
    }

    #[test]
    fn test_repeated_destinations_count_once() {
        let graph = make_line();
        let (dests, missing) = DestinationSet::resolve(&graph, &[C, C, 77, D]);
        assert_eq!(dests.len(), 2);
        assert_eq!(missing, vec![77]);
        assert!(dests.contains(graph.index_of(C).unwrap()));
        assert!(!dests.contains(graph.index_of(B).unwrap()));
    }

    #[test]
    fn test_early_exit_does_not_change_result() {
        let graph = make_line();
        let (dests, _) = DestinationSet::resolve(&graph, &[B]);
        let thresholds = ThresholdSet::new(vec![5.0, 60.0]).unwrap();
        let origin = graph.index_of(A).unwrap();
        let mut scratch = SearchScratch::new();

        let eager = solve_origin(
            &graph,
            origin,
            &dests,
            &thresholds,
            &mut scratch,
            SearchOptions { early_exit: true },
        )
        .unwrap();
        let full = solve_origin(
            &graph,
            origin,
            &dests,
            &thresholds,
            &mut scratch,
            SearchOptions { early_exit: false },
        )
        .unwrap();

        assert_eq!(eager.hits, full.hits);
        assert!(eager.stats.early_exit);
        assert!(!full.stats.early_exit);
        assert!(eager.stats.settled < full.stats.settled);
        assert_eq!(full.stats.settled, 5);
    }

    #[test]
    fn test_search_stops_at_limit() {
        let graph = make_line();
        let (dests, _) = DestinationSet::resolve(&graph, &[E]);
        let thresholds = ThresholdSet::new(vec![5.0]).unwrap();
        let reach = solve_origin_id(
            &graph,
            A,
            &dests,
            &thresholds,
            &mut SearchScratch::new(),
            SearchOptions::default(),
        )
        .unwrap();

        assert!(reach.hits.is_empty());
        // Only A (0) and B (3) lie within 5 minutes.
        assert_eq!(reach.stats.settled, 2);
    }

    #[test]
    fn test_scratch_reuse_across_origins() {
        let graph = make_line();
        let (dests, _) = DestinationSet::resolve(&graph, &[C, D, E]);
        let thresholds = ThresholdSet::new(vec![5.0, 10.0, 15.0]).unwrap();
        let mut scratch = SearchScratch::new();

        let mut run = |origin| {
            let mut hits = solve_origin_id(
                &graph,
                origin,
                &dests,
                &thresholds,
                &mut scratch,
                SearchOptions::default(),
            )
            .unwrap()
            .hits;
            hits.sort_by_key(|&(index, _)| index);
            hits
        };

        let first = run(A);
        let from_c = run(C);
        let again = run(A);

        assert_eq!(first, again);
        let d = graph.index_of(D).unwrap();
        let e = graph.index_of(E).unwrap();
        let c = graph.index_of(C).unwrap();
        assert_eq!(from_c, vec![(c, 5.0), (d, 5.0), (e, 10.0)]);
    }

    #[test]
    fn test_zero_weight_ties_are_deterministic() {
        let graph = make_graph(
            vec![A, B, C, D],
            vec![(A, B, 0.0), (A, C, 0.0), (B, D, 1.0), (C, D, 1.0)],
        );
        let (dests, _) = DestinationSet::resolve(&graph, &[B, C, D]);
        let thresholds = ThresholdSet::new(vec![1.0]).unwrap();
        let origin = graph.index_of(A).unwrap();

        let first = solve_origin(
            &graph,
            origin,
            &dests,
            &thresholds,
            &mut SearchScratch::new(),
            SearchOptions::default(),
        )
        .unwrap();
        let second = solve_origin(
            &graph,
            origin,
            &dests,
            &thresholds,
            &mut SearchScratch::new(),
            SearchOptions::default(),
        )
        .unwrap();

        assert_eq!(first.hits, second.hits);
        let b = graph.index_of(B).unwrap();
        let c = graph.index_of(C).unwrap();
        let d = graph.index_of(D).unwrap();
        assert_eq!(first.hits, vec![(b, 1.0), (c, 1.0), (d, 1.0)]);
    }

    #[test]
    fn test_frontier_orders_by_time_then_index() {
        let near = FrontierEntry {
            minutes: 1.0,
            node: 9,
        };
        let far = FrontierEntry {
            minutes: 2.0,
            node: 0,
        };
        let tie = FrontierEntry {
            minutes: 1.0,
            node: 3,
        };
        assert!(near < far);
        assert!(tie < near);
    }
}
