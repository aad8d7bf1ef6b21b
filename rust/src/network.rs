//! Normalization of raw street networks into canonical time-weighted graphs.

use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::config::{validate_speed, ConfigError};
use crate::interner::NodeId;
use crate::models::RawEdge;

/// Errors raised while turning a raw network into a usable graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Edge #{position} ({source_id} -> {target}) has neither a time nor a length")]
    MissingWeight {
        position: usize,
        source_id: NodeId,
        target: NodeId,
    },
    #[error("Edge #{position} ({source_id} -> {target}) has invalid weight {weight}")]
    InvalidWeight {
        position: usize,
        source_id: NodeId,
        target: NodeId,
        weight: f64,
    },
    #[error("Edge #{position} ({source_id} -> {target}) references unknown node {missing}")]
    UnknownEndpoint {
        position: usize,
        source_id: NodeId,
        target: NodeId,
        missing: NodeId,
    },
    #[error("Node {0} is listed more than once")]
    DuplicateNode(NodeId),
    #[error("Graph has {0} nodes, more than a u32 index can address")]
    TooManyNodes(usize),
    #[error("Graph has {0} distinct edges, more than a u32 offset can address")]
    TooManyEdges(usize),
    #[error(transparent)]
    InvalidSpeed(#[from] ConfigError),
}

/// A raw network: node ids plus attributed edges.
#[derive(Clone, Debug, Default)]
pub struct RawNetwork {
    pub nodes: Vec<NodeId>,
    pub edges: Vec<RawEdge>,
}

impl RawNetwork {
    pub fn new(nodes: Vec<NodeId>, edges: Vec<RawEdge>) -> Self {
        Self { nodes, edges }
    }
}

/// Directed edge with a resolved time weight in minutes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CanonicalEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub minutes: f64,
}

/// Validated graph: unique nodes and finite, non-negative edge weights.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CanonicalGraph {
    pub nodes: Vec<NodeId>,
    pub edges: Vec<CanonicalEdge>,
}

/// Metres walked per minute at the given speed.
#[inline]
pub fn metres_per_minute(speed_kmh: f64) -> f64 {
    speed_kmh * 1000.0 / 60.0
}

/// Resolve the time weight of a single edge.
///
/// An explicit time wins over a length. Returns `Ok(None)` when neither is
/// present so the caller can attach the edge position to the error.
fn resolve_minutes(edge: &RawEdge, speed_kmh: f64) -> Result<Option<f64>, ConfigError> {
    match (edge.time, edge.length) {
        (Some(time), _) => Ok(Some(time)),
        (None, Some(length)) => {
            validate_speed(speed_kmh)?;
            Ok(Some(length / metres_per_minute(speed_kmh)))
        }
        (None, None) => Ok(None),
    }
}

/// Validate a raw network and resolve every edge weight to minutes.
pub fn normalize(raw: &RawNetwork, travel_speed_kmh: f64) -> Result<CanonicalGraph, GraphError> {
    if raw.nodes.len() > u32::MAX as usize {
        return Err(GraphError::TooManyNodes(raw.nodes.len()));
    }

    let mut known: FxHashSet<NodeId> =
        FxHashSet::with_capacity_and_hasher(raw.nodes.len(), Default::default());
    for &node in &raw.nodes {
        if !known.insert(node) {
            return Err(GraphError::DuplicateNode(node));
        }
    }

    let mut edges = Vec::with_capacity(raw.edges.len());
    for (position, edge) in raw.edges.iter().enumerate() {
        for endpoint in [edge.source, edge.target] {
            if !known.contains(&endpoint) {
                return Err(GraphError::UnknownEndpoint {
                    position,
                    source_id: edge.source,
                    target: edge.target,
                    missing: endpoint,
                });
            }
        }

        let minutes =
            resolve_minutes(edge, travel_speed_kmh)?.ok_or(GraphError::MissingWeight {
                position,
                source_id: edge.source,
                target: edge.target,
            })?;
        if !minutes.is_finite() || minutes < 0.0 {
            return Err(GraphError::InvalidWeight {
                position,
                source_id: edge.source,
                target: edge.target,
                weight: minutes,
            });
        }

        edges.push(CanonicalEdge {
            source: edge.source,
            target: edge.target,
            minutes,
        });
    }

    Ok(CanonicalGraph {
        nodes: raw.nodes.clone(),
        edges,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_time_kept() {
        let raw = RawNetwork::new(vec![1, 2], vec![RawEdge::timed(1, 2, 3.5)]);
        let graph = normalize(&raw, 4.5).unwrap();

        assert_eq!(graph.nodes, vec![1, 2]);
        assert_eq!(graph.edges.len(), 1);
        assert!((graph.edges[0].minutes - 3.5).abs() < 1e-12);
    }

    #[test]
    fn test_length_converted_with_speed() {
        // 4.5 km/h = 75 m/min, so 300 m takes 4 minutes
        let raw = RawNetwork::new(vec![1, 2], vec![RawEdge::with_length(1, 2, 300.0)]);
        let graph = normalize(&raw, 4.5).unwrap();
        assert!((graph.edges[0].minutes - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_time_takes_precedence_over_length() {
        let edge = RawEdge {
            source: 1,
            target: 2,
            time: Some(1.0),
            length: Some(9000.0),
        };
        let graph = normalize(&RawNetwork::new(vec![1, 2], vec![edge]), 4.5).unwrap();
        assert!((graph.edges[0].minutes - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_missing_weight_names_edge() {
        let edge = RawEdge {
            source: 10,
            target: 20,
            time: None,
            length: None,
        };
        let raw = RawNetwork::new(vec![10, 20], vec![RawEdge::timed(20, 10, 1.0), edge]);
        let err = normalize(&raw, 4.5).unwrap_err();

        assert_eq!(
            err,
            GraphError::MissingWeight {
                position: 1,
                source_id: 10,
                target: 20
            }
        );
        let message = err.to_string();
        assert!(message.contains("#1"), "{}", message);
        assert!(message.contains("10 -> 20"), "{}", message);
    }

    #[test]
    fn test_negative_and_nan_weights_rejected() {
        let raw = RawNetwork::new(vec![1, 2], vec![RawEdge::timed(1, 2, -0.5)]);
        assert!(matches!(
            normalize(&raw, 4.5),
            Err(GraphError::InvalidWeight { position: 0, .. })
        ));

        let raw = RawNetwork::new(vec![1, 2], vec![RawEdge::with_length(1, 2, f64::NAN)]);
        assert!(matches!(
            normalize(&raw, 4.5),
            Err(GraphError::InvalidWeight { position: 0, .. })
        ));

        let raw = RawNetwork::new(vec![1, 2], vec![RawEdge::timed(1, 2, f64::INFINITY)]);
        assert!(matches!(
            normalize(&raw, 4.5),
            Err(GraphError::InvalidWeight { .. })
        ));
    }

    #[test]
    fn test_unknown_endpoint_and_duplicate_node() {
        let raw = RawNetwork::new(vec![1, 2], vec![RawEdge::timed(1, 3, 1.0)]);
        assert!(matches!(
            normalize(&raw, 4.5),
            Err(GraphError::UnknownEndpoint { missing: 3, .. })
        ));

        let raw = RawNetwork::new(vec![1, 2, 1], vec![]);
        assert_eq!(normalize(&raw, 4.5), Err(GraphError::DuplicateNode(1)));
    }

    #[test]
    fn test_bad_speed_only_matters_for_length_edges() {
        let timed = RawNetwork::new(vec![1, 2], vec![RawEdge::timed(1, 2, 2.0)]);
        assert!(normalize(&timed, 0.0).is_ok());

        let measured = RawNetwork::new(vec![1, 2], vec![RawEdge::with_length(1, 2, 100.0)]);
        assert_eq!(
            normalize(&measured, 0.0),
            Err(GraphError::InvalidSpeed(ConfigError::InvalidSpeed(0.0)))
        );
    }

    #[test]
    fn test_zero_weight_edge_allowed() {
        let raw = RawNetwork::new(vec![1, 2], vec![RawEdge::timed(1, 2, 0.0)]);
        assert!(normalize(&raw, 4.5).is_ok());
    }
}
