//! Rust implementation of the walk-time accessibility engine.
//!
//! Given a street network, origins and destinations, computes for every
//! origin the smallest travel-time budget within which each destination is
//! reachable. Exposed to the Python pipeline as `access.rust`.

// Allow clippy warning triggered by PyO3 macro expansion
#![allow(clippy::useless_conversion)]

use std::sync::Arc;

use pyo3::create_exception;
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

pub mod config;
pub mod graph;
pub mod graph_cache;
pub mod interner;
pub mod logging;
mod models;
pub mod network;
pub mod orchestrator;
pub mod solver;
pub mod thresholds;

pub use config::{ConfigError, EngineConfig, DEFAULT_TRAVEL_SPEED_KMH, DEFAULT_TRIP_TIMES};
pub use graph::{GraphFingerprint, IndexedGraph};
pub use graph_cache::{CacheStats, GraphCache, GraphKey};
pub use interner::{NodeId, NodeIndex};
pub use models::{JobReport, RawEdge, ReachabilityRecord, SkippedOrigin};
pub use network::{normalize, CanonicalEdge, CanonicalGraph, GraphError, RawNetwork};
pub use orchestrator::{CancellationToken, EngineError, ProgressSink, ReachabilityJob};
pub use solver::{
    solve_origin, solve_origin_id, DestinationSet, OriginError, OriginReach, SearchOptions,
    SearchScratch, SearchStats,
};
pub use thresholds::ThresholdSet;

create_exception!(rust, ConfigurationError, PyValueError);
create_exception!(rust, GraphConstructionError, PyValueError);
create_exception!(rust, FatalAggregateError, PyRuntimeError);

impl From<ConfigError> for PyErr {
    fn from(err: ConfigError) -> Self {
        ConfigurationError::new_err(err.to_string())
    }
}

impl From<GraphError> for PyErr {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::InvalidSpeed(e) => e.into(),
            e => GraphConstructionError::new_err(e.to_string()),
        }
    }
}

impl From<EngineError> for PyErr {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Config(e) => e.into(),
            EngineError::Graph(e) => e.into(),
            e @ EngineError::TooManyFailures { .. } => FatalAggregateError::new_err(e.to_string()),
        }
    }
}

/// Immutable indexed street network, shared by every search.
#[pyclass(frozen)]
pub struct NetworkGraph {
    inner: Arc<IndexedGraph>,
}

#[pymethods]
impl NetworkGraph {
    /// Dense index of a node id, or None if the node is not in the graph.
    fn index_of(&self, node_id: NodeId) -> Option<NodeIndex> {
        self.inner.index_of(node_id)
    }

    /// Node id of a dense index.
    fn external_id_of(&self, index: NodeIndex) -> Option<NodeId> {
        self.inner.external_id_of(index)
    }

    fn out_degree(&self, node_id: NodeId) -> Option<usize> {
        self.inner
            .index_of(node_id)
            .map(|index| self.inner.out_degree(index))
    }

    #[getter]
    fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    #[getter]
    fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    #[getter]
    fn fingerprint(&self) -> String {
        self.inner.fingerprint().to_string()
    }

    fn __repr__(&self) -> String {
        format!(
            "NetworkGraph(nodes={}, edges={}, fingerprint={})",
            self.inner.node_count(),
            self.inner.edge_count(),
            self.inner.fingerprint()
        )
    }
}

/// Cancellation handle that can be passed to `compute_reachability` and
/// triggered from another Python thread.
#[pyclass(frozen, name = "CancelToken")]
#[derive(Clone, Default)]
pub struct PyCancelToken {
    token: CancellationToken,
}

#[pymethods]
impl PyCancelToken {
    #[new]
    fn new() -> Self {
        Self::default()
    }

    fn cancel(&self) {
        self.token.cancel();
    }

    #[getter]
    fn cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Forwards progress to a Python callable `callback(completed, total)`.
struct PyProgress(PyObject);

impl ProgressSink for PyProgress {
    fn on_progress(&self, completed: usize, total: usize) {
        Python::with_gil(|py| {
            if let Err(err) = self.0.call1(py, (completed, total)) {
                tracing::warn!("Progress callback failed: {}", err);
            }
        });
    }
}

/// Normalize and index a street network, memoized per distinct network.
///
/// # Arguments
/// * `nodes` - Node ids (OSM ids); their order fixes the dense indices
/// * `edges` - Directed edges with a time (minutes) or a length (metres)
/// * `travel_speed_kmh` - Speed used to turn lengths into minutes
/// * `cache_key` - Optional name (e.g. graph file path) to memoize under
/// * `verbosity` - 0=silent, 1=log graph builds and cache hits
///
/// # Raises
/// * GraphConstructionError if an edge has no usable weight or an unknown endpoint
/// * ConfigurationError if lengths need converting and the speed is invalid
#[pyfunction]
#[pyo3(signature = (nodes, edges, travel_speed_kmh=DEFAULT_TRAVEL_SPEED_KMH, cache_key=None, verbosity=0))]
fn build_network(
    py: Python<'_>,
    nodes: Vec<NodeId>,
    edges: Vec<RawEdge>,
    travel_speed_kmh: f64,
    cache_key: Option<String>,
    verbosity: u8,
) -> PyResult<NetworkGraph> {
    let raw = RawNetwork::new(nodes, edges);
    let inner = py.allow_threads(|| {
        GraphCache::global().load(&raw, travel_speed_kmh, cache_key.as_deref(), verbosity)
    })?;
    Ok(NetworkGraph { inner })
}

/// Find, for every origin, the smallest time budget within which each
/// destination is reachable.
///
/// # Arguments
/// * `graph` - Network from `build_network`
/// * `origins` - Origin node ids
/// * `destinations` - Destination node ids (ids not in the graph are ignored)
/// * `thresholds` - Strictly increasing budgets in minutes (default: 5..60)
/// * `config` - Engine configuration (workers, failure tolerance, ...)
/// * `progress` - Optional callable invoked as `progress(completed, total)`
/// * `cancel` - Optional CancelToken; cancelling stops dispatching new origins
///
/// # Returns
/// * JobReport with records sorted by (origin, destination)
///
/// # Raises
/// * ConfigurationError for invalid thresholds or configuration
/// * FatalAggregateError if too many origins failed, or all of them did.
///   Origins that are not in the graph are reported in `skipped` but never
///   count as failures.
#[pyfunction]
#[pyo3(signature = (graph, origins, destinations, thresholds=None, config=None, progress=None, cancel=None))]
#[allow(clippy::too_many_arguments)]
fn compute_reachability(
    py: Python<'_>,
    graph: &NetworkGraph,
    origins: Vec<NodeId>,
    destinations: Vec<NodeId>,
    thresholds: Option<Vec<f64>>,
    config: Option<EngineConfig>,
    progress: Option<PyObject>,
    cancel: Option<PyCancelToken>,
) -> PyResult<JobReport> {
    let thresholds = match thresholds {
        Some(values) => ThresholdSet::new(values)?,
        None => ThresholdSet::default(),
    };
    let job = ReachabilityJob::new(
        Arc::clone(&graph.inner),
        origins,
        destinations,
        thresholds,
        config.unwrap_or_default(),
    );
    let token = cancel.map(|c| c.token).unwrap_or_default();
    let sink = progress.map(PyProgress);

    let report = py.allow_threads(|| {
        job.run_with(sink.as_ref().map(|s| s as &dyn ProgressSink), &token)
    })?;
    Ok(report)
}

/// Cache counters as `(hits, misses, entries)`.
#[pyfunction]
fn graph_cache_stats() -> (u64, u64, usize) {
    let stats = GraphCache::global().stats();
    (stats.hits, stats.misses, stats.entries)
}

/// Drop every memoized graph. Existing NetworkGraph objects stay usable.
#[pyfunction]
fn clear_graph_cache() {
    GraphCache::global().clear();
}

/// Send engine logs to stderr. `RUST_LOG` overrides `level`.
#[pyfunction]
#[pyo3(signature = (level="info"))]
fn init_logging(level: &str) -> bool {
    logging::init_logging(level)
}

/// The access.rust Python module.
#[pymodule]
fn rust(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Core data types
    m.add_class::<RawEdge>()?;
    m.add_class::<NetworkGraph>()?;
    m.add_class::<ReachabilityRecord>()?;
    m.add_class::<SkippedOrigin>()?;
    m.add_class::<JobReport>()?;
    m.add_class::<PyCancelToken>()?;

    // Config types
    m.add_class::<EngineConfig>()?;

    // Errors
    let py = m.py();
    m.add("ConfigurationError", py.get_type_bound::<ConfigurationError>())?;
    m.add(
        "GraphConstructionError",
        py.get_type_bound::<GraphConstructionError>(),
    )?;
    m.add("FatalAggregateError", py.get_type_bound::<FatalAggregateError>())?;

    // Algorithms
    m.add_function(wrap_pyfunction!(build_network, m)?)?;
    m.add_function(wrap_pyfunction!(compute_reachability, m)?)?;
    m.add_function(wrap_pyfunction!(graph_cache_stats, m)?)?;
    m.add_function(wrap_pyfunction!(clear_graph_cache, m)?)?;
    m.add_function(wrap_pyfunction!(init_logging, m)?)?;

    Ok(())
}
