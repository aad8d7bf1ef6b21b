//! Core data types shared between the engine and the Python bindings.

use pyo3::prelude::*;

use crate::interner::NodeId;

/// A raw network edge as loaded from the street network.
///
/// Carries either a precomputed traversal time (minutes) or a length in
/// metres that is converted with the configured travel speed.
#[pyclass]
#[derive(Clone, Debug, PartialEq)]
pub struct RawEdge {
    #[pyo3(get, set)]
    pub source: NodeId,
    #[pyo3(get, set)]
    pub target: NodeId,
    #[pyo3(get, set)]
    pub time: Option<f64>,
    #[pyo3(get, set)]
    pub length: Option<f64>,
}

impl RawEdge {
    /// Edge with a known traversal time in minutes.
    pub fn timed(source: NodeId, target: NodeId, minutes: f64) -> Self {
        Self {
            source,
            target,
            time: Some(minutes),
            length: None,
        }
    }

    /// Edge with only a geometric length in metres.
    pub fn with_length(source: NodeId, target: NodeId, metres: f64) -> Self {
        Self {
            source,
            target,
            time: None,
            length: Some(metres),
        }
    }
}

#[pymethods]
impl RawEdge {
    #[new]
    #[pyo3(signature = (source, target, time=None, length=None))]
    fn new(source: NodeId, target: NodeId, time: Option<f64>, length: Option<f64>) -> Self {
        Self {
            source,
            target,
            time,
            length,
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "RawEdge(source={}, target={}, time={:?}, length={:?})",
            self.source, self.target, self.time, self.length
        )
    }
}

/// One (origin, destination, threshold bin) triple.
#[pyclass]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReachabilityRecord {
    #[pyo3(get)]
    pub origin: NodeId,
    #[pyo3(get)]
    pub destination: NodeId,
    /// Smallest time budget (minutes) within which the destination is reached
    #[pyo3(get)]
    pub threshold: f64,
}

#[pymethods]
impl ReachabilityRecord {
    #[new]
    fn new(origin: NodeId, destination: NodeId, threshold: f64) -> Self {
        Self {
            origin,
            destination,
            threshold,
        }
    }

    /// Plain tuple form, convenient for building data frames.
    fn as_tuple(&self) -> (NodeId, NodeId, f64) {
        (self.origin, self.destination, self.threshold)
    }

    fn __eq__(&self, other: &Self) -> bool {
        self == other
    }

    fn __repr__(&self) -> String {
        format!(
            "ReachabilityRecord(origin={}, destination={}, threshold={})",
            self.origin, self.destination, self.threshold
        )
    }
}

/// An origin that could not be processed, with the reason.
#[pyclass]
#[derive(Clone, Debug, PartialEq)]
pub struct SkippedOrigin {
    #[pyo3(get)]
    pub origin: NodeId,
    #[pyo3(get)]
    pub reason: String,
}

#[pymethods]
impl SkippedOrigin {
    fn __repr__(&self) -> String {
        format!(
            "SkippedOrigin(origin={}, reason={:?})",
            self.origin, self.reason
        )
    }
}

/// Outcome of a reachability job.
#[pyclass]
#[derive(Clone, Debug, Default)]
pub struct JobReport {
    /// Records sorted by (origin, destination)
    #[pyo3(get)]
    pub records: Vec<ReachabilityRecord>,
    /// Distinct origins in the request
    #[pyo3(get)]
    pub requested_origins: usize,
    #[pyo3(get)]
    pub processed_origins: usize,
    /// Origins whose search failed (not counting origins absent from the graph)
    #[pyo3(get)]
    pub failed_origins: usize,
    #[pyo3(get)]
    pub skipped: Vec<SkippedOrigin>,
    /// Origins never dispatched because the job was cancelled
    #[pyo3(get)]
    pub cancelled_origins: usize,
    /// Destination ids that are not nodes of the graph
    #[pyo3(get)]
    pub missing_destinations: usize,
    #[pyo3(get)]
    pub workers: usize,
    #[pyo3(get)]
    pub elapsed_secs: f64,
    #[pyo3(get)]
    pub cancelled: bool,
}

impl JobReport {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

#[pymethods]
impl JobReport {
    /// Records as `(origin, destination, threshold)` tuples.
    fn tuples(&self) -> Vec<(NodeId, NodeId, f64)> {
        self.records
            .iter()
            .map(|r| (r.origin, r.destination, r.threshold))
            .collect()
    }

    #[getter]
    fn skipped_origins(&self) -> usize {
        self.skipped_count()
    }

    fn __len__(&self) -> usize {
        self.records.len()
    }

    fn __repr__(&self) -> String {
        format!(
            "JobReport(records={}, processed={}, skipped={}, failed={}, cancelled={})",
            self.records.len(),
            self.processed_origins,
            self.skipped.len(),
            self.failed_origins,
            self.cancelled_origins
        )
    }
}
