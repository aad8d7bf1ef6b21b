//! Parallel reachability jobs.
//!
//! Runs one bounded search per origin on a rayon pool, isolates per-origin
//! failures, and merges the partial results into a sorted relation.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rayon::prelude::*;
use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::config::{ConfigError, EngineConfig};
use crate::graph::IndexedGraph;
use crate::graph_cache::GraphCache;
use crate::interner::NodeId;
use crate::models::{JobReport, ReachabilityRecord, SkippedOrigin};
use crate::network::{GraphError, RawNetwork};
use crate::solver::{
    solve_origin_id, DestinationSet, OriginError, OriginReach, SearchOptions, SearchScratch,
    SearchStats,
};
use crate::thresholds::ThresholdSet;
use crate::{log_changes, log_checks, log_debug};

/// Job-level failures. Per-origin failures only surface here once they
/// exceed the configured tolerance, or when every dispatched origin failed.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("{failed} of {total} origins failed, more than the tolerated fraction {tolerance}")]
    TooManyFailures {
        failed: usize,
        total: usize,
        tolerance: f64,
        skipped: Vec<SkippedOrigin>,
    },
}

/// Receives progress in units of completed origins.
///
/// Notifications are serialized: `completed` strictly increases across calls
/// and the last call reports `completed == total`, whatever the worker count.
pub trait ProgressSink: Sync {
    fn on_progress(&self, completed: usize, total: usize);
}

impl<F> ProgressSink for F
where
    F: Fn(usize, usize) + Sync,
{
    fn on_progress(&self, completed: usize, total: usize) {
        self(completed, total)
    }
}

/// Cooperative cancellation flag shared between a job and its caller.
///
/// Origins not yet started when the flag is raised are never searched;
/// searches already running complete normally.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A reachability request against one indexed graph.
#[derive(Clone)]
pub struct ReachabilityJob {
    graph: Arc<IndexedGraph>,
    origins: Vec<NodeId>,
    destinations: Vec<NodeId>,
    thresholds: ThresholdSet,
    config: EngineConfig,
}

/// Per-origin search routine.
type SearchFn = fn(
    &IndexedGraph,
    NodeId,
    &DestinationSet,
    &ThresholdSet,
    &mut SearchScratch,
    SearchOptions,
) -> Result<OriginReach, OriginError>;

enum OriginOutcome {
    Reached(Vec<ReachabilityRecord>),
    /// Not a node of the graph. Reported, but not a failure.
    Absent(SkippedOrigin),
    Failed(SkippedOrigin),
    Cancelled,
}

/// State shared by every per-origin task.
struct JobContext<'a> {
    graph: &'a IndexedGraph,
    destinations: &'a DestinationSet,
    thresholds: &'a ThresholdSet,
    options: SearchOptions,
    search_fn: SearchFn,
    verbosity: u8,
    cancel: &'a CancellationToken,
    progress: Option<&'a dyn ProgressSink>,
    progress_interval: usize,
    completed: AtomicUsize,
    last_reported: Mutex<usize>,
    total: usize,
}

impl JobContext<'_> {
    fn process(&self, origin: NodeId, scratch: &mut SearchScratch) -> OriginOutcome {
        if self.cancel.is_cancelled() {
            return OriginOutcome::Cancelled;
        }

        let outcome = match self.search(origin, scratch) {
            Ok((records, stats)) => {
                log_debug!(
                    self.verbosity,
                    origin,
                    settled = stats.settled,
                    relaxed = stats.relaxed,
                    early_exit = stats.early_exit,
                    reached = records.len(),
                    "Search finished"
                );
                OriginOutcome::Reached(records)
            }
            Err(err @ OriginError::UnknownOrigin(_)) => {
                tracing::warn!(origin, "Origin not in graph, no records: {}", err);
                OriginOutcome::Absent(SkippedOrigin {
                    origin,
                    reason: err.to_string(),
                })
            }
            Err(err) => {
                tracing::warn!(origin, "Skipping origin: {}", err);
                OriginOutcome::Failed(SkippedOrigin {
                    origin,
                    reason: err.to_string(),
                })
            }
        };

        self.tick();
        outcome
    }

    fn search(
        &self,
        origin: NodeId,
        scratch: &mut SearchScratch,
    ) -> Result<(Vec<ReachabilityRecord>, SearchStats), OriginError> {
        let attempt = catch_unwind(AssertUnwindSafe(|| {
            (self.search_fn)(
                self.graph,
                origin,
                self.destinations,
                self.thresholds,
                scratch,
                self.options,
            )
        }));
        let reach = match attempt {
            Ok(result) => result?,
            Err(payload) => {
                // Buffers may be half-updated.
                *scratch = SearchScratch::new();
                return Err(OriginError::Panicked {
                    origin,
                    message: panic_message(payload.as_ref()),
                });
            }
        };

        let records = reach
            .hits
            .iter()
            .map(|&(index, threshold)| {
                let destination =
                    self.graph
                        .external_id_of(index)
                        .ok_or_else(|| OriginError::Invariant {
                            origin,
                            detail: format!("reached index {} has no node id", index),
                        })?;
                Ok(ReachabilityRecord {
                    origin,
                    destination,
                    threshold,
                })
            })
            .collect::<Result<Vec<_>, OriginError>>()?;
        Ok((records, reach.stats))
    }

    fn tick(&self) {
        let done = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        if done % self.progress_interval != 0 && done != self.total {
            return;
        }

        // Workers reach this point out of order. The lock is held across the
        // callback so a smaller count is never delivered after a larger one.
        let mut last = self
            .last_reported
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if done <= *last {
            return;
        }
        *last = done;
        log_checks!(self.verbosity, "Processed {}/{} origins", done, self.total);
        if let Some(sink) = self.progress {
            sink.on_progress(done, self.total);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Drop repeated origins, keeping the first occurrence.
fn distinct_origins(origins: &[NodeId]) -> Vec<NodeId> {
    let mut seen: FxHashSet<NodeId> =
        FxHashSet::with_capacity_and_hasher(origins.len(), Default::default());
    origins.iter().copied().filter(|&o| seen.insert(o)).collect()
}

/// Sort by (origin, destination) and keep one record per pair, the one with
/// the smallest threshold.
fn finalize_records(records: &mut Vec<ReachabilityRecord>) {
    records.sort_by(|a, b| {
        (a.origin, a.destination)
            .cmp(&(b.origin, b.destination))
            .then(a.threshold.total_cmp(&b.threshold))
    });
    records.dedup_by(|later, kept| {
        later.origin == kept.origin && later.destination == kept.destination
    });
}

impl ReachabilityJob {
    pub fn new(
        graph: Arc<IndexedGraph>,
        origins: Vec<NodeId>,
        destinations: Vec<NodeId>,
        thresholds: ThresholdSet,
        config: EngineConfig,
    ) -> Self {
        Self {
            graph,
            origins,
            destinations,
            thresholds,
            config,
        }
    }

    /// Build a job straight from a raw network, indexing it through `cache`
    /// with the speed and verbosity of `config`.
    pub fn from_network(
        cache: &GraphCache,
        network: &RawNetwork,
        cache_key: Option<&str>,
        origins: Vec<NodeId>,
        destinations: Vec<NodeId>,
        thresholds: ThresholdSet,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let graph = cache.load(network, config.travel_speed_kmh, cache_key, config.verbosity)?;
        Ok(Self::new(graph, origins, destinations, thresholds, config))
    }

    pub fn graph(&self) -> &Arc<IndexedGraph> {
        &self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run to completion without progress reporting or cancellation.
    pub fn run(&self) -> Result<JobReport, EngineError> {
        self.run_with(None, &CancellationToken::new())
    }

    /// Run the job, reporting progress to `progress` and honouring `cancel`.
    pub fn run_with(
        &self,
        progress: Option<&dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<JobReport, EngineError> {
        self.execute(progress, cancel, solve_origin_id)
    }

    fn execute(
        &self,
        progress: Option<&dyn ProgressSink>,
        cancel: &CancellationToken,
        search_fn: SearchFn,
    ) -> Result<JobReport, EngineError> {
        self.config.validate()?;
        let workers = self.config.resolved_workers()?;
        let verbosity = self.config.verbosity;
        let started = Instant::now();

        let (destinations, missing) = DestinationSet::resolve(&self.graph, &self.destinations);
        if !missing.is_empty() {
            tracing::warn!(
                "{} destinations are not nodes of the graph (first few: {:?})",
                missing.len(),
                &missing[..missing.len().min(10)]
            );
        }

        let origins = distinct_origins(&self.origins);
        if origins.len() != self.origins.len() {
            log_changes!(
                verbosity,
                "Ignoring {} repeated origins",
                self.origins.len() - origins.len()
            );
        }

        log_changes!(
            verbosity,
            graph = %self.graph.fingerprint(),
            "Computing reachability for {} origins x {} destinations, thresholds {:?}, {} workers",
            origins.len(),
            destinations.len(),
            self.thresholds.values(),
            workers
        );

        let ctx = JobContext {
            graph: &self.graph,
            destinations: &destinations,
            thresholds: &self.thresholds,
            options: SearchOptions {
                early_exit: self.config.early_exit,
            },
            search_fn,
            verbosity,
            cancel,
            progress,
            progress_interval: self.config.progress_interval,
            completed: AtomicUsize::new(0),
            last_reported: Mutex::new(0),
            total: origins.len(),
        };

        let outcomes: Vec<OriginOutcome> = if workers == 1 {
            let mut scratch = SearchScratch::new();
            origins
                .iter()
                .map(|&origin| ctx.process(origin, &mut scratch))
                .collect()
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("access-worker-{}", i))
                .build()
                .map_err(|e| ConfigError::ThreadPool(e.to_string()))?;
            pool.install(|| {
                origins
                    .par_iter()
                    .map_init(SearchScratch::new, |scratch, &origin| {
                        ctx.process(origin, scratch)
                    })
                    .collect()
            })
        };

        let mut records = Vec::new();
        let mut skipped = Vec::new();
        let mut processed = 0;
        let mut failed = 0;
        let mut cancelled_origins = 0;
        for outcome in outcomes {
            match outcome {
                OriginOutcome::Reached(found) => {
                    processed += 1;
                    records.extend(found);
                }
                OriginOutcome::Absent(skip) => skipped.push(skip),
                OriginOutcome::Failed(skip) => {
                    failed += 1;
                    skipped.push(skip);
                }
                OriginOutcome::Cancelled => cancelled_origins += 1,
            }
        }

        // Absent origins are neither failures nor attempts.
        let dispatched = processed + failed;
        if failed > 0 {
            let fraction = failed as f64 / dispatched as f64;
            if fraction > self.config.max_failure_fraction || failed == dispatched {
                tracing::error!("{} of {} origins failed, aborting", failed, dispatched);
                return Err(EngineError::TooManyFailures {
                    failed,
                    total: dispatched,
                    tolerance: self.config.max_failure_fraction,
                    skipped,
                });
            }
        }
        if !skipped.is_empty() {
            tracing::warn!(
                "Skipped {} of {} origins ({} failed): {:?}",
                skipped.len(),
                origins.len(),
                failed,
                skipped.iter().map(|s| s.origin).collect::<Vec<_>>()
            );
        }

        finalize_records(&mut records);
        let elapsed_secs = started.elapsed().as_secs_f64();
        if cancelled_origins > 0 {
            tracing::warn!(
                "Job cancelled: {} origins were never dispatched",
                cancelled_origins
            );
        }
        log_changes!(
            verbosity,
            "Calculated {} reachability records in {:.2}s",
            records.len(),
            elapsed_secs
        );

        Ok(JobReport {
            records,
            requested_origins: origins.len(),
            processed_origins: processed,
            failed_origins: failed,
            skipped,
            cancelled_origins,
            missing_destinations: missing.len(),
            workers,
            elapsed_secs,
            cancelled: cancelled_origins > 0 || cancel.is_cancelled(),
        })
    }
}
