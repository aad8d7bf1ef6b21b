//! Memoization of indexed graphs.
//!
//! Building the CSR structure is the dominant one-time cost of a job. The
//! cache keeps one `Arc<IndexedGraph>` per distinct network so repeated runs
//! against the same network (tracts, then blocks) reuse it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use rustc_hash::FxHashMap;

use crate::graph::{GraphFingerprint, IndexedGraph};
use crate::log_changes;
use crate::network::{normalize, GraphError, RawNetwork};

/// Identity under which a built graph is memoized.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum GraphKey {
    /// Caller-chosen name, e.g. the graph file path. Lets a hit skip
    /// normalization entirely.
    Named(String),
    /// Content hash of the canonical graph.
    Fingerprint(GraphFingerprint),
}

/// Snapshot of cache counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Thread-safe map from [`GraphKey`] to shared indexed graphs.
#[derive(Default)]
pub struct GraphCache {
    graphs: Mutex<FxHashMap<GraphKey, Arc<IndexedGraph>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

static GLOBAL_CACHE: OnceLock<GraphCache> = OnceLock::new();

impl GraphCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide cache used by the Python bindings.
    pub fn global() -> &'static GraphCache {
        GLOBAL_CACHE.get_or_init(GraphCache::new)
    }

    // Entries are only ever inserted whole, so a poisoned lock still guards
    // a consistent map.
    fn lock(&self) -> MutexGuard<'_, FxHashMap<GraphKey, Arc<IndexedGraph>>> {
        self.graphs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up a graph without building it.
    pub fn get(&self, key: &GraphKey) -> Option<Arc<IndexedGraph>> {
        self.lock().get(key).cloned()
    }

    /// Return the cached graph for `key`, building it with `build` on a miss.
    ///
    /// The build runs without holding the lock. If two threads race on the
    /// same key, the first inserted graph wins and both receive it.
    pub fn get_or_build<F>(&self, key: GraphKey, build: F) -> Result<Arc<IndexedGraph>, GraphError>
    where
        F: FnOnce() -> Result<IndexedGraph, GraphError>,
    {
        if let Some(graph) = self.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(graph);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let built = Arc::new(build()?);
        let mut graphs = self.lock();
        Ok(Arc::clone(graphs.entry(key).or_insert(built)))
    }

    /// Normalize and index a raw network, reusing a cached build when
    /// possible.
    ///
    /// With a `name` the lookup happens before normalization, so a hit costs
    /// nothing. Without one the canonical graph's fingerprint is the key.
    pub fn load(
        &self,
        raw: &RawNetwork,
        travel_speed_kmh: f64,
        name: Option<&str>,
        verbosity: u8,
    ) -> Result<Arc<IndexedGraph>, GraphError> {
        let hits_before = self.hits.load(Ordering::Relaxed);
        let graph = match name {
            Some(name) => self.get_or_build(GraphKey::Named(name.to_string()), || {
                IndexedGraph::build(&normalize(raw, travel_speed_kmh)?)
            })?,
            None => {
                let canonical = normalize(raw, travel_speed_kmh)?;
                let key = GraphKey::Fingerprint(GraphFingerprint::of(&canonical));
                self.get_or_build(key, || IndexedGraph::build(&canonical))?
            }
        };

        if self.hits.load(Ordering::Relaxed) > hits_before {
            log_changes!(
                verbosity,
                "Using cached graph {} ({} nodes, {} edges)",
                graph.fingerprint(),
                graph.node_count(),
                graph.edge_count()
            );
        } else {
            log_changes!(
                verbosity,
                "Indexed graph {} ({} nodes, {} edges)",
                graph.fingerprint(),
                graph.node_count(),
                graph.edge_count()
            );
        }
        Ok(graph)
    }

    /// Drop every cached graph. Handles already given out stay valid.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.lock().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawEdge;
    use crate::network::{normalize, CanonicalGraph, RawNetwork};
    use std::sync::atomic::AtomicUsize;

    fn make_canonical() -> CanonicalGraph {
        let raw = RawNetwork::new(
            vec![1, 2, 3],
            vec![RawEdge::timed(1, 2, 1.0), RawEdge::timed(2, 3, 2.0)],
        );
        normalize(&raw, 4.5).unwrap()
    }

    #[test]
    fn test_memoizes_by_fingerprint() {
        let cache = GraphCache::new();
        let canonical = make_canonical();
        let key = GraphKey::Fingerprint(GraphFingerprint::of(&canonical));
        let builds = AtomicUsize::new(0);

        let first = cache
            .get_or_build(key.clone(), || {
                builds.fetch_add(1, Ordering::SeqCst);
                IndexedGraph::build(&canonical)
            })
            .unwrap();
        let second = cache
            .get_or_build(key, || {
                builds.fetch_add(1, Ordering::SeqCst);
                IndexedGraph::build(&canonical)
            })
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                entries: 1
            }
        );
    }

    #[test]
    fn test_named_keys_are_distinct() {
        let cache = GraphCache::new();
        let canonical = make_canonical();

        let a = cache
            .get_or_build(GraphKey::Named("walk.graphml".into()), || {
                IndexedGraph::build(&canonical)
            })
            .unwrap();
        let b = cache
            .get_or_build(GraphKey::Named("drive.graphml".into()), || {
                IndexedGraph::build(&canonical)
            })
            .unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.stats().entries, 2);
    }

    #[test]
    fn test_failed_build_is_not_cached() {
        let cache = GraphCache::new();
        let key = GraphKey::Named("broken".into());

        let err = cache.get_or_build(key.clone(), || Err(GraphError::DuplicateNode(7)));
        assert!(matches!(err, Err(GraphError::DuplicateNode(7))));
        assert!(cache.get(&key).is_none());

        let canonical = make_canonical();
        assert!(cache
            .get_or_build(key, || IndexedGraph::build(&canonical))
            .is_ok());
    }

    #[test]
    fn test_clear_keeps_outstanding_handles() {
        let cache = GraphCache::new();
        let canonical = make_canonical();
        let key = GraphKey::Named("g".into());
        let graph = cache
            .get_or_build(key.clone(), || IndexedGraph::build(&canonical))
            .unwrap();

        cache.clear();

        assert!(cache.get(&key).is_none());
        assert_eq!(graph.node_count(), 3);
    }

    #[test]
    fn test_load_by_fingerprint_and_name() {
        let cache = GraphCache::new();
        let raw = RawNetwork::new(vec![1, 2], vec![RawEdge::with_length(1, 2, 150.0)]);

        let a = cache.load(&raw, 4.5, None, 0).unwrap();
        let b = cache.load(&raw.clone(), 4.5, None, 0).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        // 150 m at 75 m/min
        assert_eq!(a.neighbors(0).collect::<Vec<_>>(), vec![(1, 2.0)]);

        // A different speed changes the weights and therefore the key.
        let slower = cache.load(&raw, 3.0, None, 0).unwrap();
        assert!(!Arc::ptr_eq(&a, &slower));

        let named = cache.load(&raw, 4.5, Some("walk"), 0).unwrap();
        let broken = RawNetwork::new(vec![1], vec![RawEdge::timed(1, 9, 1.0)]);
        // Named hit never looks at the (invalid) network again.
        let again = cache.load(&broken, 4.5, Some("walk"), 0).unwrap();
        assert!(Arc::ptr_eq(&named, &again));

        assert!(matches!(
            cache.load(&broken, 4.5, None, 0),
            Err(GraphError::UnknownEndpoint { missing: 9, .. })
        ));
    }

    #[test]
    fn test_concurrent_callers_share_one_graph() {
        let cache = GraphCache::new();
        let canonical = make_canonical();
        let key = GraphKey::Fingerprint(GraphFingerprint::of(&canonical));

        let handles: Vec<Arc<IndexedGraph>> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        cache
                            .get_or_build(key.clone(), || IndexedGraph::build(&canonical))
                            .unwrap()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        for handle in &handles[1..] {
            assert!(Arc::ptr_eq(&handles[0], handle));
        }
        assert_eq!(cache.stats().entries, 1);
    }
}
