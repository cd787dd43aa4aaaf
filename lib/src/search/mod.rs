//! Parallel nearest-point search.
//!
//! [`NearestPointResolver`] finds, for a query coordinate, the candidate at
//! the smallest squared Euclidean distance. Squared distance is only used to
//! rank candidates here; it is never fed back into the objective.
//!
//! The search is a recursive divide and conquer:
//!
//! 1. a collection of at most `chunk_size` candidates is scanned directly;
//! 2. larger collections are cut into contiguous chunks of `chunk_size`, each
//!    chunk is scanned on the search pool, and the resolver recurses on the
//!    sequence of per-chunk winners.
//!
//! Chunk winners are [`Candidate::Pending`] handles. A handle is only blocked
//! on when its value is needed: right before its chunk is dispatched at the
//! next level, or inside a final scan. Only the calling thread ever blocks,
//! so pool tasks always receive concrete points.
//!
//! Ties go to the candidate listed first. Chunk winners keep input order and
//! every scan keeps the first strict minimum, so among equidistant points the
//! one with the lowest index wins.
//!
//! [`NearestPointResolver::resolve_batch`] adds the coarse level: one
//! top-level search per layer on the layer pool, recombined by layer index.

mod pool;

pub use pool::{TaskHandle, WorkerPool};

use crate::config::SearchConfig;
use crate::geometry::PointF;
use crate::layer::PointCloud;
use crate::pipeline::CancelToken;
use crate::{Error, Result};
use log::debug;
use rayon::ThreadPool;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};

/// How often a waiting batch checks for cancellation.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A search candidate: either a concrete point or the pending winner of a
/// dispatched chunk.
#[derive(Debug)]
pub enum Candidate {
    Ready(PointF),
    Pending(TaskHandle<PointF>),
}

impl Candidate {
    /// Block until the candidate has a concrete value.
    pub fn materialize(self) -> Result<PointF> {
        match self {
            Candidate::Ready(p) => Ok(p),
            Candidate::Pending(handle) => handle.join(),
        }
    }
}

impl From<PointF> for Candidate {
    fn from(p: PointF) -> Self {
        Candidate::Ready(p)
    }
}

/// Linear scan for the closest point. `points` must not be empty.
fn scan(query: PointF, points: &[PointF]) -> PointF {
    let mut best = points[0];
    let mut best_distance = query.distance_squared(&best);
    for p in &points[1..] {
        let d = query.distance_squared(p);
        if d < best_distance {
            best_distance = d;
            best = *p;
        }
    }
    best
}

/// Within-layer search bound to a running search pool.
#[derive(Clone)]
struct Search {
    pool: Arc<ThreadPool>,
    chunk_size: usize,
}

impl Search {
    fn nearest(&self, query: Candidate, candidates: Vec<Candidate>) -> Result<PointF> {
        let query = query.materialize()?;
        self.nearest_to(query, candidates)
    }

    fn nearest_to(&self, query: PointF, mut candidates: Vec<Candidate>) -> Result<PointF> {
        let n = candidates.len();
        if n == 0 {
            return Err(Error::EmptyCandidates);
        }
        if n == 1 {
            return candidates.swap_remove(0).materialize();
        }
        if n <= self.chunk_size {
            let points = candidates
                .into_iter()
                .map(Candidate::materialize)
                .collect::<Result<Vec<_>>>()?;
            return Ok(scan(query, &points));
        }

        let mut winners = Vec::with_capacity(n.div_ceil(self.chunk_size));
        let mut rest = candidates.into_iter().peekable();
        while rest.peek().is_some() {
            let chunk = rest
                .by_ref()
                .take(self.chunk_size)
                .map(Candidate::materialize)
                .collect::<Result<Vec<_>>>()?;
            winners.push(Candidate::Pending(pool::spawn(&self.pool, move || {
                scan(query, &chunk)
            })));
        }
        self.nearest_to(query, winners)
    }
}

/// Failure injected into one batch of layer tasks.
#[cfg(test)]
#[derive(Clone, Copy, Debug)]
pub(crate) enum Fault {
    /// The task for layer 0 panics before reporting.
    Panic,
    /// Every layer task sleeps before searching.
    Stall(Duration),
}

#[cfg(test)]
fn apply_fault(fault: Option<Fault>, layer: usize) {
    match fault {
        Some(Fault::Panic) if layer == 0 => panic!("layer {} task died", layer),
        Some(Fault::Stall(delay)) => std::thread::sleep(delay),
        _ => {}
    }
}

/// Two-level parallel nearest-point resolver.
///
/// Owns the coarse layer pool and the fine search pool. Both can be torn
/// down and rebuilt with [`rebuild`](Self::rebuild) after an interrupted
/// batch left work in flight.
pub struct NearestPointResolver {
    layer_pool: WorkerPool,
    search_pool: WorkerPool,
    chunk_size: usize,
    #[cfg(test)]
    fault: Option<(usize, Fault)>,
    #[cfg(test)]
    batches: AtomicUsize,
}

impl NearestPointResolver {
    /// Start both pools.
    pub fn new(config: &SearchConfig) -> Result<Self> {
        if config.chunk_size < 2 {
            return Err(Error::Config("Chunk size must be at least 2".into()));
        }
        Ok(Self {
            layer_pool: WorkerPool::new("snapper-layer", config.layer_threads)?,
            search_pool: WorkerPool::new("snapper-search", config.search_threads)?,
            chunk_size: config.chunk_size,
            #[cfg(test)]
            fault: None,
            #[cfg(test)]
            batches: AtomicUsize::new(0),
        })
    }

    /// Inject `fault` into the `batch`-th call of
    /// [`resolve_batch`](Self::resolve_batch), counting from 0.
    #[cfg(test)]
    pub(crate) fn inject_fault(&mut self, batch: usize, fault: Fault) {
        self.fault = Some((batch, fault));
    }

    #[cfg(test)]
    fn next_batch_fault(&self) -> Option<Fault> {
        let batch = self.batches.fetch_add(1, Ordering::SeqCst);
        self.fault
            .filter(|(at, _)| *at == batch)
            .map(|(_, fault)| fault)
    }

    fn search(&self) -> Result<Search> {
        Ok(Search {
            pool: self.search_pool.handle()?,
            chunk_size: self.chunk_size,
        })
    }

    /// Closest point of `candidates` to `query`.
    pub fn resolve(&self, query: PointF, candidates: &[PointF]) -> Result<PointF> {
        self.resolve_candidates(
            Candidate::Ready(query),
            candidates.iter().copied().map(Candidate::Ready).collect(),
        )
    }

    /// Closest candidate to `query`, where either side may still be pending.
    pub fn resolve_candidates(&self, query: Candidate, candidates: Vec<Candidate>) -> Result<PointF> {
        self.search()?.nearest(query, candidates)
    }

    /// Resolve one query per layer in parallel.
    ///
    /// `queries[i]` is resolved against layer `i`. Results come back in layer
    /// order regardless of completion order. If `cancel` fires while waiting,
    /// the batch is abandoned with [`Error::Cancelled`]; tasks still in flight
    /// are left to the pools, which should then be rebuilt.
    pub fn resolve_batch(
        &self,
        queries: &[PointF],
        cloud: &PointCloud,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<PointF>> {
        if queries.len() != cloud.layer_count() {
            return Err(Error::LengthMismatch {
                expected: cloud.layer_count(),
                actual: queries.len(),
            });
        }
        let layer_pool = self.layer_pool.handle()?;
        let search = self.search()?;
        #[cfg(test)]
        let fault = self.next_batch_fault();

        let (tx, rx) = mpsc::channel();
        for (index, (layer, query)) in cloud.layers().iter().zip(queries).enumerate() {
            let tx = tx.clone();
            let search = search.clone();
            let points = layer.shared_points();
            let query = *query;
            layer_pool.spawn(move || {
                #[cfg(test)]
                apply_fault(fault, index);
                let candidates = points.iter().copied().map(Candidate::Ready).collect();
                let result = match search.nearest_to(query, candidates) {
                    Err(Error::Pool(_)) => Err(Error::Worker { layer: index }),
                    other => other,
                };
                let _ = tx.send((index, result));
            });
        }
        drop(tx);

        collect_batch(rx, queries.len(), cancel)
    }

    /// Whether both pools are accepting work.
    pub fn is_running(&self) -> bool {
        self.layer_pool.is_running() && self.search_pool.is_running()
    }

    /// Discard both pools.
    pub fn shutdown(&mut self) {
        self.layer_pool.shutdown();
        self.search_pool.shutdown();
    }

    /// Discard both pools and start fresh ones.
    pub fn rebuild(&mut self) -> Result<()> {
        debug!("Rebuilding nearest-point worker pools");
        self.layer_pool.recreate()?;
        self.search_pool.recreate()
    }
}

/// Gather `count` indexed results. A layer whose task vanished without
/// reporting is a fatal [`Error::Worker`].
fn collect_batch(
    rx: Receiver<(usize, Result<PointF>)>,
    count: usize,
    cancel: Option<&CancelToken>,
) -> Result<Vec<PointF>> {
    let mut results: Vec<Option<PointF>> = vec![None; count];
    let mut remaining = count;
    while remaining > 0 {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(Error::Cancelled);
        }
        match rx.recv_timeout(CANCEL_POLL_INTERVAL) {
            Ok((index, result)) => {
                results[index] = Some(result?);
                remaining -= 1;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    results
        .into_iter()
        .enumerate()
        .map(|(layer, r)| r.ok_or(Error::Worker { layer }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(chunk_size: usize) -> NearestPointResolver {
        let config = SearchConfig {
            chunk_size,
            layer_threads: 2,
            search_threads: 2,
        };
        NearestPointResolver::new(&config).unwrap()
    }

    fn p(x: f64, y: f64) -> PointF {
        PointF::new(x, y)
    }

    /// Deterministic scatter of points.
    fn scatter(n: usize) -> Vec<PointF> {
        (0..n)
            .map(|i| {
                let t = i as f64;
                p((t * 37.0) % 150.0, (t * 91.0 + 13.0) % 150.0)
            })
            .collect()
    }

    #[test]
    fn test_empty_candidates_is_an_error() {
        let r = resolver(2);
        assert!(matches!(r.resolve(p(0.0, 0.0), &[]), Err(Error::EmptyCandidates)));
    }

    #[test]
    fn test_single_candidate_returned_regardless_of_query() {
        let r = resolver(2);
        for q in [p(0.0, 0.0), p(-1.0, -1.0), p(1e9, -1e9)] {
            assert_eq!(r.resolve(q, &[p(3.0, 4.0)]).unwrap(), p(3.0, 4.0));
        }
    }

    #[test]
    fn test_pair_prefers_closer_and_first_on_tie() {
        let r = resolver(2);
        let a = p(2.0, 2.0);
        let b = p(8.0, 2.0);
        assert_eq!(r.resolve(a, &[a, b]).unwrap(), a);
        assert_eq!(r.resolve(p(7.0, 2.0), &[a, b]).unwrap(), b);
        // equidistant
        assert_eq!(r.resolve(p(5.0, 2.0), &[a, b]).unwrap(), a);
        assert_eq!(r.resolve(p(5.0, 2.0), &[b, a]).unwrap(), b);
    }

    #[test]
    fn test_matches_linear_scan() {
        let r = resolver(2);
        let points = scatter(257);
        for q in [p(0.0, 0.0), p(75.0, 75.0), p(149.0, 3.0), p(-20.0, 200.0)] {
            assert_eq!(r.resolve(q, &points).unwrap(), scan(q, &points));
        }
    }

    #[test]
    fn test_tie_across_chunks_goes_to_lowest_index() {
        let r = resolver(2);
        let q = p(0.0, 0.0);
        let points = vec![
            p(9.0, 9.0),
            p(8.0, 8.0),
            p(0.0, 5.0), // first of the equidistant points
            p(7.0, 7.0),
            p(5.0, 0.0),
            p(-5.0, 0.0),
            p(6.0, 6.0),
        ];
        assert_eq!(r.resolve(q, &points).unwrap(), p(0.0, 5.0));
    }

    #[test]
    fn test_larger_chunks_agree() {
        let points = scatter(100);
        let q = p(42.0, 17.0);
        let expected = scan(q, &points);
        for chunk in [2, 3, 7, 64, 200] {
            assert_eq!(resolver(chunk).resolve(q, &points).unwrap(), expected);
        }
    }

    #[test]
    fn test_idempotent() {
        let r = resolver(2);
        let points = scatter(64);
        let q = p(10.0, 120.0);
        assert_eq!(r.resolve(q, &points).unwrap(), r.resolve(q, &points).unwrap());
    }

    #[test]
    fn test_pending_query_and_candidates() {
        let r = resolver(2);
        let query = Candidate::Pending(TaskHandle::ready(p(10.0, 10.0)));
        let candidates = vec![
            Candidate::Ready(p(0.0, 0.0)),
            Candidate::Pending(TaskHandle::ready(p(11.0, 11.0))),
            Candidate::Ready(p(30.0, 30.0)),
        ];
        assert_eq!(r.resolve_candidates(query, candidates).unwrap(), p(11.0, 11.0));
    }

    #[test]
    fn test_batch_is_index_aligned() {
        let r = resolver(2);
        let cloud = PointCloud::from_points(vec![
            vec![p(0.0, 0.0), p(10.0, 10.0)],
            vec![p(5.0, 5.0), p(15.0, 15.0)],
            vec![p(20.0, 20.0)],
        ])
        .unwrap();
        let queries = vec![p(9.0, 9.0), p(-1.0, -1.0), p(0.0, 0.0)];
        let nearest = r.resolve_batch(&queries, &cloud, None).unwrap();
        assert_eq!(nearest, vec![p(10.0, 10.0), p(5.0, 5.0), p(20.0, 20.0)]);
    }

    #[test]
    fn test_batch_length_mismatch() {
        let r = resolver(2);
        let cloud = PointCloud::from_points(vec![vec![p(0.0, 0.0)]]).unwrap();
        assert!(matches!(
            r.resolve_batch(&[], &cloud, None),
            Err(Error::LengthMismatch { expected: 1, actual: 0 })
        ));
    }

    #[test]
    fn test_missing_result_is_a_worker_error() {
        let (tx, rx) = mpsc::channel();
        tx.send((0, Ok(p(1.0, 1.0)))).unwrap();
        drop(tx);
        assert!(matches!(
            collect_batch(rx, 2, None),
            Err(Error::Worker { layer: 1 })
        ));
    }

    #[test]
    fn test_cancelled_batch() {
        let (_tx, rx) = mpsc::channel::<(usize, Result<PointF>)>();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            collect_batch(rx, 1, Some(&cancel)),
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn test_shutdown_then_rebuild() {
        let mut r = resolver(2);
        r.shutdown();
        assert!(!r.is_running());
        assert!(matches!(r.resolve(p(0.0, 0.0), &[p(1.0, 1.0)]), Err(Error::Pool(_))));
        r.rebuild().unwrap();
        assert!(r.is_running());
        assert_eq!(r.resolve(p(0.0, 0.0), &[p(1.0, 1.0)]).unwrap(), p(1.0, 1.0));
    }

    fn three_layers() -> PointCloud {
        PointCloud::from_points(vec![
            vec![p(0.0, 0.0), p(10.0, 10.0)],
            vec![p(5.0, 5.0), p(15.0, 15.0)],
            vec![p(20.0, 20.0)],
        ])
        .unwrap()
    }

    #[test]
    fn test_dead_layer_task_is_a_worker_error() {
        let mut r = resolver(2);
        r.inject_fault(1, Fault::Panic);
        let cloud = three_layers();
        let queries = vec![p(0.0, 0.0); 3];
        assert!(r.resolve_batch(&queries, &cloud, None).is_ok());
        assert!(matches!(
            r.resolve_batch(&queries, &cloud, None),
            Err(Error::Worker { layer: 0 })
        ));
        // only the injected batch fails
        assert!(r.resolve_batch(&queries, &cloud, None).is_ok());
    }

    #[test]
    fn test_cancel_while_batch_in_flight() {
        let mut r = resolver(2);
        r.inject_fault(0, Fault::Stall(Duration::from_secs(5)));
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = r.resolve_batch(&[p(0.0, 0.0); 3], &three_layers(), Some(&cancel));
        canceller.join().unwrap();

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(4));
        r.rebuild().unwrap();
        assert_eq!(
            r.resolve_batch(&[p(0.0, 0.0); 3], &three_layers(), None).unwrap(),
            vec![p(0.0, 0.0), p(5.0, 5.0), p(20.0, 20.0)]
        );
    }

    #[test]
    fn test_invalid_chunk_size() {
        let config = SearchConfig {
            chunk_size: 1,
            ..SearchConfig::default()
        };
        assert!(matches!(
            NearestPointResolver::new(&config),
            Err(Error::Config(_))
        ));
    }
}
