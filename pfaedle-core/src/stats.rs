/*!
Run-level telemetry: counters for the trip cache and the solver, exposed
as a snapshot after the run completes. No exceptions propagate for
locally-recoverable errors — they show up here instead.
*/

use std::ops::{Add, AddAssign};
use std::sync::atomic::{AtomicU64, Ordering};

/// Caller-supplied logging context threaded through the cache and
/// worker pool, replacing the original's process-wide
/// `g_lookupSampleCount`/`g_errorSampleCount` atomics (see Design Note
/// "Global mutable state" in spec.md §9). Every throttled call site
/// gets its own counter on this struct rather than sharing one global,
/// so two independent runs (e.g. concurrent test cases) never interfere.
#[derive(Debug, Default)]
pub struct RunContext {
    lookup_sample_count: AtomicU64,
    error_sample_count: AtomicU64,
}

impl RunContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once every `every_n` calls, starting with the
    /// first. Used to throttle high-volume `tracing::debug!` call
    /// sites (e.g. one log line per cache lookup) down to a sample.
    pub fn sample_lookup(&self, every_n: u64) -> bool {
        sample(&self.lookup_sample_count, every_n)
    }

    /// Same throttling as [`Self::sample_lookup`], for error-path
    /// logging (cache corruption, build-time skip warnings).
    pub fn sample_error(&self, every_n: u64) -> bool {
        sample(&self.error_sample_count, every_n)
    }
}

fn sample(counter: &AtomicU64, every_n: u64) -> bool {
    let every_n = every_n.max(1);
    let prev = counter.fetch_add(1, Ordering::Relaxed);
    prev % every_n == 0
}

/// Lock-free counters shared across worker threads by the trip cache
///. Cheap to increment from any thread without taking the cache's
/// mutation mutex.
#[derive(Debug, Default)]
pub struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub stores: AtomicU64,
    pub store_skipped: AtomicU64,
    pub errors: AtomicU64,
    pub evictions: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl CacheCounters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            store_skipped: self.store_skipped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_bytes(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Immutable point-in-time read of [`CacheCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub store_skipped: u64,
    pub errors: u64,
    pub evictions: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

/// Aggregate solver telemetry for an entire run, accumulated across all
/// worker threads as plain (non-atomic) values and combined at the end.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct RunStats {
    pub tot_num_trips: u64,
    pub num_tries: u64,
    pub num_trie_leaves: u64,
    pub solve_time_seconds: f64,
    pub dijkstra_iters: u64,
    pub num_dropped_trips: u64,
}

impl Add for RunStats {
    type Output = RunStats;

    fn add(self, rhs: RunStats) -> RunStats {
        RunStats {
            tot_num_trips: self.tot_num_trips + rhs.tot_num_trips,
            num_tries: self.num_tries + rhs.num_tries,
            num_trie_leaves: self.num_trie_leaves + rhs.num_trie_leaves,
            solve_time_seconds: self.solve_time_seconds + rhs.solve_time_seconds,
            dijkstra_iters: self.dijkstra_iters + rhs.dijkstra_iters,
            num_dropped_trips: self.num_dropped_trips + rhs.num_dropped_trips,
        }
    }
}

impl AddAssign for RunStats {
    fn add_assign(&mut self, rhs: RunStats) {
        *self = *self + rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_counters_snapshot_reflects_increments() {
        let counters = CacheCounters::new();
        CacheCounters::inc(&counters.hits);
        CacheCounters::inc(&counters.hits);
        CacheCounters::inc(&counters.misses);
        let snap = counters.snapshot();
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.misses, 1);
    }

    #[test]
    fn run_context_samples_every_nth_call() {
        let ctx = RunContext::new();
        let hits: Vec<bool> = (0..6).map(|_| ctx.sample_error(3)).collect();
        assert_eq!(hits, vec![true, false, false, true, false, false]);
    }

    #[test]
    fn run_stats_add_assign_accumulates() {
        let mut total = RunStats::default();
        total += RunStats { tot_num_trips: 3, num_dropped_trips: 1, ..Default::default() };
        total += RunStats { tot_num_trips: 2, num_dropped_trips: 0, ..Default::default() };
        assert_eq!(total.tot_num_trips, 5);
        assert_eq!(total.num_dropped_trips, 1);
    }
}
