/*!
Worker pool and trip trie: a bounded job queue between a single
dispatcher and N worker threads, and a prefix trie that clusters
physically-identical trips so only one representative per class is
actually solved.

**Queue design**: a classic bounded buffer guarded by one mutex and two
condition variables (`not_full`, `has_new`). The dispatcher appends one sentinel `None`
job after the real jobs; a worker popping `None` must push it back before
exiting so every other worker also observes it (`peek`, not `pop`, is
what lets the sentinel re-propagate).
*/

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use hashbrown::HashMap;

use crate::trip::Trip;

/// A bounded SPMC queue of `Option<J>`, where `None` is the
/// end-of-work sentinel. `get` blocks while the queue is empty;
/// `put` blocks while the queue is at capacity.
pub struct JobQueue<J> {
    inner: Mutex<VecDeque<Option<J>>>,
    not_full: Condvar,
    has_new: Condvar,
    capacity: usize,
}

impl<J: Clone> JobQueue<J> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        JobQueue {
            inner: Mutex::new(VecDeque::new()),
            not_full: Condvar::new(),
            has_new: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Push a real job, blocking while the buffer is full.
    pub fn put(&self, job: J) {
        let mut guard = self.inner.lock().unwrap();
        while guard.len() >= self.capacity {
            guard = self.not_full.wait(guard).unwrap();
        }
        guard.push_back(Some(job));
        self.has_new.notify_all();
    }

    /// Push the end-of-work sentinel. Never blocks on capacity: the
    /// dispatcher must always be able to signal completion.
    pub fn close(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.push_back(None);
        self.has_new.notify_all();
    }

    /// Pop the next job. Returns `None` once the sentinel is reached;
    /// a worker that sees the sentinel pushes it back before returning
    /// so every other worker also observes end-of-work.
    pub fn get(&self) -> Option<J> {
        let mut guard = self.inner.lock().unwrap();
        while guard.is_empty() {
            guard = self.has_new.wait(guard).unwrap();
        }
        let front = guard.pop_front().unwrap();
        match front {
            Some(job) => {
                self.not_full.notify_all();
                Some(job)
            }
            None => {
                guard.push_front(None);
                self.has_new.notify_all();
                None
            }
        }
    }
}

/// A prefix trie over `/`-joined components of [`Trip::pattern_identity`],
/// whose leaves are the representative classes dispatched to workers.
/// Trips sharing a leaf are physically identical and get the leaf's
/// solved result scattered back to them after one solve.
#[derive(Debug, Default)]
pub struct TripTrie {
    leaves: HashMap<String, Vec<usize>>,
}

impl TripTrie {
    #[must_use]
    pub fn new() -> Self {
        TripTrie::default()
    }

    /// Insert `trip` (identified by its index into the caller's trip
    /// list) under its pattern identity. Returns the number of distinct
    /// leaves seen so far, for [`crate::stats::RunStats::num_trie_leaves`].
    pub fn insert(&mut self, index: usize, trip: &Trip) {
        self.leaves.entry(trip.pattern_identity()).or_default().push(index);
    }

    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// One representative index per leaf — exactly what the dispatcher
    /// enqueues as jobs.
    #[must_use]
    pub fn representatives(&self) -> Vec<usize> {
        self.leaves.values().filter_map(|members| members.first().copied()).collect()
    }

    /// All trip indices that share `representative`'s leaf (including
    /// itself), for scattering a solved result back out.
    #[must_use]
    pub fn members_of(&self, representative: usize) -> &[usize] {
        self.leaves
            .values()
            .find(|members| members.first() == Some(&representative))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Run `solve_one` for every representative in `trie`, `worker_count`
/// threads at a time, scattering each result to every trip sharing that
/// representative's leaf. Output is assembled in trip-index order only
/// after every worker has joined.
pub fn run_pool<T, F>(trie: &TripTrie, trip_count: usize, worker_count: usize, solve_one: F) -> Vec<Option<T>>
where
    T: Clone + Send,
    F: Fn(usize) -> T + Sync,
{
    let queue: JobQueue<usize> = JobQueue::new(worker_count.max(1) * 4);
    let results: Mutex<Vec<Option<T>>> = Mutex::new(vec![None; trip_count]);

    std::thread::scope(|scope| {
        for _ in 0..worker_count.max(1) {
            scope.spawn(|| loop {
                let Some(representative) = queue.get() else { break };
                let value = solve_one(representative);
                let members = trie.members_of(representative);
                let mut guard = results.lock().unwrap();
                for &member in members {
                    guard[member] = Some(value.clone());
                }
            });
        }

        for representative in trie.representatives() {
            queue.put(representative);
        }
        queue.close();
    });

    results.into_inner().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Mode;
    use crate::trip::{Direction, Stop, StopTime};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn stop(id: &str) -> Stop {
        Stop { id: id.to_string(), name: "s".to_string(), platform_code: None, lat: 0.0, lng: 0.0, parent_station: None }
    }

    fn trip(id: &str, shape: &str) -> Trip {
        Trip {
            id: id.to_string(),
            service_id: "wk".to_string(),
            block_id: None,
            shape_id: Some(shape.to_string()),
            headsign: None,
            short_name: None,
            route_id: "R1".to_string(),
            route_mode: Mode::Bus,
            direction: Direction::Outbound,
            stop_times: vec![StopTime { stop: stop("s1"), arrival_offset: 0, departure_offset: 0 }],
        }
    }

    #[test]
    fn job_queue_basic_fifo() {
        let q: JobQueue<i32> = JobQueue::new(4);
        q.put(1);
        q.put(2);
        assert_eq!(q.get(), Some(1));
        assert_eq!(q.get(), Some(2));
        q.close();
        assert_eq!(q.get(), None);
        assert_eq!(q.get(), None);
    }

    #[test]
    fn trie_clusters_identical_trips() {
        let mut trie = TripTrie::new();
        trie.insert(0, &trip("t1", "shapeA"));
        trie.insert(1, &trip("t2", "shapeA"));
        trie.insert(2, &trip("t3", "shapeB"));
        assert_eq!(trie.leaf_count(), 2);
        assert_eq!(trie.representatives().len(), 2);
    }

    #[test]
    fn members_of_includes_all_trips_on_a_leaf() {
        let mut trie = TripTrie::new();
        trie.insert(0, &trip("t1", "shapeA"));
        trie.insert(1, &trip("t2", "shapeA"));
        let members = trie.members_of(0);
        assert_eq!(members.len(), 2);
        assert!(members.contains(&0));
        assert!(members.contains(&1));
    }

    #[test]
    fn run_pool_scatters_result_to_every_member_of_a_leaf() {
        let mut trie = TripTrie::new();
        trie.insert(0, &trip("t1", "shapeA"));
        trie.insert(1, &trip("t2", "shapeA"));
        trie.insert(2, &trip("t3", "shapeB"));

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let results = run_pool(&trie, 3, 2, move |idx| {
            calls_clone.fetch_add(1, Ordering::Relaxed);
            idx * 10
        });

        assert_eq!(calls.load(Ordering::Relaxed), 2);
        assert_eq!(results[0], results[1]);
        assert!(results[0].is_some());
        assert!(results[2].is_some());
    }
}
