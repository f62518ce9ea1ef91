/*!
The on-disk trip cache: a content-addressed store of previously
solved hop sequences, keyed by trip identity and scoped by graph/params
fingerprint so a rebuilt graph or retuned parameter set never reads
stale hops back. Binary format and directory layout are fixed; this
module only needs `std::fs`/`std::io` plus the fingerprints and
counters already built.
*/

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use hashbrown::HashMap;
use tracing::{debug, warn};

use crate::fingerprint::{edge_fingerprint, Fingerprint};
use crate::graph::{EdgeId, RoadGraph};
use crate::stats::{CacheCounters, CacheStats, RunContext};

pub const CACHE_FORMAT_VERSION: u32 = 1;
const MAGIC: [u8; 3] = *b"PFC";

/// One traversed hop in a solved trip, as persisted to / restored from
/// the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedHop {
    pub start_edge: Option<EdgeId>,
    pub end_edge: Option<EdgeId>,
    pub start_point: Option<(f64, f64)>,
    pub end_point: Option<(f64, f64)>,
    pub progress_start: f64,
    pub progress_end: f64,
    pub edges: Vec<EdgeId>,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheReadError {
    #[error("bad magic")]
    BadMagic,
    #[error("version mismatch")]
    VersionMismatch,
    #[error("truncated")]
    Truncated,
    #[error("edge fingerprint did not resolve to a current edge")]
    UnresolvedEdge,
}

/// Maps both orientations of every edge's fingerprint back to its
/// `EdgeId` (for decode), and every `EdgeId` to its canonical forward
/// fingerprint (for encode). Built once at cache construction.
/// Collisions in `by_hash` are tolerated; the lookup keeps whichever
/// edge claimed the hash first.
struct EdgeIndex {
    by_hash: HashMap<u128, EdgeId>,
    hash_of: HashMap<EdgeId, u128>,
}

impl EdgeIndex {
    fn build(graph: &RoadGraph) -> Self {
        let mut by_hash = HashMap::new();
        let mut hash_of = HashMap::new();

        for edge_id in graph.edge_ids() {
            let Some(edge) = graph.edge(edge_id) else { continue };
            let fwd = edge_fingerprint(edge);
            by_hash.entry(fwd.0).or_insert(edge_id);
            hash_of.insert(edge_id, fwd.0);

            let mut reversed = edge.clone();
            reversed.geometry.0.reverse();
            let rev = edge_fingerprint(&reversed);
            by_hash.entry(rev.0).or_insert(edge_id);
        }

        EdgeIndex { by_hash, hash_of }
    }

    fn resolve(&self, hash: u128) -> Option<EdgeId> {
        self.by_hash.get(&hash).copied()
    }

    fn hash_of(&self, id: EdgeId) -> u128 {
        self.hash_of.get(&id).copied().unwrap_or(0)
    }
}

/// The on-disk trip cache. Holds no in-memory copy of entries; every
/// `lookup`/`store` round-trips through the filesystem. Shared across
/// worker threads; serialized by one mutex for all filesystem
/// mutation.
pub struct TripCache {
    root: PathBuf,
    max_bytes: u64,
    edge_index: EdgeIndex,
    counters: CacheCounters,
    mutation: Mutex<()>,
    disabled: bool,
    context: RunContext,
}

impl TripCache {
    /// Construct the cache rooted at `base_dir/trip-cache/v<VERSION>/
    /// <graphHash>/<paramsHash>`. If the base directory cannot be
    /// created, the cache disables itself (`CacheIOFatal`) and every
    /// subsequent operation becomes a silent no-op miss.
    #[must_use]
    pub fn open(
        base_dir: &Path,
        graph: &RoadGraph,
        graph_fp: Fingerprint,
        params_fp: Fingerprint,
        max_bytes: u64,
    ) -> Self {
        let root = base_dir
            .join("trip-cache")
            .join(format!("v{CACHE_FORMAT_VERSION}"))
            .join(graph_fp.to_string())
            .join(params_fp.to_string());

        let disabled = fs::create_dir_all(&root).is_err();
        if disabled {
            warn!(root = %root.display(), "trip cache base directory is not creatable, disabling cache");
        }

        TripCache {
            root,
            max_bytes,
            edge_index: EdgeIndex::build(graph),
            counters: CacheCounters::new(),
            mutation: Mutex::new(()),
            disabled,
            context: RunContext::new(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let prefix = &key[..key.len().min(2)];
        self.root.join(prefix).join(format!("{key}.bin"))
    }

    /// Look up `key`. Any corruption (bad magic, version mismatch,
    /// truncation, or an edge hash that no longer resolves) is treated
    /// as a miss: the offending file is deleted and the error counter
    /// incremented, never propagated.
    pub fn lookup(&self, key: &str) -> Option<Vec<CachedHop>> {
        if self.disabled {
            return None;
        }
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(_) => {
                CacheCounters::inc(&self.counters.misses);
                return None;
            }
        };
        CacheCounters::add_bytes(&self.counters.bytes_read, bytes.len() as u64);

        match self.decode(&bytes) {
            Ok(hops) => {
                CacheCounters::inc(&self.counters.hits);
                if self.context.sample_lookup(200) {
                    debug!(key, bytes = bytes.len(), "cache hit");
                }
                let _ = touch(&path);
                Some(hops)
            }
            Err(e) => {
                CacheCounters::inc(&self.counters.errors);
                CacheCounters::inc(&self.counters.misses);
                if self.context.sample_error(50) {
                    warn!(key, error = %e, "cache entry corrupt, deleting");
                }
                let _guard = self.mutation.lock().unwrap();
                let _ = fs::remove_file(&path);
                None
            }
        }
    }

    /// Store `hops` under `key`. At-most-once and idempotent: if the
    /// file already exists, its mtime is touched and the call returns
    /// without re-writing (`storeSkipped`, not `stores`).
    pub fn store(&self, key: &str, hops: &[CachedHop]) {
        if self.disabled {
            return;
        }
        let path = self.path_for(key);
        let _guard = self.mutation.lock().unwrap();

        if path.exists() {
            CacheCounters::inc(&self.counters.store_skipped);
            let _ = touch(&path);
            return;
        }

        let Some(parent) = path.parent() else { return };
        if fs::create_dir_all(parent).is_err() {
            CacheCounters::inc(&self.counters.errors);
            return;
        }

        let bytes = self.encode(hops);
        match fs::write(&path, &bytes) {
            Ok(()) => {
                CacheCounters::inc(&self.counters.stores);
                CacheCounters::add_bytes(&self.counters.bytes_written, bytes.len() as u64);
            }
            Err(_) => {
                CacheCounters::inc(&self.counters.errors);
                return;
            }
        }
        drop(_guard);

        if self.max_bytes > 0 {
            self.evict_if_over_budget();
        }
    }

    pub fn remove(&self, key: &str) {
        if self.disabled {
            return;
        }
        let path = self.path_for(key);
        let _guard = self.mutation.lock().unwrap();
        let _ = fs::remove_file(&path);
    }

    /// Enumerate every entry under `root`, sort ascending by mtime
    /// (ties broken by path), and delete the oldest until the running
    /// total is at or under `max_bytes`. Best-effort: a delete failure
    /// is counted-as-skipped, not retried.
    fn evict_if_over_budget(&self) {
        let _guard = self.mutation.lock().unwrap();

        let mut entries: Vec<(PathBuf, u64, std::time::SystemTime)> = Vec::new();
        let mut total: u64 = 0;
        walk_entries(&self.root, &mut entries, &mut total);

        if total <= self.max_bytes {
            return;
        }

        entries.sort_by(|a, b| a.2.cmp(&b.2).then_with(|| a.0.cmp(&b.0)));

        for (path, size, _) in entries {
            if total <= self.max_bytes {
                break;
            }
            if fs::remove_file(&path).is_ok() {
                total = total.saturating_sub(size);
                CacheCounters::inc(&self.counters.evictions);
            }
        }
    }

    fn encode(&self, hops: &[CachedHop]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        out.push(b'0' + (CACHE_FORMAT_VERSION as u8));
        out.extend_from_slice(&CACHE_FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(hops.len() as u32).to_le_bytes());

        for hop in hops {
            out.push(u8::from(hop.start_edge.is_some()));
            out.push(u8::from(hop.end_edge.is_some()));
            out.push(u8::from(hop.start_point.is_some()));
            out.push(u8::from(hop.end_point.is_some()));
            out.extend_from_slice(&hop.progress_start.to_le_bytes());
            out.extend_from_slice(&hop.progress_end.to_le_bytes());

            if let Some((x, y)) = hop.start_point {
                out.extend_from_slice(&x.to_le_bytes());
                out.extend_from_slice(&y.to_le_bytes());
            }
            if let Some((x, y)) = hop.end_point {
                out.extend_from_slice(&x.to_le_bytes());
                out.extend_from_slice(&y.to_le_bytes());
            }

            out.extend_from_slice(&(hop.edges.len() as u32).to_le_bytes());
            for edge_id in &hop.edges {
                push_u128_as_two_u64(&mut out, self.edge_index.hash_of(*edge_id));
            }

            let start_hash = hop.start_edge.map(|e| self.edge_index.hash_of(e)).unwrap_or(0);
            let end_hash = hop.end_edge.map(|e| self.edge_index.hash_of(e)).unwrap_or(0);
            push_u128_as_two_u64(&mut out, start_hash);
            push_u128_as_two_u64(&mut out, end_hash);
        }
        out
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<CachedHop>, CacheReadError> {
        let mut cur = Cursor::new(bytes);
        let magic = cur.take(3)?;
        if magic != MAGIC {
            return Err(CacheReadError::BadMagic);
        }
        let version_tag = cur.take(1)?[0];
        if version_tag != b'0' + (CACHE_FORMAT_VERSION as u8) {
            return Err(CacheReadError::VersionMismatch);
        }
        let version = cur.take_u32()?;
        if version != CACHE_FORMAT_VERSION {
            return Err(CacheReadError::VersionMismatch);
        }
        let hop_count = cur.take_u32()?;

        let mut hops = Vec::with_capacity(hop_count as usize);
        for _ in 0..hop_count {
            let has_start_edge = cur.take(1)?[0] != 0;
            let has_end_edge = cur.take(1)?[0] != 0;
            let has_start_point = cur.take(1)?[0] != 0;
            let has_end_point = cur.take(1)?[0] != 0;
            let progress_start = cur.take_f64()?;
            let progress_end = cur.take_f64()?;

            let start_point = if has_start_point {
                Some((cur.take_f64()?, cur.take_f64()?))
            } else {
                None
            };
            let end_point = if has_end_point {
                Some((cur.take_f64()?, cur.take_f64()?))
            } else {
                None
            };

            let edge_count = cur.take_u32()?;
            let mut edges = Vec::with_capacity(edge_count as usize);
            for _ in 0..edge_count {
                let hash = take_u128(&mut cur)?;
                let edge_id = self.edge_index.resolve(hash).ok_or(CacheReadError::UnresolvedEdge)?;
                edges.push(edge_id);
            }

            let start_hash = take_u128(&mut cur)?;
            let end_hash = take_u128(&mut cur)?;
            let start_edge = if has_start_edge {
                Some(self.edge_index.resolve(start_hash).ok_or(CacheReadError::UnresolvedEdge)?)
            } else {
                None
            };
            let end_edge = if has_end_edge {
                Some(self.edge_index.resolve(end_hash).ok_or(CacheReadError::UnresolvedEdge)?)
            } else {
                None
            };

            hops.push(CachedHop {
                start_edge,
                end_edge,
                start_point,
                end_point,
                progress_start,
                progress_end,
                edges,
            });
        }

        Ok(hops)
    }
}

fn push_u128_as_two_u64(out: &mut Vec<u8>, value: u128) {
    let lo = value as u64;
    let hi = (value >> 64) as u64;
    out.extend_from_slice(&lo.to_le_bytes());
    out.extend_from_slice(&hi.to_le_bytes());
}

fn take_u128(cur: &mut Cursor<'_>) -> Result<u128, CacheReadError> {
    let lo = cur.take_u64()?;
    let hi = cur.take_u64()?;
    Ok((u128::from(hi) << 64) | u128::from(lo))
}

fn walk_entries(dir: &Path, out: &mut Vec<(PathBuf, u64, std::time::SystemTime)>, total: &mut u64) {
    let Ok(read_dir) = fs::read_dir(dir) else { return };
    for entry in read_dir.flatten() {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else { continue };
        if meta.is_dir() {
            walk_entries(&path, out, total);
        } else {
            let size = meta.len();
            *total += size;
            let mtime = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
            out.push((path, size, mtime));
        }
    }
}

fn touch(path: &Path) -> io::Result<()> {
    let file = fs::OpenOptions::new().append(true).open(path)?;
    file.set_len(file.metadata()?.len())?;
    Ok(())
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CacheReadError> {
        if self.pos + n > self.bytes.len() {
            return Err(CacheReadError::Truncated);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u32(&mut self) -> Result<u32, CacheReadError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn take_u64(&mut self) -> Result<u64, CacheReadError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn take_f64(&mut self) -> Result<f64, CacheReadError> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Mode, ModeSet, OneWay, RoadEdge, RoadNode};
    use geo::{LineString, Point};
    use std::sync::atomic::{AtomicU32, Ordering};

    static TEST_DIR_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn temp_dir() -> PathBuf {
        let n = TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("pfaedle-cache-test-{n}"))
    }

    fn make_graph() -> (RoadGraph, EdgeId) {
        let mut g = RoadGraph::new();
        let a = g.add_node(RoadNode::new(Point::new(0.0, 0.0)));
        let b = g.add_node(RoadNode::new(Point::new(0.0, 0.001)));
        let e = g.add_edge(
            a,
            b,
            RoadEdge {
                geometry: LineString::from(vec![(0.0, 0.0), (0.0, 0.001)]),
                length: 111.0,
                level: 1,
                one_way: OneWay::Bidir,
                restricted: false,
                reversed_shadow: false,
                line_set: vec![],
                modes: ModeSet::of(Mode::Bus),
                way_id: 1,
                penalty_factor: 1.0,
            },
        );
        (g, e)
    }

    #[test]
    fn store_then_lookup_is_a_hit_and_round_trips_edges() {
        let dir = temp_dir();
        let (graph, edge) = make_graph();
        let cache = TripCache::open(&dir, &graph, Fingerprint(1), Fingerprint(2), 0);
        let hops = vec![CachedHop {
            start_edge: Some(edge),
            end_edge: Some(edge),
            start_point: None,
            end_point: None,
            progress_start: 0.0,
            progress_end: 1.0,
            edges: vec![edge],
        }];
        cache.store("abcd1234", &hops);
        let roundtripped = cache.lookup("abcd1234").expect("expected cache hit");
        assert_eq!(roundtripped, hops);
        assert_eq!(cache.stats().stores, 1);
        assert_eq!(cache.stats().hits, 1);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn second_store_of_same_key_is_skipped_not_counted_as_store() {
        let dir = temp_dir();
        let (graph, _edge) = make_graph();
        let cache = TripCache::open(&dir, &graph, Fingerprint(1), Fingerprint(2), 0);
        let hops = vec![];
        cache.store("deadbeef", &hops);
        cache.store("deadbeef", &hops);
        assert_eq!(cache.stats().stores, 1);
        assert_eq!(cache.stats().store_skipped, 1);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn lookup_of_missing_key_is_a_miss() {
        let dir = temp_dir();
        let (graph, _edge) = make_graph();
        let cache = TripCache::open(&dir, &graph, Fingerprint(1), Fingerprint(2), 0);
        assert!(cache.lookup("nonexistent").is_none());
        assert_eq!(cache.stats().misses, 1);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_entry_is_deleted_and_counted_as_error() {
        let dir = temp_dir();
        let (graph, _edge) = make_graph();
        let cache = TripCache::open(&dir, &graph, Fingerprint(1), Fingerprint(2), 0);
        let path = cache.path_for("badfile1");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"not a valid cache entry").unwrap();
        assert!(cache.lookup("badfile1").is_none());
        assert_eq!(cache.stats().errors, 1);
        assert!(!path.exists());
        let _ = fs::remove_dir_all(&dir);
    }
}
