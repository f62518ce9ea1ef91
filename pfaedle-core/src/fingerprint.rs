/*!
Stable, deterministic hashing of graph, parameter set and trip identity
. All fingerprints are 128-bit, computed with
`blake3` and truncated to its first 16 bytes — chosen over `std`'s
`DefaultHasher` because it is explicitly *not* guaranteed stable across
Rust versions, which the on-disk trip cache depends on.
*/

use std::fmt;
use std::path::Path;

use crate::cost::RoutingParams;
use crate::graph::{ModeSet, OneWay, RoadEdge};

/// A 128-bit content fingerprint, lowercase-hex `Display`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint(pub u128);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl Fingerprint {
    #[must_use]
    pub fn from_hasher_bytes(hasher: &blake3::Hasher) -> Self {
        let hash = hasher.finalize();
        let bytes = hash.as_bytes();
        Fingerprint(u128::from_le_bytes(bytes[0..16].try_into().unwrap()))
    }
}

/// Quantize a coordinate to ~1cm precision, for inclusion in an edge
/// fingerprint that must be stable across floating-point noise
/// introduced by snapping/simplification.
fn quantize(v: f64) -> i32 {
    (v * 1.0e7).round() as i32
}

/// Hash `(level, oneWay, restrictedFlag, reversedFlag, pointCount,
/// sampled-point quantized-coords)`. Component ids are deliberately
/// excluded: they are build-order-dependent and would make the cache
/// thrash on every rebuild.
#[must_use]
pub fn edge_fingerprint(edge: &RoadEdge) -> Fingerprint {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[edge.level]);
    hasher.update(&[one_way_tag(edge.one_way)]);
    hasher.update(&[u8::from(edge.restricted)]);
    hasher.update(&[u8::from(edge.reversed_shadow)]);

    let points: Vec<_> = edge.geometry.0.iter().collect();
    hasher.update(&(points.len() as u32).to_le_bytes());

    for coord in sample_points(&points) {
        hasher.update(&quantize(coord.x).to_le_bytes());
        hasher.update(&quantize(coord.y).to_le_bytes());
    }

    Fingerprint::from_hasher_bytes(&hasher)
}

fn one_way_tag(one_way: OneWay) -> u8 {
    match one_way {
        OneWay::Bidir => 0,
        OneWay::Forward => 1,
        OneWay::Reverse => 2,
    }
}

fn sample_points(points: &[&geo::Coord<f64>]) -> Vec<geo::Coord<f64>> {
    if points.len() <= 5 {
        return points.iter().map(|&&c| c).collect();
    }
    let n = points.len() - 1;
    [0.0, 0.25, 0.5, 0.75, 1.0]
        .iter()
        .map(|frac| {
            let idx = (frac * n as f64).round() as usize;
            *points[idx.min(n)]
        })
        .collect()
}

/// Hash the ascending-sorted concatenation of every edge fingerprint in
/// the graph. Order-independent: rebuilding the same map extract in a
/// different entity-stream order yields the same graph fingerprint.
#[must_use]
pub fn graph_fingerprint(edges: impl Iterator<Item = Fingerprint>) -> Fingerprint {
    let mut sorted: Vec<Fingerprint> = edges.collect();
    sorted.sort_unstable();
    let mut hasher = blake3::Hasher::new();
    for fp in sorted {
        hasher.update(&fp.0.to_le_bytes());
    }
    Fingerprint::from_hasher_bytes(&hasher)
}

/// Graph identity before the graph has been built: hash `(params
/// fingerprint, mode set, canonical map-extract path, extract file
/// size, extract mtime, grid size, box padding)`.
///
/// `extract_path` is canonicalized (resolving symlinks and `.`/`..`
/// components) before hashing, so a symlinked or relative path to the
/// same extract fingerprints identically to its absolute form. Falls
/// back to hashing the path as given when canonicalization fails (the
/// extract not existing yet, a permission error): a fingerprint mismatch
/// on a missing file is no worse than the cache miss it would have
/// caused anyway.
#[must_use]
pub fn unbuilt_graph_fingerprint(
    params_fp: Fingerprint,
    modes: ModeSet,
    extract_path: &Path,
    extract_size: u64,
    extract_mtime_secs: i64,
    grid_size_m: f64,
    box_padding_deg: f64,
) -> Fingerprint {
    let canonical = std::fs::canonicalize(extract_path).unwrap_or_else(|_| extract_path.to_path_buf());

    let mut hasher = blake3::Hasher::new();
    hasher.update(&params_fp.0.to_le_bytes());
    hasher.update(&[modes.bits()]);
    hasher.update(canonical.to_string_lossy().as_bytes());
    hasher.update(&extract_size.to_le_bytes());
    hasher.update(&extract_mtime_secs.to_le_bytes());
    hasher.update(&grid_size_m.to_le_bytes());
    hasher.update(&box_padding_deg.to_le_bytes());
    Fingerprint::from_hasher_bytes(&hasher)
}

/// Hash of all routing parameters plus the raw contents of every
/// provided config file (`extra_config_bytes`, concatenated in the
/// caller's chosen stable order).
#[must_use]
pub fn params_fingerprint(params: &RoutingParams, extra_config_bytes: &[&[u8]]) -> Fingerprint {
    let mut hasher = blake3::Hasher::new();
    let encoded = serde_json::to_vec(params).unwrap_or_default();
    hasher.update(&encoded);
    for chunk in extra_config_bytes {
        hasher.update(chunk);
    }
    Fingerprint::from_hasher_bytes(&hasher)
}

/// Fingerprint of a trip's canonical cache-identity string.
#[must_use]
pub fn trip_identity_fingerprint(cache_identity: &str) -> Fingerprint {
    let mut hasher = blake3::Hasher::new();
    hasher.update(cache_identity.as_bytes());
    Fingerprint::from_hasher_bytes(&hasher)
}

/// XOR-fold the graph and params fingerprints to a 32-bit PRNG seed, so
/// two runs over identical inputs draw identical noise (e.g. the
/// Gaussian stop-location jitter used to disambiguate tied candidates).
#[must_use]
pub fn deterministic_seed(graph_fp: Fingerprint, params_fp: Fingerprint) -> u32 {
    let combined = graph_fp.0 ^ params_fp.0;
    let folded = (combined as u64) ^ ((combined >> 64) as u64);
    (folded as u32) ^ ((folded >> 32) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Mode;
    use geo::LineString;

    fn edge(level: u8) -> RoadEdge {
        RoadEdge {
            geometry: LineString::from(vec![(0.0, 0.0), (1.0, 1.0)]),
            length: 10.0,
            level,
            one_way: OneWay::Bidir,
            restricted: false,
            reversed_shadow: false,
            line_set: vec![],
            modes: ModeSet::of(Mode::Bus),
            way_id: 1,
            penalty_factor: 1.0,
        }
    }

    #[test]
    fn edge_fingerprint_is_deterministic() {
        let e = edge(3);
        assert_eq!(edge_fingerprint(&e), edge_fingerprint(&e));
    }

    #[test]
    fn edge_fingerprint_excludes_nothing_about_level() {
        let a = edge(1);
        let b = edge(2);
        assert_ne!(edge_fingerprint(&a), edge_fingerprint(&b));
    }

    #[test]
    fn graph_fingerprint_is_order_independent() {
        let e1 = edge_fingerprint(&edge(1));
        let e2 = edge_fingerprint(&edge(2));
        let a = graph_fingerprint(vec![e1, e2].into_iter());
        let b = graph_fingerprint(vec![e2, e1].into_iter());
        assert_eq!(a, b);
    }

    #[test]
    fn params_fingerprint_is_stable() {
        let p = RoutingParams::default();
        assert_eq!(params_fingerprint(&p, &[]), params_fingerprint(&p, &[]));
    }

    #[test]
    fn unbuilt_fingerprint_matches_across_equivalent_paths() {
        let dir = std::env::temp_dir().join(format!("pfaedle_fp_test_{}", std::process::id()));
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        let direct = dir.join("extract.osm.pbf");
        std::fs::write(&direct, b"x").unwrap();
        let via_dotdot = dir.join("sub").join("..").join("extract.osm.pbf");

        let params_fp = Fingerprint(1);
        let a = unbuilt_graph_fingerprint(params_fp, ModeSet::of(Mode::Bus), &direct, 1, 0, 1.0, 0.01);
        let b = unbuilt_graph_fingerprint(params_fp, ModeSet::of(Mode::Bus), &via_dotdot, 1, 0, 1.0, 0.01);
        assert_eq!(a, b);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn unbuilt_fingerprint_is_stable_when_path_does_not_exist() {
        let params_fp = Fingerprint(1);
        let missing = std::path::Path::new("/definitely/does/not/exist/pfaedle/extract.pbf");
        let a = unbuilt_graph_fingerprint(params_fp, ModeSet::of(Mode::Bus), missing, 1, 0, 1.0, 0.01);
        let b = unbuilt_graph_fingerprint(params_fp, ModeSet::of(Mode::Bus), missing, 1, 0, 1.0, 0.01);
        assert_eq!(a, b);
    }

    #[test]
    fn deterministic_seed_is_stable_for_same_inputs() {
        let a = Fingerprint(123);
        let b = Fingerprint(456);
        assert_eq!(deterministic_seed(a, b), deterministic_seed(a, b));
    }
}
