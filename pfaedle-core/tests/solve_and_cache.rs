//! End-to-end exercise of the public API: map entities -> built graph
//! (C1) -> candidate generation (C2) -> hop routing (C3) -> trip solve
//! (C4), plus a trip-cache round trip (C5) against the same built
//! graph. Unit tests elsewhere in the crate cover each component in
//! isolation with hand-built graphs (scenarios S1-S6 in `router.rs`,
//! the cache wire format in `cache.rs`); this file checks they still
//! compose once wired together through `build_graph`.

use std::sync::Arc;

use pfaedle_core::osm::{EntityFlags, Node, OsmNodeId, OsmWayId, RestrictionPolarity, Tags, Way};
use pfaedle_core::prelude::*;

struct AllWaysClassifier;

impl TagClassifier for AllWaysClassifier {
    fn classify_node(&self, _tags: &Tags) -> EntityFlags {
        EntityFlags::empty()
    }

    fn classify_way(&self, _tags: &Tags) -> EntityFlags {
        EntityFlags::KEEP
    }

    fn classify_rel(&self, _tags: &Tags) -> EntityFlags {
        EntityFlags::empty()
    }

    fn edge_level(&self, _tags: &Tags) -> u8 {
        0
    }

    fn station_info(&self, _tags: &Tags) -> (Vec<String>, Option<String>, Option<String>) {
        (Vec::new(), None, None)
    }

    fn restriction_polarity(&self, _tags: &Tags) -> Option<RestrictionPolarity> {
        None
    }

    fn line_set(&self, _tags: &Tags) -> Vec<String> {
        Vec::new()
    }
}

/// A straight line of five nodes along a single way, mirroring a short
/// bus corridor.
fn corridor_source() -> VecEntitySource {
    let nodes = (0..5)
        .map(|i| Node {
            id: OsmNodeId(i + 1),
            lon: 0.0,
            lat: f64::from(i as i32) * 0.001,
            tags: Tags::default(),
        })
        .collect();
    let ways = vec![Way {
        id: OsmWayId(1),
        node_refs: (0..5).map(|i| OsmNodeId(i + 1)).collect(),
        tags: Tags::default(),
    }];
    VecEntitySource { nodes, ways, rels: Vec::new() }
}

fn corridor_trip() -> Trip {
    let stop = |id: &str, lat: f64| Stop {
        id: id.to_string(),
        name: format!("Stop {id}"),
        platform_code: None,
        lat,
        lng: 0.0,
        parent_station: None,
    };
    Trip {
        id: "corridor-1".to_string(),
        service_id: "weekday".to_string(),
        block_id: None,
        shape_id: Some("shp-1".to_string()),
        headsign: Some("Northbound".to_string()),
        short_name: None,
        route_id: "R1".to_string(),
        route_mode: Mode::Bus,
        direction: Direction::Outbound,
        stop_times: vec![
            StopTime { stop: stop("s1", 0.0), arrival_offset: 0, departure_offset: 0 },
            StopTime { stop: stop("s2", 0.002), arrival_offset: 60, departure_offset: 60 },
            StopTime { stop: stop("s3", 0.004), arrival_offset: 120, departure_offset: 120 },
        ],
    }
}

#[test]
fn full_pipeline_builds_a_graph_and_solves_a_shape() {
    let opts = ReadOptions::new(Mode::Bus, Arc::new(AllWaysClassifier), 1.0);
    let config = BuildConfig::default();
    let graph = build_graph(corridor_source(), &opts, &config);

    // The five original nodes collapse down to the two chain endpoints:
    // nodes 2-4 are plain degree-2 interior points with no station and
    // no routing flags, so `collapse_edges` merges the whole corridor
    // into a single edge pair (forward + `writeODirEdgs`'s reverse shadow).
    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.edge_count(), 2);

    let trip = corridor_trip();
    let routing_params = RoutingParams::default();
    let candidate_params = CandidateParams::default();
    let edge_cost = DefaultEdgeCost { params: &routing_params };

    for method in [
        SolveMethod::Global,
        SolveMethod::Greedy,
        SolveMethod::Hmm { lambda: 0.05 },
    ] {
        let solver_params = SolverParams { method, ..SolverParams::default() };
        let mut hop_cache = HopCache::default();
        let (outcome, stats) = solve_trip(
            &graph,
            &trip,
            &candidate_params,
            &solver_params,
            &edge_cost,
            None,
            &mut hop_cache,
        );
        assert_eq!(stats.tot_num_trips, 1);
        match outcome {
            TripSolveOutcome::Solved(shape) => assert!(shape.0.len() >= 2),
            TripSolveOutcome::Dropped => panic!("{method:?}: expected a solved shape on a single corridor"),
        }
    }
}

#[test]
fn trip_cache_round_trips_against_a_built_graph() {
    let opts = ReadOptions::new(Mode::Bus, Arc::new(AllWaysClassifier), 1.0);
    let config = BuildConfig::default();
    let graph = build_graph(corridor_source(), &opts, &config);

    let graph_fp = graph_fingerprint(graph.edge_ids().filter_map(|id| graph.edge(id)).map(edge_fingerprint));
    let routing_params = RoutingParams::default();
    let params_fp = params_fingerprint(&routing_params, &[]);

    let dir = std::env::temp_dir().join("pfaedle-integration-cache-test");
    let _ = std::fs::remove_dir_all(&dir);
    let cache = TripCache::open(&dir, &graph, graph_fp, params_fp, 0);
    assert!(!cache.is_disabled());

    let trip = corridor_trip();
    let key = trip_identity_fingerprint(&trip.cache_identity()).to_string();

    let first_edge = graph.edge_ids().next().expect("built graph has at least one edge");
    let hops = vec![CachedHop {
        start_edge: Some(first_edge),
        end_edge: Some(first_edge),
        start_point: None,
        end_point: None,
        progress_start: 0.0,
        progress_end: 1.0,
        edges: vec![first_edge],
    }];

    assert!(cache.lookup(&key).is_none());
    cache.store(&key, &hops);
    let round_tripped = cache.lookup(&key).expect("expected a cache hit after store");
    assert_eq!(round_tripped, hops);
    assert_eq!(cache.stats().stores, 1);
    assert_eq!(cache.stats().hits, 1);
    assert_eq!(cache.stats().misses, 1);

    let _ = std::fs::remove_dir_all(&dir);
}
