use std::sync::Arc;

use pfaedle_core::prelude::*;

use pfaedle_core::osm::{EntityFlags, RestrictionPolarity};

/// A minimal classifier that keeps every way and treats every node as a
/// non-station; good enough for this demo wiring, nowhere near what a
/// real bus/rail tag scheme needs.
struct DemoClassifier;

impl TagClassifier for DemoClassifier {
    fn classify_node(&self, _tags: &pfaedle_core::osm::Tags) -> EntityFlags {
        EntityFlags::empty()
    }

    fn classify_way(&self, _tags: &pfaedle_core::osm::Tags) -> EntityFlags {
        EntityFlags::KEEP
    }

    fn classify_rel(&self, _tags: &pfaedle_core::osm::Tags) -> EntityFlags {
        EntityFlags::empty()
    }

    fn edge_level(&self, _tags: &pfaedle_core::osm::Tags) -> u8 {
        0
    }

    fn station_info(&self, _tags: &pfaedle_core::osm::Tags) -> (Vec<String>, Option<String>, Option<String>) {
        (Vec::new(), None, None)
    }

    fn restriction_polarity(&self, _tags: &pfaedle_core::osm::Tags) -> Option<RestrictionPolarity> {
        None
    }

    fn line_set(&self, _tags: &pfaedle_core::osm::Tags) -> Vec<String> {
        Vec::new()
    }
}

fn demo_source() -> VecEntitySource {
    use pfaedle_core::osm::{Node, OsmNodeId, OsmWayId, Way};

    let nodes = vec![
        Node { id: OsmNodeId(1), lon: 0.0, lat: 0.0, tags: Default::default() },
        Node { id: OsmNodeId(2), lon: 0.0, lat: 0.001, tags: Default::default() },
        Node { id: OsmNodeId(3), lon: 0.0, lat: 0.002, tags: Default::default() },
    ];
    let ways = vec![Way {
        id: OsmWayId(100),
        node_refs: vec![OsmNodeId(1), OsmNodeId(2), OsmNodeId(3)],
        tags: Default::default(),
    }];
    VecEntitySource { nodes, ways, rels: Vec::new() }
}

fn demo_trip() -> Trip {
    let stop = |id: &str, lat: f64| Stop {
        id: id.to_string(),
        name: format!("Stop {id}"),
        platform_code: None,
        lat,
        lng: 0.0,
        parent_station: None,
    };
    Trip {
        id: "demo-trip-1".to_string(),
        service_id: "weekday".to_string(),
        block_id: None,
        shape_id: None,
        headsign: Some("Downtown".to_string()),
        short_name: None,
        route_id: "R1".to_string(),
        route_mode: Mode::Bus,
        direction: Direction::Outbound,
        stop_times: vec![
            StopTime { stop: stop("s1", 0.0), arrival_offset: 0, departure_offset: 0 },
            StopTime { stop: stop("s2", 0.002), arrival_offset: 90, departure_offset: 90 },
        ],
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let opts = ReadOptions::new(Mode::Bus, Arc::new(DemoClassifier), 1.0);
    let config = BuildConfig::default();

    let instant = std::time::Instant::now();
    let graph = build_graph(demo_source(), &opts, &config);
    tracing::info!(
        elapsed = ?instant.elapsed(),
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "built graph"
    );

    let trip = demo_trip();
    let routing_params = RoutingParams::default();
    let candidate_params = CandidateParams::default();
    let solver_params = SolverParams::default();
    let edge_cost = DefaultEdgeCost { params: &routing_params };
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

    match outcome {
        TripSolveOutcome::Solved(shape) => {
            tracing::info!(points = shape.0.len(), dijkstra_iters = stats.dijkstra_iters, "trip solved");
        }
        TripSolveOutcome::Dropped => {
            tracing::warn!("trip dropped: no admissible path between stops");
        }
    }
}
