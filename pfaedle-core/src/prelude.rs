/*!
Convenience re-exports of the crate's public surface, so callers can
`use pfaedle_core::prelude::*;` instead of reaching into every module.
*/

pub use crate::builder::{build_graph, BBox, BuildConfig};
pub use crate::cache::{CachedHop, TripCache};
pub use crate::candidate::{
    generate_candidates, Candidate, CandidateGroup, CandidateParams, LineMatchFlags, StopQuery,
};
pub use crate::cost::{DefaultEdgeCost, EdgeCost, Heuristic, RoutingParams, ZeroHeuristic};
pub use crate::fingerprint::{
    edge_fingerprint, graph_fingerprint, params_fingerprint, trip_identity_fingerprint,
    deterministic_seed, unbuilt_graph_fingerprint, Fingerprint,
};
pub use crate::graph::{
    ComponentId, EdgeId, Mode, ModeSet, NodeFlags, NodeId, OneWay, RoadEdge, RoadGraph, RoadNode,
    StationInfo,
};
pub use crate::osm::{
    EntitySource, Node, OsmNodeId, OsmWayId, ReadOptions, Rel, RelMember, RelMemberType, Tags,
    TagClassifier, VecEntitySource, Way,
};
pub use crate::restrictions::Restrictions;
pub use crate::router::{route_hop, HopCache, HopMatrix, HopSearchStats, SearchMode};
pub use crate::solver::{solve_trip, SolveMethod, SolverParams, TripSolveOutcome};
pub use crate::stats::{CacheCounters, CacheStats, RunContext, RunStats};
pub use crate::trip::{Direction, Stop, StopTime, Trip};
pub use crate::worker::{run_pool, JobQueue, TripTrie};
pub use crate::Error;
