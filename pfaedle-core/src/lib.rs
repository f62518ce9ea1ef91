/*!
# pfaedle_core

**pfaedle_core** is the map-matching heart of a transit-shape inference
engine: it takes a filtered road/rail network (already parsed from a map
extract) and a schedule (trips made of ordered stops) and produces, for
each trip, a polyline that plausibly routes the vehicle over the network.

This crate deliberately stops at the core. Byte-level map-extract parsing,
schedule file I/O, CLI parsing, config loading and GeoJSON emission are all
treated as external collaborators — callers hand this crate typed records
(`osm::Node`/`osm::Way`/`osm::Rel`, `trip::Trip`/`trip::Stop`) and receive
typed results (`solver::TripSolveOutcome`) back.

# Example

```ignore
use pfaedle_core::prelude::*;

let opts = ReadOptions::new(Mode::Bus, classifier, 1.0);
let config = BuildConfig::default();
let graph = build_graph(entity_source, &opts, &config);

let params = RoutingParams::default();
let outcome = solve_trip(&graph, &trip, &params, SolveMethod::Global);
```
*/

pub mod builder;
pub mod cache;
pub mod candidate;
pub mod cost;
pub mod fingerprint;
pub mod graph;
pub mod osm;
pub mod prelude;
pub mod restrictions;
pub mod router;
pub mod solver;
pub mod spatial;
pub mod stats;
pub mod trip;
pub mod worker;

use thiserror::Error;

/// Walking speed in meters per second, used when estimating the cost of a
/// synthetic station-to-edge leaf edge.
pub(crate) const WALK_SPEED: f64 = 1.39;

/// Errors that can escape the core. Only programmer-invariant violations
/// and hard infrastructure failures become an `Error`; everything locally
/// recoverable (malformed input records, unreachable hops, corrupt cache
/// entries) is modeled as counters and `Option`/enum returns instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid graph: {0}")]
    InvalidGraph(String),
    #[error("trip cache base directory is not creatable: {0}")]
    CacheIoFatal(String),
    #[error("invariant violated: {0}")]
    InvariantViolated(String),
}
