/*!
The candidate generator: for a scheduled stop, enumerate nearby
graph edges and score each as a hypothesis for where the vehicle
actually passes.
*/

use bitflags::bitflags;
use geo::{HaversineDistance, Point};

use crate::graph::{EdgeId, Mode, RoadGraph};
use crate::spatial::{meters_to_degrees_radius, project_point_onto_edge, IndexedEdgePoint};

bitflags! {
    /// Per-candidate diagnostic bits describing *why* a candidate scored
    /// the way it did; not consumed by the router, only by diagnostics.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct LineMatchFlags: u8 {
        const STATION_MATCH  = 0b001;
        const PLATFORM_MATCH = 0b010;
        const LINE_MATCH     = 0b100;
    }
}

/// A single candidate location for a stop: either a point on a graph
/// edge, or — for the first/last stop of a trip — a free-standing point
/// not yet attached to any edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub edge: Option<EdgeId>,
    pub offset: f64,
    pub penalty: f64,
    pub flags: LineMatchFlags,
    pub free_point: Option<Point<f64>>,
}

impl Candidate {
    #[must_use]
    pub fn is_free_point(&self) -> bool {
        self.edge.is_none()
    }
}

/// Candidates for one stop, ordered by increasing penalty.
pub type CandidateGroup = Vec<Candidate>;

/// What the candidate generator knows about a single scheduled stop.
#[derive(Debug, Clone)]
pub struct StopQuery {
    pub point: Point<f64>,
    pub mode: Mode,
    pub station_id: Option<String>,
    pub platform_code: Option<String>,
}

/// Tunables for candidate scoring.
#[derive(Debug, Clone, Copy)]
pub struct CandidateParams {
    pub gaussian_noise_sigma: f64,
    pub station_dist_pen_factor: f64,
    pub station_unmatched_pen: f64,
    pub platform_unmatched_pen: f64,
    pub non_station_pen: f64,
}

impl Default for CandidateParams {
    fn default() -> Self {
        CandidateParams {
            gaussian_noise_sigma: 50.0,
            station_dist_pen_factor: 3.0,
            station_unmatched_pen: 20.0,
            platform_unmatched_pen: 10.0,
            non_station_pen: 15.0,
        }
    }
}

fn base_geo_penalty(distance_m: f64) -> f64 {
    distance_m
}

/// Generate and score candidates for `stop`, sorted by ascending
/// penalty. When `endpoint` is true (first or last stop of a trip), the
/// group is augmented with a free-point candidate at the exact stop
/// location, letting the solver defer committing to an edge.
#[must_use]
pub fn generate_candidates(
    graph: &RoadGraph,
    stop: &StopQuery,
    params: &CandidateParams,
    endpoint: bool,
) -> CandidateGroup {
    let radius = params.station_dist_pen_factor * params.gaussian_noise_sigma;
    let radius_deg = meters_to_degrees_radius(radius, stop.point.y());
    let query_point = IndexedEdgePoint {
        edge: None,
        geometry: stop.point,
    };

    let mut group: CandidateGroup = graph
        .rtree()
        .locate_within_distance(query_point, radius_deg * radius_deg)
        .filter_map(|indexed| {
            let edge_id = indexed.edge?;
            let edge = graph.edge(edge_id)?;
            if !edge.modes.contains_mode(stop.mode) {
                return None;
            }
            let proj = project_point_onto_edge(stop.point, &edge.geometry);
            if proj.distance > radius {
                return None;
            }

            let mut flags = LineMatchFlags::empty();
            let mut penalty = base_geo_penalty(proj.distance);

            let touches_station = endpoints_have_station(graph, edge_id);

            if let Some(station_id) = &stop.station_id {
                if edge.line_set.iter().any(|l| l == station_id) {
                    flags |= LineMatchFlags::STATION_MATCH;
                } else if touches_station {
                    penalty += params.station_unmatched_pen;
                }
            } else if touches_station {
                penalty += params.non_station_pen;
            }

            if let Some(platform) = &stop.platform_code {
                if edge.line_set.iter().any(|l| l == platform) {
                    flags |= LineMatchFlags::PLATFORM_MATCH;
                } else {
                    penalty += params.platform_unmatched_pen;
                }
            }

            if !edge.line_set.is_empty() {
                flags |= LineMatchFlags::LINE_MATCH;
            }

            Some(Candidate {
                edge: Some(edge_id),
                offset: proj.offset,
                penalty,
                flags,
                free_point: None,
            })
        })
        .collect();

    group.sort_by(|a, b| a.penalty.partial_cmp(&b.penalty).unwrap());

    if endpoint {
        group.push(Candidate {
            edge: None,
            offset: 0.0,
            penalty: 0.0,
            flags: LineMatchFlags::empty(),
            free_point: Some(stop.point),
        });
    }

    group
}

fn endpoints_have_station(graph: &RoadGraph, edge_id: EdgeId) -> bool {
    graph
        .endpoints(edge_id)
        .map(|(a, b)| {
            graph.node(a).is_some_and(|n| n.station.is_some())
                || graph.node(b).is_some_and(|n| n.station.is_some())
        })
        .unwrap_or(false)
}

/// Haversine distance helper shared by callers that need a raw
/// point-to-point comparison outside of edge projection (e.g. scoring
/// two free-point candidates against each other).
#[must_use]
pub fn point_distance(a: Point<f64>, b: Point<f64>) -> f64 {
    a.haversine_distance(&b)
}
