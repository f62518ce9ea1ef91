/*!
Cost-function polymorphism for the hop router, per Design Note
"Polymorphism over the cost function": the router is parameterized by two
capability objects, [`EdgeCost`] and [`Heuristic`], both stateless and
passed by reference, so the router itself carries no mode-specific
knowledge. Partly grounded on the `TraversalModel`/`CostEstimateFunction`
split in `examples/other_examples/…NREL-routee-compass…a_star.rs`.
*/

use crate::graph::{EdgeId, NodeId, RoadGraph};

/// Routing parameters that shape the cost function, mirroring the
/// original's `MotConfig` routing-option fields (SPEC_FULL.md §10.3).
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct RoutingParams {
    pub full_turn_punish_factor: f64,
    pub full_turn_angle_deg: f64,
    pub line_unmatched_punish_factor: f64,
    pub platform_unmatched_pen: f64,
    pub station_unmatched_pen: f64,
    pub station_dist_pen_factor: f64,
    pub non_station_pen: f64,
    pub turn_restr_cost: f64,
    pub transition_pen: f64,
    pub no_lines_punish_factor: f64,
    pub one_way_penalty_factor: f64,
    pub gaussian_noise_sigma: f64,
}

impl Default for RoutingParams {
    fn default() -> Self {
        RoutingParams {
            full_turn_punish_factor: 2.0,
            full_turn_angle_deg: 130.0,
            line_unmatched_punish_factor: 1.5,
            platform_unmatched_pen: 10.0,
            station_unmatched_pen: 20.0,
            station_dist_pen_factor: 3.0,
            non_station_pen: 15.0,
            turn_restr_cost: 1_000_000.0,
            transition_pen: 30.0,
            no_lines_punish_factor: 1.0,
            one_way_penalty_factor: 1000.0,
            gaussian_noise_sigma: 50.0,
        }
    }
}

/// `edgeCost(prev, via, next) -> f64`: the incremental cost of entering
/// `next` at `via`, having arrived over `prev` (if any).
pub trait EdgeCost: Sync {
    fn cost(
        &self,
        graph: &RoadGraph,
        prev: Option<EdgeId>,
        via: NodeId,
        next: EdgeId,
    ) -> f64;
}

/// `heuristic(node) -> f64`: a lower-bound estimate of remaining cost
/// from `node` to the search's target, for the A* variant of `hops`.
pub trait Heuristic: Sync {
    fn estimate(&self, node: NodeId) -> f64;
}

/// A heuristic that always returns zero, degrading A* to plain
/// Dijkstra. The default when no precomputed lower bounds are supplied.
pub struct ZeroHeuristic;

impl Heuristic for ZeroHeuristic {
    fn estimate(&self, _node: NodeId) -> f64 {
        0.0
    }
}

/// The default edge-traversal cost function: length plus turn-angle and
/// line-overlap penalties.
pub struct DefaultEdgeCost<'p> {
    pub params: &'p RoutingParams,
}

impl EdgeCost for DefaultEdgeCost<'_> {
    fn cost(&self, graph: &RoadGraph, prev: Option<EdgeId>, via: NodeId, next: EdgeId) -> f64 {
        let Some(next_edge) = graph.edge(next) else {
            return f64::INFINITY;
        };

        let mut cost = next_edge.length * next_edge.one_way_penalty();

        if let Some(prev_id) = prev {
            if let Some(prev_edge) = graph.edge(prev_id) {
                let overlap = line_overlap(&prev_edge.line_set, &next_edge.line_set);
                cost += (1.0 - overlap) * self.params.transition_pen;

                if turn_angle_deg(graph, prev_id, via, next) > self.params.full_turn_angle_deg {
                    cost += self.params.full_turn_punish_factor;
                }

                if !graph
                    .restrictions()
                    .is_turn_allowed(via, prev_edge.way_id, next_edge.way_id)
                {
                    cost += self.params.turn_restr_cost;
                }
            }
        }

        cost
    }
}

fn line_overlap(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.iter().filter(|l| b.contains(l)).count();
    if intersection == 0 {
        return 0.0;
    }
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union.max(1) as f64
}

/// Deviation from straight-ahead, in degrees, between the last segment of
/// `prev` and the first segment of `next` at their shared node `via`: 0°
/// is straight ahead, 180° is a full U-turn.
fn turn_angle_deg(graph: &RoadGraph, prev: EdgeId, via: NodeId, next: EdgeId) -> f64 {
    let (Some(prev_edge), Some(next_edge)) = (graph.edge(prev), graph.edge(next)) else {
        return 0.0;
    };
    let Some(via_point) = graph.node(via).map(|n| n.point) else {
        return 0.0;
    };

    let incoming_dir = prev_edge
        .geometry
        .0
        .iter()
        .rev()
        .nth(1)
        .map(|c| bearing_deg((c.x, c.y), (via_point.x(), via_point.y())));
    let outgoing_dir = next_edge
        .geometry
        .0
        .get(1)
        .map(|c| bearing_deg((via_point.x(), via_point.y()), (c.x, c.y)));

    match (incoming_dir, outgoing_dir) {
        (Some(a), Some(b)) => {
            let mut diff = (b - a).abs() % 360.0;
            if diff > 180.0 {
                diff = 360.0 - diff;
            }
            diff
        }
        _ => 0.0,
    }
}

fn bearing_deg(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lon1, lat1) = (from.0.to_radians(), from.1.to_radians());
    let (lon2, lat2) = (to.0.to_radians(), to.1.to_radians());
    let dlon = lon2 - lon1;
    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    y.atan2(x).to_degrees().rem_euclid(360.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_overlap_is_zero_when_either_set_empty() {
        assert_eq!(line_overlap(&[], &["A".into()]), 0.0);
        assert_eq!(line_overlap(&["A".into()], &[]), 0.0);
    }

    #[test]
    fn line_overlap_is_one_when_identical_single_line() {
        let a = vec!["A".to_string()];
        let b = vec!["A".to_string()];
        assert!((line_overlap(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn bearing_due_north_is_zero() {
        let b = bearing_deg((0.0, 0.0), (0.0, 1.0));
        assert!(b.abs() < 1e-6);
    }
}
