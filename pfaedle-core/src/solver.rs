/*!
The trip solver: given a trip's stops and their
candidate groups, pick one candidate per stop minimizing total penalty
plus inter-stop hop cost, then concatenate the chosen hops' geometry into
the trip's shape.

The three strategies (global/greedy/HMM) are selected by
[`SolveMethod`]; all three read the same per-stop-pair cost matrices
produced by the hop router, so switching strategies never changes
candidate generation or routing, only the final-selection DP.
*/

use geo::{Coord, LineString};

use crate::candidate::{generate_candidates, Candidate, CandidateGroup, CandidateParams, StopQuery};
use crate::cost::{EdgeCost, Heuristic, RoutingParams};
use crate::graph::{EdgeId, RoadGraph};
use crate::router::{route_hop, HopCache, HopMatrix, SearchMode};
use crate::stats::RunStats;
use crate::trip::Trip;

/// Selection strategy for [`solve_trip`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SolveMethod {
    /// Exact shortest path through the layered DAG of candidates.
    Global,
    /// One pass, locally cheapest candidate at each layer. No backtracking.
    Greedy,
    /// Forward-Viterbi / backward-argmax; smooths outliers at the cost
    /// of exactness. `lambda` scales hop cost in the transition term
    /// `exp(-lambda * cost)`.
    Hmm { lambda: f64 },
}

/// The result of attempting to solve one trip.
#[derive(Debug, Clone, PartialEq)]
pub enum TripSolveOutcome {
    Solved(LineString<f64>),
    /// Some hop matrix had a whole column of `+∞` and no selection was
    /// possible (`AllUnreachable`). Not cached.
    Dropped,
}

/// Tunables threaded through to the router and candidate generator.
#[derive(Debug, Clone, Copy)]
pub struct SolverParams {
    pub search_mode: SearchMode,
    pub max_hop_cost: f64,
    pub method: SolveMethod,
}

impl Default for SolverParams {
    fn default() -> Self {
        SolverParams {
            search_mode: SearchMode::Hops,
            max_hop_cost: 50_000.0,
            method: SolveMethod::Global,
        }
    }
}

/// Solve `trip` against `graph`, returning the matched shape (or a
/// drop) and the per-trip contribution to [`RunStats`].
#[must_use]
pub fn solve_trip(
    graph: &RoadGraph,
    trip: &Trip,
    candidate_params: &CandidateParams,
    solver_params: &SolverParams,
    edge_cost: &dyn EdgeCost,
    heuristic: Option<&dyn Heuristic>,
    hop_cache: &mut HopCache,
) -> (TripSolveOutcome, RunStats) {
    let mut stats = RunStats { tot_num_trips: 1, ..Default::default() };

    if trip.is_empty_or_inconsistent() {
        stats.num_dropped_trips = 1;
        return (TripSolveOutcome::Dropped, stats);
    }

    let n = trip.stop_times.len();
    let groups: Vec<CandidateGroup> = trip
        .stop_times
        .iter()
        .enumerate()
        .map(|(idx, st)| {
            let endpoint = idx == 0 || idx == n - 1;
            let query = StopQuery {
                point: st.stop.point(),
                mode: trip.route_mode,
                station_id: st.stop.parent_station.clone(),
                platform_code: st.stop.platform_code.clone(),
            };
            generate_candidates(graph, &query, candidate_params, endpoint)
        })
        .collect();

    if groups.iter().any(CandidateGroup::is_empty) {
        stats.num_dropped_trips = 1;
        return (TripSolveOutcome::Dropped, stats);
    }

    if n == 1 {
        let only = &groups[0][0];
        let point = candidate_point(graph, only);
        return (
            TripSolveOutcome::Solved(LineString::from(vec![point])),
            stats,
        );
    }

    let mut hops: Vec<HopMatrix> = Vec::with_capacity(n - 1);
    for k in 0..n - 1 {
        let init = vec![0.0; groups[k].len()];
        let (matrix, hop_stats) = route_hop(
            graph,
            &groups[k],
            &groups[k + 1],
            &init,
            solver_params.max_hop_cost,
            solver_params.search_mode,
            edge_cost,
            heuristic,
            hop_cache,
            solver_params.search_mode == SearchMode::Hops,
        );
        stats.dijkstra_iters += hop_stats.dijkstra_iters;
        hops.push(matrix);
    }

    let chosen = match solver_params.method {
        SolveMethod::Global => solve_global(&groups, &hops),
        SolveMethod::Greedy => solve_greedy(&groups, &hops),
        SolveMethod::Hmm { lambda } => solve_hmm(&groups, &hops, lambda),
    };

    let Some(chosen) = chosen else {
        stats.num_dropped_trips = 1;
        return (TripSolveOutcome::Dropped, stats);
    };

    let shape = build_shape(
        graph,
        &groups,
        &hops,
        &chosen,
        solver_params,
        edge_cost,
        heuristic,
        hop_cache,
    );
    (TripSolveOutcome::Solved(shape), stats)
}

/// Exact layered-DAG shortest path (Dijkstra on a DAG with at most
/// `|Gk|` nodes per layer) minimizing
/// `Σ Gk[ck].penalty + Σ Mk[ck, ck+1]`.
fn solve_global(groups: &[CandidateGroup], hops: &[HopMatrix]) -> Option<Vec<usize>> {
    let mut dp: Vec<f64> = groups[0].iter().map(|c| c.penalty).collect();
    let mut backptr: Vec<Vec<usize>> = Vec::with_capacity(hops.len());

    for (k, matrix) in hops.iter().enumerate() {
        let next_group = &groups[k + 1];
        let mut next_dp = vec![f64::INFINITY; next_group.len()];
        let mut next_back = vec![0usize; next_group.len()];

        for (j, cand) in next_group.iter().enumerate() {
            let mut best = f64::INFINITY;
            let mut best_i = 0usize;
            for (i, &prev_cost) in dp.iter().enumerate() {
                if !prev_cost.is_finite() {
                    continue;
                }
                let hop = matrix.costs[i][j];
                if !hop.is_finite() {
                    continue;
                }
                let total = prev_cost + hop + cand.penalty;
                if total < best {
                    best = total;
                    best_i = i;
                }
            }
            next_dp[j] = best;
            next_back[j] = best_i;
        }

        if next_dp.iter().all(|v| !v.is_finite()) {
            return None;
        }

        dp = next_dp;
        backptr.push(next_back);
    }

    let (last_idx, _) = dp
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.partial_cmp(b.1).unwrap())?;
    if !dp[last_idx].is_finite() {
        return None;
    }

    let mut chosen = vec![last_idx];
    let mut cur = last_idx;
    for back in backptr.iter().rev() {
        cur = back[cur];
        chosen.push(cur);
    }
    chosen.reverse();
    Some(chosen)
}

/// One pass, no backtracking: at each layer pick the candidate cheapest
/// to reach from the previously chosen one.
fn solve_greedy(groups: &[CandidateGroup], hops: &[HopMatrix]) -> Option<Vec<usize>> {
    let (mut cur, _) = groups[0]
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.penalty.partial_cmp(&b.1.penalty).unwrap())?;
    let mut chosen = vec![cur];

    for (k, matrix) in hops.iter().enumerate() {
        let next_group = &groups[k + 1];
        let mut best = f64::INFINITY;
        let mut best_j = 0usize;
        for (j, cand) in next_group.iter().enumerate() {
            let hop = matrix.costs[cur][j];
            if !hop.is_finite() {
                continue;
            }
            let total = hop + cand.penalty;
            if total < best {
                best = total;
                best_j = j;
            }
        }
        if !best.is_finite() {
            return None;
        }
        cur = best_j;
        chosen.push(cur);
    }
    Some(chosen)
}

/// Forward-Viterbi in log space: emission score is `-penalty`,
/// transition score is `-lambda * hop_cost` (the log of
/// `exp(-lambda * cost)`), so the DP below still maximizes a sum just
/// like [`solve_global`] minimizes one.
fn solve_hmm(groups: &[CandidateGroup], hops: &[HopMatrix], lambda: f64) -> Option<Vec<usize>> {
    let mut score: Vec<f64> = groups[0].iter().map(|c| -c.penalty).collect();
    let mut backptr: Vec<Vec<usize>> = Vec::with_capacity(hops.len());

    for (k, matrix) in hops.iter().enumerate() {
        let next_group = &groups[k + 1];
        let mut next_score = vec![f64::NEG_INFINITY; next_group.len()];
        let mut next_back = vec![0usize; next_group.len()];

        for (j, cand) in next_group.iter().enumerate() {
            let mut best = f64::NEG_INFINITY;
            let mut best_i = 0usize;
            for (i, &prev_score) in score.iter().enumerate() {
                if !prev_score.is_finite() {
                    continue;
                }
                let hop = matrix.costs[i][j];
                if !hop.is_finite() {
                    continue;
                }
                let total = prev_score - lambda * hop - cand.penalty;
                if total > best {
                    best = total;
                    best_i = i;
                }
            }
            next_score[j] = best;
            next_back[j] = best_i;
        }

        if next_score.iter().all(|v| !v.is_finite()) {
            return None;
        }

        score = next_score;
        backptr.push(next_back);
    }

    let (last_idx, _) = score
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())?;
    if !score[last_idx].is_finite() {
        return None;
    }

    let mut chosen = vec![last_idx];
    let mut cur = last_idx;
    for back in backptr.iter().rev() {
        cur = back[cur];
        chosen.push(cur);
    }
    chosen.reverse();
    Some(chosen)
}

#[allow(clippy::too_many_arguments)]
fn build_shape(
    graph: &RoadGraph,
    groups: &[CandidateGroup],
    hops: &[HopMatrix],
    chosen: &[usize],
    solver_params: &SolverParams,
    edge_cost: &dyn EdgeCost,
    heuristic: Option<&dyn Heuristic>,
    hop_cache: &mut HopCache,
) -> LineString<f64> {
    let mut combined: Vec<Coord<f64>> = Vec::new();

    for k in 0..hops.len() {
        let from = &groups[k][chosen[k]];
        let to = &groups[k + 1][chosen[k + 1]];

        let edges = resolve_hop_edges(
            graph,
            from,
            to,
            &hops[k],
            chosen[k],
            chosen[k + 1],
            solver_params,
            edge_cost,
            heuristic,
            hop_cache,
        );

        let geometry = hop_geometry(graph, from, to, edges.as_deref());
        append_without_duplicate(&mut combined, &geometry);
    }

    LineString(combined)
}

/// Retrieve the edge path for the chosen `(i, j)` transition, re-invoking
/// the router in full-path mode on just that pair if the original matrix
/// didn't already carry paths.
#[allow(clippy::too_many_arguments)]
fn resolve_hop_edges(
    graph: &RoadGraph,
    from: &Candidate,
    to: &Candidate,
    matrix: &HopMatrix,
    i: usize,
    j: usize,
    solver_params: &SolverParams,
    edge_cost: &dyn EdgeCost,
    heuristic: Option<&dyn Heuristic>,
    hop_cache: &mut HopCache,
) -> Option<Vec<EdgeId>> {
    if let Some(paths) = &matrix.paths {
        if let Some(path) = paths.get(i).and_then(|row| row.get(j)) {
            return path.clone();
        }
    }

    let single_from = vec![*from];
    let single_to = vec![*to];
    let (singleton, _) = route_hop(
        graph,
        &single_from,
        &single_to,
        &[0.0],
        solver_params.max_hop_cost,
        SearchMode::Hops,
        edge_cost,
        heuristic,
        hop_cache,
        true,
    );
    singleton.paths.and_then(|p| p.into_iter().next()).and_then(|row| row.into_iter().next()).flatten()
}

/// Geometry for one hop: the concatenated edge polylines when both ends
/// sit on the graph, or a direct point when either end is a free-point
/// candidate (first/last stop deferred to its raw location).
fn hop_geometry(
    graph: &RoadGraph,
    from: &Candidate,
    to: &Candidate,
    edges: Option<&[EdgeId]>,
) -> LineString<f64> {
    if from.is_free_point() && to.is_free_point() {
        let p = from.free_point.unwrap_or_else(|| to.free_point.unwrap());
        return LineString::from(vec![(p.x(), p.y())]);
    }

    let Some(edges) = edges else {
        let p = candidate_point(graph, from);
        let q = candidate_point(graph, to);
        return LineString::from(vec![(p.x(), p.y()), (q.x(), q.y())]);
    };

    let mut combined: Vec<Coord<f64>> = Vec::new();
    for edge_id in edges {
        let Some(edge) = graph.edge(*edge_id) else { continue };
        append_without_duplicate(&mut combined, &edge.geometry);
    }
    if combined.is_empty() {
        let p = candidate_point(graph, from);
        combined.push(Coord { x: p.x(), y: p.y() });
    }
    LineString(combined)
}

fn candidate_point(graph: &RoadGraph, cand: &Candidate) -> geo::Point<f64> {
    if let Some(p) = cand.free_point {
        return p;
    }
    match cand.edge.and_then(|e| graph.edge(e)) {
        Some(edge) => crate::spatial::point_at_offset(&edge.geometry, cand.offset),
        None => geo::Point::new(0.0, 0.0),
    }
}

/// Append `geometry`'s coordinates to `combined`, skipping its first
/// point when it coincides with the last point already appended.
fn append_without_duplicate(combined: &mut Vec<Coord<f64>>, geometry: &LineString<f64>) {
    if geometry.0.is_empty() {
        return;
    }
    match combined.last() {
        Some(last) if *last == geometry.0[0] => {
            combined.extend(geometry.0.iter().skip(1));
        }
        _ => combined.extend_from_slice(&geometry.0),
    }
}
