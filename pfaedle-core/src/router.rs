/*!
The hop router: point-to-multi-point constrained shortest path over
the graph.

Search state is `(node, via-edge)` rather than plain `node`, so turn
restrictions (filed per via-node, per from-way/to-way) can be enforced
while expanding. [`MinScored`] is a reversed-order `BinaryHeap` wrapper,
the usual trick for turning a max-heap into a min-heap.

Design: rather than running one Dijkstra "from a virtual source
connected to every `F[i]`" (which cannot by itself recover *per-row*
costs for a genuine `|F|×|T|` matrix), this implementation runs one
Dijkstra per **distinct edge** among the from-candidates, seeded at that
edge's `to`-node with zero cost. Every `F[i]` sharing that edge then
reads its own `M[i,j]` off the same search by adding back its own
`(1 − progress) × length` term — this is exactly what the hop cache
(keyed by `(fromEdge, toEdge)`) is for: the edge-to-edge base cost is
progress-independent and is safe to reuse across every candidate
referencing that edge pair. `M[i,j]` itself never includes the caller's
`init[i]`; that term is folded in only where a caller needs a total
(e.g. [`apply_fast_pruning`]'s dethroning comparison), so the returned
matrix stays reusable across calls with different `init` vectors.
*/

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use hashbrown::HashMap;
use indexmap::IndexMap;
use petgraph::Direction;

use crate::candidate::{Candidate, CandidateGroup};
use crate::cost::{EdgeCost, Heuristic};
use crate::graph::{ComponentId, EdgeId, NodeId, RoadGraph};

#[derive(Copy, Clone, PartialEq)]
struct MinScored<K>(f64, K);

impl<K: Eq> Eq for MinScored<K> {}

impl<K: PartialOrd> PartialOrd for MinScored<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        other.0.partial_cmp(&self.0)
    }
}

impl<K: Ord> Ord for MinScored<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.partial_cmp(&self.0).unwrap()
    }
}

type SearchState = (NodeId, Option<EdgeId>);

/// Which variant of the hop search to run.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SearchMode {
    /// Full matrix, with optional per-cell edge paths.
    Hops,
    /// Cost-only, with the pruning behavior documented on
    /// [`HopMatrix`]: downstream consumers must treat a `+∞` cell as
    /// "not computed", never as "proven unreachable".
    HopsFast,
}

/// A process-local, bounded LRU cache of edge-to-edge base costs,
/// keyed by `(fromEdge, toEdge)`. Not shared across worker threads —
/// its value is in intra-trip sub-hop reuse.
pub struct HopCache {
    map: IndexMap<(EdgeId, EdgeId), f64>,
    capacity: usize,
}

impl HopCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        HopCache {
            map: IndexMap::new(),
            capacity,
        }
    }

    fn get(&mut self, key: (EdgeId, EdgeId)) -> Option<f64> {
        if let Some(&v) = self.map.get(&key) {
            // Move to the back (most recently used).
            self.map.shift_remove(&key);
            self.map.insert(key, v);
            Some(v)
        } else {
            None
        }
    }

    fn insert(&mut self, key: (EdgeId, EdgeId), value: f64) {
        if self.map.contains_key(&key) {
            self.map.shift_remove(&key);
        } else if self.capacity > 0 && self.map.len() >= self.capacity {
            self.map.shift_remove_index(0);
        }
        self.map.insert(key, value);
    }
}

impl Default for HopCache {
    fn default() -> Self {
        HopCache::new(4096)
    }
}

/// Result of [`route_hop`]: a sparse `|from| × |to|` cost matrix, plus
/// per-cell edge paths when requested.
///
/// **Contract**: in [`SearchMode::HopsFast`] output, a `+∞` cell means
/// "not computed" — it is *not* a claim that no path exists. Only
/// [`SearchMode::Hops`] output may be read as "provably unreachable"
/// for `+∞` cells.
#[derive(Debug, Clone)]
pub struct HopMatrix {
    pub costs: Vec<Vec<f64>>,
    pub paths: Option<Vec<Vec<Option<Vec<EdgeId>>>>>,
}

impl HopMatrix {
    fn new(rows: usize, cols: usize, want_paths: bool) -> Self {
        HopMatrix {
            costs: vec![vec![f64::INFINITY; cols]; rows],
            paths: want_paths.then(|| vec![vec![None; cols]; rows]),
        }
    }
}

/// Diagnostics returned alongside [`HopMatrix`].
#[derive(Debug, Default, Clone, Copy)]
pub struct HopSearchStats {
    pub dijkstra_iters: u64,
}

fn edge_component(graph: &RoadGraph, id: EdgeId) -> Option<ComponentId> {
    graph.endpoints(id).and_then(|(a, _)| graph.node(a).map(|n| n.component))
}

/// Run a bounded Dijkstra seeded at `(seed_node, Some(seed_edge))` with
/// zero starting cost, over `(node, via-edge)` states, honoring turn
/// restrictions. Returns the settled distance to every reached state.
fn search_from_edge(
    graph: &RoadGraph,
    seed_node: NodeId,
    seed_edge: EdgeId,
    max_cost: f64,
    edge_cost: &dyn EdgeCost,
    heuristic: Option<&dyn Heuristic>,
    iters: &mut u64,
) -> HashMap<SearchState, f64> {
    let mut dist: HashMap<SearchState, f64> = HashMap::new();
    let mut heap: BinaryHeap<MinScored<SearchState>> = BinaryHeap::new();

    let seed_state: SearchState = (seed_node, Some(seed_edge));
    dist.insert(seed_state, 0.0);
    heap.push(MinScored(0.0, seed_state));

    while let Some(MinScored(cost_so_far, (node, via))) = heap.pop() {
        *iters += 1;
        if cost_so_far > max_cost {
            continue;
        }
        if dist.get(&(node, via)).is_some_and(|&best| cost_so_far > best) {
            continue;
        }

        let blocked = graph.node(node).is_some_and(|n| n.flags.contains(crate::graph::NodeFlags::BLOCKER));
        if blocked && Some(node) != Some(seed_node) {
            continue;
        }

        for edge in graph.edges_directed(node, Direction::Outgoing) {
            let next_id = EdgeId(petgraph::visit::EdgeRef::id(&edge));
            let next_node = petgraph::visit::EdgeRef::target(&edge);

            if let Some(prev_id) = via {
                let (Some(prev_edge), Some(next_edge)) = (graph.edge(prev_id), graph.edge(next_id)) else {
                    continue;
                };
                if !graph.restrictions().is_turn_allowed(node, prev_edge.way_id, next_edge.way_id) {
                    continue;
                }
            }

            let step_cost = edge_cost.cost(graph, via, node, next_id);
            let next_cost = cost_so_far + step_cost;
            if next_cost > max_cost {
                continue;
            }

            let next_state: SearchState = (next_node, Some(next_id));
            let improved = match dist.get(&next_state) {
                Some(&best) => next_cost < best,
                None => true,
            };
            if improved {
                dist.insert(next_state, next_cost);
                let h = heuristic.map_or(0.0, |h| h.estimate(next_node));
                heap.push(MinScored(next_cost + h, next_state));
            }
        }
    }

    dist
}

/// The base (progress-independent) cost from `from_edge`'s own `to`-node
/// to `to_edge`'s own `to`-node, consulting/populating `hop_cache`.
fn base_cost(
    graph: &RoadGraph,
    from_edge: EdgeId,
    to_edge: EdgeId,
    max_cost: f64,
    edge_cost: &dyn EdgeCost,
    heuristic: Option<&dyn Heuristic>,
    hop_cache: &mut HopCache,
    iters: &mut u64,
) -> f64 {
    if let Some(v) = hop_cache.get((from_edge, to_edge)) {
        return v;
    }
    let Some((_, from_to_node)) = graph.endpoints(from_edge) else {
        return f64::INFINITY;
    };
    let Some((_, to_to_node)) = graph.endpoints(to_edge) else {
        return f64::INFINITY;
    };
    let dist = search_from_edge(graph, from_to_node, from_edge, max_cost, edge_cost, heuristic, iters);
    let value = dist.get(&(to_to_node, Some(to_edge))).copied().unwrap_or(f64::INFINITY);
    hop_cache.insert((from_edge, to_edge), value);
    value
}

/// Fill `M[i, j]` with the cheapest cost from
/// `from[i]` to `to[j]`, or `+∞` if unreachable (or, in
/// [`SearchMode::HopsFast`], not computed).
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn route_hop(
    graph: &RoadGraph,
    from: &CandidateGroup,
    to: &CandidateGroup,
    init: &[f64],
    max_cost: f64,
    mode: SearchMode,
    edge_cost: &dyn EdgeCost,
    heuristic: Option<&dyn Heuristic>,
    hop_cache: &mut HopCache,
    want_paths: bool,
) -> (HopMatrix, HopSearchStats) {
    let rows = from.len();
    let cols = to.len();
    let mut matrix = HopMatrix::new(rows, cols, want_paths && mode == SearchMode::Hops);
    let mut stats = HopSearchStats::default();

    for i in 0..rows {
        for j in 0..cols {
            matrix.costs[i][j] = cost_for_pair(
                graph,
                &from[i],
                &to[j],
                max_cost,
                edge_cost,
                heuristic,
                hop_cache,
                &mut stats.dijkstra_iters,
            );
        }
    }

    if mode == SearchMode::HopsFast {
        apply_fast_pruning(from, &mut matrix.costs, init);
    } else if want_paths {
        fill_paths(graph, from, to, max_cost, edge_cost, heuristic, &mut matrix, &mut stats.dijkstra_iters);
    }

    (matrix, stats)
}

fn cost_for_pair(
    graph: &RoadGraph,
    f: &Candidate,
    t: &Candidate,
    max_cost: f64,
    edge_cost: &dyn EdgeCost,
    heuristic: Option<&dyn Heuristic>,
    hop_cache: &mut HopCache,
    iters: &mut u64,
) -> f64 {
    // Both free points: zero cost only if they coincide.
    if f.is_free_point() && t.is_free_point() {
        return match (f.free_point, t.free_point) {
            (Some(fp), Some(tp)) if crate::candidate::point_distance(fp, tp) < 1e-6 => 0.0,
            _ => f64::INFINITY,
        };
    }
    // Exactly one free point: no defined path in this model.
    if f.is_free_point() || t.is_free_point() {
        return f64::INFINITY;
    }

    let (Some(fe), Some(te)) = (f.edge, t.edge) else {
        return f64::INFINITY;
    };

    if edge_component(graph, fe) != edge_component(graph, te) {
        return f64::INFINITY;
    }

    // Same-edge closed form.
    if fe == te {
        let Some(edge) = graph.edge(fe) else {
            return f64::INFINITY;
        };
        let diff = t.offset - f.offset;
        return diff.abs() * edge.length;
    }

    let Some(from_edge) = graph.edge(fe) else {
        return f64::INFINITY;
    };
    let base = base_cost(graph, fe, te, max_cost, edge_cost, heuristic, hop_cache, iters);
    if !base.is_finite() {
        return f64::INFINITY;
    }
    let Some(to_edge) = graph.edge(te) else {
        return f64::INFINITY;
    };
    let tail = (1.0 - t.offset) * to_edge.length * to_edge.one_way_penalty();
    let seed = (1.0 - f.offset) * from_edge.length;
    seed + base - tail
}

/// Fast-mode pruning: candidates are
/// grouped by their edge. The currently "winning" edge group's members
/// are always kept; a candidate on a *different* edge only dethrones
/// the winning group (clearing its members) when its own
/// `init + hop` total is strictly cheaper. A losing candidate's cell is
/// left at `+∞` — "not computed", per the documented contract.
fn apply_fast_pruning(from: &CandidateGroup, costs: &mut [Vec<f64>], init: &[f64]) {
    let cols = costs.first().map_or(0, Vec::len);
    for j in 0..cols {
        let mut active_edge: Option<EdgeId> = None;
        let mut active_total = f64::INFINITY;
        let mut active_rows: Vec<usize> = Vec::new();

        for (i, f) in from.iter().enumerate() {
            let hop_only = costs[i][j];
            if !hop_only.is_finite() {
                continue;
            }
            let total = init.get(i).copied().unwrap_or(0.0) + hop_only;
            let this_edge = f.edge;

            if this_edge.is_some() && this_edge == active_edge {
                active_rows.push(i);
                if total < active_total {
                    active_total = total;
                }
                continue;
            }

            if total < active_total {
                for &old in &active_rows {
                    costs[old][j] = f64::INFINITY;
                }
                active_rows.clear();
                active_rows.push(i);
                active_edge = this_edge;
                active_total = total;
            } else {
                costs[i][j] = f64::INFINITY;
            }
        }
    }
}

fn fill_paths(
    graph: &RoadGraph,
    from: &CandidateGroup,
    to: &CandidateGroup,
    max_cost: f64,
    edge_cost: &dyn EdgeCost,
    heuristic: Option<&dyn Heuristic>,
    matrix: &mut HopMatrix,
    iters: &mut u64,
) {
    let Some(paths) = matrix.paths.as_mut() else { return };

    for (i, f) in from.iter().enumerate() {
        let Some(fe) = f.edge else { continue };
        let Some((_, from_to_node)) = graph.endpoints(fe) else { continue };

        let mut parent: HashMap<SearchState, SearchState> = HashMap::new();
        let dist = search_from_edge_with_parent(graph, from_to_node, fe, max_cost, edge_cost, heuristic, iters, &mut parent);

        for (j, t) in to.iter().enumerate() {
            if !matrix.costs[i][j].is_finite() {
                continue;
            }
            let Some(te) = t.edge else { continue };
            if fe == te {
                paths[i][j] = Some(vec![fe]);
                continue;
            }
            let Some((_, to_to_node)) = graph.endpoints(te) else { continue };
            let final_state: SearchState = (to_to_node, Some(te));
            if !dist.contains_key(&final_state) {
                continue;
            }

            let mut edges = vec![te];
            let mut cur = final_state;
            while let Some(&p) = parent.get(&cur) {
                if let Some(eid) = cur.1 {
                    edges.push(eid);
                }
                cur = p;
                if cur == (from_to_node, Some(fe)) {
                    break;
                }
            }
            edges.push(fe);
            edges.reverse();
            edges.dedup();
            paths[i][j] = Some(edges);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn search_from_edge_with_parent(
    graph: &RoadGraph,
    seed_node: NodeId,
    seed_edge: EdgeId,
    max_cost: f64,
    edge_cost: &dyn EdgeCost,
    heuristic: Option<&dyn Heuristic>,
    iters: &mut u64,
    parent: &mut HashMap<SearchState, SearchState>,
) -> HashMap<SearchState, f64> {
    let mut dist: HashMap<SearchState, f64> = HashMap::new();
    let mut heap: BinaryHeap<MinScored<SearchState>> = BinaryHeap::new();

    let seed_state: SearchState = (seed_node, Some(seed_edge));
    dist.insert(seed_state, 0.0);
    heap.push(MinScored(0.0, seed_state));

    while let Some(MinScored(cost_so_far, (node, via))) = heap.pop() {
        *iters += 1;
        if dist.get(&(node, via)).is_some_and(|&best| cost_so_far > best) {
            continue;
        }

        for edge in graph.edges_directed(node, Direction::Outgoing) {
            let next_id = EdgeId(petgraph::visit::EdgeRef::id(&edge));
            let next_node = petgraph::visit::EdgeRef::target(&edge);

            if let Some(prev_id) = via {
                let (Some(prev_edge), Some(next_edge)) = (graph.edge(prev_id), graph.edge(next_id)) else {
                    continue;
                };
                if !graph.restrictions().is_turn_allowed(node, prev_edge.way_id, next_edge.way_id) {
                    continue;
                }
            }

            let step_cost = edge_cost.cost(graph, via, node, next_id);
            let next_cost = cost_so_far + step_cost;
            if next_cost > max_cost {
                continue;
            }

            let next_state: SearchState = (next_node, Some(next_id));
            let improved = match dist.get(&next_state) {
                Some(&best) => next_cost < best,
                None => true,
            };
            if improved {
                dist.insert(next_state, next_cost);
                parent.insert(next_state, (node, via));
                let h = heuristic.map_or(0.0, |h| h.estimate(next_node));
                heap.push(MinScored(next_cost + h, next_state));
            }
        }
    }

    dist
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::{DefaultEdgeCost, RoutingParams};
    use crate::graph::{ModeSet, Mode, OneWay, RoadEdge, RoadGraph, RoadNode};
    use geo::{LineString, Point};

    /// A small scenario graph reused by several tests below: A(0,0),
    /// B(0,10), C(10,0), D(20,0); eA:A->C(10), eB:B->C(6), eC:C->D(100).
    fn scenario_graph() -> (RoadGraph, EdgeId, EdgeId, EdgeId) {
        let mut g = RoadGraph::new();
        let a = g.add_node(RoadNode::new(Point::new(0.0, 0.0)));
        let b = g.add_node(RoadNode::new(Point::new(0.0, 10.0)));
        let c = g.add_node(RoadNode::new(Point::new(10.0, 0.0)));
        let d = g.add_node(RoadNode::new(Point::new(20.0, 0.0)));

        let mk = |len: f64| RoadEdge {
            geometry: LineString::from(vec![(0.0, 0.0), (1.0, 0.0)]),
            length: len,
            level: 0,
            one_way: OneWay::Bidir,
            restricted: false,
            reversed_shadow: false,
            line_set: vec![],
            modes: ModeSet::of(Mode::Bus),
            way_id: 0,
            penalty_factor: 1.0,
        };

        let ea = g.add_edge(a, c, mk(10.0));
        let eb = g.add_edge(b, c, mk(6.0));
        let ec = g.add_edge(c, d, mk(100.0));

        write_components_all_one(&mut g);
        (g, ea, eb, ec)
    }

    fn write_components_all_one(g: &mut RoadGraph) {
        let ids: Vec<_> = g.node_indices().collect();
        for id in ids {
            if let Some(n) = g.node_weight_mut(id) {
                n.component = crate::graph::ComponentId(1);
            }
        }
    }

    fn zero_params() -> RoutingParams {
        RoutingParams {
            transition_pen: 0.0,
            full_turn_punish_factor: 0.0,
            turn_restr_cost: 0.0,
            ..RoutingParams::default()
        }
    }

    fn cand(edge: EdgeId, offset: f64) -> Candidate {
        Candidate {
            edge: Some(edge),
            offset,
            penalty: 0.0,
            flags: crate::candidate::LineMatchFlags::empty(),
            free_point: None,
        }
    }

    #[test]
    fn s1_same_edge_closed_form() {
        let (g, ea, eb, ec) = scenario_graph();
        let params = zero_params();
        let edge_cost = DefaultEdgeCost { params: &params };
        let mut cache = HopCache::default();
        let from = vec![cand(ea, 0.0), cand(eb, 0.0)];
        let to = vec![cand(ec, 0.0)];
        let (m, _) = route_hop(&g, &from, &to, &[0.0, 0.0], 1e9, SearchMode::Hops, &edge_cost, None, &mut cache, false);
        assert!((m.costs[0][0] - 10.0).abs() < 1e-6);
        assert!((m.costs[1][0] - 6.0).abs() < 1e-6);
    }

    #[test]
    fn s2_projection_onto_target() {
        let (g, ea, eb, ec) = scenario_graph();
        let params = zero_params();
        let edge_cost = DefaultEdgeCost { params: &params };
        let mut cache = HopCache::default();
        let from = vec![cand(ea, 0.0), cand(eb, 0.0)];
        let to = vec![cand(ec, 0.5)];
        let (m, _) = route_hop(&g, &from, &to, &[0.0, 0.0], 1e9, SearchMode::Hops, &edge_cost, None, &mut cache, false);
        assert!((m.costs[0][0] - 60.0).abs() < 1e-6);
        assert!((m.costs[1][0] - 56.0).abs() < 1e-6);
    }

    #[test]
    fn s3_projection_at_source() {
        let (g, ea, eb, ec) = scenario_graph();
        let params = zero_params();
        let edge_cost = DefaultEdgeCost { params: &params };
        let mut cache = HopCache::default();
        let from = vec![cand(ea, 0.5), cand(eb, 2.0 / 3.0)];
        let to = vec![cand(ec, 0.0)];
        let (m, _) = route_hop(&g, &from, &to, &[0.0, 0.0], 1e9, SearchMode::Hops, &edge_cost, None, &mut cache, false);
        assert!((m.costs[0][0] - 5.0).abs() < 1e-6);
        assert!((m.costs[1][0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn s4_fast_hop_column_pruning() {
        let (g, ea, eb, ec) = scenario_graph();
        let params = zero_params();
        let edge_cost = DefaultEdgeCost { params: &params };
        let mut cache = HopCache::default();
        let from = vec![cand(ea, 0.0), cand(eb, 0.0)];
        let to = vec![cand(ec, 0.0)];
        let (m, _) = route_hop(&g, &from, &to, &[0.0, 0.0], 1e9, SearchMode::HopsFast, &edge_cost, None, &mut cache, false);
        assert!(m.costs[0][0].is_infinite());
        assert!((m.costs[1][0] - 6.0).abs() < 1e-6);
    }

    #[test]
    fn s5_initial_cost_composition() {
        let (g, ea, eb, ec) = scenario_graph();
        let params = zero_params();
        let edge_cost = DefaultEdgeCost { params: &params };
        let mut cache = HopCache::default();
        let from = vec![cand(ea, 0.5), cand(ea, 0.0), cand(eb, 0.0)];
        let to = vec![cand(ec, 0.0)];
        let (m, _) = route_hop(&g, &from, &to, &[6.0, 0.0, 20.0], 1e9, SearchMode::HopsFast, &edge_cost, None, &mut cache, false);
        assert!((m.costs[0][0] - 5.0).abs() < 1e-6);
        assert!((m.costs[1][0] - 10.0).abs() < 1e-6);
        assert!(m.costs[2][0].is_infinite());
    }

    #[test]
    fn different_components_are_infinite_without_search() {
        let mut g = RoadGraph::new();
        let a = g.add_node(RoadNode::new(Point::new(0.0, 0.0)));
        let b = g.add_node(RoadNode::new(Point::new(1.0, 0.0)));
        let c = g.add_node(RoadNode::new(Point::new(5.0, 5.0)));
        let d = g.add_node(RoadNode::new(Point::new(6.0, 5.0)));
        let mk = || RoadEdge {
            geometry: LineString::from(vec![(0.0, 0.0), (1.0, 0.0)]),
            length: 10.0,
            level: 0,
            one_way: OneWay::Bidir,
            restricted: false,
            reversed_shadow: false,
            line_set: vec![],
            modes: ModeSet::of(Mode::Bus),
            way_id: 0,
            penalty_factor: 1.0,
        };
        let e1 = g.add_edge(a, b, mk());
        let e2 = g.add_edge(c, d, mk());
        if let Some(n) = g.node_weight_mut(a) {
            n.component = ComponentId(1);
        }
        if let Some(n) = g.node_weight_mut(b) {
            n.component = ComponentId(1);
        }
        if let Some(n) = g.node_weight_mut(c) {
            n.component = ComponentId(2);
        }
        if let Some(n) = g.node_weight_mut(d) {
            n.component = ComponentId(2);
        }

        let params = zero_params();
        let edge_cost = DefaultEdgeCost { params: &params };
        let mut cache = HopCache::default();
        let from = vec![cand(e1, 0.0)];
        let to = vec![cand(e2, 0.0)];
        let (m, stats) = route_hop(&g, &from, &to, &[0.0], 1e9, SearchMode::Hops, &edge_cost, None, &mut cache, false);
        assert!(m.costs[0][0].is_infinite());
        assert_eq!(stats.dijkstra_iters, 0);
    }
}
