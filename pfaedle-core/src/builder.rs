/*!
The transit graph builder: three passes over a map-extract entity
stream followed by a fixed sequence of post-processing steps.

Weak-connectivity (`writeComps`) is computed with a hand-rolled
union-find over edge endpoints rather than a graph-library component
routine: `petgraph`'s component algorithms (`kosaraju_scc`,
`tarjan_scc`) compute *strongly* connected components on directed
graphs, and this step explicitly wants weak (undirected-reachability)
components, so the disjoint-set below treats every directed edge as
connecting its endpoints symmetrically.
*/

use geo::{HaversineDistance, LineString, Point};
use hashbrown::HashMap;
use itertools::Itertools;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use tracing::{debug, info, instrument, warn};

use crate::graph::{ComponentId, EdgeId, Mode, ModeSet, NodeFlags, NodeId, OneWay, RoadEdge, RoadGraph, RoadNode, StationInfo};
use crate::osm::{EntityFlags, EntitySource, OsmNodeId, ReadOptions, RestrictionPolarity, Tags};
use crate::spatial::{build_edge_rtree, point_at_offset, project_point_onto_edge};

/// A padded longitude/latitude bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BBox {
    #[must_use]
    pub fn padded(&self, padding_deg: f64) -> BBox {
        BBox {
            min_lon: self.min_lon - padding_deg,
            min_lat: self.min_lat - padding_deg,
            max_lon: self.max_lon + padding_deg,
            max_lat: self.max_lat + padding_deg,
        }
    }

    #[must_use]
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min_lon > self.max_lon || self.min_lat > self.max_lat
    }
}

/// Parameters for [`build_graph`], independent of mode-specific tag
/// classification (which lives in [`ReadOptions`]).
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub bbox: BBox,
    pub box_padding_deg: f64,
    /// `fixGaps` merge tolerance, in meters.
    pub grid_size_m: f64,
    /// Multiplicative penalty applied to a wrong-direction shadow edge by
    /// `writeOneWayPens`.
    pub one_way_penalty_factor: f64,
    /// Radius, in meters, searched by `snapStats` for a station's nearest
    /// edge; depends on mode (rail stations tolerate a larger search
    /// radius than bus stops).
    pub station_snap_radius_m: f64,
    /// `simplifyGeoms` epsilon, in meters, proportional to `grid_size_m`.
    pub simplify_epsilon_m: f64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            bbox: BBox {
                min_lon: -180.0,
                min_lat: -90.0,
                max_lon: 180.0,
                max_lat: 90.0,
            },
            box_padding_deg: 0.01,
            grid_size_m: 1.0,
            one_way_penalty_factor: 1000.0,
            station_snap_radius_m: 100.0,
            simplify_epsilon_m: 0.5,
        }
    }
}

/// A turn restriction's `via` member, before the node (or node-list, for
/// a way via) is resolved against the graph.
#[derive(Clone, Copy)]
enum ViaSpec {
    Node(OsmNodeId),
    Way(u64),
}

#[derive(Clone, Default)]
struct NodeIntel {
    point: Point<f64>,
    flags_raw: EntityFlags,
    station: Option<StationInfo>,
}

/// Build a routed graph from a stream of map entities.
///
/// Failure semantics: malformed ways (fewer than two node refs) are
/// skipped silently; restrictions with an unresolvable member are
/// skipped silently; an empty (post-padding) bbox yields an empty
/// graph.
#[instrument(skip(source, opts))]
pub fn build_graph<S: EntitySource>(mut source: S, opts: &ReadOptions, config: &BuildConfig) -> RoadGraph {
    let padded = config.bbox.padded(config.box_padding_deg);
    if padded.is_empty() {
        warn!("empty bounding box, returning empty graph");
        return RoadGraph::new();
    }

    // Pass A: nodes.
    let mut intel: HashMap<OsmNodeId, NodeIntel> = HashMap::new();
    for node in source.nodes() {
        if !padded.contains(node.lon, node.lat) {
            continue;
        }
        let flags = opts.classifier.classify_node(&node.tags);
        let station = if flags.contains(EntityFlags::STATION) {
            let (names, platform, track) = opts.classifier.station_info(&node.tags);
            Some(StationInfo {
                names,
                platform,
                track,
                modes: opts.modes,
            })
        } else {
            None
        };
        intel.insert(
            node.id,
            NodeIntel {
                point: Point::new(node.lon, node.lat),
                flags_raw: flags,
                station,
            },
        );
    }
    debug!(in_bbox = intel.len(), "pass A complete");

    // Pass B: relations.
    let mut way_in_kept_rel: hashbrown::HashSet<u64> = hashbrown::HashSet::new();
    let mut restriction_triples: Vec<(u64, u64, Vec<ViaSpec>, RestrictionPolarity)> = Vec::new();
    let mut rel_count = 0usize;
    for rel in source.rels() {
        let flags = opts.classifier.classify_rel(&rel.tags);
        if !flags.contains(EntityFlags::KEEP) || flags.contains(EntityFlags::DROP) {
            continue;
        }
        rel_count += 1;
        for m in &rel.members {
            if m.member_type == crate::osm::RelMemberType::Way {
                way_in_kept_rel.insert(m.id);
            }
        }

        if flags.contains(EntityFlags::RESTRICTION) {
            let Some(polarity) = opts.classifier.restriction_polarity(&rel.tags) else {
                continue;
            };
            let from_way = rel
                .members
                .iter()
                .find(|m| m.role == "from" && m.member_type == crate::osm::RelMemberType::Way)
                .map(|m| m.id);
            let to_way = rel
                .members
                .iter()
                .find(|m| m.role == "to" && m.member_type == crate::osm::RelMemberType::Way)
                .map(|m| m.id);
            let via_specs: Vec<ViaSpec> = rel
                .members
                .iter()
                .filter(|m| m.role == "via")
                .map(|m| match m.member_type {
                    crate::osm::RelMemberType::Way => ViaSpec::Way(m.id),
                    _ => ViaSpec::Node(OsmNodeId(m.id)),
                })
                .collect();

            let (Some(from_way), Some(to_way)) = (from_way, to_way) else {
                continue;
            };
            if via_specs.is_empty() {
                continue;
            }
            restriction_triples.push((from_way, to_way, via_specs, polarity));
        }
    }
    debug!(
        kept_rels = rel_count,
        restrictions = restriction_triples.len(),
        "pass B complete"
    );

    // Pass C: ways.
    let mut graph = RoadGraph::new();
    let mut node_id_by_osm: HashMap<OsmNodeId, NodeId> = HashMap::new();
    let mut way_node_order: HashMap<u64, Vec<OsmNodeId>> = HashMap::new();

    for way in source.ways() {
        if way.node_refs.len() < 2 {
            continue; // malformed way, skip silently
        }
        let own_flags = opts.classifier.classify_way(&way.tags);
        let own_keep = own_flags.contains(EntityFlags::KEEP) && !own_flags.contains(EntityFlags::DROP);
        let via_rel = way_in_kept_rel.contains(&way.id.0);
        if !own_keep && !via_rel {
            continue;
        }
        let intersects_bbox = way
            .node_refs
            .iter()
            .any(|id| intel.contains_key(id));
        if !intersects_bbox {
            continue;
        }

        let level = opts.classifier.edge_level(&way.tags);
        let one_way = if own_flags.contains(EntityFlags::ONE_WAY) {
            OneWay::Forward
        } else if own_flags.contains(EntityFlags::ONE_WAY_REVERSE) {
            OneWay::Reverse
        } else {
            OneWay::Bidir
        };
        let line_set = opts.classifier.line_set(&way.tags);
        way_node_order.insert(way.id.0, way.node_refs.clone());
        let nohup_each = |id: &OsmNodeId| {
            intel
                .get(id)
                .map(|i| i.flags_raw.contains(EntityFlags::NOHUP))
                .unwrap_or(false)
        };

        for (a, b) in way.node_refs.iter().tuple_windows() {
            let Some(a_intel) = intel.get(a) else { continue };
            let Some(b_intel) = intel.get(b) else { continue };

            let a_id = get_or_create_node(&mut graph, &mut node_id_by_osm, *a, a_intel, nohup_each(a));
            let b_id = get_or_create_node(&mut graph, &mut node_id_by_osm, *b, b_intel, nohup_each(b));

            let geometry = LineString::from(vec![
                (a_intel.point.x(), a_intel.point.y()),
                (b_intel.point.x(), b_intel.point.y()),
            ]);
            let length = a_intel.point.haversine_distance(&b_intel.point);

            graph.add_edge(
                a_id,
                b_id,
                RoadEdge {
                    geometry,
                    length,
                    level,
                    one_way,
                    restricted: false,
                    reversed_shadow: false,
                    line_set: line_set.clone(),
                    modes: opts.modes,
                    way_id: way.id.0,
                    penalty_factor: 1.0,
                },
            );
        }
    }
    info!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "pass C complete"
    );

    // Apply restrictions at resolved via-nodes. A via encoded as a way is
    // expanded into every node along that way.
    for (from_way, to_way, vias, polarity) in restriction_triples {
        let via_nodes: Vec<OsmNodeId> = vias
            .into_iter()
            .flat_map(|v| match v {
                ViaSpec::Node(id) => vec![id],
                ViaSpec::Way(way_id) => way_node_order.get(&way_id).cloned().unwrap_or_default(),
            })
            .collect();
        for via_osm in via_nodes {
            let Some(&via_id) = node_id_by_osm.get(&via_osm) else {
                continue;
            };
            match polarity {
                RestrictionPolarity::Positive => {
                    graph.restrictions_mut().add_positive(via_id, from_way, to_way);
                }
                RestrictionPolarity::Negative => {
                    graph.restrictions_mut().add_negative(via_id, from_way, to_way);
                }
            }

            let from_edge = graph
                .edges_directed(via_id, Direction::Incoming)
                .find(|e| e.weight().way_id == from_way)
                .map(|e| e.id());
            let to_edge = graph
                .edges_directed(via_id, Direction::Outgoing)
                .find(|e| e.weight().way_id == to_way)
                .map(|e| e.id());
            for id in from_edge.into_iter().chain(to_edge) {
                if let Some(weight) = graph.edge_weight_mut(id) {
                    weight.restricted = true;
                }
            }
        }
    }

    fix_gaps(&mut graph, config.grid_size_m);
    snap_stations(&mut graph, config.station_snap_radius_m);
    collapse_edges(&mut graph);
    delete_orphan_nodes(&mut graph);
    write_components(&mut graph);
    simplify_geometries(&mut graph, config.simplify_epsilon_m);
    write_reverse_shadow_edges(&mut graph);
    write_one_way_penalties(&mut graph, config.one_way_penalty_factor);
    if opts.no_line_punish_factor != 1.0 {
        write_no_line_penalties(&mut graph, opts.no_line_punish_factor);
    }
    write_self_edges(&mut graph);

    *graph.rtree_mut() = build_edge_rtree(&graph);

    info!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "graph build complete"
    );
    graph
}

fn get_or_create_node(
    graph: &mut RoadGraph,
    by_osm: &mut HashMap<OsmNodeId, NodeId>,
    osm_id: OsmNodeId,
    intel: &NodeIntel,
    nohup: bool,
) -> NodeId {
    if nohup {
        let mut node = RoadNode::new(intel.point);
        node.station = intel.station.clone();
        node.flags = node_flags(intel.flags_raw);
        return graph.add_node(node);
    }
    if let Some(&id) = by_osm.get(&osm_id) {
        return id;
    }
    let mut node = RoadNode::new(intel.point);
    node.station = intel.station.clone();
    node.flags = node_flags(intel.flags_raw);
    let id = graph.add_node(node);
    by_osm.insert(osm_id, id);
    id
}

fn node_flags(raw: EntityFlags) -> NodeFlags {
    let mut flags = NodeFlags::empty();
    if raw.contains(EntityFlags::BLOCKER) {
        flags |= NodeFlags::BLOCKER;
    }
    if raw.contains(EntityFlags::TURN_CYCLE) {
        flags |= NodeFlags::TURN_CYCLE;
    }
    flags
}

/// Merge nodes whose coordinates coincide to within `tolerance_m`. Nodes
/// are grouped by a coarse grid cell key first so the comparison is
/// roughly O(n) rather than O(n²).
#[instrument(skip(graph))]
fn fix_gaps(graph: &mut RoadGraph, tolerance_m: f64) {
    if tolerance_m <= 0.0 {
        return;
    }
    let cell_deg = (tolerance_m / 111_000.0).max(1e-9);
    let mut buckets: HashMap<(i64, i64), Vec<NodeId>> = HashMap::new();
    for id in graph.node_indices().collect::<Vec<_>>() {
        let Some(n) = graph.node(id) else { continue };
        let key = (
            (n.point.x() / cell_deg).floor() as i64,
            (n.point.y() / cell_deg).floor() as i64,
        );
        buckets.entry(key).or_default().push(id);
    }

    let mut merged_into: HashMap<NodeId, NodeId> = HashMap::new();
    for group in buckets.values() {
        if group.len() < 2 {
            continue;
        }
        for w in group.windows(2) {
            let (a, b) = (w[0], w[1]);
            let (Some(pa), Some(pb)) = (graph.node(a).map(|n| n.point), graph.node(b).map(|n| n.point)) else {
                continue;
            };
            if pa.haversine_distance(&pb) <= tolerance_m {
                merged_into.insert(b, a);
            }
        }
    }

    for (from, into) in merged_into {
        let incoming: Vec<_> = graph
            .edges_directed(from, petgraph::Direction::Incoming)
            .map(|e| (e.source(), e.id(), e.weight().clone()))
            .collect();
        let outgoing: Vec<_> = graph
            .edges_directed(from, petgraph::Direction::Outgoing)
            .map(|e| (e.target(), e.id(), e.weight().clone()))
            .collect();
        for (src, eid, w) in incoming {
            graph.remove_edge(eid);
            if src != from {
                graph.add_edge(src, into, w);
            }
        }
        for (tgt, eid, w) in outgoing {
            graph.remove_edge(eid);
            if tgt != from {
                graph.add_edge(into, tgt, w);
            }
        }
        graph.remove_node(from);
    }
}

/// For every known station node, find the nearest edge within
/// `radius_m` and connect the station to it: split the edge at the
/// projected point when that point falls strictly inside it, reusing
/// the existing endpoint node when the projection lands on one instead,
/// then join the station to that point with a synthetic leaf-edge. A
/// station with no edge in range is left as a free-standing node.
#[instrument(skip(graph))]
fn snap_stations(graph: &mut RoadGraph, radius_m: f64) {
    const ENDPOINT_EPS: f64 = 1e-6;

    let rtree = build_edge_rtree(graph);
    let station_nodes: Vec<NodeId> = graph
        .node_indices()
        .filter(|&id| graph.node(id).is_some_and(|n| n.station.is_some()))
        .collect();

    for station_id in station_nodes {
        let Some(station_point) = graph.node(station_id).map(|n| n.point) else {
            continue;
        };
        let nearest = rtree
            .nearest_neighbor(&crate::spatial::IndexedEdgePoint {
                edge: None,
                geometry: station_point,
            })
            .and_then(|p| p.edge);
        let Some(edge_id) = nearest else { continue };
        let Some(edge) = graph.edge(edge_id).cloned() else { continue };

        let proj = project_point_onto_edge(station_point, &edge.geometry);
        let target_point = point_at_offset(&edge.geometry, proj.offset);
        let distance = station_point.haversine_distance(&target_point);
        if distance > radius_m {
            continue;
        }

        let target_node = if proj.offset <= ENDPOINT_EPS || proj.offset >= 1.0 - ENDPOINT_EPS {
            let Some((a, b)) = graph.endpoints(edge_id) else { continue };
            if proj.offset <= ENDPOINT_EPS { a } else { b }
        } else {
            split_edge_at(graph, edge_id, &edge, proj.offset)
        };

        if target_node == station_id {
            continue;
        }

        let leaf_geometry = LineString::from(vec![
            (station_point.x(), station_point.y()),
            (target_point.x(), target_point.y()),
        ]);
        graph.add_edge(
            station_id,
            target_node,
            RoadEdge {
                geometry: leaf_geometry,
                length: distance,
                level: edge.level,
                one_way: OneWay::Bidir,
                restricted: false,
                reversed_shadow: false,
                line_set: vec![],
                modes: edge.modes,
                way_id: 0,
                penalty_factor: 1.0 / crate::WALK_SPEED,
            },
        );
    }
}

/// Replace `edge_id` with two edges meeting at a new node at fractional
/// `offset` along its geometry, preserving every attribute but
/// `geometry`/`length` (recomputed for each half). Returns the new
/// node's id.
fn split_edge_at(graph: &mut RoadGraph, edge_id: EdgeId, edge: &RoadEdge, offset: f64) -> NodeId {
    let split_point = point_at_offset(&edge.geometry, offset);
    let Some((from, to)) = graph.endpoints(edge_id) else {
        return graph.add_node(RoadNode::new(split_point));
    };
    let (head, tail) = split_line_at_offset(&edge.geometry, offset);

    let split_id = graph.add_node(RoadNode::new(split_point));
    graph.remove_edge(edge_id.0);

    graph.add_edge(
        from,
        split_id,
        RoadEdge {
            geometry: LineString::from(head.clone()),
            length: polyline_length(&head),
            ..edge.clone()
        },
    );
    graph.add_edge(
        split_id,
        to,
        RoadEdge {
            geometry: LineString::from(tail.clone()),
            length: polyline_length(&tail),
            ..edge.clone()
        },
    );

    split_id
}

/// Cut `line`'s coordinates at fractional `offset`, returning the two
/// halves (both containing the split point, so each is a valid
/// standalone polyline).
fn split_line_at_offset(line: &LineString<f64>, offset: f64) -> (Vec<(f64, f64)>, Vec<(f64, f64)>) {
    let coords = line.0.as_slice();
    if coords.len() < 2 {
        let p = coords.first().copied().unwrap_or(geo::Coord { x: 0.0, y: 0.0 });
        return (vec![(p.x, p.y)], vec![(p.x, p.y)]);
    }
    let offset = offset.clamp(0.0, 1.0);
    let total_length: f64 = (0..coords.len() - 1)
        .map(|i| Point::from(coords[i]).haversine_distance(&Point::from(coords[i + 1])))
        .sum();
    let target = offset * total_length;

    let mut head = vec![(coords[0].x, coords[0].y)];
    let mut cumulative = 0.0;
    for i in 0..coords.len() - 1 {
        let a = Point::from(coords[i]);
        let b = Point::from(coords[i + 1]);
        let seg_len = a.haversine_distance(&b);
        if cumulative + seg_len >= target || seg_len == 0.0 {
            let local = if seg_len > 0.0 { (target - cumulative) / seg_len } else { 0.0 };
            let split = (a.x() + (b.x() - a.x()) * local, a.y() + (b.y() - a.y()) * local);
            head.push(split);
            let mut tail = vec![split];
            tail.extend(coords[i + 1..].iter().map(|c| (c.x, c.y)));
            return (head, tail);
        }
        head.push((b.x(), b.y()));
        cumulative += seg_len;
    }
    let last = *coords.last().unwrap();
    head.push((last.x, last.y));
    (head, vec![(last.x, last.y)])
}

fn polyline_length(coords: &[(f64, f64)]) -> f64 {
    coords
        .windows(2)
        .map(|w| Point::new(w[0].0, w[0].1).haversine_distance(&Point::new(w[1].0, w[1].1)))
        .sum()
}

/// Merge chains of degree-2 nodes with matching edge attributes into a
/// single polyline edge.
#[instrument(skip(graph))]
fn collapse_edges(graph: &mut RoadGraph) {
    loop {
        let mut merged_any = false;
        let candidates: Vec<NodeId> = graph.node_indices().collect();
        for node in candidates {
            if !graph.contains_node(node) {
                continue;
            }
            let Some(n) = graph.node(node) else { continue };
            if n.station.is_some() || !n.flags.is_empty() {
                continue;
            }
            let incoming: Vec<_> = graph
                .edges_directed(node, petgraph::Direction::Incoming)
                .map(|e| (e.source(), e.id()))
                .collect();
            let outgoing: Vec<_> = graph
                .edges_directed(node, petgraph::Direction::Outgoing)
                .map(|e| (e.target(), e.id()))
                .collect();
            if incoming.len() != 1 || outgoing.len() != 1 {
                continue;
            }
            let (src, in_id) = incoming[0];
            let (tgt, out_id) = outgoing[0];
            if src == node || tgt == node || src == tgt {
                continue;
            }
            let (Some(in_edge), Some(out_edge)) = (graph.edge(crate::graph::EdgeId(in_id)), graph.edge(crate::graph::EdgeId(out_id))) else {
                continue;
            };
            if in_edge.level != out_edge.level
                || in_edge.one_way != out_edge.one_way
                || in_edge.way_id != out_edge.way_id
                || in_edge.reversed_shadow != out_edge.reversed_shadow
            {
                continue;
            }

            let mut points: Vec<(f64, f64)> = in_edge.geometry.0.iter().map(|c| (c.x, c.y)).collect();
            let tail: Vec<(f64, f64)> = out_edge.geometry.0.iter().skip(1).map(|c| (c.x, c.y)).collect();
            points.extend(tail);
            let merged = RoadEdge {
                geometry: LineString::from(points),
                length: in_edge.length + out_edge.length,
                level: in_edge.level,
                one_way: in_edge.one_way,
                restricted: in_edge.restricted || out_edge.restricted,
                reversed_shadow: in_edge.reversed_shadow,
                line_set: in_edge.line_set.clone(),
                modes: in_edge.modes,
                way_id: in_edge.way_id,
                penalty_factor: in_edge.penalty_factor,
            };

            graph.remove_edge(in_id);
            graph.remove_edge(out_id);
            graph.remove_node(node);
            graph.add_edge(src, tgt, merged);
            merged_any = true;
        }
        if !merged_any {
            break;
        }
    }
}

/// Drop nodes with no incident edges in either direction.
#[instrument(skip(graph))]
fn delete_orphan_nodes(graph: &mut RoadGraph) {
    let orphans: Vec<NodeId> = graph
        .node_indices()
        .filter(|&id| {
            graph.edges_directed(id, petgraph::Direction::Outgoing).next().is_none()
                && graph.edges_directed(id, petgraph::Direction::Incoming).next().is_none()
        })
        .collect();
    for id in orphans {
        graph.remove_node(id);
    }
}

/// Stamp every node with its weakly-connected-component index, using a
/// disjoint-set over edge endpoints (an edge connects its endpoints
/// regardless of direction, for the purpose of this step).
#[instrument(skip(graph))]
fn write_components(graph: &mut RoadGraph) {
    let nodes: Vec<NodeId> = graph.node_indices().collect();
    let mut parent: HashMap<NodeId, NodeId> = nodes.iter().map(|&n| (n, n)).collect();

    fn find(parent: &mut HashMap<NodeId, NodeId>, x: NodeId) -> NodeId {
        let mut root = x;
        while parent[&root] != root {
            root = parent[&root];
        }
        let mut cur = x;
        while parent[&cur] != root {
            let next = parent[&cur];
            parent.insert(cur, root);
            cur = next;
        }
        root
    }

    for eid in graph.edge_indices().collect::<Vec<_>>() {
        if let Some((a, b)) = graph.edge_endpoints(eid) {
            let ra = find(&mut parent, a);
            let rb = find(&mut parent, b);
            if ra != rb {
                parent.insert(ra, rb);
            }
        }
    }

    let mut component_of: HashMap<NodeId, ComponentId> = HashMap::new();
    let mut next_component = 0u32;
    for &n in &nodes {
        let root = find(&mut parent, n);
        let comp = *component_of.entry(root).or_insert_with(|| {
            let c = ComponentId(next_component);
            next_component += 1;
            c
        });
        if let Some(node) = graph.node_weight_mut(n) {
            node.component = comp;
        }
    }
}

/// Douglas–Peucker simplification with epsilon in meters, hand-rolled
/// against haversine distance rather than a generic `geo::Simplify`
/// instance (which operates on planar coordinate units, not meters).
#[instrument(skip(graph))]
fn simplify_geometries(graph: &mut RoadGraph, epsilon_m: f64) {
    if epsilon_m <= 0.0 {
        return;
    }
    let ids: Vec<_> = graph.edge_indices().collect();
    for eid in ids {
        if let Some(edge) = graph.edge_weight_mut(eid) {
            let simplified = douglas_peucker(&edge.geometry.0, epsilon_m);
            edge.geometry = LineString::from(simplified);
        }
    }
}

fn douglas_peucker(points: &[geo::Coord<f64>], epsilon_m: f64) -> Vec<geo::Coord<f64>> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let first = Point::from(points[0]);
    let last = Point::from(*points.last().unwrap());

    let mut max_dist = 0.0;
    let mut max_idx = 0;
    for (i, c) in points.iter().enumerate().take(points.len() - 1).skip(1) {
        let d = perpendicular_distance(Point::from(*c), first, last);
        if d > max_dist {
            max_dist = d;
            max_idx = i;
        }
    }

    if max_dist > epsilon_m {
        let mut left = douglas_peucker(&points[..=max_idx], epsilon_m);
        let right = douglas_peucker(&points[max_idx..], epsilon_m);
        left.pop();
        left.extend(right);
        left
    } else {
        vec![points[0], *points.last().unwrap()]
    }
}

fn perpendicular_distance(p: Point<f64>, a: Point<f64>, b: Point<f64>) -> f64 {
    let line_len = a.haversine_distance(&b);
    if line_len == 0.0 {
        return a.haversine_distance(&p);
    }
    // Approximate perpendicular distance via the planar cross-product
    // ratio scaled by the haversine segment length (adequate at the
    // short, roughly-planar scale of a single way's node spacing).
    let (ax, ay) = (a.x(), a.y());
    let (bx, by) = (b.x(), b.y());
    let (px, py) = (p.x(), p.y());
    let num = ((by - ay) * px - (bx - ax) * py + bx * ay - by * ax).abs();
    let den = ((by - ay).powi(2) + (bx - ax).powi(2)).sqrt();
    if den == 0.0 {
        return 0.0;
    }
    let planar_dist = num / den;
    let planar_len = ((bx - ax).powi(2) + (by - ay).powi(2)).sqrt();
    planar_dist * (line_len / planar_len.max(1e-12))
}

/// For every edge, insert a reverse shadow edge (`writeODirEdgs`). This
/// is an involution up to penalty scaling: running it twice on an
/// already-shadowed graph would double the edge count, so callers must
/// run it exactly once per build (enforced here by only ever being
/// called from [`build_graph`]).
#[instrument(skip(graph))]
fn write_reverse_shadow_edges(graph: &mut RoadGraph) {
    let forward: Vec<(NodeId, NodeId, crate::graph::EdgeId, RoadEdge)> = graph
        .edge_indices()
        .filter_map(|eid| {
            let id = crate::graph::EdgeId(eid);
            let (a, b) = graph.endpoints(id)?;
            let w = graph.edge(id)?.clone();
            Some((a, b, id, w))
        })
        .collect();

    for (a, b, _id, w) in forward {
        let mut shadow = w.clone();
        shadow.reversed_shadow = true;
        shadow.geometry = LineString::from(w.geometry.0.iter().rev().copied().collect::<Vec<_>>());
        graph.add_edge(b, a, shadow);
    }
}

/// Multiply the cost of the wrong-direction member of each
/// forward/reverse-shadow pair by `factor`. Bidirectional ways are
/// unaffected in either direction.
#[instrument(skip(graph))]
fn write_one_way_penalties(graph: &mut RoadGraph, factor: f64) {
    let ids: Vec<_> = graph.edge_indices().collect();
    for eid in ids {
        if let Some(edge) = graph.edge_weight_mut(eid) {
            let wrong_direction = match edge.one_way {
                OneWay::Bidir => false,
                OneWay::Forward => edge.reversed_shadow,
                OneWay::Reverse => !edge.reversed_shadow,
            };
            if wrong_direction {
                edge.penalty_factor *= factor;
            }
        }
    }
}

/// Multiply edge cost by `factor` when the edge's line-set is empty.
#[instrument(skip(graph))]
fn write_no_line_penalties(graph: &mut RoadGraph, factor: f64) {
    let ids: Vec<_> = graph.edge_indices().collect();
    for eid in ids {
        if let Some(edge) = graph.edge_weight_mut(eid) {
            if edge.line_set.is_empty() {
                edge.penalty_factor *= factor;
            }
        }
    }
}

/// Add zero-length self-edges at every station node, so same-stop-to-
/// same-stop hops have a closed-form (zero cost) solution.
#[instrument(skip(graph))]
fn write_self_edges(graph: &mut RoadGraph) {
    let station_nodes: Vec<NodeId> = graph
        .node_indices()
        .filter(|&id| graph.node(id).is_some_and(|n| n.station.is_some()))
        .collect();
    for id in station_nodes {
        let Some(point) = graph.node(id).map(|n| n.point) else { continue };
        let geometry = LineString::from(vec![(point.x(), point.y()), (point.x(), point.y())]);
        graph.add_edge(
            id,
            id,
            RoadEdge {
                geometry,
                length: 0.0,
                level: 0,
                one_way: OneWay::Bidir,
                restricted: false,
                reversed_shadow: false,
                line_set: vec![],
                modes: ModeSet::all(),
                way_id: 0,
                penalty_factor: 1.0,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm::{RelMemberType, VecEntitySource};
    use std::sync::Arc;

    struct AllRoads;
    impl crate::osm::TagClassifier for AllRoads {
        fn classify_node(&self, tags: &Tags) -> EntityFlags {
            let mut f = EntityFlags::KEEP;
            if tags.contains_key("station") {
                f |= EntityFlags::STATION;
            }
            f
        }
        fn classify_way(&self, _tags: &Tags) -> EntityFlags {
            EntityFlags::KEEP
        }
        fn classify_rel(&self, tags: &Tags) -> EntityFlags {
            let mut f = EntityFlags::empty();
            if tags.get("type").map(String::as_str) == Some("restriction") {
                f |= EntityFlags::KEEP | EntityFlags::RESTRICTION;
            }
            f
        }
        fn edge_level(&self, _tags: &Tags) -> u8 {
            1
        }
        fn station_info(&self, _tags: &Tags) -> (Vec<String>, Option<String>, Option<String>) {
            (vec!["Test Station".into()], None, None)
        }
        fn restriction_polarity(&self, tags: &Tags) -> Option<RestrictionPolarity> {
            match tags.get("restriction").map(String::as_str) {
                Some(v) if v.starts_with("no_") => Some(RestrictionPolarity::Negative),
                Some(v) if v.starts_with("only_") => Some(RestrictionPolarity::Positive),
                _ => None,
            }
        }
        fn line_set(&self, _tags: &Tags) -> Vec<String> {
            vec![]
        }
    }

    fn opts() -> ReadOptions {
        ReadOptions::new(Mode::Bus, Arc::new(AllRoads), 1.0)
    }

    #[test]
    fn builds_a_simple_chain_and_adds_shadow_edges() {
        let mut src = VecEntitySource::default();
        src.nodes.push(crate::osm::Node {
            id: OsmNodeId(1),
            lon: 0.0,
            lat: 0.0,
            tags: Tags::new(),
        });
        src.nodes.push(crate::osm::Node {
            id: OsmNodeId(2),
            lon: 0.0,
            lat: 0.001,
            tags: Tags::new(),
        });
        src.ways.push(crate::osm::Way {
            id: crate::osm::OsmWayId(10),
            node_refs: vec![OsmNodeId(1), OsmNodeId(2)],
            tags: Tags::new(),
        });

        let graph = build_graph(src, &opts(), &BuildConfig::default());
        assert_eq!(graph.node_count(), 2);
        // one forward edge + one reverse shadow
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn malformed_way_is_skipped() {
        let mut src = VecEntitySource::default();
        src.nodes.push(crate::osm::Node {
            id: OsmNodeId(1),
            lon: 0.0,
            lat: 0.0,
            tags: Tags::new(),
        });
        src.ways.push(crate::osm::Way {
            id: crate::osm::OsmWayId(10),
            node_refs: vec![OsmNodeId(1)],
            tags: Tags::new(),
        });

        let graph = build_graph(src, &opts(), &BuildConfig::default());
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn restriction_is_filed_at_via_node() {
        let mut src = VecEntitySource::default();
        for (id, lon) in [(1, 0.0), (2, 0.001), (3, 0.002)] {
            src.nodes.push(crate::osm::Node {
                id: OsmNodeId(id),
                lon,
                lat: 0.0,
                tags: Tags::new(),
            });
        }
        src.ways.push(crate::osm::Way {
            id: crate::osm::OsmWayId(100),
            node_refs: vec![OsmNodeId(1), OsmNodeId(2)],
            tags: Tags::new(),
        });
        src.ways.push(crate::osm::Way {
            id: crate::osm::OsmWayId(200),
            node_refs: vec![OsmNodeId(2), OsmNodeId(3)],
            tags: Tags::new(),
        });
        let mut rel_tags = Tags::new();
        rel_tags.insert("type".into(), "restriction".into());
        rel_tags.insert("restriction".into(), "no_left_turn".into());
        src.rels.push(crate::osm::Rel {
            id: 1,
            members: vec![
                crate::osm::RelMember { member_type: RelMemberType::Way, id: 100, role: "from".into() },
                crate::osm::RelMember { member_type: RelMemberType::Node, id: 2, role: "via".into() },
                crate::osm::RelMember { member_type: RelMemberType::Way, id: 200, role: "to".into() },
            ],
            tags: rel_tags,
        });

        let graph = build_graph(src, &opts(), &BuildConfig::default());
        assert!(!graph.restrictions().is_empty());
    }

    #[test]
    fn nearby_station_is_snapped_onto_a_split_edge() {
        let mut src = VecEntitySource::default();
        src.nodes.push(crate::osm::Node { id: OsmNodeId(1), lon: 0.0, lat: 0.0, tags: Tags::new() });
        src.nodes.push(crate::osm::Node { id: OsmNodeId(2), lon: 0.0, lat: 0.002, tags: Tags::new() });
        let mut station_tags = Tags::new();
        station_tags.insert("station".into(), "yes".into());
        src.nodes.push(crate::osm::Node { id: OsmNodeId(3), lon: 0.0005, lat: 0.001, tags: station_tags });
        src.ways.push(crate::osm::Way {
            id: crate::osm::OsmWayId(1),
            node_refs: vec![OsmNodeId(1), OsmNodeId(2)],
            tags: Tags::new(),
        });

        let graph = build_graph(src, &opts(), &BuildConfig::default());

        // the two way endpoints, the station, and the node the edge was
        // split at
        assert_eq!(graph.node_count(), 4);

        let station_id = graph
            .node_indices()
            .find(|&id| graph.node(id).is_some_and(|n| n.station.is_some()))
            .expect("station node survives");
        let connects_out = graph
            .edges_directed(station_id, petgraph::Direction::Outgoing)
            .count();
        assert!(connects_out >= 1, "station should have a leaf-edge onto the road");
    }

    #[test]
    fn far_station_is_left_unconnected() {
        let mut src = VecEntitySource::default();
        src.nodes.push(crate::osm::Node { id: OsmNodeId(1), lon: 0.0, lat: 0.0, tags: Tags::new() });
        src.nodes.push(crate::osm::Node { id: OsmNodeId(2), lon: 0.0, lat: 0.002, tags: Tags::new() });
        let mut station_tags = Tags::new();
        station_tags.insert("station".into(), "yes".into());
        // far enough away (roughly 11km) that it falls outside the default
        // 100m snap radius and gets dropped as an orphan
        src.nodes.push(crate::osm::Node { id: OsmNodeId(3), lon: 0.1, lat: 0.001, tags: station_tags });
        src.ways.push(crate::osm::Way {
            id: crate::osm::OsmWayId(1),
            node_refs: vec![OsmNodeId(1), OsmNodeId(2)],
            tags: Tags::new(),
        });

        let graph = build_graph(src, &opts(), &BuildConfig::default());

        assert!(graph
            .node_indices()
            .all(|id| graph.node(id).is_some_and(|n| n.station.is_none())));
    }
}
