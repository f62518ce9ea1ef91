/*!
Defines the routed graph (`RoadGraph`) built by [`crate::builder`] and
consumed by every downstream component: [`crate::candidate`],
[`crate::router`], [`crate::solver`] and [`crate::cache`].

The graph is backed by `petgraph`'s [`StableDiGraph`]. An
`EdgeId`/`NodeId` identity needs to survive node/edge removal during the
builder's post-processing passes (`deleteOrphNds`, `collapseEdges`) —
`StableDiGraph` keeps every other index stable across a
`remove_node`/`remove_edge` call, which a plain `DiGraph` does not.
*/

use std::fmt;
use std::ops::{Deref, DerefMut};

use bitflags::bitflags;
use geo::{LineString, Point};
use hashbrown::HashMap;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use rstar::RTree;
use serde::{Deserialize, Serialize};

use crate::restrictions::Restrictions;
use crate::spatial::IndexedEdgePoint;

/// A stable index into the graph's node arena.
pub type NodeId = NodeIndex<u32>;

/// A stable index into the graph's edge arena.
///
/// Newtype over `petgraph`'s `EdgeIndex`: the index survives graph
/// mutation and is `Copy`/`Hash`, so it can be used directly as a
/// hop-cache or edge-index key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub(crate) EdgeIndex<u32>);

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0.index())
    }
}

/// A strongly-typed weakly-connected-component index, assigned by
/// `writeComps`. Two edges with different `ComponentId`s can never be
/// connected by any path; the router uses equality here as a cheap
/// admissibility precondition before running any search.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ComponentId(pub u32);

/// Transport mode a road/rail edge is open to. Mirrors the GTFS route-type
/// taxonomy the schedule reader would hand trips in on, minus modes the
/// matching core has no special handling for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Bus,
    Tram,
    Rail,
    Subway,
    Ferry,
    CableCar,
    Funicular,
}

bitflags! {
    /// A precompiled bitfield of the modes an edge or station is open to.
    ///
    /// Design Note "Dynamic tag maps": OSM tag access is a `String →
    /// String` map evaluated against dozens of predicates at ingest time;
    /// this bitfield is the disciplined form those evaluations settle
    /// into, so every subsequent "does this edge serve mode X" check is a
    /// bit test rather than a map lookup plus string comparisons.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct ModeSet: u8 {
        const BUS        = 0b0000_0001;
        const TRAM       = 0b0000_0010;
        const RAIL       = 0b0000_0100;
        const SUBWAY     = 0b0000_1000;
        const FERRY       = 0b0001_0000;
        const CABLE_CAR  = 0b0010_0000;
        const FUNICULAR  = 0b0100_0000;
    }
}

impl ModeSet {
    #[must_use]
    pub const fn of(mode: Mode) -> Self {
        match mode {
            Mode::Bus => Self::BUS,
            Mode::Tram => Self::TRAM,
            Mode::Rail => Self::RAIL,
            Mode::Subway => Self::SUBWAY,
            Mode::Ferry => Self::FERRY,
            Mode::CableCar => Self::CABLE_CAR,
            Mode::Funicular => Self::FUNICULAR,
        }
    }

    #[must_use]
    pub const fn contains_mode(self, mode: Mode) -> bool {
        self.contains(Self::of(mode))
    }
}

bitflags! {
    /// Per-node routing flags, evaluated once at build time against the
    /// builder's blocker/turn-cycle predicates.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct NodeFlags: u8 {
        /// Routing is forbidden through this node.
        const BLOCKER    = 0b01;
        /// U-turns are explicitly allowed at this node.
        const TURN_CYCLE = 0b10;
    }
}

/// Station metadata attached to a subset of nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct StationInfo {
    pub names: Vec<String>,
    pub platform: Option<String>,
    pub track: Option<String>,
    pub modes: ModeSet,
}

/// A node in the routed graph.
#[derive(Debug, Clone, PartialEq)]
pub struct RoadNode {
    pub point: Point<f64>,
    pub component: ComponentId,
    pub station: Option<StationInfo>,
    pub flags: NodeFlags,
}

impl RoadNode {
    #[must_use]
    pub fn new(point: Point<f64>) -> Self {
        RoadNode {
            point,
            component: ComponentId::default(),
            station: None,
            flags: NodeFlags::empty(),
        }
    }
}

/// One-way tag.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OneWay {
    Bidir,
    Forward,
    Reverse,
}

/// A directed edge in the routed graph.
#[derive(Debug, Clone, PartialEq)]
pub struct RoadEdge {
    /// Geometry in build order; `from` coincides with the first point,
    /// `to` with the last, after `fixGaps`/`snapStats` snapping.
    pub geometry: LineString<f64>,
    /// Precomputed polyline length, in meters.
    pub length: f64,
    /// Small integer road-class tag, assigned by the read options' level
    /// classifier.
    pub level: u8,
    pub one_way: OneWay,
    pub restricted: bool,
    /// Whether this edge is the reverse shadow inserted by `writeODirEdgs`
    /// for an originally one-directional way.
    pub reversed_shadow: bool,
    /// Names of transit lines statically known to serve this edge.
    pub line_set: Vec<String>,
    pub modes: ModeSet,
    /// The OSM way this edge segment was cut from; restrictions are
    /// expressed in terms of (via-node, from-way, to-way) and are
    /// resolved against this field at routing time.
    pub way_id: u64,
    /// Multiplicative cost factor accumulated by `writeOneWayPens` and
    /// `writeNoLinePens`. Applied on top of `length` in the cost function.
    pub penalty_factor: f64,
}

impl RoadEdge {
    #[must_use]
    pub fn one_way_penalty(&self) -> f64 {
        self.penalty_factor
    }
}

/// The routed graph produced by [`crate::builder::build_graph`].
///
/// Deref/DerefMut to the inner `StableDiGraph` so callers get the full
/// `petgraph` API (`node_weight`, `edges`, `neighbors`, …) without this
/// type re-exporting every method by hand.
#[derive(Debug, Clone)]
pub struct RoadGraph {
    graph: StableDiGraph<RoadNode, RoadEdge, u32>,
    rtree: RTree<IndexedEdgePoint>,
    restrictions: Restrictions,
}

impl RoadGraph {
    #[must_use]
    pub fn new() -> Self {
        RoadGraph {
            graph: StableDiGraph::default(),
            rtree: RTree::new(),
            restrictions: Restrictions::default(),
        }
    }

    #[must_use]
    pub(crate) fn from_parts(
        graph: StableDiGraph<RoadNode, RoadEdge, u32>,
        rtree: RTree<IndexedEdgePoint>,
        restrictions: Restrictions,
    ) -> Self {
        RoadGraph {
            graph,
            rtree,
            restrictions,
        }
    }

    pub fn add_node(&mut self, node: RoadNode) -> NodeId {
        self.graph.add_node(node)
    }

    pub fn add_edge(&mut self, from: NodeId, to: NodeId, edge: RoadEdge) -> EdgeId {
        EdgeId(self.graph.add_edge(from, to, edge))
    }

    #[must_use]
    pub fn edge(&self, id: EdgeId) -> Option<&RoadEdge> {
        self.graph.edge_weight(id.0)
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&RoadNode> {
        self.graph.node_weight(id)
    }

    #[must_use]
    pub fn endpoints(&self, id: EdgeId) -> Option<(NodeId, NodeId)> {
        self.graph.edge_endpoints(id.0)
    }

    #[must_use]
    pub fn rtree(&self) -> &RTree<IndexedEdgePoint> {
        &self.rtree
    }

    pub(crate) fn rtree_mut(&mut self) -> &mut RTree<IndexedEdgePoint> {
        &mut self.rtree
    }

    #[must_use]
    pub fn restrictions(&self) -> &Restrictions {
        &self.restrictions
    }

    pub(crate) fn restrictions_mut(&mut self) -> &mut Restrictions {
        &mut self.restrictions
    }

    /// Iterate every `EdgeId` currently present in the arena, in
    /// build/insertion order. Used by [`crate::fingerprint`] and
    /// [`crate::cache`] to build their edge indexes.
    pub fn edge_ids(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.graph.edge_indices().map(EdgeId)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Outgoing `(EdgeId, target NodeId)` pairs for `node`, honoring
    /// `NodeFlags::BLOCKER` (a blocker node has no traversable exits).
    pub fn out_edges(&self, node: NodeId) -> impl Iterator<Item = (EdgeId, NodeId)> + '_ {
        let blocked = self
            .graph
            .node_weight(node)
            .is_some_and(|n| n.flags.contains(NodeFlags::BLOCKER));
        self.graph
            .edges(node)
            .map(|e| (EdgeId(e.id()), e.target()))
            .filter(move |_| !blocked)
    }
}

impl Default for RoadGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for RoadGraph {
    type Target = StableDiGraph<RoadNode, RoadEdge, u32>;

    fn deref(&self) -> &Self::Target {
        &self.graph
    }
}

impl DerefMut for RoadGraph {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_set_bit_test_matches_membership() {
        let set = ModeSet::of(Mode::Bus) | ModeSet::of(Mode::Rail);
        assert!(set.contains_mode(Mode::Bus));
        assert!(set.contains_mode(Mode::Rail));
        assert!(!set.contains_mode(Mode::Ferry));
    }

    #[test]
    fn edge_ids_survive_removal() {
        let mut g = RoadGraph::new();
        let a = g.add_node(RoadNode::new(Point::new(0.0, 0.0)));
        let b = g.add_node(RoadNode::new(Point::new(1.0, 0.0)));
        let c = g.add_node(RoadNode::new(Point::new(2.0, 0.0)));
        let e_ab = g.add_edge(
            a,
            b,
            RoadEdge {
                geometry: LineString::from(vec![(0.0, 0.0), (1.0, 0.0)]),
                length: 1.0,
                level: 0,
                one_way: OneWay::Bidir,
                restricted: false,
                reversed_shadow: false,
                line_set: vec![],
                modes: ModeSet::of(Mode::Bus),
                way_id: 1,
                penalty_factor: 1.0,
            },
        );
        let e_bc = g.add_edge(
            b,
            c,
            RoadEdge {
                geometry: LineString::from(vec![(1.0, 0.0), (2.0, 0.0)]),
                length: 1.0,
                level: 0,
                one_way: OneWay::Bidir,
                restricted: false,
                reversed_shadow: false,
                line_set: vec![],
                modes: ModeSet::of(Mode::Bus),
                way_id: 2,
                penalty_factor: 1.0,
            },
        );

        g.remove_node(a);

        // e_bc's id must still resolve after removing an unrelated node.
        assert!(g.edge(e_bc).is_some());
        assert!(g.edge(e_ab).is_none());
    }
}
