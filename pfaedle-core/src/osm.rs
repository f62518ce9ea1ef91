/*!
Types consumed from the map-extract reader. The byte-level parser
itself is out of scope; this module only defines the entity records it
hands to [`crate::builder`] and the `ReadOptions`/tag classifier
boundary the builder evaluates them against.

Dynamic tag maps: rather than re-evaluating a `String → String` tag map
against dozens of predicates on every access, implementers provide a
[`TagClassifier`] that precompiles tags into an [`EntityFlags`] bitfield
once, at ingest time.
*/

use std::sync::Arc;

use bitflags::bitflags;
use hashbrown::HashMap;

use crate::graph::{Mode, ModeSet};

pub type Tags = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OsmNodeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OsmWayId(pub u64);

#[derive(Debug, Clone)]
pub struct Node {
    pub id: OsmNodeId,
    pub lon: f64,
    pub lat: f64,
    pub tags: Tags,
}

#[derive(Debug, Clone)]
pub struct Way {
    pub id: OsmWayId,
    pub node_refs: Vec<OsmNodeId>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelMemberType {
    Node,
    Way,
    Rel,
}

#[derive(Debug, Clone)]
pub struct RelMember {
    pub member_type: RelMemberType,
    pub id: u64,
    pub role: String,
}

#[derive(Debug, Clone)]
pub struct Rel {
    pub id: u64,
    pub members: Vec<RelMember>,
    pub tags: Tags,
}

bitflags! {
    /// Precompiled per-entity predicate outcomes (Design Note "Dynamic tag
    /// maps"). Evaluated once per node/way/rel by [`TagClassifier`];
    /// every later "is this a station? is this a blocker?" check is then
    /// a bit test instead of a tag-map lookup.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct EntityFlags: u32 {
        const KEEP          = 1 << 0;
        const DROP          = 1 << 1;
        const NOHUP         = 1 << 2;
        const STATION       = 1 << 3;
        const ONE_WAY       = 1 << 4;
        const ONE_WAY_REVERSE = 1 << 5;
        const BLOCKER       = 1 << 6;
        const TURN_CYCLE    = 1 << 7;
        const RESTRICTION   = 1 << 8;
    }
}

/// A positive ("only this turn is allowed") or negative ("this turn is
/// forbidden") restriction relation, decided by the classifier from the
/// relation's tags (e.g. `restriction=only_*` vs `restriction=no_*`).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RestrictionPolarity {
    Positive,
    Negative,
}

/// Precompiles raw OSM tags into the bitfields and small classifications
/// the builder needs. Implementations are mode-specific (what counts as
/// "keep" for a bus network differs from a rail network) and are supplied
/// by the caller, not this crate.
pub trait TagClassifier: Send + Sync {
    fn classify_node(&self, tags: &Tags) -> EntityFlags;
    fn classify_way(&self, tags: &Tags) -> EntityFlags;
    fn classify_rel(&self, tags: &Tags) -> EntityFlags;

    /// Small integer road-class tag used for `collapseEdges` chain
    /// merging (only nodes/edges of identical level collapse together)
    /// and for cache-irrelevant diagnostics.
    fn edge_level(&self, tags: &Tags) -> u8;

    /// Station name(s)/platform/track extracted from a node's tags, when
    /// [`EntityFlags::STATION`] is set.
    fn station_info(&self, tags: &Tags) -> (Vec<String>, Option<String>, Option<String>);

    /// Polarity of a `restriction` relation; `None` if the relation's
    /// tags don't encode a turn restriction at all.
    fn restriction_polarity(&self, tags: &Tags) -> Option<RestrictionPolarity>;

    /// Transit line names statically known to run along a way (used to
    /// seed an edge's line-set for candidate line-match scoring).
    fn line_set(&self, tags: &Tags) -> Vec<String>;
}

/// Per-mode options the builder evaluates every entity against.
#[derive(Clone)]
pub struct ReadOptions {
    pub mode: Mode,
    pub modes: ModeSet,
    pub classifier: Arc<dyn TagClassifier>,
    /// Multiplier applied to an edge's traversal cost when its
    /// `line_set` is empty (`writeNoLinePens`); `1.0` disables the pass.
    pub no_line_punish_factor: f64,
}

impl ReadOptions {
    #[must_use]
    pub fn new(mode: Mode, classifier: Arc<dyn TagClassifier>, no_line_punish_factor: f64) -> Self {
        ReadOptions {
            mode,
            modes: ModeSet::of(mode),
            classifier,
            no_line_punish_factor,
        }
    }
}

/// The three independently-iterable entity streams the builder's
/// three-pass algorithm needs: this boundary assumes the reader can
/// deliver nodes, ways and relations as three streams, re-iterable or
/// collected up front.
pub trait EntitySource {
    type NodeIter: Iterator<Item = Node>;
    type WayIter: Iterator<Item = Way>;
    type RelIter: Iterator<Item = Rel>;

    fn nodes(&mut self) -> Self::NodeIter;
    fn ways(&mut self) -> Self::WayIter;
    fn rels(&mut self) -> Self::RelIter;
}

/// A trivial in-memory [`EntitySource`] over already-collected vectors;
/// useful for tests and for callers who buffer their own extract.
#[derive(Debug, Clone, Default)]
pub struct VecEntitySource {
    pub nodes: Vec<Node>,
    pub ways: Vec<Way>,
    pub rels: Vec<Rel>,
}

impl EntitySource for VecEntitySource {
    type NodeIter = std::vec::IntoIter<Node>;
    type WayIter = std::vec::IntoIter<Way>;
    type RelIter = std::vec::IntoIter<Rel>;

    fn nodes(&mut self) -> Self::NodeIter {
        std::mem::take(&mut self.nodes).into_iter()
    }

    fn ways(&mut self) -> Self::WayIter {
        std::mem::take(&mut self.ways).into_iter()
    }

    fn rels(&mut self) -> Self::RelIter {
        std::mem::take(&mut self.rels).into_iter()
    }
}
