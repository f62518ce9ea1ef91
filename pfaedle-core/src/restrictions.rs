/*!
Turn restrictions, keyed by via-node.

The router's search state is `(node, via-edge)`, so that expanding from
a state can filter out successors forbidden at that node —
restrictions are resolved in terms of the *originating way* of the
incoming edge and the *originating way* of the candidate outgoing edge
([`crate::graph::RoadEdge::way_id`]), not in terms of edge identity
directly, since a single way can be cut into several edges during
`collapseEdges`.
*/

use hashbrown::HashMap;

use crate::graph::NodeId;

/// The restrictions filed at a single via-node: a positive list (only
/// these from→to way transitions are allowed) and a negative list (these
/// from→to way transitions are forbidden). If a positive restriction
/// exists for a given `(via, fromWay)` pair, every transition away from
/// that `fromWay` *other* than the listed ones is implicitly forbidden.
#[derive(Debug, Clone, Default)]
pub struct NodeRestrictions {
    positive: Vec<(u64, u64)>,
    negative: Vec<(u64, u64)>,
}

impl NodeRestrictions {
    fn allows(&self, from_way: u64, to_way: u64) -> bool {
        let has_positive_for_from = self.positive.iter().any(|&(f, _)| f == from_way);
        if has_positive_for_from {
            return self
                .positive
                .iter()
                .any(|&(f, t)| f == from_way && t == to_way);
        }
        !self
            .negative
            .iter()
            .any(|&(f, t)| f == from_way && t == to_way)
    }
}

/// All restrictions in a graph, indexed by via-node.
#[derive(Debug, Clone, Default)]
pub struct Restrictions {
    by_node: HashMap<NodeId, NodeRestrictions>,
}

impl Restrictions {
    pub fn add_positive(&mut self, via: NodeId, from_way: u64, to_way: u64) {
        self.by_node
            .entry(via)
            .or_default()
            .positive
            .push((from_way, to_way));
    }

    pub fn add_negative(&mut self, via: NodeId, from_way: u64, to_way: u64) {
        self.by_node
            .entry(via)
            .or_default()
            .negative
            .push((from_way, to_way));
    }

    /// Whether traversal may continue from `from_way` to `to_way` through
    /// `via`. Nodes with no filed restrictions allow every transition.
    #[must_use]
    pub fn is_turn_allowed(&self, via: NodeId, from_way: u64, to_way: u64) -> bool {
        self.by_node
            .get(&via)
            .is_none_or(|r| r.allows(from_way, to_way))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use petgraph::stable_graph::NodeIndex;

    #[test]
    fn negative_restriction_forbids_only_named_turn() {
        let mut r = Restrictions::default();
        let via: NodeId = NodeIndex::new(0);
        r.add_negative(via, 1, 2);

        assert!(!r.is_turn_allowed(via, 1, 2));
        assert!(r.is_turn_allowed(via, 1, 3));
        assert!(r.is_turn_allowed(via, 4, 2));
    }

    #[test]
    fn positive_restriction_forbids_every_other_turn_from_same_way() {
        let mut r = Restrictions::default();
        let via: NodeId = NodeIndex::new(0);
        r.add_positive(via, 1, 2);

        assert!(r.is_turn_allowed(via, 1, 2));
        assert!(!r.is_turn_allowed(via, 1, 3));
        // unrelated from-way is unaffected
        assert!(r.is_turn_allowed(via, 5, 9));
    }
}
