//! The routing table seam feeding seed candidates into lookups.

use std::fmt::Debug;
use std::time::Duration;

use crate::common::{Id, Node};

/// Supplies seed candidates and consumes liveness observations.
///
/// The engine never maintains buckets. It asks for the closest known
/// nodes when a lookup starts, and reports back how queried nodes
/// behaved so the table can age them out or refresh them.
pub trait RoutingTable: Send + Debug {
    /// Up to `count` known nodes, closest to `target` first.
    fn seed(&mut self, target: &Id, count: usize) -> Vec<Node>;

    /// A node replied to a request within its deadline.
    fn report_reachable(&mut self, node: &Node, rtt: Duration);

    /// A node missed its deadline or replied with something invalid.
    fn report_unreachable(&mut self, node: &Node);
}

#[derive(Debug, Default)]
/// A flat list of known nodes, for tests and embedders that bring no
/// bucketed table.
///
/// Nodes that reply get added, nodes that time out get dropped. No
/// other maintenance happens.
pub struct StaticRoutingTable {
    nodes: Vec<Node>,
}

impl StaticRoutingTable {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    // === Getters ===

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    // === Public Methods ===

    /// Add a node unless its id is already known.
    pub fn add(&mut self, node: Node) {
        if self.nodes.iter().all(|existing| existing.id != node.id) {
            self.nodes.push(node);
        }
    }
}

impl RoutingTable for StaticRoutingTable {
    fn seed(&mut self, target: &Id, count: usize) -> Vec<Node> {
        let mut nodes = self.nodes.clone();

        nodes.sort_by(|a, b| target.three_way_compare(&a.id, &b.id));
        nodes.truncate(count);

        nodes
    }

    fn report_reachable(&mut self, node: &Node, _rtt: Duration) {
        self.add(node.clone());
    }

    fn report_unreachable(&mut self, node: &Node) {
        self.nodes.retain(|existing| existing.id != node.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_returns_closest_first() {
        let target = Id::random();

        let mut table = StaticRoutingTable::default();
        for _ in 0..20 {
            table.add(Node::random());
        }

        let seeds = table.seed(&target, 8);

        assert_eq!(seeds.len(), 8);

        let mut expected = table.nodes().to_vec();
        expected.sort_by(|a, b| target.three_way_compare(&a.id, &b.id));
        expected.truncate(8);

        assert_eq!(seeds, expected);
    }

    #[test]
    fn liveness_reports_update_the_table() {
        let mut table = StaticRoutingTable::default();

        let node = Node::random();
        table.report_reachable(&node, Duration::from_millis(20));

        assert_eq!(table.nodes(), [node.clone()]);

        // Same id again is not duplicated.
        table.report_reachable(&node, Duration::from_millis(25));
        assert_eq!(table.nodes().len(), 1);

        table.report_unreachable(&node);
        assert!(table.nodes().is_empty());
    }
}
