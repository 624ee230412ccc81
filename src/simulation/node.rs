//! Per-node routing state.
//!
//! A node owns its distance-vector table and implements the two protocol
//! transitions:
//! - broadcast: bump the own sequence number by 2 and hand out a copy of the table
//! - merge: fold a neighbor's table into the own one
//!
//! The node knows nothing about other nodes' positions. Direct link
//! measurements needed by a merge are supplied by the network, which keeps
//! the merge itself infallible and therefore all-or-nothing.

use std::collections::HashMap;

use super::types::{NodeId, NodeSnapshot, Position, RouteEntry, RoutingTable};

/// Sequence number step per broadcast. Keeps own sequence numbers even.
pub const SEQUENCE_STEP: u64 = 2;

/// What a single merge changed in the receiver's table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Destinations learned for the first time.
    pub adopted: usize,
    /// Existing entries whose next hop and metric were replaced.
    pub replaced: usize,
    /// Existing entries whose sequence number alone was refreshed.
    pub refreshed: usize,
}

impl MergeOutcome {
    pub fn route_changes(&self) -> usize {
        self.adopted + self.replaced
    }

    pub fn is_empty(&self) -> bool {
        self.adopted == 0 && self.replaced == 0 && self.refreshed == 0
    }
}

enum Update {
    Adopt(RouteEntry),
    Replace(RouteEntry),
    Refresh(NodeId, u64),
}

#[derive(Debug, Clone)]
pub struct Node {
    node_id: NodeId,
    position: Position,
    transmit_power: f64,
    routing_table: RoutingTable,
}

impl Node {
    /// Create a node whose table holds only its self entry.
    pub fn new(node_id: NodeId, position: Position, transmit_power: f64) -> Self {
        let mut routing_table = RoutingTable::new();
        routing_table.insert(
            node_id,
            RouteEntry {
                destination: node_id,
                next_hop: node_id,
                metric: transmit_power,
                sequence_number: 0,
            },
        );
        Self {
            node_id,
            position,
            transmit_power,
            routing_table,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn transmit_power(&self) -> f64 {
        self.transmit_power
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    /// Current route to `destination`. Absence means "no route".
    pub fn route_to(&self, destination: NodeId) -> Option<&RouteEntry> {
        self.routing_table.get(&destination)
    }

    /// Own sequence number, as carried by the self entry.
    pub fn sequence_number(&self) -> u64 {
        self.routing_table.get(&self.node_id).map_or(0, |entry| entry.sequence_number)
    }

    /// Move the node. The own sequence number carries on from its current value.
    pub fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    /// First step of the broadcast transition. Returns the new own sequence number.
    pub fn advance_sequence(&mut self) -> u64 {
        let entry = self.routing_table.entry(self.node_id).or_insert(RouteEntry {
            destination: self.node_id,
            next_hop: self.node_id,
            metric: self.transmit_power,
            sequence_number: 0,
        });
        entry.sequence_number += SEQUENCE_STEP;
        entry.sequence_number
    }

    /// Install a route directly. The self entry cannot be overwritten this way.
    ///
    /// Returns `false` and leaves the table untouched for a self route.
    pub fn add_route(&mut self, entry: RouteEntry) -> bool {
        if entry.destination == self.node_id {
            return false;
        }
        self.routing_table.insert(entry.destination, entry);
        true
    }

    /// Merge the table received from `neighbor_id`.
    ///
    /// `direct_links` maps every destination currently in direct radio range
    /// of this node to the measured signal strength, and the sender to the
    /// strength it was heard with. Destinations missing from it are treated as
    /// reachable only through a relay.
    ///
    /// All updates are decided against the table as it was before the merge
    /// and then applied together.
    pub fn merge(&mut self, neighbor_id: NodeId, received: &RoutingTable, direct_links: &HashMap<NodeId, f64>) -> MergeOutcome {
        let mut updates = Vec::new();

        for (&destination, offered) in received {
            if destination == self.node_id {
                continue;
            }
            let current = self.routing_table.get(&destination);
            if let Some(current) = current {
                if offered.sequence_number < current.sequence_number {
                    continue;
                }
                if offered.sequence_number == current.sequence_number && offered.metric < current.metric {
                    continue;
                }
            }

            let update = match direct_links.get(&destination) {
                // First-hand measurement: the route is the direct link.
                Some(&measured) => Self::decide(
                    current,
                    RouteEntry {
                        destination,
                        next_hop: destination,
                        metric: measured,
                        sequence_number: offered.sequence_number,
                    },
                ),
                None => Self::decide(
                    current,
                    RouteEntry {
                        destination,
                        next_hop: neighbor_id,
                        metric: offered.metric,
                        sequence_number: offered.sequence_number,
                    },
                ),
            };
            if let Some(update) = update {
                updates.push(update);
            }
        }

        let outcome = self.apply(updates);
        if !outcome.is_empty() {
            log::debug!(
                "Node {} merged table from {}: {} adopted, {} replaced, {} refreshed",
                self.node_id,
                neighbor_id,
                outcome.adopted,
                outcome.replaced,
                outcome.refreshed
            );
            self.log_routing_table();
        }
        outcome
    }

    fn decide(current: Option<&RouteEntry>, candidate: RouteEntry) -> Option<Update> {
        let Some(current) = current else {
            return Some(Update::Adopt(candidate));
        };
        if candidate.metric > current.metric {
            Some(Update::Replace(candidate))
        } else if candidate.metric == current.metric && candidate.sequence_number > current.sequence_number {
            Some(Update::Refresh(candidate.destination, candidate.sequence_number))
        } else {
            None
        }
    }

    fn apply(&mut self, updates: Vec<Update>) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        for update in updates {
            match update {
                Update::Adopt(entry) => {
                    self.routing_table.insert(entry.destination, entry);
                    outcome.adopted += 1;
                }
                Update::Replace(entry) => {
                    self.routing_table.insert(entry.destination, entry);
                    outcome.replaced += 1;
                }
                Update::Refresh(destination, sequence_number) => {
                    if let Some(entry) = self.routing_table.get_mut(&destination) {
                        entry.sequence_number = sequence_number;
                        outcome.refreshed += 1;
                    }
                }
            }
        }
        outcome
    }

    pub fn snapshot(&self, radio_range: f64) -> NodeSnapshot {
        NodeSnapshot {
            node_id: self.node_id,
            position: self.position,
            transmit_power: self.transmit_power,
            radio_range,
            routing_table: self.routing_table.clone(),
        }
    }

    fn log_routing_table(&self) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        log::debug!("Routing table for node {}:", self.node_id);
        for entry in self.routing_table.values() {
            log::debug!(
                "  destination: {}, next hop: {}, signal strength: {:.4}, sequence number: {}",
                entry.destination,
                entry.next_hop,
                entry.metric,
                entry.sequence_number
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(destination: NodeId, next_hop: NodeId, metric: f64, sequence_number: u64) -> RouteEntry {
        RouteEntry {
            destination,
            next_hop,
            metric,
            sequence_number,
        }
    }

    fn table(entries: &[RouteEntry]) -> RoutingTable {
        entries.iter().map(|e| (e.destination, *e)).collect()
    }

    fn node(id: NodeId) -> Node {
        Node::new(id, Position::new(0, 0, 0), 200.0)
    }

    #[test]
    fn new_node_routes_to_itself() {
        let n = node(7);
        let own = n.route_to(7).unwrap();
        assert_eq!(own.next_hop, 7);
        assert_eq!(own.sequence_number, 0);
        assert_eq!(own.metric, 200.0);
        assert_eq!(n.routing_table().len(), 1);
    }

    #[test]
    fn broadcast_step_keeps_sequence_even() {
        let mut n = node(1);
        assert_eq!(n.advance_sequence(), 2);
        assert_eq!(n.advance_sequence(), 4);
        n.set_position(Position::new(3, 3, 3));
        assert_eq!(n.advance_sequence(), 6);
        assert_eq!(n.sequence_number() % 2, 0);
    }

    #[test]
    fn remote_table_never_overwrites_self_entry() {
        let mut n = node(1);
        let received = table(&[entry(1, 2, 999.0, 1000), entry(2, 2, 200.0, 2)]);
        let direct = HashMap::from([(1, 500.0), (2, 0.5)]);
        n.merge(2, &received, &direct);
        let own = n.route_to(1).unwrap();
        assert_eq!(own.next_hop, 1);
        assert_eq!(own.sequence_number, 0);
        assert!(!n.add_route(entry(1, 2, 1.0, 10)));
        assert_eq!(n.route_to(1).unwrap().next_hop, 1);
    }

    #[test]
    fn in_range_destination_is_adopted_with_measured_metric() {
        let mut n = node(0);
        let received = table(&[entry(1, 1, 200.0, 2)]);
        let outcome = n.merge(1, &received, &HashMap::from([(1, 0.16)]));
        assert_eq!(outcome.adopted, 1);
        let route = n.route_to(1).unwrap();
        assert_eq!(route.route(), (1, 0.16));
        assert_eq!(route.sequence_number, 2);
    }

    #[test]
    fn out_of_range_destination_uses_reported_metric_via_neighbor() {
        let mut n = node(0);
        let received = table(&[entry(1, 1, 200.0, 2), entry(2, 2, 0.16, 2)]);
        n.merge(1, &received, &HashMap::from([(1, 0.16)]));
        let relayed = n.route_to(2).unwrap();
        assert_eq!(relayed.route(), (1, 0.16));
        assert_eq!(relayed.sequence_number, 2);
    }

    #[test]
    fn stale_sequence_is_ignored() {
        let mut n = node(0);
        n.add_route(entry(5, 3, 0.2, 10));
        let received = table(&[entry(5, 5, 50.0, 8)]);
        let outcome = n.merge(4, &received, &HashMap::new());
        assert!(outcome.is_empty());
        assert_eq!(n.route_to(5).unwrap().sequence_number, 10);
        assert_eq!(n.route_to(5).unwrap().next_hop, 3);
    }

    #[test]
    fn equal_sequence_with_weaker_metric_is_ignored() {
        let mut n = node(0);
        n.add_route(entry(5, 3, 0.3, 10));
        let received = table(&[entry(5, 5, 0.2, 10)]);
        assert!(n.merge(4, &received, &HashMap::new()).is_empty());
        assert_eq!(n.route_to(5).unwrap().route(), (3, 0.3));
    }

    #[test]
    fn better_relayed_metric_replaces_route() {
        let mut n = node(0);
        n.add_route(entry(5, 3, 0.2, 10));
        let received = table(&[entry(5, 6, 0.4, 12)]);
        let outcome = n.merge(4, &received, &HashMap::new());
        assert_eq!(outcome.replaced, 1);
        let route = n.route_to(5).unwrap();
        assert_eq!(route.route(), (4, 0.4));
        assert_eq!(route.sequence_number, 12);
    }

    #[test]
    fn fresher_sequence_with_worse_metric_keeps_route() {
        let mut n = node(0);
        n.add_route(entry(5, 3, 0.4, 10));
        let received = table(&[entry(5, 6, 0.2, 14)]);
        assert!(n.merge(4, &received, &HashMap::new()).is_empty());
        assert_eq!(n.route_to(5).unwrap().route(), (3, 0.4));
        assert_eq!(n.route_to(5).unwrap().sequence_number, 10);
    }

    #[test]
    fn metric_tie_with_newer_sequence_refreshes_only_sequence() {
        let mut n = node(0);
        n.add_route(entry(5, 3, 0.25, 10));
        let relayed = table(&[entry(5, 9, 0.25, 12)]);
        let outcome = n.merge(4, &relayed, &HashMap::new());
        assert_eq!(outcome, MergeOutcome { adopted: 0, replaced: 0, refreshed: 1 });
        let route = n.route_to(5).unwrap();
        assert_eq!(route.route(), (3, 0.25));
        assert_eq!(route.sequence_number, 12);

        let direct = table(&[entry(5, 5, 200.0, 14)]);
        n.merge(5, &direct, &HashMap::from([(5, 0.25)]));
        let route = n.route_to(5).unwrap();
        assert_eq!(route.route(), (3, 0.25));
        assert_eq!(route.sequence_number, 14);
    }

    #[test]
    fn stronger_direct_link_beats_relayed_route() {
        let mut n = node(0);
        n.add_route(entry(5, 3, 0.2, 10));
        let received = table(&[entry(5, 5, 200.0, 10)]);
        n.merge(5, &received, &HashMap::from([(5, 0.9)]));
        let route = n.route_to(5).unwrap();
        assert_eq!(route.route(), (5, 0.9));
    }

    #[test]
    fn sequence_numbers_never_decrease_across_merges() {
        let mut n = node(0);
        let offers = [(2, 0.3), (6, 0.1), (4, 0.9), (6, 0.3), (8, 0.2), (8, 0.5)];
        let mut last = 0;
        for (sequence, metric) in offers {
            let received = table(&[entry(9, 9, metric, sequence)]);
            n.merge(3, &received, &HashMap::new());
            let stored = n.route_to(9).unwrap().sequence_number;
            assert!(stored >= last);
            last = stored;
        }
    }
}
