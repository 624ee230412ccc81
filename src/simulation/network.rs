//! Network of radio nodes: neighbor discovery, table exchange and message routing.
//!
//! The network owns every node by id. Neighbor relations are never stored;
//! they are recomputed from live positions, the signal model and the terrain
//! whenever a node broadcasts.
//!
//! High-level flow of one broadcast:
//! 1) Find the in-range neighbors of the broadcaster.
//! 2) For each neighbor, measure the direct links it has to every destination
//!    in the broadcaster's table. The broadcaster itself always counts as a
//!    direct link, at the strength the neighbor heard it with.
//! 3) Only then bump the broadcaster's sequence number and deliver a copy of
//!    its table to every neighbor, which merges it.
//!
//! Steps 1 and 2 are the only fallible ones, so a terrain error aborts a
//! broadcast before anything was changed.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::node::Node;
use super::signal_calculations::SignalModel;
use super::terrain::{Terrain, TerrainError};
use super::types::{Delivery, NetworkStats, NodeId, NodeSnapshot, Position, RoundReport, RoutingTable};

/// How an obstruction test that leaves the terrain grid is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObstructionPolicy {
    /// Surface `TerrainError::OutOfRange` to the caller.
    #[default]
    Strict,
    /// Treat the link as unobstructed and log a warning.
    AssumeVisible,
}

/// Error type for network operations. None of these is fatal to the simulation.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkError {
    InvalidNodeId(NodeId),
    DuplicateNodeId(NodeId),
    InvalidTransmitPower(f64),
    /// `at` has no entry for `to` while forwarding a message from `from`.
    NoRoute { from: NodeId, to: NodeId, at: NodeId },
    /// Forwarding from `from` to `to` exceeded the hop bound.
    RouteLoop { from: NodeId, to: NodeId, hops: usize },
    Terrain(TerrainError),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::InvalidNodeId(id) => write!(f, "No node with id {}", id),
            NetworkError::DuplicateNodeId(id) => write!(f, "Node id {} is already in use", id),
            NetworkError::InvalidTransmitPower(power) => write!(f, "Transmit power {} must be positive and finite", power),
            NetworkError::NoRoute { from, to, at } => write!(f, "No route from {} to {} (node {} has no entry)", from, to, at),
            NetworkError::RouteLoop { from, to, hops } => write!(f, "Routing loop from {} to {} after {} hops", from, to, hops),
            NetworkError::Terrain(err) => write!(f, "Terrain error: {}", err),
        }
    }
}

impl std::error::Error for NetworkError {}

impl From<TerrainError> for NetworkError {
    fn from(err: TerrainError) -> Self {
        NetworkError::Terrain(err)
    }
}

pub struct Network {
    nodes: BTreeMap<NodeId, Node>,
    terrain: Box<dyn Terrain>,
    signal_model: SignalModel,
    obstruction_policy: ObstructionPolicy,
}

impl Network {
    pub fn new(terrain: Box<dyn Terrain>, signal_model: SignalModel, obstruction_policy: ObstructionPolicy) -> Self {
        Self {
            nodes: BTreeMap::new(),
            terrain,
            signal_model,
            obstruction_policy,
        }
    }

    pub fn terrain(&self) -> &dyn Terrain {
        self.terrain.as_ref()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn node(&self, node_id: NodeId) -> Result<&Node, NetworkError> {
        self.nodes.get(&node_id).ok_or(NetworkError::InvalidNodeId(node_id))
    }

    fn node_mut(&mut self, node_id: NodeId) -> Result<&mut Node, NetworkError> {
        self.nodes.get_mut(&node_id).ok_or(NetworkError::InvalidNodeId(node_id))
    }

    /// Add a node under a caller-chosen id.
    pub fn add_node(&mut self, node_id: NodeId, position: Position, transmit_power: f64) -> Result<(), NetworkError> {
        if self.nodes.contains_key(&node_id) {
            return Err(NetworkError::DuplicateNodeId(node_id));
        }
        if !(transmit_power.is_finite() && transmit_power > 0.0) {
            return Err(NetworkError::InvalidTransmitPower(transmit_power));
        }
        self.check_position(node_id, &position)?;

        self.nodes.insert(node_id, Node::new(node_id, position, transmit_power));
        log::info!("Node {} added at {} with transmit power {}", node_id, position, transmit_power);
        Ok(())
    }

    /// Add a node under the next unused id and return that id.
    pub fn create_node(&mut self, position: Position, transmit_power: f64) -> Result<NodeId, NetworkError> {
        let node_id = self.next_node_id();
        self.add_node(node_id, position, transmit_power)?;
        Ok(node_id)
    }

    pub fn next_node_id(&self) -> NodeId {
        self.nodes.keys().next_back().map_or(0, |last| last + 1)
    }

    /// Move a node. Routes converge on later broadcast rounds.
    pub fn relocate(&mut self, node_id: NodeId, position: Position) -> Result<(), NetworkError> {
        self.node(node_id)?;
        self.check_position(node_id, &position)?;
        let node = self.node_mut(node_id)?;
        let previous = node.position();
        node.set_position(position);
        log::info!("Node {} moved from {} to {}", node_id, previous, position);
        Ok(())
    }

    fn check_position(&self, node_id: NodeId, position: &Position) -> Result<(), NetworkError> {
        let ground = self.terrain.height(position.x, position.y)?;
        if ground > position.z {
            log::warn!("Node {} at {} is below ground level {}", node_id, position, ground);
        }
        Ok(())
    }

    /// Signal strength received at `to` from a transmitter of `power` at `from`.
    fn link_strength(&self, power: f64, from: &Position, to: &Position) -> Result<f64, NetworkError> {
        let obstructed = match self.terrain.is_obstructed(from, to) {
            Ok(obstructed) => obstructed,
            Err(err) if self.obstruction_policy == ObstructionPolicy::AssumeVisible => {
                log::warn!("Obstruction between {} and {} unknown ({}), assuming visible", from, to, err);
                false
            }
            Err(err) => return Err(err.into()),
        };
        let (dx, dy, dz) = from.delta_to(to);
        Ok(self.signal_model.signal_strength(power, dx, dy, dz, obstructed))
    }

    /// Direct signal strength from one node to another, or `NO_SIGNAL`.
    pub fn direct_signal(&self, from: NodeId, to: NodeId) -> Result<f64, NetworkError> {
        let source = self.node(from)?;
        let target = self.node(to)?;
        self.link_strength(source.transmit_power(), &source.position(), &target.position())
    }

    /// Every other node that currently hears `node_id` above the cutoff, ascending.
    pub fn compute_neighbors(&self, node_id: NodeId) -> Result<Vec<NodeId>, NetworkError> {
        Ok(self.heard_by(node_id)?.into_iter().map(|(neighbor, _)| neighbor).collect())
    }

    /// Neighbors of `node_id` with the strength each of them receives.
    fn heard_by(&self, node_id: NodeId) -> Result<Vec<(NodeId, f64)>, NetworkError> {
        let source = self.node(node_id)?;
        let mut neighbors = Vec::new();
        for other in self.nodes.values() {
            if other.node_id() == node_id {
                continue;
            }
            let strength = self.link_strength(source.transmit_power(), &source.position(), &other.position())?;
            if self.signal_model.in_range(strength) {
                neighbors.push((other.node_id(), strength));
            }
        }
        Ok(neighbors)
    }

    /// Destinations of `table` that `receiver` can reach directly, with the measured strength.
    fn direct_links(&self, receiver: &Node, table: &RoutingTable) -> Result<HashMap<NodeId, f64>, NetworkError> {
        let mut links = HashMap::new();
        for &destination in table.keys() {
            if destination == receiver.node_id() {
                continue;
            }
            let Some(target) = self.nodes.get(&destination) else {
                continue;
            };
            let strength = self.link_strength(receiver.transmit_power(), &receiver.position(), &target.position())?;
            if self.signal_model.in_range(strength) {
                links.insert(destination, strength);
            }
        }
        Ok(links)
    }

    /// Run the broadcast transition of one node.
    pub fn broadcast_from(&mut self, node_id: NodeId) -> Result<RoundReport, NetworkError> {
        let heard = self.heard_by(node_id)?;
        let table = self.node(node_id)?.routing_table().clone();

        let mut deliveries = Vec::with_capacity(heard.len());
        let mut neighbors = Vec::with_capacity(heard.len());
        for &(neighbor_id, strength) in &heard {
            let receiver = self.node(neighbor_id)?;
            let mut links = self.direct_links(receiver, &table)?;
            // The broadcaster was just heard, even when the receiver's own
            // power cannot reach back.
            links.entry(node_id).or_insert(strength);
            deliveries.push((neighbor_id, links));
            neighbors.push(neighbor_id);
        }

        let sequence_number = self.node_mut(node_id)?.advance_sequence();
        let table = self.node(node_id)?.routing_table().clone();
        log::debug!("Node {} broadcasting sequence {} to {:?}", node_id, sequence_number, neighbors);

        let mut report = RoundReport {
            broadcasts: 1,
            ..RoundReport::default()
        };
        for (neighbor_id, direct_links) in deliveries {
            let outcome = self.node_mut(neighbor_id)?.merge(node_id, &table, &direct_links);
            report.deliveries += 1;
            report.route_changes += outcome.route_changes();
            report.refreshes += outcome.refreshed;
        }
        Ok(report)
    }

    /// Let every node broadcast once, in ascending id order.
    ///
    /// Stops at the first failing broadcast; broadcasts before it stay applied.
    pub fn broadcast_round(&mut self) -> Result<RoundReport, NetworkError> {
        let mut report = RoundReport::default();
        for node_id in self.node_ids() {
            report.absorb(self.broadcast_from(node_id)?);
        }
        log::info!(
            "Broadcast round: {} broadcasts, {} deliveries, {} route changes, {} refreshes",
            report.broadcasts,
            report.deliveries,
            report.route_changes,
            report.refreshes
        );
        Ok(report)
    }

    /// Forward `payload` hop by hop along the routing tables.
    ///
    /// Delivery ends at the node whose entry for `receiver` points at itself.
    /// More than `node_count` hops can only mean a loop.
    pub fn send_message(&self, sender: NodeId, receiver: NodeId, payload: &str) -> Result<Delivery, NetworkError> {
        self.node(sender)?;
        self.node(receiver)?;

        let max_hops = self.nodes.len();
        let mut path = vec![sender];
        let mut current = sender;
        loop {
            let entry = self
                .nodes
                .get(&current)
                .and_then(|node| node.route_to(receiver))
                .ok_or(NetworkError::NoRoute {
                    from: sender,
                    to: receiver,
                    at: current,
                });
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    log::warn!("{}", err);
                    return Err(err);
                }
            };

            if entry.next_hop == current {
                log::info!("Message from {} delivered to {} via {:?}: {}", sender, receiver, path, payload);
                return Ok(Delivery {
                    path,
                    payload: payload.to_string(),
                });
            }

            if path.len() > max_hops {
                let err = NetworkError::RouteLoop {
                    from: sender,
                    to: receiver,
                    hops: path.len() - 1,
                };
                log::error!("{} (path so far {:?})", err, path);
                return Err(err);
            }

            current = entry.next_hop;
            path.push(current);
        }
    }

    /// First terrain point blocking the line between two nodes, if any.
    pub fn line_of_sight(&self, a: NodeId, b: NodeId) -> Result<Option<Position>, NetworkError> {
        let from = self.node(a)?.position();
        let to = self.node(b)?.position();
        Ok(self.terrain.first_obstruction(&from, &to)?)
    }

    pub fn node_snapshot(&self, node_id: NodeId) -> Result<NodeSnapshot, NetworkError> {
        let node = self.node(node_id)?;
        Ok(node.snapshot(self.signal_model.radio_range(node.transmit_power())))
    }

    pub fn snapshot(&self) -> Vec<NodeSnapshot> {
        self.nodes
            .values()
            .map(|node| node.snapshot(self.signal_model.radio_range(node.transmit_power())))
            .collect()
    }

    /// Connectivity and mean link strength over all ordered node pairs.
    pub fn statistics(&self) -> Result<NetworkStats, NetworkError> {
        let node_count = self.nodes.len();
        let mut connected_pairs = 0;
        let mut strength_sum = 0.0;
        for source in self.nodes.values() {
            for target in self.nodes.values() {
                if source.node_id() == target.node_id() {
                    continue;
                }
                let strength = self.link_strength(source.transmit_power(), &source.position(), &target.position())?;
                if self.signal_model.in_range(strength) {
                    connected_pairs += 1;
                    strength_sum += strength;
                }
            }
        }

        let total_pairs = node_count * node_count.saturating_sub(1);
        Ok(NetworkStats {
            node_count,
            connected_pairs,
            connectivity: if total_pairs > 0 { connected_pairs as f64 / total_pairs as f64 } else { 0.0 },
            average_signal_strength: if connected_pairs > 0 { strength_sum / connected_pairs as f64 } else { 0.0 },
        })
    }

    #[cfg(test)]
    pub(crate) fn node_for_test(&mut self, node_id: NodeId) -> &mut Node {
        self.nodes.get_mut(&node_id).expect("node exists")
    }
}
