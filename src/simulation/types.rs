//! Type definitions for the routing simulation.
//!
//! Contains the data structures shared across the simulation:
//! - Node identity and 3-D grid positions
//! - Routing table entries and the table itself
//! - Read-only snapshots handed to the operator surface
//! - Message delivery results

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a radio node. Unique within a network, never reused.
pub type NodeId = u32;

/// Routing table keyed by destination. Ordered so dumps and snapshots are stable.
pub type RoutingTable = BTreeMap<NodeId, RouteEntry>;

/// Integer grid position. `x`/`y` index the terrain grid, `z` is altitude.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Position {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Component-wise offset `other - self`.
    pub fn delta_to(&self, other: &Position) -> (i32, i32, i32) {
        (other.x - self.x, other.y - self.y, other.z - self.z)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// One route in a node's distance-vector table.
///
/// `metric` is a signal strength: higher is better. For a direct link it was
/// measured by the table owner, for a relayed route it is the value the relay
/// reported.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteEntry {
    pub destination: NodeId,
    pub next_hop: NodeId,
    pub metric: f64,
    /// Freshness counter originated by `destination`. Even values announce liveness.
    pub sequence_number: u64,
}

impl RouteEntry {
    /// Next hop and metric, the part of an entry that describes the route itself.
    pub fn route(&self) -> (NodeId, f64) {
        (self.next_hop, self.metric)
    }
}

/// Read-only view of one node for the operator surface.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub node_id: NodeId,
    pub position: Position,
    pub transmit_power: f64,
    /// Free-space distance at which this node's signal drops below the threshold.
    pub radio_range: f64,
    pub routing_table: RoutingTable,
}

/// Successful hop-by-hop delivery of an application message.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Node ids actually traversed, sender first, receiver last.
    pub path: Vec<NodeId>,
    pub payload: String,
}

impl Delivery {
    pub fn hop_count(&self) -> usize {
        self.path.len().saturating_sub(1)
    }
}

/// Aggregate link figures over every ordered pair of nodes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkStats {
    pub node_count: usize,
    /// Ordered pairs (a, b), a != b, where b hears a above the threshold.
    pub connected_pairs: usize,
    /// `connected_pairs` over all ordered pairs; 0 for fewer than two nodes.
    pub connectivity: f64,
    /// Mean signal strength over connected pairs; 0 when there are none.
    pub average_signal_strength: f64,
}

/// Counts produced by one broadcast round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub broadcasts: usize,
    /// Tables delivered to in-range neighbors.
    pub deliveries: usize,
    /// Entries whose route (next hop or metric) was created or changed.
    pub route_changes: usize,
    /// Entries whose sequence number alone was refreshed.
    pub refreshes: usize,
}

impl RoundReport {
    pub fn absorb(&mut self, other: RoundReport) {
        self.broadcasts += other.broadcasts;
        self.deliveries += other.deliveries;
        self.route_changes += other.route_changes;
        self.refreshes += other.refreshes;
    }
}
