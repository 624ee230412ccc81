//! Mesh routing simulation core.
//!
//! Nodes sit on a terrain grid and exchange distance-vector routing tables
//! with every node their radio reaches. The module provides:
//! - `terrain`: elevation grid and line-of-sight sampling
//! - `signal_calculations`: deterministic signal strength and radio range
//! - `node`: per-node routing table and the merge rule
//! - `network`: neighbor discovery, broadcasts, and hop-by-hop delivery
//! - `scheduler`: worker pool, stop flag, and the periodic broadcast loop

pub mod network;
pub mod node;
pub mod scheduler;
pub mod signal_calculations;
pub mod terrain;
pub mod types;

pub use network::{Network, NetworkError, ObstructionPolicy};
pub use signal_calculations::SignalModel;
pub use terrain::{HeightMap, Terrain};
pub use types::{NodeId, NodeSnapshot, Position};
