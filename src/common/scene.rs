//! Scene loading, parsing, and validation logic.
//!
//! A scene describes the terrain grid and the initial node set. Terrain is
//! given declaratively: a flat base height with rectangular plateaus and
//! circular hills stamped on top.

use anyhow::Context;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;

use crate::simulation::terrain::random_position;
use crate::simulation::{HeightMap, Network, NodeId, ObstructionPolicy, Position, SignalModel};

/// Largest accepted grid dimension.
pub const MAX_GRID_DIMENSION: i32 = 10000;
/// Largest accepted number of grid cells, one `i32` height each.
pub const MAX_GRID_CELLS: i64 = 16_000_000;
/// Largest accepted node count, explicit and random nodes together.
pub const MAX_NODES: usize = 10000;

/// Error type for scene loading failures.
#[derive(Debug)]
pub enum SceneLoadError {
    FileReadError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for SceneLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SceneLoadError::FileReadError(msg) => write!(f, "Failed to read file: {}", msg),
            SceneLoadError::ParseError(msg) => write!(f, "Failed to parse JSON: {}", msg),
            SceneLoadError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for SceneLoadError {}

/// Grid column.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct GridPoint {
    pub x: i32,
    pub y: i32,
}

/// Terrain features represented as tagged enum.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum TerrainFeature {
    /// Axis-aligned block, both corners inclusive.
    #[serde(rename = "plateau")]
    Plateau {
        #[serde(rename = "top-left-position")]
        top_left: GridPoint,
        #[serde(rename = "bottom-right-position")]
        bottom_right: GridPoint,
        height: i32,
    },
    #[serde(rename = "hill")]
    Hill {
        #[serde(rename = "center_position")]
        center: GridPoint,
        radius: i32,
        height: i32,
    },
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TerrainConfig {
    pub width: i32,
    pub depth: i32,
    #[serde(default)]
    pub base_height: i32,
    #[serde(default)]
    pub features: Vec<TerrainFeature>,
}

/// Node structure with position and transmit power.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct NodeConfig {
    pub node_id: NodeId,
    pub position: Position,
    /// Falls back to the configured default transmit power.
    #[serde(default)]
    pub transmit_power: Option<f64>,
}

/// Extra nodes scattered over the grid after the explicit ones.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RandomPlacement {
    pub count: usize,
    /// Height above ground.
    #[serde(default)]
    pub altitude: i32,
    /// Fixes the placement for reproducible runs.
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Root structure representing the entire scene.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Scene {
    pub terrain: TerrainConfig,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub random_nodes: Option<RandomPlacement>,
}

/// Load and parse a scene from a file.
pub fn load_scene(path: &str) -> Result<Scene, SceneLoadError> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path))
        .map_err(|e| SceneLoadError::FileReadError(e.to_string()))?;
    parse_scene(&data)
}

/// Parse and validate a scene from JSON text.
pub fn parse_scene(data: &str) -> Result<Scene, SceneLoadError> {
    let scene: Scene = serde_json::from_str(data)
        .context("Invalid JSON format")
        .map_err(|e| SceneLoadError::ParseError(format!("{:#}", e)))?;
    validate_scene(&scene).map_err(SceneLoadError::ValidationError)?;
    Ok(scene)
}

/// Validate scene configuration.
///
/// # Returns
///
/// `Ok(())` if validation passes, `Err(String)` with error description otherwise.
pub fn validate_scene(scene: &Scene) -> Result<(), String> {
    let terrain = &scene.terrain;
    let valid_dimension = |d: i32| d > 0 && d <= MAX_GRID_DIMENSION;
    if !valid_dimension(terrain.width) || !valid_dimension(terrain.depth) {
        return Err(format!(
            "Terrain size {}x{} must be within 1-{} in both dimensions",
            terrain.width, terrain.depth, MAX_GRID_DIMENSION
        ));
    }
    let cells = terrain.width as i64 * terrain.depth as i64;
    if cells > MAX_GRID_CELLS {
        return Err(format!(
            "Terrain size {}x{} has {} cells, more than the maximum of {}",
            terrain.width, terrain.depth, cells, MAX_GRID_CELLS
        ));
    }
    let in_grid = |p: &GridPoint| p.x >= 0 && p.y >= 0 && p.x < terrain.width && p.y < terrain.depth;

    for (idx, feature) in terrain.features.iter().enumerate() {
        match feature {
            TerrainFeature::Plateau { top_left, bottom_right, .. } => {
                if !in_grid(top_left) || !in_grid(bottom_right) {
                    return Err(format!("Feature {} (plateau) has corners outside the terrain grid", idx));
                }
                if top_left.x > bottom_right.x || top_left.y > bottom_right.y {
                    return Err(format!(
                        "Feature {} (plateau) has invalid geometry: top-left ({}, {}) must not exceed bottom-right ({}, {})",
                        idx, top_left.x, top_left.y, bottom_right.x, bottom_right.y
                    ));
                }
            }
            TerrainFeature::Hill { center, radius, .. } => {
                if !in_grid(center) {
                    return Err(format!("Feature {} (hill) center ({}, {}) is outside the terrain grid", idx, center.x, center.y));
                }
                if *radius <= 0 {
                    return Err(format!("Feature {} (hill) has non-positive radius", idx));
                }
            }
        }
    }

    let random_count = scene.random_nodes.as_ref().map_or(0, |r| r.count);
    if scene.nodes.is_empty() && random_count == 0 {
        return Err("Scene must contain at least one node".to_string());
    }
    if scene.nodes.len() + random_count > MAX_NODES {
        return Err(format!("Node count {} exceeds maximum of {}", scene.nodes.len() + random_count, MAX_NODES));
    }

    let mut node_ids = HashSet::new();
    for node in &scene.nodes {
        if !node_ids.insert(node.node_id) {
            return Err(format!("Duplicate node_id found: {}", node.node_id));
        }
    }

    for node in &scene.nodes {
        let column = GridPoint {
            x: node.position.x,
            y: node.position.y,
        };
        if !in_grid(&column) {
            return Err(format!(
                "Node {} position ({}, {}) exceeds terrain bounds ({}x{})",
                node.node_id, node.position.x, node.position.y, terrain.width, terrain.depth
            ));
        }
        if let Some(power) = node.transmit_power {
            if !(power.is_finite() && power > 0.0) {
                return Err(format!("Node {} transmit_power {} must be positive", node.node_id, power));
            }
        }
    }

    Ok(())
}

impl From<&TerrainConfig> for HeightMap {
    fn from(config: &TerrainConfig) -> Self {
        let mut map = HeightMap::flat(config.width, config.depth, config.base_height);
        for feature in &config.features {
            match feature {
                TerrainFeature::Plateau {
                    top_left,
                    bottom_right,
                    height,
                } => map.raise_rectangle((top_left.x, top_left.y), (bottom_right.x, bottom_right.y), *height),
                TerrainFeature::Hill { center, radius, height } => map.raise_circle((center.x, center.y), *radius, *height),
            }
        }
        map
    }
}

/// Build the initial network of a scene.
///
/// Explicit nodes keep their ids; random nodes take the next unused ones.
pub fn build_network(
    scene: &Scene,
    signal_model: SignalModel,
    obstruction_policy: ObstructionPolicy,
    default_transmit_power: f64,
) -> anyhow::Result<Network> {
    let terrain = HeightMap::from(&scene.terrain);
    let mut network = Network::new(Box::new(terrain), signal_model, obstruction_policy);

    for node in &scene.nodes {
        network
            .add_node(node.node_id, node.position, node.transmit_power.unwrap_or(default_transmit_power))
            .with_context(|| format!("Failed to place node {}", node.node_id))?;
    }

    if let Some(random) = &scene.random_nodes {
        let mut rng = match random.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        for _ in 0..random.count {
            let position = random_position(network.terrain(), random.altitude, &mut rng)?;
            network.create_node(position, default_transmit_power)?;
        }
    }

    log::info!("Scene loaded with {} nodes", network.node_count());
    Ok(network)
}
