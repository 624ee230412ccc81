use anyhow::{Context, bail};
use env_logger::Builder;
use log::info;
use std::io::{self, BufReader};
use std::path::Path;

use crate::common::config::SimulatorConfig;
use crate::common::scene;

mod common;
mod control;
mod simulation;

const USAGE: &str = "usage: meshroute-simulator <scene.json> [config.toml]";

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (scene_path, config_path) = match args.as_slice() {
        [scene] => (scene.as_str(), None),
        [scene, config] => (scene.as_str(), Some(Path::new(config.as_str()))),
        _ => bail!(USAGE),
    };

    let config = SimulatorConfig::resolve(config_path, Path::new(scene_path))?;
    let level = config.level_filter()?;

    // Logging setup; RUST_LOG overrides the configured level.
    Builder::new()
        .filter_level(level)
        .filter(Some("meshroute_simulator"), level)
        .parse_default_env()
        .init();

    info!("Starting up");

    let scene = scene::load_scene(scene_path).with_context(|| format!("Failed to load scene {}", scene_path))?;
    let network = scene::build_network(&scene, config.signal_model(), config.obstruction_policy(), config.default_transmit_power)?;

    println!("{} nodes loaded, type 'help' for commands", network.node_count());
    let network = control::run_session(network, &config, BufReader::new(io::stdin()), io::stdout())?;

    info!("Shut down with {} nodes", network.node_count());
    Ok(())
}
