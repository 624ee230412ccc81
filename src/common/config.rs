//! Simulator configuration loaded from TOML.

use anyhow::{Context, anyhow, bail};
use log::LevelFilter;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::simulation::signal_calculations::DEFAULT_MIN_SIGNAL_STRENGTH;
use crate::simulation::{ObstructionPolicy, SignalModel};

/// Allowed range for the broadcast interval, in seconds.
pub const BROADCAST_INTERVAL_RANGE: std::ops::RangeInclusive<u64> = 5..=15;

/// Runtime settings of the simulator. Every key is optional.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct SimulatorConfig {
    /// Seconds between periodic broadcast rounds.
    pub broadcast_interval_secs: u64,
    /// Size of the worker pool. Both long-running loops need their own thread.
    pub worker_threads: usize,
    /// Radio-range cutoff of the signal model.
    pub min_signal_strength: f64,
    /// Transmit power for nodes that do not specify one.
    pub default_transmit_power: f64,
    /// Height above ground for randomly placed nodes.
    pub random_altitude: i32,
    /// Treat obstruction tests leaving the terrain grid as a clear line of sight.
    pub assume_visible_out_of_range: bool,
    /// Global log level (`error`, `warn`, `info`, `debug`, `trace`, `off`).
    pub log_level: String,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            broadcast_interval_secs: 10,
            worker_threads: 2,
            min_signal_strength: DEFAULT_MIN_SIGNAL_STRENGTH,
            default_transmit_power: 200.0,
            random_altitude: 10,
            assume_visible_out_of_range: false,
            log_level: "info".to_string(),
        }
    }
}

impl SimulatorConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(config_path).with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file: {}", config_path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: SimulatorConfig = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Use `config_path` when given, else `config.toml` beside the scene if it
    /// exists, else the defaults.
    pub fn resolve(config_path: Option<&Path>, scene_path: &Path) -> anyhow::Result<Self> {
        if let Some(path) = config_path {
            return Self::load(path);
        }
        let beside_scene = Self::config_path_from_scene(scene_path);
        if beside_scene.is_file() {
            return Self::load(&beside_scene);
        }
        Ok(Self::default())
    }

    /// Replaces the scene filename with "config.toml" in the same directory.
    pub fn config_path_from_scene(scene_path: &Path) -> PathBuf {
        scene_path.parent().unwrap_or(Path::new(".")).join("config.toml")
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !BROADCAST_INTERVAL_RANGE.contains(&self.broadcast_interval_secs) {
            bail!(
                "broadcast-interval-secs {} must be within {}-{}",
                self.broadcast_interval_secs,
                BROADCAST_INTERVAL_RANGE.start(),
                BROADCAST_INTERVAL_RANGE.end()
            );
        }
        if self.worker_threads < 2 {
            bail!("worker-threads {} must be at least 2", self.worker_threads);
        }
        if !(self.min_signal_strength.is_finite() && self.min_signal_strength > 0.0) {
            bail!("min-signal-strength {} must be positive", self.min_signal_strength);
        }
        if !(self.default_transmit_power.is_finite() && self.default_transmit_power > 0.0) {
            bail!("default-transmit-power {} must be positive", self.default_transmit_power);
        }
        self.level_filter()?;
        Ok(())
    }

    pub fn level_filter(&self) -> anyhow::Result<LevelFilter> {
        self.log_level
            .parse::<LevelFilter>()
            .map_err(|_| anyhow!("Unknown log-level '{}'", self.log_level))
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.broadcast_interval_secs)
    }

    pub fn signal_model(&self) -> SignalModel {
        SignalModel::new(self.min_signal_strength)
    }

    pub fn obstruction_policy(&self) -> ObstructionPolicy {
        if self.assume_visible_out_of_range {
            ObstructionPolicy::AssumeVisible
        } else {
            ObstructionPolicy::Strict
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = SimulatorConfig::parse("").unwrap();
        assert_eq!(config, SimulatorConfig::default());
        assert_eq!(config.broadcast_interval(), Duration::from_secs(10));
        assert_eq!(config.obstruction_policy(), ObstructionPolicy::Strict);
        assert_eq!(config.level_filter().unwrap(), LevelFilter::Info);
    }

    #[test]
    fn kebab_case_keys_override_defaults() {
        let config = SimulatorConfig::parse(
            r#"
            broadcast-interval-secs = 5
            worker-threads = 3
            min-signal-strength = 0.05
            assume-visible-out-of-range = true
            log-level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.broadcast_interval_secs, 5);
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.signal_model().min_signal_strength(), 0.05);
        assert_eq!(config.obstruction_policy(), ObstructionPolicy::AssumeVisible);
        assert_eq!(config.default_transmit_power, 200.0);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(SimulatorConfig::parse("broadcast-interval-secs = 2").is_err());
        assert!(SimulatorConfig::parse("broadcast-interval-secs = 16").is_err());
        assert!(SimulatorConfig::parse("worker-threads = 1").is_err());
        assert!(SimulatorConfig::parse("min-signal-strength = 0.0").is_err());
        assert!(SimulatorConfig::parse("log-level = \"loud\"").is_err());
        assert!(SimulatorConfig::parse("unknown-key = 1").is_err());
    }

    #[test]
    fn config_path_sits_beside_scene() {
        let path = SimulatorConfig::config_path_from_scene(Path::new("scenes/valley.json"));
        assert_eq!(path, Path::new("scenes/config.toml"));
    }
}
