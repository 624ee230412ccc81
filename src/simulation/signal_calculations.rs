//! Radio signal strength calculations.
//!
//! Contains helpers for:
//! - Inverse-square attenuation between two grid positions
//! - Terrain obstruction folded into the received strength
//! - The radio-range cutoff and the distance it corresponds to
//!
//! Units:
//! - Power: abstract linear units (the value received at distance zero)
//! - Distance: grid cells, computed from integer deltas

use std::f64::consts::PI;

/// Sentinel reported when no usable signal reaches the receiver.
pub const NO_SIGNAL: f64 = -1.0;

/// The `k` in `P / (k·π·d²)`. Isotropic spreading over a sphere.
pub const ATTENUATION_CONSTANT: f64 = 4.0;

/// Default radio-range cutoff.
pub const DEFAULT_MIN_SIGNAL_STRENGTH: f64 = 0.1;

/// Parameters of the propagation model.
///
/// Holds the radio-range cutoff so every caller in a network agrees on what
/// "in range" means.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalModel {
    min_signal_strength: f64,
}

impl Default for SignalModel {
    fn default() -> Self {
        Self {
            min_signal_strength: DEFAULT_MIN_SIGNAL_STRENGTH,
        }
    }
}

impl SignalModel {
    /// `min_signal_strength` must be positive; config validation enforces this.
    pub fn new(min_signal_strength: f64) -> Self {
        Self { min_signal_strength }
    }

    pub fn min_signal_strength(&self) -> f64 {
        self.min_signal_strength
    }

    /// Calculate the signal strength received at offset `(dx, dy, dz)` from a
    /// transmitter of `source_power`.
    ///
    /// # Formula
    ///
    /// ```text
    /// S(d) = P / (k × π × d²),  k = ATTENUATION_CONSTANT
    /// ```
    ///
    /// # Returns
    ///
    /// - `NO_SIGNAL` if `obstructed`, whatever the distance
    /// - `source_power` for co-located points
    /// - `NO_SIGNAL` if the attenuated value falls below the cutoff
    /// - otherwise the attenuated value, never above `source_power`
    pub fn signal_strength(&self, source_power: f64, dx: i32, dy: i32, dz: i32, obstructed: bool) -> f64 {
        if obstructed {
            return NO_SIGNAL;
        }
        let distance_squared = squared_distance(dx, dy, dz);
        if distance_squared == 0.0 {
            return source_power;
        }

        let strength = source_power / (ATTENUATION_CONSTANT * PI * distance_squared);
        log::trace!("signal {:.4} at offset ({}, {}, {}) from power {}", strength, dx, dy, dz, source_power);

        if strength < self.min_signal_strength {
            return NO_SIGNAL;
        }
        strength.min(source_power)
    }

    /// True if `strength` clears the radio-range cutoff.
    pub fn in_range(&self, strength: f64) -> bool {
        strength >= self.min_signal_strength
    }

    // Solve P / (k·π·d²) = min for d.
    /// Free-space distance at which a transmitter of `source_power` drops to
    /// the cutoff. Terrain can only shorten this.
    pub fn radio_range(&self, source_power: f64) -> f64 {
        if source_power <= 0.0 {
            return 0.0;
        }
        (source_power / (ATTENUATION_CONSTANT * PI * self.min_signal_strength)).sqrt()
    }
}

fn squared_distance(dx: i32, dy: i32, dz: i32) -> f64 {
    let (dx, dy, dz) = (dx as f64, dy as f64, dz as f64);
    dx * dx + dy * dy + dz * dz
}
