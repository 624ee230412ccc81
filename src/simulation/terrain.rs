//! Terrain queries for line-of-sight and ground height.
//!
//! Contains:
//! - The `Terrain` trait the routing core depends on
//! - `HeightMap`, a row-major integer elevation grid implementing it
//! - Stamping helpers for rectangular plateaus and circular hills
//! - Random node placement above the ground
//!
//! Line of sight is sampled, not solved analytically: the segment between two
//! points is walked in `max(|Δx|, |Δy|, |Δz|)` steps and each sample is
//! compared against the ground below it.

use rand::Rng;
use std::fmt;

use super::types::Position;

/// Error type for terrain queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerrainError {
    /// The queried column lies outside the grid.
    OutOfRange { x: i32, y: i32 },
}

impl fmt::Display for TerrainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerrainError::OutOfRange { x, y } => write!(f, "Coordinates ({}, {}) out of range", x, y),
        }
    }
}

impl std::error::Error for TerrainError {}

/// Terrain oracle consumed by the network.
pub trait Terrain: Send {
    /// Grid extent along x.
    fn width(&self) -> i32;

    /// Grid extent along y.
    fn depth(&self) -> i32;

    /// Ground height of column `(x, y)`.
    fn height(&self, x: i32, y: i32) -> Result<i32, TerrainError>;

    /// First sampled point between `from` and `to` that lies below ground.
    ///
    /// Coordinates are interpolated linearly and truncated to the grid. The
    /// walk is inclusive of both endpoints; a degenerate segment samples its
    /// single point.
    ///
    /// # Returns
    ///
    /// `Ok(None)` for a clear line of sight, `Ok(Some(point))` for the first
    /// blocked sample, `Err(OutOfRange)` if a sample leaves the grid before
    /// any obstruction was found.
    fn first_obstruction(&self, from: &Position, to: &Position) -> Result<Option<Position>, TerrainError> {
        let (dx, dy, dz) = from.delta_to(to);
        let steps = dx.abs().max(dy.abs()).max(dz.abs());
        if steps == 0 {
            let blocked = self.height(from.x, from.y)? > from.z;
            return Ok(blocked.then_some(*from));
        }

        let step_x = dx as f64 / steps as f64;
        let step_y = dy as f64 / steps as f64;
        let step_z = dz as f64 / steps as f64;

        for i in 0..=steps {
            let t = i as f64;
            let sample = Position {
                x: (from.x as f64 + t * step_x) as i32,
                y: (from.y as f64 + t * step_y) as i32,
                z: (from.z as f64 + t * step_z) as i32,
            };
            if self.height(sample.x, sample.y)? > sample.z {
                return Ok(Some(sample));
            }
        }
        Ok(None)
    }

    /// True if terrain blocks the straight line between the two points.
    fn is_obstructed(&self, from: &Position, to: &Position) -> Result<bool, TerrainError> {
        Ok(self.first_obstruction(from, to)?.is_some())
    }

    /// True if `(x, y)` is a column of the grid.
    fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.width() && y < self.depth()
    }
}

/// Integer elevation grid, indexed `[y][x]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeightMap {
    width: i32,
    depth: i32,
    heights: Vec<i32>,
}

impl HeightMap {
    /// A grid of uniform height. Non-positive dimensions yield an empty grid.
    pub fn flat(width: i32, depth: i32, height: i32) -> Self {
        let width = width.max(0);
        let depth = depth.max(0);
        Self {
            width,
            depth,
            heights: vec![height; (width as usize) * (depth as usize)],
        }
    }

    /// Raise every column inside the inclusive rectangle to at least `height`.
    /// Corners may be given in any order; the part outside the grid is ignored.
    pub fn raise_rectangle(&mut self, corner_a: (i32, i32), corner_b: (i32, i32), height: i32) {
        let (left, right) = (corner_a.0.min(corner_b.0), corner_a.0.max(corner_b.0));
        let (top, bottom) = (corner_a.1.min(corner_b.1), corner_a.1.max(corner_b.1));
        for y in top.max(0)..=bottom.min(self.depth - 1) {
            for x in left.max(0)..=right.min(self.width - 1) {
                self.raise(x, y, height);
            }
        }
    }

    /// Raise every column within `radius` of `center` to at least `height`.
    pub fn raise_circle(&mut self, center: (i32, i32), radius: i32, height: i32) {
        let r2 = radius as i64 * radius as i64;
        for y in (center.1 - radius).max(0)..=(center.1 + radius).min(self.depth - 1) {
            for x in (center.0 - radius).max(0)..=(center.0 + radius).min(self.width - 1) {
                let dx = (x - center.0) as i64;
                let dy = (y - center.1) as i64;
                if dx * dx + dy * dy <= r2 {
                    self.raise(x, y, height);
                }
            }
        }
    }

    fn raise(&mut self, x: i32, y: i32, height: i32) {
        let idx = self.index(x, y);
        if self.heights[idx] < height {
            self.heights[idx] = height;
        }
    }

    fn index(&self, x: i32, y: i32) -> usize {
        y as usize * self.width as usize + x as usize
    }
}

impl Terrain for HeightMap {
    fn width(&self) -> i32 {
        self.width
    }

    fn depth(&self) -> i32 {
        self.depth
    }

    fn height(&self, x: i32, y: i32) -> Result<i32, TerrainError> {
        if !self.contains(x, y) {
            return Err(TerrainError::OutOfRange { x, y });
        }
        Ok(self.heights[self.index(x, y)])
    }
}

/// A random grid column with a position `altitude` above its ground.
pub fn random_position<R: Rng>(terrain: &dyn Terrain, altitude: i32, rng: &mut R) -> Result<Position, TerrainError> {
    let x = rng.gen_range(0..terrain.width().max(1));
    let y = rng.gen_range(0..terrain.depth().max(1));
    let ground = terrain.height(x, y)?;
    Ok(Position::new(x, y, ground + altitude))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: i32, y: i32, z: i32) -> Position {
        Position::new(x, y, z)
    }

    #[test]
    fn flat_terrain_never_obstructs_points_above_ground() {
        let terrain = HeightMap::flat(50, 50, 0);
        assert!(!terrain.is_obstructed(&p(0, 0, 1), &p(49, 49, 30)).unwrap());
        assert!(!terrain.is_obstructed(&p(10, 3, 5), &p(2, 40, 1)).unwrap());
        // Ground level itself is not below ground.
        assert!(!terrain.is_obstructed(&p(0, 0, 0), &p(20, 0, 0)).unwrap());
    }

    #[test]
    fn wall_taller_than_the_line_obstructs() {
        let mut terrain = HeightMap::flat(30, 10, 0);
        terrain.raise_rectangle((10, 0), (10, 9), 50);
        assert!(terrain.is_obstructed(&p(0, 5, 10), &p(20, 5, 10)).unwrap());
        // Passing above the wall is clear.
        assert!(!terrain.is_obstructed(&p(0, 5, 60), &p(20, 5, 60)).unwrap());
    }

    #[test]
    fn first_obstruction_reports_the_first_blocked_sample() {
        let mut terrain = HeightMap::flat(30, 10, 0);
        terrain.raise_rectangle((12, 0), (15, 9), 20);
        let hit = terrain.first_obstruction(&p(0, 2, 5), &p(29, 2, 5)).unwrap();
        assert_eq!(hit, Some(p(12, 2, 5)));
    }

    #[test]
    fn degenerate_segment_samples_its_point() {
        let mut terrain = HeightMap::flat(10, 10, 0);
        terrain.raise_circle((5, 5), 1, 8);
        assert!(terrain.is_obstructed(&p(5, 5, 3), &p(5, 5, 3)).unwrap());
        assert!(!terrain.is_obstructed(&p(5, 5, 9), &p(5, 5, 9)).unwrap());
    }

    #[test]
    fn height_outside_grid_is_out_of_range() {
        let terrain = HeightMap::flat(10, 5, 0);
        assert_eq!(terrain.height(10, 0), Err(TerrainError::OutOfRange { x: 10, y: 0 }));
        assert_eq!(terrain.height(-1, 2), Err(TerrainError::OutOfRange { x: -1, y: 2 }));
        assert!(terrain.is_obstructed(&p(0, 0, 1), &p(12, 0, 1)).is_err());
    }

    #[test]
    fn circle_stamp_is_round_and_keeps_taller_ground() {
        let mut terrain = HeightMap::flat(21, 21, 0);
        terrain.raise_rectangle((10, 10), (10, 10), 100);
        terrain.raise_circle((10, 10), 5, 30);
        assert_eq!(terrain.height(10, 10), Ok(100));
        assert_eq!(terrain.height(15, 10), Ok(30));
        assert_eq!(terrain.height(14, 14), Ok(0));
    }

    #[test]
    fn random_positions_stay_on_the_grid_above_ground() {
        use rand::SeedableRng;
        use rand::rngs::StdRng;

        let mut terrain = HeightMap::flat(8, 4, 1);
        terrain.raise_rectangle((0, 0), (3, 3), 20);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            let position = random_position(&terrain, 5, &mut rng).unwrap();
            assert!(terrain.contains(position.x, position.y));
            assert_eq!(position.z, terrain.height(position.x, position.y).unwrap() + 5);
        }

        let empty = HeightMap::flat(0, 0, 0);
        assert_eq!(random_position(&empty, 5, &mut rng), Err(TerrainError::OutOfRange { x: 0, y: 0 }));
    }
}
