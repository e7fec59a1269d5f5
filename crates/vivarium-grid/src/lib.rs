//! Grid occupancy index enforcing at-most-one-entity-per-cell exclusivity.

use std::collections::HashMap;
use std::hash::Hash;
use thiserror::Error;

/// Errors emitted by the occupancy grid.
#[derive(Debug, Error)]
pub enum GridError {
    /// Indicates configuration values that cannot be used (e.g., zero-sized dimensions).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// The 8 neighbor cell offsets in fixed search order: N, S, E, W, NE, NW, SE, SW.
///
/// Pending births probe neighbors in exactly this order, so the first freed
/// cell is always the one a retried spawn lands in.
pub const NEIGHBOR_OFFSETS: [(i64, i64); 8] = [
    (0, -1),
    (0, 1),
    (1, 0),
    (-1, 0),
    (1, -1),
    (-1, -1),
    (1, 1),
    (-1, 1),
];

/// Fixed-size grid mapping each occupied cell to the id of the entity there.
///
/// The grid has no concept of terrain; it is purely an exclusivity constraint.
/// At most one id per cell is structural (the cell is the map key), and callers
/// keep the reverse direction coherent by routing every position change through
/// [`OccupancyGrid::occupy`], [`OccupancyGrid::vacate`], or
/// [`OccupancyGrid::relocate`].
#[derive(Debug, Clone)]
pub struct OccupancyGrid<K> {
    width: u32,
    height: u32,
    cells: HashMap<(u32, u32), K>,
}

impl<K: Copy + Eq + Hash> OccupancyGrid<K> {
    /// Create an empty grid with the provided dimensions.
    pub fn new(width: u32, height: u32) -> Result<Self, GridError> {
        if width == 0 || height == 0 {
            return Err(GridError::InvalidConfig(
                "grid dimensions must be non-zero",
            ));
        }
        Ok(Self {
            width,
            height,
            cells: HashMap::new(),
        })
    }

    /// Width of the grid in cells.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height of the grid in cells.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Number of occupied cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns true when no cell is occupied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Bounds test over signed candidate coordinates.
    #[must_use]
    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < i64::from(self.width) && y < i64::from(self.height)
    }

    /// Id occupying `(x, y)`, if any.
    #[must_use]
    pub fn occupant(&self, x: u32, y: u32) -> Option<K> {
        self.cells.get(&(x, y)).copied()
    }

    /// Returns true when `(x, y)` is in bounds and unoccupied.
    #[must_use]
    pub fn is_free(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && !self.cells.contains_key(&(x, y))
    }

    /// Claim `(x, y)` for `id`. Fails without side effect if the cell is
    /// out of bounds or already taken.
    pub fn occupy(&mut self, x: u32, y: u32, id: K) -> bool {
        if !self.is_free(x, y) {
            return false;
        }
        self.cells.insert((x, y), id);
        true
    }

    /// Release `(x, y)`, returning the previous occupant if there was one.
    pub fn vacate(&mut self, x: u32, y: u32) -> Option<K> {
        self.cells.remove(&(x, y))
    }

    /// Move `id` from one cell to another. Fails without side effect unless
    /// `from` is held by `id` and `to` is free.
    pub fn relocate(&mut self, from: (u32, u32), to: (u32, u32), id: K) -> bool {
        if self.cells.get(&from) != Some(&id) || !self.is_free(to.0, to.1) {
            return false;
        }
        self.cells.remove(&from);
        self.cells.insert(to, id);
        true
    }

    /// First in-bounds unoccupied neighbor of `(x, y)` in fixed search order,
    /// or `None` when the whole neighborhood is blocked.
    #[must_use]
    pub fn first_free_neighbor(&self, x: u32, y: u32) -> Option<(u32, u32)> {
        for (dx, dy) in NEIGHBOR_OFFSETS {
            let cx = i64::from(x) + dx;
            let cy = i64::from(y) + dy;
            if !self.contains(cx, cy) {
                continue;
            }
            let candidate = (cx as u32, cy as u32);
            if !self.cells.contains_key(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    /// Remove every occupancy entry while retaining dimensions.
    pub fn clear(&mut self) {
        self.cells.clear();
    }

    /// Iterate over `(cell, id)` entries in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = ((u32, u32), K)> + '_ {
        self.cells.iter().map(|(cell, id)| (*cell, *id))
    }
}
