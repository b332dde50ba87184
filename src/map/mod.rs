//! The building map: per-floor rasterized walkability plus the
//! transition cells (stairs/elevators/escalators) that allow a particle to
//! change floor.
//!
//! Decoding the on-disk PNG/JSON bundle into these rasters is out of scope:
//! this module only defines the queryable in-memory shape and a
//! builder that an external loader fills in.

use std::collections::HashMap;

/// What a single raster cell allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    /// Not traversable; the system model rejects any move into this cell.
    Blocked,
    /// Ordinary walkable floor.
    Walkable,
    /// A transition cell: floor index may diffuse while occupying it.
    Transition(TransitionKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Stair,
    Elevator,
    Escalator,
}

impl CellKind {
    pub fn is_walkable(&self) -> bool {
        !matches!(self, CellKind::Blocked)
    }

    pub fn is_transition(&self) -> bool {
        matches!(self, CellKind::Transition(_))
    }
}

/// Affine transform between raster (pixel) coordinates and the building's
/// local Cartesian frame, as loaded from a floor's `param` block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateTransform {
    /// Pixels per meter, x axis.
    pub ppmx: f64,
    /// Pixels per meter, y axis.
    pub ppmy: f64,
    pub origin_x: f64,
    pub origin_y: f64,
}

impl CoordinateTransform {
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        ((x - self.origin_x) * self.ppmx, (y - self.origin_y) * self.ppmy)
    }

    pub fn pixel_to_world(&self, px: f64, py: f64) -> (f64, f64) {
        (px / self.ppmx + self.origin_x, py / self.ppmy + self.origin_y)
    }
}

/// One floor's raster: a dense `width * height` grid of [`CellKind`], plus
/// the per-cell entry cost (used to bias the status initializer's
/// Metropolis burn-in toward cheap/likely paths) and the coordinate
/// transform for this floor.
#[derive(Debug, Clone)]
pub struct FloorMap {
    pub floor: i32,
    pub width: usize,
    pub height: usize,
    cells: Vec<CellKind>,
    cost: Vec<f64>,
    pub transform: CoordinateTransform,
}

impl FloorMap {
    pub fn new(
        floor: i32,
        width: usize,
        height: usize,
        cells: Vec<CellKind>,
        cost: Vec<f64>,
        transform: CoordinateTransform,
    ) -> Self {
        assert_eq!(cells.len(), width * height, "cell raster size mismatch");
        assert_eq!(cost.len(), width * height, "cost raster size mismatch");
        Self { floor, width, height, cells, cost, transform }
    }

    fn index(&self, px: i64, py: i64) -> Option<usize> {
        if px < 0 || py < 0 || px as usize >= self.width || py as usize >= self.height {
            return None;
        }
        Some(py as usize * self.width + px as usize)
    }

    /// Cell kind at world coordinates `(x, y)`. Out-of-raster points are
    /// `Blocked`.
    pub fn cell_at_world(&self, x: f64, y: f64) -> CellKind {
        let (px, py) = self.transform.world_to_pixel(x, y);
        match self.index(px.floor() as i64, py.floor() as i64) {
            Some(i) => self.cells[i],
            None => CellKind::Blocked,
        }
    }

    pub fn cost_at_world(&self, x: f64, y: f64) -> f64 {
        let (px, py) = self.transform.world_to_pixel(x, y);
        match self.index(px.floor() as i64, py.floor() as i64) {
            Some(i) => self.cost[i],
            None => f64::INFINITY,
        }
    }

    /// World-frame axis-aligned bounds of the walkable area, used by the
    /// status initializer to draw the initial uniform cloud.
    pub fn world_bounds(&self) -> (std::ops::Range<f64>, std::ops::Range<f64>) {
        let (x0, y0) = self.transform.pixel_to_world(0.0, 0.0);
        let (x1, y1) = self.transform.pixel_to_world(self.width as f64, self.height as f64);
        (x0.min(x1)..x0.max(x1), y0.min(y1)..y0.max(y1))
    }

    /// All walkable (x, y) cell centers, in world coordinates. Used by the
    /// beacon-conditioned Metropolis sampler to propose from a concrete
    /// finite support.
    pub fn walkable_world_points(&self) -> Vec<(f64, f64)> {
        let mut out = Vec::new();
        for py in 0..self.height {
            for px in 0..self.width {
                if self.cells[py * self.width + px].is_walkable() {
                    let (x, y) = self.transform.pixel_to_world(px as f64 + 0.5, py as f64 + 0.5);
                    out.push((x, y));
                }
            }
        }
        out
    }
}

/// The full multi-floor building: an immutable, shared map from floor index
/// to [`FloorMap`].
#[derive(Debug, Clone, Default)]
pub struct BuildingMap {
    floors: HashMap<i32, FloorMap>,
}

impl BuildingMap {
    pub fn new(floors: Vec<FloorMap>) -> Self {
        Self { floors: floors.into_iter().map(|f| (f.floor, f)).collect() }
    }

    pub fn floor(&self, floor: i32) -> Option<&FloorMap> {
        self.floors.get(&floor)
    }

    pub fn floor_indices(&self) -> Vec<i32> {
        let mut v: Vec<i32> = self.floors.keys().copied().collect();
        v.sort_unstable();
        v
    }

    /// Cell kind at a [`crate::geometry::Location`], resolving `floor` via
    /// its rounded integer index. Locations on a floor absent from the map
    /// are `Blocked` so the system model always rejects them.
    pub fn cell_at(&self, x: f64, y: f64, floor: i32) -> CellKind {
        match self.floors.get(&floor) {
            Some(f) => f.cell_at_world(x, y),
            None => CellKind::Blocked,
        }
    }

    pub fn cost_at(&self, x: f64, y: f64, floor: i32) -> f64 {
        match self.floors.get(&floor) {
            Some(f) => f.cost_at_world(x, y),
            None => f64::INFINITY,
        }
    }
}

/// Incremental builder used by the out-of-scope model loader: it decodes
/// one floor's raster at a time (from a PNG, per the model bundle format)
/// and adds it here without this crate ever touching image bytes.
#[derive(Debug, Default)]
pub struct BuildingMapBuilder {
    floors: Vec<FloorMap>,
}

impl BuildingMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_floor(&mut self, floor: FloorMap) -> &mut Self {
        self.floors.push(floor);
        self
    }

    pub fn build(self) -> BuildingMap {
        BuildingMap::new(self.floors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_floor(width: usize, height: usize, kind: CellKind) -> FloorMap {
        FloorMap::new(
            0,
            width,
            height,
            vec![kind; width * height],
            vec![1.0; width * height],
            CoordinateTransform { ppmx: 10.0, ppmy: 10.0, origin_x: 0.0, origin_y: 0.0 },
        )
    }

    #[test]
    fn out_of_raster_is_blocked() {
        let map = BuildingMap::new(vec![single_floor(5, 5, CellKind::Walkable)]);
        assert_eq!(map.cell_at(1000.0, 1000.0, 0), CellKind::Blocked);
    }

    #[test]
    fn missing_floor_is_blocked() {
        let map = BuildingMap::new(vec![single_floor(5, 5, CellKind::Walkable)]);
        assert_eq!(map.cell_at(0.1, 0.1, 7), CellKind::Blocked);
    }

    #[test]
    fn walkable_cell_round_trips() {
        let map = BuildingMap::new(vec![single_floor(5, 5, CellKind::Walkable)]);
        assert_eq!(map.cell_at(0.1, 0.1, 0), CellKind::Walkable);
    }

    #[test]
    fn world_bounds_cover_raster() {
        let floor = single_floor(10, 20, CellKind::Walkable);
        let (xr, yr) = floor.world_bounds();
        assert!((xr.end - xr.start - 1.0).abs() < 1e-9);
        assert!((yr.end - yr.start - 2.0).abs() < 1e-9);
    }
}
