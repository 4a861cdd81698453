//! The staggered (MAC) grid: a dense 3D array of cells, each carrying a
//! fluid/air/solid tag and the three face velocities that live on its
//! positive-x/y/z faces. Modeled on the inherited codebase's `SimGrid`
//! (cell-type array + two staggered velocity arrays) generalized from 2D to
//! 3D and from `f32` to `f64`.

use crate::error::{Result, SimError};
use crate::vec3::{Index3, Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellType {
    Air,
    Fluid,
    Solid,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Cell {
    pub face_velocity: Vec3,
}

impl Default for CellType {
    fn default() -> Self {
        CellType::Air
    }
}

#[derive(Debug, Clone)]
pub struct Grid {
    size: Index3,
    cell_size: f64,
    grid_offset: Vec3,
    cell_type: Vec<CellType>,
    cells: Vec<Cell>,
}

impl Grid {
    pub fn new(size: Index3, cell_size: f64, grid_offset: Vec3) -> Result<Grid> {
        if cell_size <= 0.0 {
            return Err(SimError::InvalidConfig(format!(
                "cell_size must be > 0, got {cell_size}"
            )));
        }
        if size.x == 0 || size.y == 0 || size.z == 0 {
            return Err(SimError::InvalidConfig(format!(
                "grid size must be non-zero on every axis, got {size:?}"
            )));
        }
        let n = size.x * size.y * size.z;
        Ok(Grid {
            size,
            cell_size,
            grid_offset,
            cell_type: vec![CellType::Air; n],
            cells: vec![Cell::default(); n],
        })
    }

    pub fn size(&self) -> Index3 {
        self.size
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn grid_offset(&self) -> Vec3 {
        self.grid_offset
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    fn idx(&self, at: Index3) -> usize {
        at.linear(self.size)
    }

    pub fn cell_type(&self, at: Index3) -> CellType {
        self.cell_type[self.idx(at)]
    }

    pub fn set_cell_type(&mut self, at: Index3, cell_type: CellType) {
        let i = self.idx(at);
        self.cell_type[i] = cell_type;
    }

    pub fn is_solid(&self, at: Index3) -> bool {
        at.in_bounds(self.size) && self.cell_type(at) == CellType::Solid
    }

    /// Positive-axis face velocity of `at` (the `+x`/`+y`/`+z` face, matching
    /// §3's `face_velocity` attribute).
    pub fn face_velocity(&self, at: Index3, axis: usize) -> f64 {
        self.cells[self.idx(at)].face_velocity.component(axis)
    }

    pub fn set_face_velocity(&mut self, at: Index3, axis: usize, value: f64) {
        let i = self.idx(at);
        self.cells[i].face_velocity = self.cells[i].face_velocity.with_component(axis, value);
    }

    pub fn add_face_velocity(&mut self, at: Index3, axis: usize, delta: f64) {
        let cur = self.face_velocity(at, axis);
        self.set_face_velocity(at, axis, cur + delta);
    }

    /// Negative-axis face velocity of `at`: the `+axis` face of the neighbor
    /// one cell back, or `0.0` at the grid boundary (§3).
    pub fn neg_face_velocity(&self, at: Index3, axis: usize) -> f64 {
        match self.neighbor_back(at, axis) {
            Some(n) => self.face_velocity(n, axis),
            None => 0.0,
        }
    }

    /// The neighbor one cell behind `at` along `axis`, or `None` at the
    /// boundary (index would go negative).
    pub fn neighbor_back(&self, at: Index3, axis: usize) -> Option<Index3> {
        let delta = |a: usize| if a == axis { -1 } else { 0 };
        at.offset(delta(0), delta(1), delta(2))
    }

    /// The neighbor one cell ahead of `at` along `axis`, or `None` if that
    /// would leave the grid.
    pub fn neighbor_fwd(&self, at: Index3, axis: usize) -> Option<Index3> {
        let delta = |a: usize| if a == axis { 1 } else { 0 };
        let n = at.offset(delta(0), delta(1), delta(2))?;
        if n.in_bounds(self.size) {
            Some(n)
        } else {
            None
        }
    }

    /// `true` when `at`'s `+axis` face is the outermost boundary face of the
    /// grid along that axis (always clamped to zero, §3/§8 invariant 4).
    pub fn is_boundary_face(&self, at: Index3, axis: usize) -> bool {
        at.component(axis) + 1 == self.size.component(axis)
    }

    pub fn cell_center_world(&self, at: Index3) -> Vec3 {
        let half = self.cell_size * 0.5;
        self.grid_offset
            + Vec3::new(
                (at.x as f64) * self.cell_size + half,
                (at.y as f64) * self.cell_size + half,
                (at.z as f64) * self.cell_size + half,
            )
    }

    /// World position of the center of `at`'s `+axis` face.
    pub fn face_center_world(&self, at: Index3, axis: usize) -> Vec3 {
        let center = self.cell_center_world(at);
        let half = self.cell_size * 0.5;
        center.with_component(axis, center.component(axis) + half)
    }

    pub fn world_to_grid_pos(&self, pos: Vec3) -> Vec3 {
        (pos - self.grid_offset) / self.cell_size
    }

    /// Clamps a world position into the owning cell index (§4.3).
    pub fn cell_index_from_position(&self, pos: Vec3) -> Index3 {
        self.world_to_grid_pos(pos).floor().clamp_to_index(self.size)
    }

    /// Resets every non-solid cell to `Air`; callers then mark cells with
    /// particles as `Fluid` (§4.4's "after the sweep" step).
    pub fn clear_fluid_classification(&mut self) {
        for t in self.cell_type.iter_mut() {
            if *t != CellType::Solid {
                *t = CellType::Air;
            }
        }
    }

    pub fn mark_fluid(&mut self, at: Index3) {
        if !self.is_solid(at) {
            self.set_cell_type(at, CellType::Fluid);
        }
    }

    /// All fluid cells in stable row-major (x fastest, then y, then z) order,
    /// matching the ordinal assignment the pressure solver uses (§4.5).
    pub fn fluid_cells(&self) -> Vec<Index3> {
        let mut out = Vec::new();
        for z in 0..self.size.z {
            for y in 0..self.size.y {
                for x in 0..self.size.x {
                    let at = Index3::new(x, y, z);
                    if self.cell_type(at) == CellType::Fluid {
                        out.push(at);
                    }
                }
            }
        }
        out
    }

    /// Zeros every outermost boundary face velocity (§8 invariant 4).
    pub fn zero_boundary_faces(&mut self) {
        for axis in 0..3 {
            for z in 0..self.size.z {
                for y in 0..self.size.y {
                    for x in 0..self.size.x {
                        let at = Index3::new(x, y, z);
                        if self.is_boundary_face(at, axis) {
                            self.set_face_velocity(at, axis, 0.0);
                        }
                    }
                }
            }
        }
    }

    pub fn all_cells(&self) -> impl Iterator<Item = Index3> + '_ {
        let size = self.size;
        (0..size.z).flat_map(move |z| {
            (0..size.y).flat_map(move |y| (0..size.x).map(move |x| Index3::new(x, y, z)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_grid() -> Grid {
        Grid::new(Index3::new(4, 4, 4), 1.0, Vec3::ZERO).unwrap()
    }

    #[test]
    fn rejects_zero_size_or_cell_size() {
        assert!(Grid::new(Index3::new(0, 1, 1), 1.0, Vec3::ZERO).is_err());
        assert!(Grid::new(Index3::new(1, 1, 1), 0.0, Vec3::ZERO).is_err());
        assert!(Grid::new(Index3::new(1, 1, 1), -1.0, Vec3::ZERO).is_err());
    }

    #[test]
    fn neg_face_reads_neighbor_pos_face() {
        let mut g = small_grid();
        g.set_face_velocity(Index3::new(0, 0, 0), 0, 2.5);
        assert_eq!(g.neg_face_velocity(Index3::new(1, 0, 0), 0), 2.5);
        assert_eq!(g.neg_face_velocity(Index3::new(0, 0, 0), 0), 0.0);
    }

    #[test]
    fn boundary_face_detection() {
        let g = small_grid();
        assert!(g.is_boundary_face(Index3::new(3, 0, 0), 0));
        assert!(!g.is_boundary_face(Index3::new(2, 0, 0), 0));
        assert!(g.is_boundary_face(Index3::new(0, 3, 0), 1));
    }

    #[test]
    fn cell_center_world_matches_formula() {
        let g = Grid::new(Index3::new(4, 4, 4), 2.0, Vec3::new(1.0, 0.0, 0.0)).unwrap();
        let c = g.cell_center_world(Index3::new(1, 1, 1));
        assert_eq!(c, Vec3::new(1.0 + 2.0 * 1.5, 2.0 * 1.5, 2.0 * 1.5));
    }

    #[test]
    fn cell_index_from_position_clamps() {
        let g = small_grid();
        assert_eq!(g.cell_index_from_position(Vec3::new(-5.0, 0.5, 10.0)), Index3::new(0, 0, 3));
        assert_eq!(g.cell_index_from_position(Vec3::new(2.5, 2.5, 2.5)), Index3::new(2, 2, 2));
    }

    #[test]
    fn fluid_cells_are_row_major() {
        let mut g = small_grid();
        g.mark_fluid(Index3::new(2, 0, 0));
        g.mark_fluid(Index3::new(0, 1, 0));
        let fluid = g.fluid_cells();
        assert_eq!(fluid, vec![Index3::new(2, 0, 0), Index3::new(0, 1, 0)]);
    }

    #[test]
    fn mark_fluid_never_rewrites_solid() {
        let mut g = small_grid();
        g.set_cell_type(Index3::new(0, 0, 0), CellType::Solid);
        g.mark_fluid(Index3::new(0, 0, 0));
        assert_eq!(g.cell_type(Index3::new(0, 0, 0)), CellType::Solid);
    }
}
