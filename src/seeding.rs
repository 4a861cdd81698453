//! Volume seeding (§4.6): stratified-random particle placement into a
//! single cell, a box, or a sphere. Every function takes the PRNG stream
//! explicitly rather than owning one, mirroring the inherited codebase's
//! `populate_cells`/`add_particles_in_box` pair but generalized to 3D and
//! parameterized over any `rand::Rng` rather than a global generator.

use rand::Rng;

use crate::grid::Grid;
use crate::particle::Particle;
use crate::vec3::{Index3, Vec3};

/// Cell indices whose world-space extent overlaps `[min, max]`, clamped to
/// the grid.
fn cells_overlapping(grid: &Grid, min: Vec3, max: Vec3) -> Vec<Index3> {
    let size = grid.size();
    let lo = grid.world_to_grid_pos(min).floor().clamp_to_index(size);
    let hi = grid.world_to_grid_pos(max).floor().clamp_to_index(size);
    let mut out = Vec::new();
    for z in lo.z..=hi.z {
        for y in lo.y..=hi.y {
            for x in lo.x..=hi.x {
                out.push(Index3::new(x, y, z));
            }
        }
    }
    out
}

/// Fills `cell` with up to `density^3` particles on a stratified random
/// grid (§4.6), skipping entirely if the cell already holds at least that
/// many. `predicate` additionally gates each candidate position, letting
/// `seed_box`/`seed_sphere` reuse this for their geometric tests.
fn seed_cell_with_predicate(
    grid: &Grid,
    particles: &mut Vec<Particle>,
    cell: Index3,
    velocity: Vec3,
    density: u32,
    rng: &mut impl Rng,
    predicate: impl Fn(Vec3) -> bool,
) {
    let target = (density as usize).pow(3);
    let existing = particles
        .iter()
        .filter(|p| grid.cell_index_from_position(p.position) == cell)
        .count();
    if existing >= target {
        return;
    }

    let h = grid.cell_size();
    let sub = h / density as f64;
    let origin = grid.grid_offset() + Vec3::new(cell.x as f64, cell.y as f64, cell.z as f64) * h;

    for iz in 0..density {
        for iy in 0..density {
            for ix in 0..density {
                let jitter = Vec3::new(rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>());
                let base = Vec3::new(ix as f64, iy as f64, iz as f64) * sub;
                let pos = origin + base + jitter * sub;
                if predicate(pos) {
                    particles.push(Particle::new(pos, velocity));
                }
            }
        }
    }
}

/// Fills a single cell with a stratified `density^3` particle grid.
pub fn seed_cell(
    grid: &Grid,
    particles: &mut Vec<Particle>,
    cell: Index3,
    velocity: Vec3,
    density: u32,
    rng: &mut impl Rng,
) {
    seed_cell_with_predicate(grid, particles, cell, velocity, density, rng, |_| true);
}

/// Seeds every cell overlapping the axis-aligned box `[start, start+size]`,
/// keeping only particles whose jittered position actually falls inside it.
pub fn seed_box(
    grid: &Grid,
    particles: &mut Vec<Particle>,
    start: Vec3,
    size: Vec3,
    velocity: Vec3,
    density: u32,
    rng: &mut impl Rng,
) {
    let min = start;
    let max = start + size;
    for cell in cells_overlapping(grid, min, max) {
        seed_cell_with_predicate(grid, particles, cell, velocity, density, rng, |pos| {
            pos.x >= min.x && pos.x <= max.x && pos.y >= min.y && pos.y <= max.y && pos.z >= min.z && pos.z <= max.z
        });
    }
}

/// Seeds every cell overlapping the sphere's bounding box, keeping only
/// particles whose jittered position lies within `radius` of `center`.
pub fn seed_sphere(
    grid: &Grid,
    particles: &mut Vec<Particle>,
    center: Vec3,
    radius: f64,
    velocity: Vec3,
    density: u32,
    rng: &mut impl Rng,
) {
    let extent = Vec3::splat(radius);
    for cell in cells_overlapping(grid, center - extent, center + extent) {
        seed_cell_with_predicate(grid, particles, cell, velocity, density, rng, |pos| {
            (pos - center).length_squared() <= radius * radius
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn grid() -> Grid {
        Grid::new(Index3::new(10, 10, 10), 1.0, Vec3::ZERO).unwrap()
    }

    #[test]
    fn seed_cell_produces_density_cubed_particles() {
        let g = grid();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut particles = Vec::new();
        seed_cell(&g, &mut particles, Index3::new(2, 2, 2), Vec3::ZERO, 3, &mut rng);
        assert_eq!(particles.len(), 27);
        for p in &particles {
            assert_eq!(g.cell_index_from_position(p.position), Index3::new(2, 2, 2));
        }
    }

    #[test]
    fn seed_cell_skips_when_already_at_capacity() {
        let g = grid();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut particles = Vec::new();
        seed_cell(&g, &mut particles, Index3::new(1, 1, 1), Vec3::ZERO, 2, &mut rng);
        let count_after_first = particles.len();
        seed_cell(&g, &mut particles, Index3::new(1, 1, 1), Vec3::ZERO, 2, &mut rng);
        assert_eq!(particles.len(), count_after_first);
    }

    #[test]
    fn seed_sphere_keeps_only_particles_within_radius() {
        let g = grid();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut particles = Vec::new();
        let center = Vec3::new(5.0, 5.0, 5.0);
        seed_sphere(&g, &mut particles, center, 2.5, Vec3::ZERO, 2, &mut rng);
        assert!(!particles.is_empty());
        for p in &particles {
            assert!((p.position - center).length() <= 2.5 + 1e-9);
        }
    }

    #[test]
    fn seed_box_keeps_only_particles_inside_region() {
        let g = grid();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut particles = Vec::new();
        let start = Vec3::new(1.0, 1.0, 1.0);
        let size = Vec3::new(2.0, 2.0, 2.0);
        seed_box(&g, &mut particles, start, size, Vec3::ZERO, 2, &mut rng);
        assert!(!particles.is_empty());
        for p in &particles {
            assert!(p.position.x >= start.x && p.position.x <= start.x + size.x);
            assert!(p.position.y >= start.y && p.position.y <= start.y + size.y);
            assert!(p.position.z >= start.z && p.position.z <= start.z + size.z);
        }
    }
}
