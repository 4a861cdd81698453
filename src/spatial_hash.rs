//! Bucket-per-cell spatial hash, rebuilt every substep. Mirrors the
//! inherited codebase's `spatial_lookup: Vec<Vec<Entity>>` but stores plain
//! `usize` particle indices rather than ECS entity handles (§9: an
//! arena-plus-index model, not borrowed references), so the hash can never
//! be invalidated by a particle-store reallocation.

use crate::grid::Grid;
use crate::particle::Particle;
use crate::vec3::Index3;

#[derive(Debug, Clone)]
pub struct SpatialHash {
    size: Index3,
    buckets: Vec<Vec<usize>>,
}

impl SpatialHash {
    pub fn new(size: Index3) -> Self {
        SpatialHash {
            size,
            buckets: vec![Vec::new(); size.x * size.y * size.z],
        }
    }

    pub fn resize(&mut self, size: Index3) {
        self.size = size;
        self.buckets = vec![Vec::new(); size.x * size.y * size.z];
    }

    fn idx(&self, at: Index3) -> usize {
        at.linear(self.size)
    }

    pub fn clear(&mut self) {
        for bucket in self.buckets.iter_mut() {
            bucket.clear();
        }
    }

    pub fn insert(&mut self, at: Index3, particle_index: usize) {
        let i = self.idx(at);
        self.buckets[i].push(particle_index);
    }

    pub fn bucket(&self, at: Index3) -> &[usize] {
        &self.buckets[self.idx(at)]
    }

    /// Cells that currently hold at least one particle.
    pub fn occupied_cells(&self) -> impl Iterator<Item = Index3> + '_ {
        let size = self.size;
        (0..size.z).flat_map(move |z| {
            (0..size.y).flat_map(move |y| {
                (0..size.x).filter_map(move |x| {
                    let at = Index3::new(x, y, z);
                    if self.buckets[at.linear(size)].is_empty() {
                        None
                    } else {
                        Some(at)
                    }
                })
            })
        })
    }

    /// Clears the hash and reinserts every particle at its freshly computed
    /// `grid_index`, in particle order — this is the "single, deterministic
    /// order" the concurrency model (§5) requires for reproducibility.
    pub fn rebuild(&mut self, grid: &Grid, particles: &mut [Particle]) {
        self.clear();
        for (i, particle) in particles.iter_mut().enumerate() {
            let at = grid.cell_index_from_position(particle.position);
            particle.grid_index = at;
            self.insert(at, i);
        }
    }

    /// Enumerates particle indices in cells `[cell - back, cell + fwd]`
    /// (inclusive per axis), clamped to the grid (§4.3).
    pub fn for_all_nearby(&self, cell: Index3, back: i64, fwd: i64, mut f: impl FnMut(usize)) {
        let clamp_range = |c: usize, max: usize| -> (usize, usize) {
            let lo = (c as i64 - back).max(0) as usize;
            let hi = ((c as i64 + fwd).min(max as i64 - 1)).max(0) as usize;
            (lo, hi)
        };
        let (x_lo, x_hi) = clamp_range(cell.x, self.size.x);
        let (y_lo, y_hi) = clamp_range(cell.y, self.size.y);
        let (z_lo, z_hi) = clamp_range(cell.z, self.size.z);

        for z in z_lo..=z_hi {
            for y in y_lo..=y_hi {
                for x in x_lo..=x_hi {
                    for &p in self.bucket(Index3::new(x, y, z)) {
                        f(p);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vec3::Vec3;

    fn grid() -> Grid {
        Grid::new(Index3::new(4, 4, 4), 1.0, Vec3::ZERO).unwrap()
    }

    #[test]
    fn rebuild_matches_particle_count_and_grid_index() {
        let g = grid();
        let mut particles = vec![
            Particle::new(Vec3::new(0.5, 0.5, 0.5), Vec3::ZERO),
            Particle::new(Vec3::new(2.5, 0.5, 0.5), Vec3::ZERO),
            Particle::new(Vec3::new(0.5, 0.5, 0.5), Vec3::ZERO),
        ];
        let mut hash = SpatialHash::new(g.size());
        hash.rebuild(&g, &mut particles);

        let total: usize = hash.occupied_cells().map(|c| hash.bucket(c).len()).sum();
        assert_eq!(total, particles.len());

        assert_eq!(particles[0].grid_index, Index3::new(0, 0, 0));
        assert_eq!(particles[1].grid_index, Index3::new(2, 0, 0));
        assert_eq!(hash.bucket(Index3::new(0, 0, 0)), &[0, 2]);
    }

    #[test]
    fn for_all_nearby_clamps_to_grid() {
        let g = grid();
        let mut particles = vec![Particle::new(Vec3::new(0.5, 0.5, 0.5), Vec3::ZERO)];
        let mut hash = SpatialHash::new(g.size());
        hash.rebuild(&g, &mut particles);

        let mut seen = Vec::new();
        hash.for_all_nearby(Index3::new(0, 0, 0), 1, 1, |p| seen.push(p));
        assert_eq!(seen, vec![0]);
    }
}
