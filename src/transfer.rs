//! The three particle/grid transfer schemes (§4.4): PIC, FLIP-blend, and
//! APIC, dispatched through the `TransferMethod` tag selected once per
//! substep rather than through any per-particle dynamic dispatch (§9).
//!
//! Grounded in the inherited codebase's `particles_to_grid` /
//! `grid_to_particles` pair (weighted-average p→g, bilinear g→p), extended
//! from 2D/bilinear to 3D/trilinear and with the APIC affine-matrix path
//! added on top.

use rayon::prelude::*;

use crate::config::TransferMethod;
use crate::grid::Grid;
use crate::particle::Particle;
use crate::spatial_hash::SpatialHash;
use crate::vec3::{lerp, Index3, Vec3};

/// Below this accumulated weight a face is considered to have no nearby
/// particles and is zeroed rather than divided by a near-zero denominator.
const MIN_WEIGHT: f64 = 1e-6;

/// The trilinear (tent) kernel with 1-cell support (§4.4).
fn tent_kernel(d: Vec3, h: f64) -> f64 {
    let axis = |x: f64| (1.0 - x.abs() / h).max(0.0);
    axis(d.x) * axis(d.y) * axis(d.z)
}

fn source_component(particle: &Particle, face_center: Vec3, axis: usize, apic: bool) -> f64 {
    if apic {
        let affine = particle.affine_velocity_at(face_center - particle.position);
        (particle.velocity + affine).component(axis)
    } else {
        particle.velocity.component(axis)
    }
}

/// Particle -> grid transfer (§4.4). FLIP-blend uses this with `method =
/// Pic`, per the design doc's "PIC p→g, then PIC g→p" construction.
pub fn particles_to_grid(grid: &mut Grid, hash: &SpatialHash, particles: &[Particle], method: TransferMethod) {
    grid.clear_fluid_classification();
    for cell in hash.occupied_cells() {
        grid.mark_fluid(cell);
    }

    let apic = method == TransferMethod::Apic;
    let h = grid.cell_size();

    // Each cell only ever writes its own three faces, so the per-cell
    // accumulation is embarrassingly parallel (§5): compute every cell's
    // new face velocities independently, then apply them in one serial
    // pass (the only step that actually touches `grid` mutably).
    let cells: Vec<Index3> = grid.all_cells().filter(|&c| !grid.is_solid(c)).collect();
    let grid_ref: &Grid = grid;
    let updates: Vec<(Index3, [f64; 3])> = cells
        .into_par_iter()
        .map(|cell| {
            let mut faces = [0.0; 3];
            for axis in 0..3 {
                let face_center = grid_ref.face_center_world(cell, axis);
                let mut weight_sum = 0.0;
                let mut vel_sum = 0.0;
                hash.for_all_nearby(cell, 1, 1, |p_idx| {
                    let p = &particles[p_idx];
                    let w = tent_kernel(p.position - face_center, h);
                    if w > 0.0 {
                        weight_sum += w;
                        vel_sum += w * source_component(p, face_center, axis, apic);
                    }
                });
                faces[axis] = if weight_sum < MIN_WEIGHT { 0.0 } else { vel_sum / weight_sum };
            }
            (cell, faces)
        })
        .collect();

    for (cell, faces) in updates {
        for axis in 0..3 {
            grid.set_face_velocity(cell, axis, faces[axis]);
        }
    }
}

/// Interpolates the six surrounding face velocities of a particle's owning
/// cell into one velocity vector (§4.4's grid→particle kernel).
fn interpolate_face_velocities(grid: &Grid, particle: &Particle) -> Vec3 {
    let grid_pos = grid.world_to_grid_pos(particle.position);
    let cell = particle.grid_index;
    let mut out = Vec3::ZERO;
    for axis in 0..3 {
        let v_pos = grid.face_velocity(cell, axis);
        let v_neg = grid.neg_face_velocity(cell, axis);
        let t = grid_pos.component(axis) - cell.component(axis) as f64;
        out = out.with_component(axis, lerp(v_neg, v_pos, t));
    }
    out
}

/// Analytic gradient (row of the APIC matrix `C`) of the `field_axis` face
/// velocity field at a particle's position. The face-`field_axis` field is
/// staggered by a half cell along the other two axes relative to
/// `field_axis` itself, so the corner stencil's origin shifts per axis
/// (§4.4: "gather the 3x3x3 block... into an 8-point stencil... divide the
/// gradient by cell_size").
fn affine_gradient_row(grid: &Grid, particle: &Particle, field_axis: usize) -> Vec3 {
    let h = grid.cell_size();
    let grid_pos = grid.world_to_grid_pos(particle.position);

    let mut u = [0.0; 3];
    for axis in 0..3 {
        let shift = if axis == field_axis { 1.0 } else { 0.5 };
        u[axis] = grid_pos.component(axis) - shift;
    }
    let i0 = [u[0].floor() as i64, u[1].floor() as i64, u[2].floor() as i64];
    let t = [u[0] - i0[0] as f64, u[1] - i0[1] as f64, u[2] - i0[2] as f64];

    let size = grid.size();
    let bounds = [size.x as i64, size.y as i64, size.z as i64];

    let fetch = |dx: i64, dy: i64, dz: i64| -> f64 {
        let idx = [i0[0] + dx, i0[1] + dy, i0[2] + dz];
        for axis in 0..3 {
            if idx[axis] < 0 || idx[axis] >= bounds[axis] {
                return 0.0;
            }
        }
        let cell = Index3::new(idx[0] as usize, idx[1] as usize, idx[2] as usize);
        grid.face_velocity(cell, field_axis)
    };

    let v000 = fetch(0, 0, 0);
    let v100 = fetch(1, 0, 0);
    let v010 = fetch(0, 1, 0);
    let v110 = fetch(1, 1, 0);
    let v001 = fetch(0, 0, 1);
    let v101 = fetch(1, 0, 1);
    let v011 = fetch(0, 1, 1);
    let v111 = fetch(1, 1, 1);

    let (tx, ty, tz) = (t[0], t[1], t[2]);
    let ddx = (1.0 - ty) * (1.0 - tz) * (v100 - v000)
        + ty * (1.0 - tz) * (v110 - v010)
        + (1.0 - ty) * tz * (v101 - v001)
        + ty * tz * (v111 - v011);
    let ddy = (1.0 - tx) * (1.0 - tz) * (v010 - v000)
        + tx * (1.0 - tz) * (v110 - v100)
        + (1.0 - tx) * tz * (v011 - v001)
        + tx * tz * (v111 - v101);
    let ddz = (1.0 - tx) * (1.0 - ty) * (v001 - v000)
        + tx * (1.0 - ty) * (v101 - v100)
        + (1.0 - tx) * ty * (v011 - v010)
        + tx * ty * (v111 - v110);

    Vec3::new(ddx / h, ddy / h, ddz / h)
}

/// Grid -> particle transfer (§4.4). `old_grid` must be `Some` (the pre-
/// project PIC snapshot) exactly when `method == FlipBlend`. Each particle
/// writes only its own velocity/affine rows, so this runs data-parallel
/// over the particle store (§5).
pub fn grid_to_particles(
    grid: &Grid,
    old_grid: Option<&Grid>,
    particles: &mut [Particle],
    method: TransferMethod,
    blend: f64,
) {
    particles.par_iter_mut().for_each(|particle| {
        let new_velocity = interpolate_face_velocities(grid, particle);
        match method {
            TransferMethod::Pic => {
                particle.velocity = new_velocity;
            }
            TransferMethod::FlipBlend => {
                let old_grid = old_grid.expect("FlipBlend requires an old_grid snapshot");
                let old_velocity = interpolate_face_velocities(old_grid, particle);
                particle.velocity = new_velocity + (particle.velocity - old_velocity) * blend;
            }
            TransferMethod::Apic => {
                particle.velocity = new_velocity;
                for axis in 0..3 {
                    let row = affine_gradient_row(grid, particle, axis);
                    particle.set_row(axis, row);
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::CellType;

    fn uniform_grid(size: Index3, vel: Vec3) -> Grid {
        let mut g = Grid::new(size, 1.0, Vec3::ZERO).unwrap();
        for cell in g.all_cells() {
            for axis in 0..3 {
                g.set_face_velocity(cell, axis, vel.component(axis));
            }
        }
        g
    }

    #[test]
    fn kernel_is_zero_beyond_one_cell() {
        assert_eq!(tent_kernel(Vec3::new(2.0, 0.0, 0.0), 1.0), 0.0);
        assert!(tent_kernel(Vec3::new(0.5, 0.0, 0.0), 1.0) > 0.0);
    }

    #[test]
    fn pic_roundtrip_on_uniform_field_is_identity() {
        let grid = uniform_grid(Index3::new(6, 6, 6), Vec3::new(1.0, 0.5, -0.25));
        let mut particle = Particle::new(Vec3::new(2.3, 3.7, 1.1), Vec3::ZERO);
        particle.grid_index = grid.cell_index_from_position(particle.position);
        let v = interpolate_face_velocities(&grid, &particle);
        assert!((v - Vec3::new(1.0, 0.5, -0.25)).length() < 1e-12);
    }

    #[test]
    fn apic_gradient_is_zero_on_uniform_field() {
        let grid = uniform_grid(Index3::new(6, 6, 6), Vec3::new(1.0, -2.0, 3.0));
        let mut particle = Particle::new(Vec3::new(2.3, 3.7, 1.1), Vec3::ZERO);
        particle.grid_index = grid.cell_index_from_position(particle.position);
        for axis in 0..3 {
            let row = affine_gradient_row(&grid, &particle, axis);
            assert!(row.length() < 1e-10, "row {axis} = {row:?}");
        }
    }

    #[test]
    fn p2g_never_rewrites_solid_cells() {
        let mut grid = Grid::new(Index3::new(4, 4, 4), 1.0, Vec3::ZERO).unwrap();
        grid.set_cell_type(Index3::new(1, 1, 1), CellType::Solid);
        grid.set_face_velocity(Index3::new(1, 1, 1), 0, 42.0);

        let particles = vec![Particle {
            position: Vec3::new(1.5, 1.5, 1.5),
            velocity: Vec3::new(5.0, 0.0, 0.0),
            ..Particle::new(Vec3::ZERO, Vec3::ZERO)
        }];
        let mut hash = SpatialHash::new(grid.size());
        hash.insert(Index3::new(1, 1, 1), 0);

        particles_to_grid(&mut grid, &hash, &particles, TransferMethod::Pic);
        assert_eq!(grid.face_velocity(Index3::new(1, 1, 1), 0), 42.0);
        assert_eq!(grid.cell_type(Index3::new(1, 1, 1)), CellType::Solid);
    }

    #[test]
    fn empty_face_weight_falls_back_to_zero() {
        let mut grid = Grid::new(Index3::new(4, 4, 4), 1.0, Vec3::ZERO).unwrap();
        let particles: Vec<Particle> = Vec::new();
        let hash = SpatialHash::new(grid.size());
        particles_to_grid(&mut grid, &hash, &particles, TransferMethod::Pic);
        assert_eq!(grid.face_velocity(Index3::new(0, 0, 0), 0), 0.0);
    }
}
