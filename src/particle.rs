//! Particle storage: a dense `Vec<Particle>` owned by the simulation, with
//! the APIC affine matrix rows kept inline for cache-line friendliness
//! rather than boxed in a 3x3 container (§9 design notes). Mirrors the
//! inherited codebase's `SimParticle { position, velocity, lookup_index }`,
//! generalized to 3D and extended with the APIC rows.

use crate::vec3::{Index3, Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Particle {
    pub position: Vec3,
    pub velocity: Vec3,
    pub grid_index: Index3,
    /// Rows of the APIC affine velocity gradient matrix `C`. Unused (left at
    /// zero) outside of `TransferMethod::Apic`.
    pub cx: Vec3,
    pub cy: Vec3,
    pub cz: Vec3,
}

impl Particle {
    pub fn new(position: Vec3, velocity: Vec3) -> Self {
        Particle {
            position,
            velocity,
            grid_index: Index3::ZERO,
            cx: Vec3::ZERO,
            cy: Vec3::ZERO,
            cz: Vec3::ZERO,
        }
    }

    /// Applies the affine matrix `C` (rows `cx, cy, cz`) to a displacement,
    /// i.e. computes `C * d` (§4.4's APIC p→g source term).
    pub fn affine_velocity_at(&self, displacement: Vec3) -> Vec3 {
        Vec3::new(
            self.cx.dot(displacement),
            self.cy.dot(displacement),
            self.cz.dot(displacement),
        )
    }

    pub fn row(&self, axis: usize) -> Vec3 {
        match axis {
            0 => self.cx,
            1 => self.cy,
            2 => self.cz,
            _ => panic!("axis out of range: {axis}"),
        }
    }

    pub fn set_row(&mut self, axis: usize, row: Vec3) {
        match axis {
            0 => self.cx = row,
            1 => self.cy = row,
            2 => self.cz = row,
            _ => panic!("axis out of range: {axis}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affine_velocity_is_matrix_vector_product() {
        let mut p = Particle::new(Vec3::ZERO, Vec3::ZERO);
        p.cx = Vec3::new(1.0, 0.0, 0.0);
        p.cy = Vec3::new(0.0, 2.0, 0.0);
        p.cz = Vec3::new(0.0, 0.0, 3.0);
        let d = Vec3::new(1.0, 1.0, 1.0);
        assert_eq!(p.affine_velocity_at(d), Vec3::new(1.0, 2.0, 3.0));
    }
}
