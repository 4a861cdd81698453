//! Mutable simulation configuration, modeled on the inherited codebase's
//! `SimConstraints` resource but stripped of everything that belonged to the
//! UI/host layer (pause flags, tool selection state, save/load bookkeeping).

use crate::error::{Result, SimError};
use crate::vec3::Vec3;

/// Which particle/grid transfer scheme a substep uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMethod {
    Pic,
    FlipBlend,
    Apic,
}

/// Which preconditioner the pressure solver's conjugate gradient loop uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preconditioner {
    Diagonal,
    ModifiedIncompleteCholesky,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    pub method: TransferMethod,
    /// FLIP/PIC blend factor in `[0, 1]`; `0.0` is pure PIC, `1.0` is pure
    /// FLIP. Only consulted when `method == TransferMethod::FlipBlend`.
    pub blending_factor: f64,
    pub cfl_number: f64,
    pub gravity: Vec3,
    pub density: f64,
    pub pressure_tol: f64,
    pub pressure_max_iterations: usize,
    pub preconditioner: Preconditioner,
    /// Fraction of `cell_size` used as the advection boundary skin width.
    pub boundary_skin_fraction: f64,
}

impl Default for SimConfig {
    fn default() -> SimConfig {
        SimConfig {
            method: TransferMethod::Apic,
            blending_factor: 0.97,
            cfl_number: 3.0,
            gravity: Vec3::new(0.0, -9.81, 0.0),
            density: 1.0,
            pressure_tol: 1e-6,
            pressure_max_iterations: 200,
            preconditioner: Preconditioner::Diagonal,
            boundary_skin_fraction: 1e-3,
        }
    }
}

impl SimConfig {
    /// Validates every field, matching the `InvalidConfig` taxonomy in the
    /// design doc. Construction and every config mutation funnel through
    /// this before being accepted.
    pub fn validate(&self) -> Result<()> {
        if self.cfl_number <= 0.0 {
            return Err(SimError::InvalidConfig(format!(
                "cfl_number must be > 0, got {}",
                self.cfl_number
            )));
        }
        if !(0.0..=1.0).contains(&self.blending_factor) {
            return Err(SimError::InvalidConfig(format!(
                "blending_factor must be in [0, 1], got {}",
                self.blending_factor
            )));
        }
        if self.density <= 0.0 {
            return Err(SimError::InvalidConfig(format!(
                "density must be > 0, got {}",
                self.density
            )));
        }
        if self.pressure_tol <= 0.0 {
            return Err(SimError::InvalidConfig(format!(
                "pressure_tol must be > 0, got {}",
                self.pressure_tol
            )));
        }
        if self.pressure_max_iterations == 0 {
            return Err(SimError::InvalidConfig(
                "pressure_max_iterations must be > 0".to_string(),
            ));
        }
        if self.boundary_skin_fraction < 0.0 || self.boundary_skin_fraction >= 0.5 {
            return Err(SimError::InvalidConfig(format!(
                "boundary_skin_fraction must be in [0, 0.5), got {}",
                self.boundary_skin_fraction
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(SimConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_blend() {
        let mut cfg = SimConfig::default();
        cfg.blending_factor = 1.5;
        assert!(matches!(cfg.validate(), Err(SimError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_nonpositive_cfl() {
        let mut cfg = SimConfig::default();
        cfg.cfl_number = 0.0;
        assert!(cfg.validate().is_err());
    }
}
