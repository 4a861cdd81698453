//! The top-level driver (§4.1): CFL-bounded substepping over the fixed
//! six-phase order (advect, hash, transfer-to-grid, gravity, project,
//! transfer-from-grid), plus the `Simulation` convenience wrapper that owns
//! a seeded PRNG stream. Mirrors the inherited codebase's top-level
//! `FlipFluidSimulation` resource and its `update_simulation` schedule, but
//! collapsed into a single synchronous call instead of an ECS system set.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand::SeedableRng;

use crate::config::{SimConfig, TransferMethod};
use crate::error::{Result, SimError};
use crate::grid::Grid;
use crate::particle::Particle;
use crate::pressure::{self, SolverDiagnostics};
use crate::seeding;
use crate::spatial_hash::SpatialHash;
use crate::transfer;
use crate::vec3::{Index3, Vec3};

/// Real-time substep cap used by [`SimulationState::time_step`] — a 30
/// fps-safe ceiling, scaled up from the inherited codebase's fixed 1/120 s
/// timestep default.
pub const REALTIME_STEP_CAP: f64 = 0.033;

/// Aggregates the [`SolverDiagnostics`] of every substep an `update` call
/// ran, so a caller can inspect solver health without scraping stderr.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    pub substeps: Vec<SolverDiagnostics>,
}

impl StepReport {
    pub fn converged(&self) -> bool {
        self.substeps.iter().all(|s| s.converged)
    }

    pub fn total_iterations(&self) -> usize {
        self.substeps.iter().map(|s| s.iterations).sum()
    }
}

fn max_speed_squared(particles: &[Particle]) -> f64 {
    particles.iter().map(|p| p.velocity.length_squared()).fold(0.0, f64::max)
}

/// Advects particles, then clamps them into the interior (§4.2). Clamping
/// is a projection, not a reflection: it never touches velocity.
fn advect(particles: &mut [Particle], grid: &Grid, dt: f64, skin: f64) {
    let size = grid.size();
    let extent = Vec3::new(size.x as f64, size.y as f64, size.z as f64) * grid.cell_size();
    let lo = grid.grid_offset() + Vec3::splat(skin);
    let hi = grid.grid_offset() + extent - Vec3::splat(skin);
    for p in particles.iter_mut() {
        p.position += p.velocity * dt;
        p.position = Vec3::new(
            p.position.x.clamp(lo.x, hi.x),
            p.position.y.clamp(lo.y, hi.y),
            p.position.z.clamp(lo.z, hi.z),
        );
    }
}

/// `v += g * dt` on every non-solid face (§4.1 step 4); solid-cell
/// velocities are never touched (§8 invariant 5).
fn apply_gravity(grid: &mut Grid, gravity: Vec3, dt: f64) {
    for cell in grid.all_cells().collect::<Vec<_>>() {
        if grid.is_solid(cell) {
            continue;
        }
        for axis in 0..3 {
            grid.add_face_velocity(cell, axis, gravity.component(axis) * dt);
        }
    }
}

/// Owns the grid, particle store, spatial hash, and (for `FlipBlend`) the
/// previous-grid snapshot. Bare of any PRNG — seeding calls take the
/// stream explicitly, per §4.6's open question.
#[derive(Debug, Clone)]
pub struct SimulationState {
    grid: Grid,
    particles: Vec<Particle>,
    hash: SpatialHash,
    old_grid: Option<Grid>,
    config: SimConfig,
    poisoned: bool,
}

impl SimulationState {
    pub fn new(cell_size: f64, size: Index3, grid_offset: Vec3, config: SimConfig) -> Result<SimulationState> {
        config.validate()?;
        let grid = Grid::new(size, cell_size, grid_offset)?;
        let hash = SpatialHash::new(size);
        Ok(SimulationState { grid, particles: Vec::new(), hash, old_grid: None, config, poisoned: false })
    }

    pub fn resize(&mut self, size: Index3) -> Result<()> {
        self.grid = Grid::new(size, self.grid.cell_size(), self.grid.grid_offset())?;
        self.hash.resize(size);
        self.old_grid = None;
        Ok(())
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut SimConfig {
        &mut self.config
    }

    pub fn set_config(&mut self, config: SimConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Clears the poisoned flag along with all particles and grid state
    /// (§4.7). Configuration is left untouched.
    pub fn reset(&mut self) {
        self.particles.clear();
        self.grid = Grid::new(self.grid.size(), self.grid.cell_size(), self.grid.grid_offset())
            .expect("a grid that validated once validates again with the same dimensions");
        self.hash = SpatialHash::new(self.grid.size());
        self.old_grid = None;
        self.poisoned = false;
    }

    pub fn seed_cell(&mut self, cell: Index3, velocity: Vec3, density: u32, rng: &mut impl Rng) {
        seeding::seed_cell(&self.grid, &mut self.particles, cell, velocity, density, rng);
    }

    pub fn seed_box(&mut self, start: Vec3, size: Vec3, velocity: Vec3, density: u32, rng: &mut impl Rng) {
        seeding::seed_box(&self.grid, &mut self.particles, start, size, velocity, density, rng);
    }

    pub fn seed_sphere(&mut self, center: Vec3, radius: f64, velocity: Vec3, density: u32, rng: &mut impl Rng) {
        seeding::seed_sphere(&self.grid, &mut self.particles, center, radius, velocity, density, rng);
    }

    /// Advances wall-clock time by `dt`, splitting it into CFL-bounded
    /// substeps (§4.1). Fails with `Poisoned` without touching any state if
    /// a prior substep hit a `NumericBlowup`.
    pub fn update(&mut self, dt: f64) -> Result<StepReport> {
        if self.poisoned {
            return Err(SimError::Poisoned);
        }

        let mut report = StepReport::default();
        let mut remaining = dt;
        let h = self.grid.cell_size();

        while remaining > 0.0 {
            let max_sq = max_speed_squared(&self.particles);
            let ts = if max_sq <= 0.0 {
                f64::INFINITY
            } else {
                self.config.cfl_number * h / max_sq.sqrt()
            };
            let substep_dt = ts.min(remaining);
            if !(substep_dt > 0.0) {
                break;
            }
            let diag = self.run_substep(substep_dt)?;
            report.substeps.push(diag);
            remaining -= substep_dt;
        }

        Ok(report)
    }

    pub fn time_step(&mut self) -> Result<StepReport> {
        self.update(REALTIME_STEP_CAP)
    }

    pub fn time_step_with(&mut self, dt: f64) -> Result<StepReport> {
        self.update(dt)
    }

    fn run_substep(&mut self, dt: f64) -> Result<SolverDiagnostics> {
        let skin = self.config.boundary_skin_fraction * self.grid.cell_size();
        advect(&mut self.particles, &self.grid, dt, skin);
        self.hash.rebuild(&self.grid, &mut self.particles);

        match self.config.method {
            TransferMethod::FlipBlend => {
                transfer::particles_to_grid(&mut self.grid, &self.hash, &self.particles, TransferMethod::Pic);
                let mut snapshot = self.grid.clone();
                snapshot.zero_boundary_faces();
                self.old_grid = Some(snapshot);
            }
            method => {
                transfer::particles_to_grid(&mut self.grid, &self.hash, &self.particles, method);
                self.old_grid = None;
            }
        }

        apply_gravity(&mut self.grid, self.config.gravity, dt);

        let diag = pressure::project(
            &mut self.grid,
            dt,
            self.config.density,
            self.config.pressure_tol,
            self.config.pressure_max_iterations,
            self.config.preconditioner,
        );
        if !diag.converged {
            eprintln!(
                "pressure solver: {} iterations, residual {:.3e} exceeds tolerance",
                diag.iterations, diag.residual
            );
        }

        transfer::grid_to_particles(
            &self.grid,
            self.old_grid.as_ref(),
            &mut self.particles,
            self.config.method,
            self.config.blending_factor,
        );

        if self.particles.iter().any(|p| !p.velocity.is_finite()) {
            self.poisoned = true;
            eprintln!("simulation poisoned: a particle velocity became non-finite");
            return Err(SimError::NumericBlowup);
        }

        Ok(diag)
    }
}

/// Convenience wrapper owning a seeded `ChaCha8Rng` (§4.6) so callers who
/// don't want to manage a PRNG stream themselves don't have to.
#[derive(Debug, Clone)]
pub struct Simulation {
    state: SimulationState,
    rng: ChaCha8Rng,
}

impl Simulation {
    pub fn new(cell_size: f64, size: Index3, grid_offset: Vec3, config: SimConfig, seed: u64) -> Result<Simulation> {
        Ok(Simulation { state: SimulationState::new(cell_size, size, grid_offset, config)?, rng: ChaCha8Rng::seed_from_u64(seed) })
    }

    pub fn resize(&mut self, size: Index3) -> Result<()> {
        self.state.resize(size)
    }

    pub fn grid(&self) -> &Grid {
        self.state.grid()
    }

    pub fn particles(&self) -> &[Particle] {
        self.state.particles()
    }

    pub fn config(&self) -> &SimConfig {
        self.state.config()
    }

    pub fn config_mut(&mut self) -> &mut SimConfig {
        self.state.config_mut()
    }

    pub fn set_config(&mut self, config: SimConfig) -> Result<()> {
        self.state.set_config(config)
    }

    pub fn is_poisoned(&self) -> bool {
        self.state.is_poisoned()
    }

    pub fn reset(&mut self) {
        self.state.reset()
    }

    /// Seeds a single cell with `density^3` particles (default `density =
    /// 2`, per §6).
    pub fn seed_cell(&mut self, cell: Index3, velocity: Vec3, density: u32) {
        self.state.seed_cell(cell, velocity, density, &mut self.rng);
    }

    pub fn seed_box(&mut self, start: Vec3, size: Vec3, velocity: Vec3, density: u32) {
        self.state.seed_box(start, size, velocity, density, &mut self.rng);
    }

    pub fn seed_sphere(&mut self, center: Vec3, radius: f64, velocity: Vec3, density: u32) {
        self.state.seed_sphere(center, radius, velocity, density, &mut self.rng);
    }

    pub fn update(&mut self, dt: f64) -> Result<StepReport> {
        self.state.update(dt)
    }

    pub fn time_step(&mut self) -> Result<StepReport> {
        self.state.time_step()
    }

    pub fn time_step_with(&mut self, dt: f64) -> Result<StepReport> {
        self.state.time_step_with(dt)
    }
}
