//! A hybrid particle/grid fluid simulation core: three interchangeable
//! particle-to-grid transfer schemes (PIC, FLIP-blend, APIC) over a
//! staggered 3D grid, CFL-bounded substepping, and conjugate-gradient
//! pressure projection.
//!
//! See [`Simulation`] for the top-level entry point.

pub mod config;
pub mod error;
pub mod grid;
pub mod particle;
pub mod pressure;
pub mod seeding;
pub mod simulation;
pub mod spatial_hash;
pub mod transfer;
pub mod vec3;

pub use config::{Preconditioner, SimConfig, TransferMethod};
pub use error::{Result, SimError};
pub use grid::{Cell, CellType, Grid};
pub use particle::Particle;
pub use pressure::SolverDiagnostics;
pub use simulation::{Simulation, SimulationState, StepReport};
pub use spatial_hash::SpatialHash;
pub use vec3::{Index3, Vec3};
