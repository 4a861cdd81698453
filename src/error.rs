use thiserror::Error;

pub type Result<T> = core::result::Result<T, SimError>;

/// Errors that can escape the simulation core.
///
/// `SolverNonConverged` from the design taxonomy is deliberately not a
/// variant here: it is advisory, not fatal, and is surfaced instead through
/// [`crate::pressure::SolverDiagnostics`] on the returned `StepReport`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("particle velocity became non-finite; simulation state is poisoned")]
    NumericBlowup,

    #[error("simulation is poisoned by a prior blowup; call reset() before advancing")]
    Poisoned,
}
