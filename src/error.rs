use thiserror::Error;

// Unified error type for relaxon

#[derive(Error, Debug)]
pub enum BteError {
    #[error("relaxons require the scattering matrix to be kept in memory")]
    RelaxonsRequireInMemory,
    #[error(
        "if the scattering matrix is kept in memory, only one temperature/chemical potential is allowed in a run (got {num_calcs})"
    )]
    InMemoryMultipleCalculations { num_calcs: usize },
    #[error("{size} processes do not fit a near-square process grid ({rows} x {cols})")]
    ProcessGrid { size: usize, rows: usize, cols: usize },
    #[error("{solver} solver reached {iterations} iterations without convergence (calculations {unconverged:?})")]
    NotConverged {
        solver: &'static str,
        iterations: usize,
        unconverged: Vec<usize>,
    },
    #[error("matrix is not hermitian (max asymmetry {0:e})")]
    NotHermitian(f64),
    #[error("eigensolver error: {0}")]
    Eigen(String),
    #[error("distribution error: {0}")]
    Distribution(&'static str),
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
    #[error("cannot {operation} a scattering matrix in state {state}")]
    MatrixState {
        operation: &'static str,
        state: &'static str,
    },
    #[error("communication error: {0}")]
    Communication(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("unknown BTE solver '{0}' (expected iterative, variational or relaxons)")]
    UnknownSolver(String),
}

impl From<::config::ConfigError> for BteError {
    fn from(e: ::config::ConfigError) -> Self {
        BteError::Config(e.to_string())
    }
}
