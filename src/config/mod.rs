//! Run options for the transport driver.
//!
//! Options deserialize from TOML through the `config` crate; every field has a
//! default, so an empty document is valid. The `with_*` builders cover the
//! same ground for API use.
//!
//! ```toml
//! convergence_threshold = 1e-6
//! max_iterations = 100
//! scattering_matrix_in_memory = true
//! solvers = ["variational", "relaxons"]
//! block_size = 64
//! ```

use crate::error::BteError;
use crate::scattering::MatrixOptions;
use crate::utils::convergence::Convergence;
use ::config::{Config, File, FileFormat};
use bitflags::bitflags;
use serde::Deserialize;

bitflags! {
    /// Solvers requested on top of RTA.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct SolverSet: u8 {
        const ITERATIVE   = 0b001;
        const VARIATIONAL = 0b010;
        const RELAXONS    = 0b100;
    }
}

impl SolverSet {
    pub fn parse(name: &str) -> Result<Self, BteError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "iterative" => Ok(Self::ITERATIVE),
            "variational" => Ok(Self::VARIATIONAL),
            "relaxons" => Ok(Self::RELAXONS),
            _ => Err(BteError::UnknownSolver(name.to_string())),
        }
    }

    pub fn from_names<I, S>(names: I) -> Result<Self, BteError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .try_fold(Self::empty(), |set, name| Ok(set | Self::parse(name.as_ref())?))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    /// Relative change of the conductivity below which a solver stops
    pub convergence_threshold: f64,
    pub max_iterations: usize,
    pub scattering_matrix_in_memory: bool,
    /// Any of "iterative", "variational", "relaxons"
    pub solvers: Vec<String>,
    pub use_symmetries: bool,
    /// Block size of the block-cyclic distribution; absent keeps the matrix local
    pub block_size: Option<usize>,
    pub boundary_length: Option<f64>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            convergence_threshold: 1e-5,
            max_iterations: 50,
            scattering_matrix_in_memory: true,
            solvers: Vec::new(),
            use_symmetries: false,
            block_size: None,
            boundary_length: None,
        }
    }
}

impl TransportOptions {
    pub fn from_toml_str(source: &str) -> Result<Self, BteError> {
        let settings = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?;
        let options: Self = settings.try_deserialize()?;
        options.validated()
    }

    /// Loads a TOML file; the extension may be omitted.
    pub fn from_file(path: &str) -> Result<Self, BteError> {
        let settings = Config::builder()
            .add_source(File::with_name(path).format(FileFormat::Toml))
            .build()?;
        let options: Self = settings.try_deserialize()?;
        options.validated()
    }

    fn validated(self) -> Result<Self, BteError> {
        self.solver_set()?;
        if self.convergence_threshold.is_nan() || self.convergence_threshold <= 0.0 {
            return Err(BteError::Config(format!(
                "convergence_threshold must be positive, got {}",
                self.convergence_threshold
            )));
        }
        if self.block_size == Some(0) {
            return Err(BteError::Config("block_size must be positive".into()));
        }
        if let Some(length) = self.boundary_length {
            if length.is_nan() || length <= 0.0 {
                return Err(BteError::Config(format!(
                    "boundary_length must be positive, got {length}"
                )));
            }
        }
        Ok(self)
    }

    pub fn solver_set(&self) -> Result<SolverSet, BteError> {
        SolverSet::from_names(&self.solvers)
    }

    pub fn matrix_options(&self) -> MatrixOptions {
        MatrixOptions {
            in_memory: self.scattering_matrix_in_memory,
            use_symmetries: self.use_symmetries,
            block_size: self.block_size,
            boundary_length: self.boundary_length,
        }
    }

    pub fn convergence(&self) -> Convergence {
        Convergence::new(self.convergence_threshold, self.max_iterations)
    }

    pub fn with_convergence(mut self, threshold: f64, max_iterations: usize) -> Self {
        self.convergence_threshold = threshold;
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_in_memory(mut self, in_memory: bool) -> Self {
        self.scattering_matrix_in_memory = in_memory;
        self
    }

    pub fn with_solvers(mut self, solvers: &[&str]) -> Self {
        self.solvers = solvers.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_symmetries(mut self, use_symmetries: bool) -> Self {
        self.use_symmetries = use_symmetries;
        self
    }

    pub fn with_block_size(mut self, block_size: Option<usize>) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_boundary_length(mut self, length: Option<f64>) -> Self {
        self.boundary_length = length;
        self
    }
}
