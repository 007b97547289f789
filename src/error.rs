//! Error taxonomy shared by the sampler, the targets and the run configuration.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RwmError {
    /// The position matrix does not fit what the target or the sampler expects.
    #[error("Invalid shape: expected {expected}, found {found}")]
    InvalidShape { expected: String, found: String },

    /// Every chain sits at a non-finite log-density and can never accept a move.
    #[error("Numeric degeneracy: all {n_chains} chains have a non-finite log-density")]
    NumericDegeneracy { n_chains: usize },

    #[error("Invalid sample count {0}: must be zero or positive")]
    InvalidSampleCount(i64),

    #[error("Invalid chain count {0}: need at least one chain")]
    InvalidChainCount(i64),

    #[error("Invalid dimension count {0}: need at least one dimension")]
    InvalidDimCount(i64),

    #[error("Invalid step size {0}: must be finite and strictly positive")]
    InvalidStepSize(f64),

    #[error("Invalid standard deviation {0}: must be finite and strictly positive")]
    InvalidStd(f64),

    #[error("Invalid mixture configuration: {0}")]
    InvalidMixture(String),

    /// Any other failure raised by a log-density implementation.
    #[error("Log-density evaluation failed: {0}")]
    Target(String),
}

pub type Result<T> = std::result::Result<T, RwmError>;

impl RwmError {
    pub(crate) fn shape(expected: impl Into<String>, found: impl Into<String>) -> Self {
        RwmError::InvalidShape {
            expected: expected.into(),
            found: found.into(),
        }
    }
}
