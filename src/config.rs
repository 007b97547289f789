/*!
Run configuration for the sampler and its demonstration target.

All user-facing counts arrive as signed integers and are validated here, so that a
negative sample count fails loudly instead of producing an empty run.

# Examples

```rust
use rwm_mcmc::config::{CountPolicy, RunConfig};

let config = RunConfig::new(1000, 4, 4).unwrap();
assert_eq!(config.n_draws(), 1001);

let legacy = RunConfig {
    count_policy: CountPolicy::Legacy,
    ..config
};
assert_eq!(legacy.n_draws(), 1002);

assert!(RunConfig::new(-1, 4, 4).is_err());
```
*/

use clap::ValueEnum;

use crate::distributions::Convention;
use crate::error::{Result, RwmError};

/// Standard deviation of the random-walk perturbation.
pub const DEFAULT_STEP_SIZE: f64 = 0.1;
pub const DEFAULT_SAMPLES: i64 = 1000;
pub const DEFAULT_CHAINS: i64 = 4;
pub const DEFAULT_DIMS: i64 = 4;

/// Parameters of a one-dimensional Gaussian mixture.
///
/// Weights are used as given (their logarithm enters the density), they are not
/// renormalized.
#[derive(Debug, Clone, PartialEq)]
pub struct MixtureConfig {
    pub locs: Vec<f64>,
    pub scales: Vec<f64>,
    pub weights: Vec<f64>,
}

impl Default for MixtureConfig {
    fn default() -> Self {
        Self {
            locs: vec![-2.0, 0.0, 3.2, 2.5],
            scales: vec![1.2, 1.0, 5.0, 2.8],
            weights: vec![0.2, 0.3, 0.1, 0.4],
        }
    }
}

impl MixtureConfig {
    pub fn n_components(&self) -> usize {
        self.locs.len()
    }

    /// Checks that all parameter vectors agree in length and hold usable values.
    pub fn validate(&self) -> Result<()> {
        let k = self.locs.len();
        if k == 0 {
            return Err(RwmError::InvalidMixture(
                "expected at least one component".into(),
            ));
        }
        if self.scales.len() != k || self.weights.len() != k {
            return Err(RwmError::InvalidMixture(format!(
                "got {} locations, {} scales and {} weights",
                k,
                self.scales.len(),
                self.weights.len()
            )));
        }
        if let Some(loc) = self.locs.iter().find(|l| !l.is_finite()) {
            return Err(RwmError::InvalidMixture(format!(
                "location {loc} is not finite"
            )));
        }
        if let Some(scale) = self.scales.iter().find(|&&s| !(s.is_finite() && s > 0.0)) {
            return Err(RwmError::InvalidMixture(format!(
                "scale {scale} must be finite and positive"
            )));
        }
        if let Some(weight) = self.weights.iter().find(|&&w| !(w.is_finite() && w > 0.0)) {
            return Err(RwmError::InvalidMixture(format!(
                "weight {weight} must be finite and positive"
            )));
        }
        Ok(())
    }
}

/// How a requested number of samples maps onto the number of yielded draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CountPolicy {
    /// The initial draw plus one draw per requested sample.
    #[default]
    Exact,
    /// Reproduces the historical loop boundary, which stops only once the draw
    /// index exceeds the requested count and so yields one extra draw.
    Legacy,
}

impl CountPolicy {
    pub fn n_draws(self, samples: usize) -> usize {
        match self {
            CountPolicy::Exact => samples + 1,
            CountPolicy::Legacy => samples + 2,
        }
    }
}

/// Everything the command line controls about a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunConfig {
    pub samples: usize,
    pub chains: usize,
    pub dims: usize,
    pub step_size: f64,
    pub seed: Option<u64>,
    pub count_policy: CountPolicy,
    pub convention: Convention,
    pub progress: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            samples: DEFAULT_SAMPLES as usize,
            chains: DEFAULT_CHAINS as usize,
            dims: DEFAULT_DIMS as usize,
            step_size: DEFAULT_STEP_SIZE,
            seed: None,
            count_policy: CountPolicy::default(),
            convention: Convention::default(),
            progress: false,
        }
    }
}

impl RunConfig {
    /// Validates the raw counts and fills in defaults for everything else.
    pub fn new(samples: i64, chains: i64, dims: i64) -> Result<Self> {
        Ok(Self {
            samples: validate_sample_count(samples)?,
            chains: usize::try_from(chains)
                .ok()
                .filter(|&c| c > 0)
                .ok_or(RwmError::InvalidChainCount(chains))?,
            dims: usize::try_from(dims)
                .ok()
                .filter(|&d| d > 0)
                .ok_or(RwmError::InvalidDimCount(dims))?,
            ..Self::default()
        })
    }

    /// Total number of draws a run yields, the initial one included.
    pub fn n_draws(&self) -> usize {
        self.count_policy.n_draws(self.samples)
    }
}

pub fn validate_sample_count(samples: i64) -> Result<usize> {
    usize::try_from(samples).map_err(|_| RwmError::InvalidSampleCount(samples))
}

pub fn validate_step_size(step_size: f64) -> Result<f64> {
    if step_size.is_finite() && step_size > 0.0 {
        Ok(step_size)
    } else {
        Err(RwmError::InvalidStepSize(step_size))
    }
}
