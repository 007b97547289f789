/*!
Target log-densities for the random-walk sampler.

A target maps a batch of positions, laid out as a `D × C` matrix with one column per
chain, to one log-density value per chain. The whole batch is evaluated in a single
call.

This module is generic over the floating-point precision (e.g., `f32` or `f64`) using
the [`num_traits::Float`] trait.

# Examples

```rust
use ndarray::{array, Array1, Array2};
use rwm_mcmc::config::MixtureConfig;
use rwm_mcmc::distributions::{Convention, GaussianMixture, IsotropicGaussian, LogDensity};

// Any closure over the position batch is a target.
let flat = |x: &Array2<f64>| Array1::<f64>::zeros(x.ncols());
assert_eq!(flat.log_density(&Array2::zeros((2, 3))).unwrap().len(), 3);

let gauss = IsotropicGaussian::new(1.0).unwrap();
let lp = gauss.log_density(&array![[1.0, 0.0]]).unwrap();
assert_eq!(lp, array![-0.5, 0.0]);

let mixture = GaussianMixture::<f64>::new(&MixtureConfig::default(), Convention::Standard).unwrap();
let lp = mixture.log_density(&Array2::zeros((1, 5))).unwrap();
assert_eq!(lp.len(), 5);
```
*/

use clap::ValueEnum;
use ndarray::{Array1, Array2, Axis};
use num_traits::Float;
use std::f64::consts::PI;

use crate::config::MixtureConfig;
use crate::error::{Result, RwmError};

/// A batched, unnormalized log-density.
///
/// Implementations must be deterministic and side-effect free. They receive the
/// positions of all chains at once (`D × C`) and return `C` values.
pub trait LogDensity<T> {
    fn log_density(&self, positions: &Array2<T>) -> Result<Array1<T>>;
}

impl<T, F> LogDensity<T> for F
where
    F: Fn(&Array2<T>) -> Array1<T>,
{
    fn log_density(&self, positions: &Array2<T>) -> Result<Array1<T>> {
        Ok(self(positions))
    }
}

/**
An isotropic Gaussian centred at the origin, evaluated independently per chain.

The log-density is unnormalized: `-0.5 * Σ_d x_d² / std²`. With `std = 1` this is the
standard normal reference target.
*/
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IsotropicGaussian<T: Float> {
    pub std: T,
}

impl<T: Float> IsotropicGaussian<T> {
    /// Fails with [`RwmError::InvalidStd`] unless `std` is finite and positive.
    pub fn new(std: T) -> Result<Self> {
        if !(std.is_finite() && std > T::zero()) {
            return Err(RwmError::InvalidStd(std.to_f64().unwrap_or(f64::NAN)));
        }
        Ok(Self { std })
    }
}

impl<T: Float> LogDensity<T> for IsotropicGaussian<T> {
    fn log_density(&self, positions: &Array2<T>) -> Result<Array1<T>> {
        let half = T::from(0.5).unwrap();
        let var = self.std * self.std;
        Ok(positions.map_axis(Axis(0), |column| {
            let sum_sq = column.iter().fold(T::zero(), |acc, &x| acc + x * x);
            -half * sum_sq / var
        }))
    }
}

/// Sign convention of a mixture log-density.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Convention {
    /// Returns `-log p(x)`. This is what the reference mixture target historically
    /// returned, so the sampler explores regions of *low* mixture density.
    #[default]
    Negated,
    /// Returns `log p(x)`.
    Standard,
}

/**
A Gaussian mixture with one location, scale and weight per component.

For a position with `K` rows (one per component), row `k` of every column is scored
against component `k` only, and the per-chain value is
`logsumexp_k(log w_k + log N(x[k]; loc_k, scale_k))`. A position with a single row is
broadcast against all components, which is the plain one-dimensional mixture density.
Any other row count is rejected.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianMixture<T: Float> {
    locs: Vec<T>,
    scales: Vec<T>,
    log_weights: Vec<T>,
    pub convention: Convention,
}

impl<T: Float> GaussianMixture<T> {
    pub fn new(config: &MixtureConfig, convention: Convention) -> Result<Self> {
        config.validate()?;
        let cast = |values: &[f64]| -> Result<Vec<T>> {
            values
                .iter()
                .map(|&v| {
                    T::from(v).ok_or_else(|| {
                        RwmError::InvalidMixture(format!("{v} is not representable"))
                    })
                })
                .collect()
        };
        Ok(Self {
            locs: cast(&config.locs)?,
            scales: cast(&config.scales)?,
            log_weights: cast(&config.weights)?.into_iter().map(T::ln).collect(),
            convention,
        })
    }

    pub fn n_components(&self) -> usize {
        self.locs.len()
    }
}

impl<T: Float> LogDensity<T> for GaussianMixture<T> {
    fn log_density(&self, positions: &Array2<T>) -> Result<Array1<T>> {
        let k = self.n_components();
        let n_dims = positions.nrows();
        if n_dims != k && n_dims != 1 {
            return Err(RwmError::shape(
                format!("1 or {k} rows"),
                format!("{n_dims} rows"),
            ));
        }
        let sign = match self.convention {
            Convention::Negated => -T::one(),
            Convention::Standard => T::one(),
        };
        Ok(positions.map_axis(Axis(0), |column| {
            let terms = (0..k).map(|j| {
                let x = if n_dims == 1 { column[0] } else { column[j] };
                self.log_weights[j] + normal_log_pdf(x, self.locs[j], self.scales[j])
            });
            sign * log_sum_exp(terms)
        }))
    }
}

/// Normalized log-density of `N(loc, scale²)` at `x`.
pub fn normal_log_pdf<T: Float>(x: T, loc: T, scale: T) -> T {
    let half = T::from(0.5).unwrap();
    let z = (x - loc) / scale;
    -half * z * z - scale.ln() - half * (T::from(2.0 * PI).unwrap()).ln()
}

/// Numerically stable `log Σ exp(v)`.
///
/// An empty input or all `-inf` gives `-inf`, any `+inf` gives `+inf`, and NaN
/// propagates.
pub fn log_sum_exp<T: Float, I: IntoIterator<Item = T>>(values: I) -> T {
    let values: Vec<T> = values.into_iter().collect();
    if values.iter().any(|v| v.is_nan()) {
        return T::nan();
    }
    let max = values.iter().copied().fold(T::neg_infinity(), T::max);
    if max.is_infinite() {
        return max;
    }
    let sum = values
        .iter()
        .fold(T::zero(), |acc, &v| acc + (v - max).exp());
    max + sum.ln()
}
