/*!
# Random-Walk Metropolis Sampler

This module implements a batched Random-Walk Metropolis sampler for any target that
implements [`LogDensity`]. All chains live in one `D × C` position matrix (one column
per chain) and share a single batched log-density evaluation per step. Everything else
is per chain: every chain owns its random number generator and makes its own accept
decision.

## Overview

- **Target (`D`)**: provides the (unnormalized) log-density for a batch of positions.
- **Proposal**: every cell of the position matrix is perturbed by independent
  `N(0, step_size²)` noise. The default step size is `0.1` and never adapts.
- **Acceptance**: chain `c` accepts iff `ln(u) < lp_proposed[c] - lp_current[c]` with
  `u ~ Uniform[0, 1)`. A draw of exactly `u = 0` is rejected. A NaN difference compares
  false and is rejected too, so a chain whose target returns NaN stalls instead of
  crashing the sampler.
- **Lazy stream**: the sampler is an [`Iterator`] that first yields the initial state and
  then one draw per step, forever. The consumer decides when to stop.
- **Reproducibility**: [`RandomWalkMetropolis::set_seed`] seeds chain `c` with
  `seed + c`. A chain therefore follows the same trajectory whether it runs alone or
  as a column of a batch, as long as the target scores columns independently.

## Example Usage

```rust
use ndarray::Array2;
use rwm_mcmc::distributions::IsotropicGaussian;
use rwm_mcmc::random_walk_metropolis::RandomWalkMetropolis;

let target = IsotropicGaussian::new(1.0).unwrap();
let sampler = RandomWalkMetropolis::new(target, Array2::<f64>::zeros((2, 4)))
    .unwrap()
    .set_seed(42);

let draws: Vec<_> = sampler.take(11).collect::<Result<_, _>>().unwrap();
assert_eq!(draws.len(), 11);
assert!(draws[0].is_initial());
assert_eq!(draws[10].position.dim(), (2, 4));
```
*/

use ndarray::{Array1, Array2, Array3, Axis, Zip};
use num_traits::Float;
use rand::rngs::SmallRng;
use rand::{thread_rng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Standard, StandardNormal};

use crate::config::DEFAULT_STEP_SIZE;
use crate::core::{ChainState, Draw};
use crate::distributions::LogDensity;
use crate::error::{Result, RwmError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// The initial state has not been yielded yet.
    Initialized,
    Stepping,
}

/**
The Random-Walk Metropolis sampler.

# Type Parameters
- `T`: The floating-point type (e.g. `f32` or `f64`).
- `D`: The target distribution type. Must implement [`LogDensity`].

# Examples

```rust
use ndarray::Array2;
use rwm_mcmc::distributions::IsotropicGaussian;
use rwm_mcmc::random_walk_metropolis::RandomWalkMetropolis;

let target = IsotropicGaussian::new(1.0).unwrap();
let mut sampler = RandomWalkMetropolis::new(target, Array2::<f64>::zeros((1, 2)))
    .unwrap()
    .set_seed(7);
let accepted = sampler.step().unwrap();
assert_eq!(accepted.len(), 2);
assert_eq!(sampler.chain_seed(1), 8);
```
*/
#[derive(Debug, Clone)]
pub struct RandomWalkMetropolis<T: Float, D>
where
    StandardNormal: Distribution<T>,
{
    /// The target distribution we want to sample from.
    pub target: D,
    state: ChainState<T>,
    step_size: T,
    proposal: Normal<T>,
    /// One generator per chain; chain `c` is seeded with `seed + c`.
    rngs: Vec<SmallRng>,
    /// The global random seed.
    pub seed: u64,
    phase: Phase,
    n_yielded: usize,
}

impl<T, D> RandomWalkMetropolis<T, D>
where
    T: Float,
    D: LogDensity<T>,
    StandardNormal: Distribution<T>,
    Standard: Distribution<T>,
{
    /**
    Creates a sampler whose chains start at the columns of `initial_position`.

    The target is evaluated once here. Fails with [`RwmError::InvalidShape`] if the
    position is empty or the target returns a vector whose length differs from the
    number of columns, and with whatever error the target itself raises.
    */
    pub fn new(target: D, initial_position: Array2<T>) -> Result<Self> {
        let (n_dims, n_chains) = initial_position.dim();
        if n_dims == 0 || n_chains == 0 {
            return Err(RwmError::shape(
                "a non-empty D x C position",
                format!("{n_dims} x {n_chains}"),
            ));
        }
        let log_density = evaluate(&target, &initial_position)?;
        let step_size =
            T::from(DEFAULT_STEP_SIZE).ok_or(RwmError::InvalidStepSize(DEFAULT_STEP_SIZE))?;
        let proposal = Normal::new(T::zero(), step_size)
            .map_err(|_| RwmError::InvalidStepSize(DEFAULT_STEP_SIZE))?;
        let seed = thread_rng().gen::<u64>();

        Ok(Self {
            target,
            state: ChainState {
                position: initial_position,
                log_density,
            },
            step_size,
            proposal,
            rngs: chain_rngs(seed, n_chains),
            seed,
            phase: Phase::Initialized,
            n_yielded: 0,
        })
    }

    /// Sets a new global seed and reseeds every chain with `seed + c`.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rngs = chain_rngs(seed, self.n_chains());
        self
    }

    /// Sets the standard deviation of the random-walk perturbation.
    pub fn set_step_size(mut self, step_size: T) -> Result<Self> {
        let as_f64 = step_size.to_f64().unwrap_or(f64::NAN);
        if !(step_size.is_finite() && step_size > T::zero()) {
            return Err(RwmError::InvalidStepSize(as_f64));
        }
        self.proposal =
            Normal::new(T::zero(), step_size).map_err(|_| RwmError::InvalidStepSize(as_f64))?;
        self.step_size = step_size;
        Ok(self)
    }

    pub fn step_size(&self) -> T {
        self.step_size
    }

    pub fn state(&self) -> &ChainState<T> {
        &self.state
    }

    pub fn n_dims(&self) -> usize {
        self.state.n_dims()
    }

    pub fn n_chains(&self) -> usize {
        self.state.n_chains()
    }

    /// Seed of chain `chain`'s generator.
    pub fn chain_seed(&self, chain: usize) -> u64 {
        self.seed.wrapping_add(chain as u64)
    }

    /**
    Performs one Random-Walk Metropolis update of every chain and returns the per-chain
    accept decisions.

    1. Each chain perturbs its column with `N(0, step_size²)` noise from its own RNG.
    2. The target scores the whole proposal batch in one call.
    3. Each chain draws `u` from its own RNG and accepts iff `ln(u) < Δ`.
    4. Accepted columns (position and log-density) replace the current ones.

    If the target fails, the error is returned and the state is left untouched.
    */
    pub fn step(&mut self) -> Result<Array1<bool>> {
        let mut proposal = self.state.position.clone();
        for (mut column, rng) in proposal.axis_iter_mut(Axis(1)).zip(self.rngs.iter_mut()) {
            column.mapv_inplace(|x| x + self.proposal.sample(rng));
        }
        let proposal_log_density = evaluate(&self.target, &proposal)?;

        let uniforms: Array1<T> = self.rngs.iter_mut().map(|rng| rng.gen::<T>()).collect();
        let accepted = Zip::from(&proposal_log_density)
            .and(&self.state.log_density)
            .and(&uniforms)
            .map_collect(|&proposed, &current, &u| accepts(u, proposed - current));

        Zip::from(self.state.position.columns_mut())
            .and(proposal.columns())
            .and(&accepted)
            .for_each(|mut current, proposed, &accept| {
                if accept {
                    current.assign(&proposed);
                }
            });
        Zip::from(&mut self.state.log_density)
            .and(&proposal_log_density)
            .and(&accepted)
            .for_each(|current, &proposed, &accept| {
                if accept {
                    *current = proposed;
                }
            });

        Ok(accepted)
    }

    /**
    Runs `n_discard` steps of burn-in, then collects the positions after each of the
    next `n_collect` steps into an array of shape `(n_collect, D, C)`.

    This bypasses the iterator, so the initial state is never part of the output.
    */
    pub fn run(&mut self, n_collect: usize, n_discard: usize) -> Result<Array3<T>> {
        for _ in 0..n_discard {
            self.step()?;
        }
        let mut out = Array3::<T>::zeros((n_collect, self.n_dims(), self.n_chains()));
        for mut slot in out.axis_iter_mut(Axis(0)) {
            self.step()?;
            slot.assign(&self.state.position);
        }
        Ok(out)
    }
}

impl<T, D> Iterator for RandomWalkMetropolis<T, D>
where
    T: Float,
    D: LogDensity<T>,
    StandardNormal: Distribution<T>,
    Standard: Distribution<T>,
{
    type Item = Result<Draw<T>>;

    /// Yields the initial state on the first call and one stepped state on every call
    /// after that. Never returns `None`.
    fn next(&mut self) -> Option<Self::Item> {
        let accepted = match self.phase {
            Phase::Initialized => {
                self.phase = Phase::Stepping;
                None
            }
            Phase::Stepping => match self.step() {
                Ok(accepted) => Some(accepted),
                Err(e) => return Some(Err(e)),
            },
        };
        let draw = Draw {
            index: self.n_yielded,
            position: self.state.position.clone(),
            log_density: self.state.log_density.clone(),
            accepted,
        };
        self.n_yielded += 1;
        Some(Ok(draw))
    }
}

fn chain_rngs(seed: u64, n_chains: usize) -> Vec<SmallRng> {
    (0..n_chains)
        .map(|c| SmallRng::seed_from_u64(seed.wrapping_add(c as u64)))
        .collect()
}

fn evaluate<T, D: LogDensity<T>>(target: &D, positions: &Array2<T>) -> Result<Array1<T>> {
    let log_density = target.log_density(positions)?;
    if log_density.len() != positions.ncols() {
        return Err(RwmError::shape(
            format!("{} log-density values", positions.ncols()),
            format!("{}", log_density.len()),
        ));
    }
    Ok(log_density)
}

/// Metropolis test for one chain. `u = 0` is rejected outright instead of relying on
/// `ln(0) = -inf`.
fn accepts<T: Float>(u: T, log_ratio: T) -> bool {
    u > T::zero() && u.ln() < log_ratio
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::IsotropicGaussian;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::f64::consts::PI;

    const SEED: u64 = 42;

    type GaussianSampler = RandomWalkMetropolis<f64, IsotropicGaussian<f64>>;

    fn gaussian_sampler(initial: Array2<f64>) -> GaussianSampler {
        RandomWalkMetropolis::new(IsotropicGaussian::new(1.0).unwrap(), initial)
            .unwrap()
            .set_seed(SEED)
    }

    #[test]
    fn test_accepts() {
        assert!(accepts(0.5_f64, 0.0));
        assert!(!accepts(0.5_f64, -1.0));
        assert!(accepts(0.5_f64, -0.5));
        assert!(!accepts(0.0_f64, 5.0), "u = 0 must be rejected");
        assert!(!accepts(0.0_f64, f64::INFINITY), "u = 0 must be rejected");
        assert!(!accepts(0.5_f64, f64::NAN));
        assert!(accepts(0.5_f64, f64::INFINITY));
    }

    #[test]
    fn test_initial_draw_comes_first() {
        let initial = array![[1.0, -2.0, 3.0]];
        let mut sampler = gaussian_sampler(initial.clone());
        let first = sampler.next().unwrap().unwrap();
        assert_eq!(first.index, 0);
        assert!(first.is_initial());
        assert_eq!(first.position, initial);
        assert_eq!(first.log_density, array![-0.5, -2.0, -4.5]);

        let second = sampler.next().unwrap().unwrap();
        assert_eq!(second.index, 1);
        assert_eq!(second.accepted.as_ref().map(|a| a.len()), Some(3));
    }

    #[test]
    fn test_same_seed_is_bit_identical() {
        let initial = Array2::<f64>::zeros((4, 4));
        let a: Vec<Draw<f64>> = gaussian_sampler(initial.clone())
            .take(300)
            .collect::<Result<_>>()
            .unwrap();
        let b: Vec<Draw<f64>> = gaussian_sampler(initial)
            .take(300)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_seeds_differ() {
        let initial = Array2::<f64>::zeros((1, 2));
        let a = gaussian_sampler(initial.clone()).run(50, 0).unwrap();
        let b = gaussian_sampler(initial).set_seed(SEED + 100).run(50, 0).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_log_density_tracks_position() {
        let mut sampler = gaussian_sampler(Array2::zeros((3, 5)));
        for _ in 0..200 {
            sampler.step().unwrap();
        }
        let state = sampler.state();
        let recomputed = IsotropicGaussian::new(1.0)
            .unwrap()
            .log_density(&state.position)
            .unwrap();
        assert_eq!(state.log_density, recomputed);
    }

    #[test]
    fn test_batch_column_matches_single_chain() {
        let initial = array![[0.0, 1.0, -1.0], [0.5, 2.0, -0.5]];
        let batch = gaussian_sampler(initial.clone());
        let single = gaussian_sampler(initial.column(2).to_owned().insert_axis(Axis(1)))
            .set_seed(SEED + 2);

        for (b, s) in batch.take(500).zip(single.take(500)) {
            let (b, s) = (b.unwrap(), s.unwrap());
            assert_eq!(b.position.column(2), s.position.column(0));
            assert_eq!(b.log_density[2], s.log_density[0]);
        }
    }

    #[test]
    fn test_snapshot_mutation_does_not_leak() {
        let initial = Array2::<f64>::zeros((2, 2));
        let mut sampler = gaussian_sampler(initial.clone());
        let mut twin = gaussian_sampler(initial);

        let mut draw = sampler.next().unwrap().unwrap();
        twin.next().unwrap().unwrap();
        draw.position.fill(1e6);
        draw.log_density.fill(f64::NAN);

        for _ in 0..20 {
            assert_eq!(sampler.next().unwrap().unwrap(), twin.next().unwrap().unwrap());
        }
    }

    #[test]
    fn test_constant_target_always_accepts() {
        let flat = |x: &Array2<f64>| Array1::<f64>::zeros(x.ncols());
        let mut sampler = RandomWalkMetropolis::new(flat, Array2::<f64>::zeros((2, 8)))
            .unwrap()
            .set_seed(SEED);
        let mut n_accepted = 0;
        for _ in 0..1_000 {
            n_accepted += sampler.step().unwrap().iter().filter(|&&a| a).count();
        }
        // Only u == 0 could reject, which a 53-bit uniform essentially never draws.
        assert_eq!(n_accepted, 8_000);
    }

    #[test]
    fn test_acceptance_rate_matches_closed_form() {
        // For a N(0, 1) target and N(0, s²) proposals, the stationary acceptance rate
        // is (2/pi) * atan(2/s).
        const STEP: f64 = 2.4;
        const N_CHAINS: usize = 16;
        const N_STEPS: usize = 4_000;

        let mut sampler = gaussian_sampler(Array2::zeros((1, N_CHAINS)))
            .set_step_size(STEP)
            .unwrap();
        sampler.run(0, 500).unwrap();

        let mut n_accepted = 0;
        for _ in 0..N_STEPS {
            n_accepted += sampler.step().unwrap().iter().filter(|&&a| a).count();
        }
        let rate = n_accepted as f64 / (N_STEPS * N_CHAINS) as f64;
        let expected = 2.0 / PI * (2.0 / STEP).atan();
        assert_abs_diff_eq!(rate, expected, epsilon = 0.02);
    }

    #[test]
    fn test_nan_target_stalls_without_panicking() {
        let nan = |x: &Array2<f64>| Array1::<f64>::from_elem(x.ncols(), f64::NAN);
        let initial = array![[0.25, -0.25]];
        let mut sampler = RandomWalkMetropolis::new(nan, initial.clone())
            .unwrap()
            .set_seed(SEED);
        for draw in sampler.by_ref().take(100) {
            let draw = draw.unwrap();
            assert_eq!(draw.position, initial);
            if let Some(accepted) = draw.accepted {
                assert!(accepted.iter().all(|&a| !a));
            }
        }
        assert_eq!(
            sampler.state().check_finite(),
            Err(RwmError::NumericDegeneracy { n_chains: 2 })
        );
    }

    #[test]
    fn test_nan_in_one_chain_only_stalls_that_chain() {
        let target = |x: &Array2<f64>| {
            let mut lp = x.map_axis(Axis(0), |col| -0.5 * col.dot(&col));
            lp[0] = f64::NAN;
            lp
        };
        let initial = Array2::<f64>::zeros((1, 2));
        let mut sampler = RandomWalkMetropolis::new(target, initial)
            .unwrap()
            .set_seed(SEED);
        let out = sampler.run(200, 0).unwrap();
        assert!(out.index_axis(Axis(2), 0).iter().all(|&x| x == 0.0));
        assert!(out.index_axis(Axis(2), 1).iter().any(|&x| x != 0.0));
        assert!(sampler.state().check_finite().is_ok());
    }

    #[test]
    fn test_target_error_aborts_step_and_keeps_state() {
        struct Failing;
        impl LogDensity<f64> for Failing {
            fn log_density(&self, positions: &Array2<f64>) -> Result<Array1<f64>> {
                if positions.iter().all(|&x| x == 0.0) {
                    Ok(Array1::zeros(positions.ncols()))
                } else {
                    Err(RwmError::Target("refusing to evaluate".into()))
                }
            }
        }
        let mut sampler = RandomWalkMetropolis::new(Failing, Array2::<f64>::zeros((1, 3)))
            .unwrap()
            .set_seed(SEED);
        assert!(sampler.next().unwrap().is_ok());
        assert_eq!(
            sampler.next().unwrap().unwrap_err(),
            RwmError::Target("refusing to evaluate".into())
        );
        assert_eq!(sampler.state().position, Array2::<f64>::zeros((1, 3)));
        // The stream keeps going: a later pull tries a fresh step.
        assert!(sampler.next().unwrap().is_err());
    }

    #[test]
    fn test_wrong_output_length_is_shape_error() {
        let short = |_: &Array2<f64>| Array1::<f64>::zeros(1);
        let res = RandomWalkMetropolis::new(short, Array2::<f64>::zeros((2, 3)));
        assert!(matches!(res, Err(RwmError::InvalidShape { .. })));
    }

    #[test]
    fn test_empty_position_is_shape_error() {
        let target = IsotropicGaussian::new(1.0).unwrap();
        let res = RandomWalkMetropolis::new(target, Array2::<f64>::zeros((0, 3)));
        assert!(matches!(res, Err(RwmError::InvalidShape { .. })));
        let res = RandomWalkMetropolis::new(target, Array2::<f64>::zeros((2, 0)));
        assert!(matches!(res, Err(RwmError::InvalidShape { .. })));
    }

    #[test]
    fn test_step_size() {
        let sampler = gaussian_sampler(Array2::zeros((1, 1)));
        assert_eq!(sampler.step_size(), 0.1);
        assert!(gaussian_sampler(Array2::zeros((1, 1))).set_step_size(0.0).is_err());
        assert!(gaussian_sampler(Array2::zeros((1, 1))).set_step_size(f64::NAN).is_err());
        let sampler = sampler.set_step_size(0.5).unwrap();
        assert_eq!(sampler.step_size(), 0.5);
    }

    #[test]
    fn test_default_step_size_moves_slowly() {
        let mut sampler = gaussian_sampler(Array2::zeros((1, 1)));
        let out = sampler.run(1, 0).unwrap();
        // One N(0, 0.1²) move stays well inside ±1.
        assert!(out[[0, 0, 0]].abs() < 1.0);
    }

    #[test]
    fn test_f32_sampler() {
        let target = IsotropicGaussian::new(1.0_f32).unwrap();
        let mut sampler = RandomWalkMetropolis::new(target, Array2::<f32>::zeros((2, 2)))
            .unwrap()
            .set_seed(SEED);
        let out = sampler.run(100, 10).unwrap();
        assert_eq!(out.shape(), &[100, 2, 2]);
        assert!(out.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_set_seed_assigns_chain_seeds() {
        let sampler = gaussian_sampler(Array2::zeros((1, 3)));
        assert_eq!(sampler.seed, SEED);
        assert_eq!(sampler.chain_seed(0), 42);
        assert_eq!(sampler.chain_seed(2), 44);
        let wrapped = sampler.set_seed(u64::MAX);
        assert_eq!(wrapped.chain_seed(1), 0);
    }
}
