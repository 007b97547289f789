/*!
Chain state, the draws a sampler yields, and the drivers that pull a bounded number of
draws out of an unbounded sampler.

The drivers accept any iterator of draws, so they work with a
[`RandomWalkMetropolis`](crate::random_walk_metropolis::RandomWalkMetropolis) passed by
mutable reference just as well as with an adapted or filtered stream.
*/

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{s, Array1, Array2, Array3, Axis};
use num_traits::Float;

use crate::config::{MixtureConfig, RunConfig};
use crate::distributions::GaussianMixture;
use crate::error::{Result, RwmError};
use crate::random_walk_metropolis::RandomWalkMetropolis;
use crate::stats::{AcceptanceTracker, ChainStats};

/// Current positions (`D × C`) of all chains and their log-densities (`C`).
#[derive(Debug, Clone, PartialEq)]
pub struct ChainState<T> {
    pub position: Array2<T>,
    pub log_density: Array1<T>,
}

impl<T: Float> ChainState<T> {
    pub fn n_dims(&self) -> usize {
        self.position.nrows()
    }

    pub fn n_chains(&self) -> usize {
        self.position.ncols()
    }

    /// Per chain, whether its log-density is finite.
    pub fn finite_chains(&self) -> Array1<bool> {
        self.log_density.mapv(|lp| lp.is_finite())
    }

    /// Fails with [`RwmError::NumericDegeneracy`] when no chain has a finite
    /// log-density. Such a sampler keeps running but can never move again.
    pub fn check_finite(&self) -> Result<()> {
        if self.n_chains() > 0 && self.log_density.iter().all(|lp| !lp.is_finite()) {
            return Err(RwmError::NumericDegeneracy {
                n_chains: self.n_chains(),
            });
        }
        Ok(())
    }
}

/// One yielded draw. It owns its data, so editing it never reaches back into the
/// sampler.
#[derive(Debug, Clone, PartialEq)]
pub struct Draw<T> {
    /// Position of this draw in the stream; the initial state has index 0.
    pub index: usize,
    pub position: Array2<T>,
    pub log_density: Array1<T>,
    /// Per-chain accept decisions of the step that produced this draw, `None` for the
    /// initial state.
    pub accepted: Option<Array1<bool>>,
}

impl<T: Float> Draw<T> {
    pub fn is_initial(&self) -> bool {
        self.accepted.is_none()
    }

    /// Whether every coordinate of the position is finite.
    pub fn is_finite(&self) -> bool {
        self.position.iter().all(|x| x.is_finite())
    }
}

/// Pulls up to `n_draws` draws and stacks their positions into `(n, D, C)`.
///
/// `n` is `n_draws` unless the stream ends early, in which case only the draws that
/// actually arrived are returned.
pub fn run_draws<T, I>(draws: I, n_draws: usize) -> Result<(Array3<T>, ChainStats)>
where
    T: Float,
    I: Iterator<Item = Result<Draw<T>>>,
{
    collect_draws(draws, n_draws, None)
}

/// Like [`run_draws`], reporting progress and the recent acceptance probability on a
/// progress bar.
pub fn run_draws_with_progress<T, I>(
    draws: I,
    n_draws: usize,
    prefix: &str,
) -> Result<(Array3<T>, ChainStats)>
where
    T: Float,
    I: Iterator<Item = Result<Draw<T>>>,
{
    let pb = ProgressBar::new(n_draws as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{prefix:8} {bar:40.white} ETA {eta:3} | {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());

    let result = collect_draws(draws, n_draws, Some(&pb));
    match &result {
        Ok(_) => pb.finish_with_message("Done!"),
        Err(e) => pb.abandon_with_message(format!("Failed: {e}")),
    }
    result
}

fn collect_draws<T, I>(
    draws: I,
    n_draws: usize,
    pb: Option<&ProgressBar>,
) -> Result<(Array3<T>, ChainStats)>
where
    T: Float,
    I: Iterator<Item = Result<Draw<T>>>,
{
    let mut out: Option<Array3<T>> = None;
    let mut tracker: Option<AcceptanceTracker> = None;
    let mut filled = 0;

    for (i, draw) in draws.take(n_draws).enumerate() {
        let draw = draw?;
        let (n_dims, n_chains) = draw.position.dim();
        let tracker = tracker.get_or_insert_with(|| AcceptanceTracker::new(n_dims, n_chains));
        tracker.observe(&draw)?;

        out.get_or_insert_with(|| Array3::zeros((n_draws, n_dims, n_chains)))
            .index_axis_mut(Axis(0), i)
            .assign(&draw.position);
        filled = i + 1;

        if let Some(pb) = pb {
            pb.inc(1);
            pb.set_message(format!("p(accept)≈{:.2}", tracker.recent_p_accept()));
        }
    }

    let stats = tracker.unwrap_or_else(|| AcceptanceTracker::new(0, 0)).stats();
    let out = match out {
        Some(out) => out.slice_move(s![..filled, .., ..]),
        None => Array3::zeros((0, 0, 0)),
    };
    Ok((out, stats))
}

/// Result of a full run on the mixture target.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Stacked positions, `(n_draws, D, C)`.
    pub draws: Array3<f64>,
    pub stats: ChainStats,
    pub final_state: ChainState<f64>,
}

/// Runs the default mixture target from a `D × C` zero position as configured.
pub fn sample_mixture(config: &RunConfig) -> Result<RunOutput> {
    sample_mixture_with(config, &MixtureConfig::default())
}

pub fn sample_mixture_with(config: &RunConfig, mixture: &MixtureConfig) -> Result<RunOutput> {
    let target = GaussianMixture::<f64>::new(mixture, config.convention)?;
    let initial_position = Array2::<f64>::zeros((config.dims, config.chains));
    let mut sampler =
        RandomWalkMetropolis::new(target, initial_position)?.set_step_size(config.step_size)?;
    if let Some(seed) = config.seed {
        sampler = sampler.set_seed(seed);
    }

    let n_draws = config.n_draws();
    let (draws, stats) = if config.progress {
        run_draws_with_progress(&mut sampler, n_draws, "RWM")?
    } else {
        run_draws(&mut sampler, n_draws)?
    };

    Ok(RunOutput {
        draws,
        stats,
        final_state: sampler.state().clone(),
    })
}
