//! Per-chain bookkeeping over a stream of draws: acceptance counts, a sliding-window
//! acceptance probability and running moments of every `(dimension, chain)` cell.

use ndarray::prelude::*;
use ndarray::Zip;
use ndarray_stats::QuantileExt;
use num_traits::ToPrimitive;
use std::collections::VecDeque;

use crate::core::Draw;
use crate::error::{Result, RwmError};

const ACCEPT_WINDOW: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct AcceptanceTracker {
    n_dims: usize,
    n_chains: usize,
    n_draws: u64,
    n_steps: u64,
    n_accepted: Array1<u64>, // n_chains
    mean: Array2<f64>,       // n_dims x n_chains
    mean_sq: Array2<f64>,    // n_dims x n_chains
    accept_window: VecDeque<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainStats {
    pub n_draws: u64,
    pub n_steps: u64,
    pub acceptance_rate: Array1<f64>, // n_chains
    pub p_accept: f32,
    pub mean: Array2<f64>, // n_dims x n_chains
    pub sm2: Array2<f64>,  // n_dims x n_chains
}

impl AcceptanceTracker {
    pub fn new(n_dims: usize, n_chains: usize) -> Self {
        Self {
            n_dims,
            n_chains,
            n_draws: 0,
            n_steps: 0,
            n_accepted: Array1::zeros(n_chains),
            mean: Array2::zeros((n_dims, n_chains)),
            mean_sq: Array2::zeros((n_dims, n_chains)),
            accept_window: VecDeque::with_capacity(ACCEPT_WINDOW + 1),
        }
    }

    /// Folds one draw into the running statistics.
    pub fn observe<T: ToPrimitive + Copy>(&mut self, draw: &Draw<T>) -> Result<()> {
        if draw.position.dim() != (self.n_dims, self.n_chains) {
            return Err(RwmError::shape(
                format!("{} x {} draw", self.n_dims, self.n_chains),
                format!("{} x {} draw", draw.position.nrows(), draw.position.ncols()),
            ));
        }
        self.n_draws += 1;

        if let Some(accepted) = &draw.accepted {
            self.n_steps += 1;
            Zip::from(&mut self.n_accepted)
                .and(accepted)
                .for_each(|count, &acc| *count += acc as u64);
            let n_acc = accepted.iter().filter(|&&acc| acc).count();
            self.accept_window
                .push_back(n_acc as f32 / self.n_chains.max(1) as f32);
            if self.accept_window.len() > ACCEPT_WINDOW {
                self.accept_window.pop_front();
            }
        }

        let n = self.n_draws as f64;
        let x = draw.position.mapv(|v| v.to_f64().unwrap_or(f64::NAN));
        self.mean = (&self.mean * (n - 1.0) + &x) / n;
        self.mean_sq = (&self.mean_sq * (n - 1.0) + &x.mapv(|v| v * v)) / n;
        Ok(())
    }

    /// Fraction of proposals each chain accepted so far. Zero before the first step.
    pub fn acceptance_rates(&self) -> Array1<f64> {
        if self.n_steps == 0 {
            return Array1::zeros(self.n_chains);
        }
        self.n_accepted.mapv(|a| a as f64 / self.n_steps as f64)
    }

    /// Acceptance probability over the last steps, pooled across chains.
    pub fn recent_p_accept(&self) -> f32 {
        if self.accept_window.is_empty() {
            return 0.0;
        }
        self.accept_window.iter().sum::<f32>() / self.accept_window.len() as f32
    }

    /// Unbiased per-cell variance of the observed positions.
    pub fn sm2(&self) -> Array2<f64> {
        if self.n_draws < 2 {
            return Array2::zeros((self.n_dims, self.n_chains));
        }
        let n = self.n_draws as f64;
        (&self.mean_sq - &self.mean.mapv(|m| m * m)) * n / (n - 1.0)
    }

    /// Chains that have rejected every proposal so far.
    pub fn stalled_chains(&self) -> Vec<usize> {
        if self.n_steps == 0 {
            return Vec::new();
        }
        self.n_accepted
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count == 0)
            .map(|(c, _)| c)
            .collect()
    }

    pub fn stats(&self) -> ChainStats {
        ChainStats {
            n_draws: self.n_draws,
            n_steps: self.n_steps,
            acceptance_rate: self.acceptance_rates(),
            p_accept: self.recent_p_accept(),
            mean: self.mean.clone(),
            sm2: self.sm2(),
        }
    }
}

impl ChainStats {
    pub fn min_acceptance_rate(&self) -> Option<f64> {
        self.acceptance_rate.min().ok().copied()
    }

    pub fn max_acceptance_rate(&self) -> Option<f64> {
        self.acceptance_rate.max().ok().copied()
    }

    /// Mean acceptance rate across chains.
    pub fn mean_acceptance_rate(&self) -> Option<f64> {
        self.acceptance_rate.mean()
    }
}
