//! Runs the Random-Walk Metropolis sampler on the four-component Gaussian mixture and
//! prints a short summary of the run.

use clap::Parser;
use rwm_mcmc::config::{
    validate_step_size, CountPolicy, RunConfig, DEFAULT_CHAINS, DEFAULT_DIMS, DEFAULT_SAMPLES,
    DEFAULT_STEP_SIZE,
};
use rwm_mcmc::core::sample_mixture;
use rwm_mcmc::distributions::Convention;
use rwm_mcmc::error::RwmError;
use std::error::Error;

#[derive(Parser, Debug)]
#[command(version, about = "Random-Walk Metropolis on a Gaussian mixture")]
struct Cli {
    /// Number of samples to take
    #[arg(long, default_value_t = DEFAULT_SAMPLES, allow_negative_numbers = true)]
    samples: i64,

    /// Number of chains to run
    #[arg(long, default_value_t = DEFAULT_CHAINS, allow_negative_numbers = true)]
    chains: i64,

    /// Rows of the position matrix (1 or one per mixture component)
    #[arg(long, default_value_t = DEFAULT_DIMS, allow_negative_numbers = true)]
    dims: i64,

    /// Standard deviation of the random-walk proposal
    #[arg(long, default_value_t = DEFAULT_STEP_SIZE)]
    step_size: f64,

    /// Seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// How the sample count maps to yielded draws
    #[arg(long, value_enum, default_value_t = CountPolicy::Exact)]
    count_policy: CountPolicy,

    /// Sign of the mixture log-density
    #[arg(long, value_enum, default_value_t = Convention::Negated)]
    convention: Convention,

    /// Show a progress bar
    #[arg(long)]
    progress: bool,
}

impl Cli {
    fn run_config(&self) -> Result<RunConfig, RwmError> {
        Ok(RunConfig {
            step_size: validate_step_size(self.step_size)?,
            seed: self.seed,
            count_policy: self.count_policy,
            convention: self.convention,
            progress: self.progress,
            ..RunConfig::new(self.samples, self.chains, self.dims)?
        })
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = cli.run_config()?;

    let output = sample_mixture(&config)?;
    let shape = output.draws.shape();
    println!(
        "Generated {} draws of shape {} x {} ({} chains)",
        shape[0], shape[1], shape[2], config.chains
    );

    for (c, rate) in output.stats.acceptance_rate.iter().enumerate() {
        let mean = output.stats.mean.column(c);
        println!("Chain {c}: p(accept)={rate:.3} mean={mean:.3}");
    }
    if let (Some(min), Some(mean), Some(max)) = (
        output.stats.min_acceptance_rate(),
        output.stats.mean_acceptance_rate(),
        output.stats.max_acceptance_rate(),
    ) {
        println!("Acceptance rate: mean {mean:.3}, range [{min:.3}, {max:.3}]");
    }

    if let Err(e) = output.final_state.check_finite() {
        eprintln!("Warning: {e}");
    }
    Ok(())
}
