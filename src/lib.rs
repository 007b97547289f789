pub mod config;
pub mod core;
pub mod distributions;
pub mod error;
pub mod random_walk_metropolis;
pub mod stats;
