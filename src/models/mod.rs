//! # Models
//!
//! Bayesian models for randomized experiments with noncompliance. The
//! latent-ignorability sampler lives in [`li`]; [`matrix_ops`] holds the
//! row-subset cross products shared by its regression blocks.

pub mod li;
pub mod matrix_ops;
