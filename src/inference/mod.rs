//! Reusable inference and MCMC utility types.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::utils::usize_to_f64;

/// Errors for generic MCMC configuration.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InferenceError {
    #[error("iterations must be positive")]
    InvalidIterations,
    #[error("burn-in ({burn_in}) must be smaller than iterations ({iterations})")]
    InvalidBurnIn { burn_in: usize, iterations: usize },
    #[error("thinning interval must be positive")]
    InvalidThinning,
}

/// Generic MCMC schedule.
#[derive(Debug, Clone, Copy)]
pub struct McmcConfig {
    pub iterations: usize,
    pub burn_in: usize,
    pub thin: usize,
    pub seed: u64,
}

impl Default for McmcConfig {
    fn default() -> Self {
        Self {
            iterations: 4_000,
            burn_in: 1_000,
            thin: 4,
            seed: 42,
        }
    }
}

impl McmcConfig {
    /// # Errors
    ///
    /// Returns `InferenceError` if schedule values are invalid.
    pub const fn validate(self) -> Result<(), InferenceError> {
        if self.iterations == 0 {
            return Err(InferenceError::InvalidIterations);
        }
        if self.burn_in >= self.iterations {
            return Err(InferenceError::InvalidBurnIn {
                burn_in: self.burn_in,
                iterations: self.iterations,
            });
        }
        if self.thin == 0 {
            return Err(InferenceError::InvalidThinning);
        }
        Ok(())
    }

    /// Number of retained draws implied by this configuration.
    #[must_use]
    pub const fn retained_draws(self) -> usize {
        (self.iterations - self.burn_in) / self.thin
    }

    #[must_use]
    pub const fn retention_schedule(self) -> RetentionSchedule {
        RetentionSchedule::new(self.burn_in, self.thin)
    }
}

/// Warm-up and thinning state machine.
///
/// After burn-in a counter starts at one and a draw is retained each time the
/// counter reaches `thin`, after which it resets. Over `iterations` sweeps this
/// retains `floor((iterations - burn_in) / thin)` draws.
#[derive(Debug, Clone, Copy)]
pub struct RetentionSchedule {
    burn_in: usize,
    thin: usize,
    keep: usize,
}

impl RetentionSchedule {
    #[must_use]
    pub const fn new(burn_in: usize, thin: usize) -> Self {
        Self {
            burn_in,
            thin,
            keep: 1,
        }
    }

    /// Advance past the 1-based `iteration` and report whether it is retained.
    pub const fn advance(&mut self, iteration: usize) -> bool {
        if iteration <= self.burn_in {
            return false;
        }
        if self.keep >= self.thin {
            self.keep = 1;
            true
        } else {
            self.keep += 1;
            false
        }
    }
}

/// Proposal counters for a single Metropolis-Hastings block.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProposalStats {
    pub proposed: usize,
    pub accepted: usize,
}

impl ProposalStats {
    /// Record one proposal and whether it was accepted.
    pub const fn record(&mut self, accepted: bool) {
        self.proposed += 1;
        if accepted {
            self.accepted += 1;
        }
    }

    /// Acceptance rate in `[0, 1]`, or `0` if no proposals were made.
    #[must_use]
    pub fn acceptance_rate(self) -> f64 {
        if self.proposed == 0 {
            0.0
        } else {
            usize_to_f64(self.accepted) / usize_to_f64(self.proposed)
        }
    }
}

/// Acceptance rates for a slice of proposal counters.
#[must_use]
pub fn acceptance_rates(stats: &[ProposalStats]) -> Vec<f64> {
    stats.iter().map(|stat| stat.acceptance_rate()).collect()
}

/// Shared cancellation request, checked by samplers between iterations.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    requested: Arc<AtomicBool>,
}

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.requested.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::Relaxed)
    }
}
