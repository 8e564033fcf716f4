// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Adaptive RFI flagging.
//!
//! A chain of flagging strategies is tried in order. After each strategy
//! flags the data, a caller-supplied calibration callback is run; if it
//! rejects the data with a [`CalibrationFailure`], the next (harsher)
//! strategy is tried. Any other error stops everything.

mod error;
mod sigma_clip;
mod strategy;

pub use error::FlaggingError;
pub use sigma_clip::SigmaClipFlagger;
pub use strategy::{FlaggingBackend, FlaggingStrategy, StrategyChain};

use std::path::Path;

use log::{info, warn};
use thiserror::Error;

/// Something that flags the data at a path according to a strategy.
pub trait FlaggingApplier {
    /// Flag the data, returning the fraction of the data now flagged.
    fn apply(
        &mut self,
        store_path: &Path,
        strategy: &FlaggingStrategy,
    ) -> Result<f64, FlaggingError>;

    /// Undo the flags set by previous calls. The default does nothing, so
    /// flags accumulate across strategies.
    fn reset_flags(&mut self, _store_path: &Path) -> Result<(), FlaggingError> {
        Ok(())
    }
}

/// A calibration callback's verdict that the data isn't good enough to
/// calibrate. This is the only thing that makes the next flagging strategy
/// be tried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CalibrationFailure {
    pub message: String,
}

impl CalibrationFailure {
    pub fn new<S: Into<String>>(message: S) -> CalibrationFailure {
        CalibrationFailure {
            message: message.into(),
        }
    }
}

/// The error type of calibration callbacks.
#[derive(Error, Debug)]
pub enum CalibrateFnError {
    #[error(transparent)]
    Failure(#[from] CalibrationFailure),

    /// Anything else. These are not retried.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl CalibrateFnError {
    pub fn other<E: std::error::Error + Send + Sync + 'static>(e: E) -> CalibrateFnError {
        CalibrateFnError::Other(Box::new(e))
    }
}

/// Where an adaptive flagging run is up to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// About to flag with the strategy at this index of the chain.
    Attempt(usize),

    /// Calibration accepted the data.
    Succeeded,

    /// Every permitted strategy was rejected.
    Exhausted,
}

impl AttemptState {
    /// The state after attempt `i` was rejected.
    pub fn after_failure(i: usize, max_attempts: usize) -> AttemptState {
        if i + 1 < max_attempts {
            AttemptState::Attempt(i + 1)
        } else {
            AttemptState::Exhausted
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, AttemptState::Attempt(_))
    }
}

/// How an adaptive flagging run ended.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveOutcome<T> {
    pub success: bool,

    /// The number of strategies tried.
    pub attempts: usize,

    /// The name of the last strategy tried.
    pub strategy: String,

    /// The fraction of data flagged by the last strategy tried.
    pub flagged_fraction: f64,

    /// The message of the most recent [`CalibrationFailure`], if any attempt
    /// failed.
    pub calibration_error: Option<String>,

    /// What the calibration callback returned on success.
    pub value: Option<T>,
}

/// Tries flagging strategies until calibration succeeds.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveFlagging {
    chain: StrategyChain,
    max_attempts: usize,
}

impl Default for AdaptiveFlagging {
    fn default() -> Self {
        AdaptiveFlagging::new(StrategyChain::default(), None)
    }
}

impl AdaptiveFlagging {
    /// `max_attempts` is clamped to the chain's length; `None` means try
    /// every strategy.
    pub fn new(chain: StrategyChain, max_attempts: Option<usize>) -> AdaptiveFlagging {
        let max_attempts = max_attempts
            .unwrap_or(chain.len())
            .clamp(1, chain.len());
        AdaptiveFlagging {
            chain,
            max_attempts,
        }
    }

    pub fn chain(&self) -> &StrategyChain {
        &self.chain
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Flag the data at `store_path` with each strategy in turn, calling
    /// `calibrate_fn(store_path, refant)` after each. Before every attempt
    /// but the first, `applier`'s flags are reset.
    ///
    /// Running out of strategies is not an error; check
    /// [`AdaptiveOutcome::success`]. Errors from `applier` and non-
    /// [`CalibrationFailure`] errors from `calibrate_fn` are returned
    /// immediately.
    pub fn run<A, F, T>(
        &self,
        store_path: &Path,
        refant: &str,
        applier: &mut A,
        mut calibrate_fn: F,
    ) -> Result<AdaptiveOutcome<T>, FlaggingError>
    where
        A: FlaggingApplier + ?Sized,
        F: FnMut(&Path, &str) -> Result<T, CalibrateFnError>,
    {
        let mut outcome = AdaptiveOutcome {
            success: false,
            attempts: 0,
            strategy: String::new(),
            flagged_fraction: 0.0,
            calibration_error: None,
            value: None,
        };

        let mut state = AttemptState::Attempt(0);
        while let AttemptState::Attempt(i) = state {
            let strategy = &self.chain[i];
            if i > 0 {
                applier.reset_flags(store_path)?;
            }
            info!(
                "Flagging attempt {}/{}: strategy '{}'",
                i + 1,
                self.max_attempts,
                strategy.name
            );
            let flagged_fraction = applier.apply(store_path, strategy)?;
            outcome.attempts = i + 1;
            outcome.strategy.clone_from(&strategy.name);
            outcome.flagged_fraction = flagged_fraction;

            state = match calibrate_fn(store_path, refant) {
                Ok(value) => {
                    outcome.value = Some(value);
                    AttemptState::Succeeded
                }
                Err(CalibrateFnError::Failure(failure)) => {
                    warn!(
                        "Calibration rejected strategy '{}' ({:.2}% flagged): {failure}",
                        strategy.name,
                        flagged_fraction * 100.0
                    );
                    outcome.calibration_error = Some(failure.message);
                    AttemptState::after_failure(i, self.max_attempts)
                }
                Err(CalibrateFnError::Other(e)) => return Err(FlaggingError::Calibrate(e)),
            };
        }

        outcome.success = state == AttemptState::Succeeded;
        if outcome.success {
            info!(
                "Calibration succeeded after {} attempt(s) with strategy '{}'",
                outcome.attempts, outcome.strategy
            );
        } else {
            warn!(
                "Calibration failed with all {} permitted strategies",
                outcome.attempts
            );
        }
        Ok(outcome)
    }
}
