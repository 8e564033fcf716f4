// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all errors reaching the gaincal binary. This should be the
//! *only* error enum used by the binary.

use thiserror::Error;

use crate::{
    adapter::StoreError, config::ConfigError, flagging::FlaggingError, memory::MemoryError,
    GainCalError, InputError, NumericDegeneracy,
};

/// Each message should say how the user might fix the problem, unless it's
/// "generic".
#[derive(Error, Debug)]
pub enum GainCalCliError {
    /// An error related to the config file.
    #[error("{0}\n\nAll config options and their defaults can be seen with --save-toml")]
    Config(String),

    /// Bad inputs.
    #[error("{0}")]
    Input(String),

    /// A size wasn't given on the command line or in the config file.
    #[error("The number of {what} wasn't specified; use --{what} or set n_{what} in the config file")]
    MissingSize { what: &'static str },

    /// The corrected data can't be used.
    #[error("{0}\n\nTry a harsher flagging strategy or check the calibration table")]
    Degenerate(String),

    #[error("{0}\n\nTry running on the CPU (use_gpu = false), or with a smaller chunk_size or memory_budget_gb")]
    Gpu(String),

    /// An error related to adaptive flagging.
    #[error("{0}\n\nCheck the strategies in the config file")]
    Flagging(String),

    /// A generic error that can't be clarified further, e.g. IO errors.
    #[error("{0}")]
    Generic(String),
}

impl From<GainCalError> for GainCalCliError {
    fn from(e: GainCalError) -> Self {
        match e {
            GainCalError::Input(e) => Self::from(e),
            GainCalError::NumericDegeneracy(e) => Self::from(e),
            GainCalError::GpuUnavailable { .. } => Self::Gpu(e.to_string()),
            GainCalError::Memory(e) => Self::from(e),
            GainCalError::Store(e) => Self::from(e),
            GainCalError::Config(e) => Self::from(e),
            GainCalError::Flagging(e) => Self::from(e),
        }
    }
}

impl From<InputError> for GainCalCliError {
    fn from(e: InputError) -> Self {
        Self::Input(e.to_string())
    }
}

impl From<NumericDegeneracy> for GainCalCliError {
    fn from(e: NumericDegeneracy) -> Self {
        Self::Degenerate(e.to_string())
    }
}

impl From<ConfigError> for GainCalCliError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::IO(e) => Self::from(e),
            _ => Self::Config(e.to_string()),
        }
    }
}

impl From<FlaggingError> for GainCalCliError {
    fn from(e: FlaggingError) -> Self {
        let s = e.to_string();
        match e {
            FlaggingError::EmptyChain
            | FlaggingError::BadThresholdScale { .. }
            | FlaggingError::Applier { .. }
            | FlaggingError::WrongStore { .. } => Self::Flagging(s),
            FlaggingError::Calibrate(_) => Self::Generic(s),
            FlaggingError::Store(e) => Self::from(e),
        }
    }
}

impl From<MemoryError> for GainCalCliError {
    fn from(e: MemoryError) -> Self {
        Self::Input(e.to_string())
    }
}

impl From<StoreError> for GainCalCliError {
    fn from(e: StoreError) -> Self {
        Self::Generic(e.to_string())
    }
}

impl From<std::io::Error> for GainCalCliError {
    fn from(e: std::io::Error) -> Self {
        Self::Generic(e.to_string())
    }
}
