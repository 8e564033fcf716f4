// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Calibration configuration. Every field has a default, so a config file only
//! needs to contain what differs from the defaults. Config files may be toml
//! or json.

mod error;
#[cfg(test)]
mod tests;

pub use error::ConfigError;

use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    str::FromStr,
};

use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::{
    adapter::{ApplyOptions, SolveOptions},
    backend::DispatcherOptions,
    constants::*,
    flagging::{AdaptiveFlagging, FlaggingError, FlaggingStrategy, StrategyChain},
    gains::SolveParams,
};

/// How gains are mapped onto data channels when a calibration table has a
/// different number of channels to the data.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Interpolation {
    /// Use the gain channel whose centre is closest to the data channel's.
    #[default]
    Nearest,

    /// Interpolate linearly between the two closest gain channels.
    Linear,
}

/// Which samples share a solution.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SolveInterval {
    /// One solution per channel and polarisation.
    #[default]
    PerChannel,

    /// One solution per polarisation, using all channels.
    Combined,
}

#[derive(Debug, Display, EnumIter, EnumString)]
enum ConfigFileType {
    #[strum(serialize = "toml")]
    Toml,
    #[strum(serialize = "json")]
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CalibrationConfig {
    /// The CUDA device to use.
    pub gpu_id: usize,

    /// The most rows processed at once.
    pub chunk_size: usize,

    /// Sizes used when nothing else provides them (e.g. memory estimates).
    pub n_antennas: Option<usize>,
    pub n_channels: Option<usize>,
    pub n_polarizations: Option<usize>,

    pub interpolation: Interpolation,

    pub max_iter: u32,

    pub tol: f64,

    /// The number of flagging strategies to try. If not set, all strategies in
    /// the chain are tried.
    pub max_attempts: Option<usize>,

    /// The smallest fraction of usable corrected samples for output to be
    /// accepted.
    pub min_fraction: f64,

    pub refant: usize,

    pub fix_refant_amplitude: bool,

    /// `true`: GPU or fail. `false`: CPU. Not set: GPU if it's available and
    /// the work fits.
    pub use_gpu: Option<bool>,

    /// Use no more than this much device memory \[GiB\].
    pub memory_budget_gb: Option<f64>,

    pub solve_interval: SolveInterval,

    pub data_column: String,

    pub model_column: String,

    pub output_column: String,

    /// Start the default flagging chain with a GPU strategy.
    pub prefer_gpu_flagging: bool,

    /// A custom flagging chain, used instead of the default one.
    pub strategies: Option<Vec<FlaggingStrategy>>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        CalibrationConfig {
            gpu_id: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            n_antennas: None,
            n_channels: None,
            n_polarizations: None,
            interpolation: Interpolation::default(),
            max_iter: DEFAULT_MAX_ITERATIONS,
            tol: DEFAULT_TOLERANCE,
            max_attempts: None,
            min_fraction: DEFAULT_MIN_FRACTION,
            refant: DEFAULT_REFANT,
            fix_refant_amplitude: false,
            use_gpu: None,
            memory_budget_gb: None,
            solve_interval: SolveInterval::default(),
            data_column: "DATA".to_string(),
            model_column: "MODEL_DATA".to_string(),
            output_column: "CORRECTED_DATA".to_string(),
            prefer_gpu_flagging: false,
            strategies: None,
        }
    }
}

impl CalibrationConfig {
    /// Read a config from a toml or json file, picking the format from the
    /// file's extension. The config is validated.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<CalibrationConfig, ConfigError> {
        let file = file.as_ref();
        debug!("Attempting to parse config file {}", file.display());

        let file_type = file
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .and_then(|e| ConfigFileType::from_str(&e).ok());
        let file_type = match file_type {
            Some(t) => t,
            None => {
                return Err(ConfigError::UnknownExtension {
                    file: file.to_path_buf(),
                    valid: ConfigFileType::iter().join(", "),
                })
            }
        };

        let mut contents = String::new();
        File::open(file)?.read_to_string(&mut contents)?;
        let config: CalibrationConfig = match file_type {
            ConfigFileType::Toml => {
                debug!("Parsing toml file...");
                toml::from_str(&contents).map_err(|err| ConfigError::Toml {
                    file: file.to_path_buf(),
                    err,
                })?
            }
            ConfigFileType::Json => {
                debug!("Parsing json file...");
                serde_json::from_str(&contents).map_err(|err| ConfigError::Json {
                    file: file.to_path_buf(),
                    err,
                })?
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    /// Write this config as toml, so the run can be reproduced.
    pub fn save_toml(&self, file: &PathBuf) -> Result<(), ConfigError> {
        std::fs::write(file, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(
            field: &'static str,
            requirement: &'static str,
            value: impl ToString,
        ) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid {
                field,
                requirement,
                value: value.to_string(),
            })
        }

        if self.chunk_size == 0 {
            return invalid("chunk_size", "must be positive", self.chunk_size);
        }
        if self.max_iter == 0 {
            return invalid("max_iter", "must be positive", self.max_iter);
        }
        if !(self.tol.is_finite() && self.tol > 0.0) {
            return invalid("tol", "must be positive and finite", self.tol);
        }
        if !(0.0..1.0).contains(&self.min_fraction) {
            return invalid("min_fraction", "must be in [0, 1)", self.min_fraction);
        }
        if self.max_attempts == Some(0) {
            return invalid("max_attempts", "must be positive", 0);
        }
        if let Some(budget) = self.memory_budget_gb {
            if !(budget.is_finite() && budget > 0.0) {
                return invalid("memory_budget_gb", "must be positive and finite", budget);
            }
        }
        for (field, size) in [
            ("n_antennas", self.n_antennas),
            ("n_channels", self.n_channels),
            ("n_polarizations", self.n_polarizations),
        ] {
            if size == Some(0) {
                return invalid(field, "must be positive", 0);
            }
        }
        if let Some(n_antennas) = self.n_antennas {
            if self.refant >= n_antennas {
                return invalid("refant", "must be smaller than n_antennas", self.refant);
            }
        }
        if self.strategies.as_ref().is_some_and(|s| s.is_empty()) {
            return invalid("strategies", "must not be empty if given", "[]");
        }
        Ok(())
    }

    pub fn dispatcher_options(&self) -> DispatcherOptions {
        DispatcherOptions {
            gpu_id: self.gpu_id,
            chunk_size: self.chunk_size,
            memory_budget_gb: self.memory_budget_gb,
        }
    }

    pub fn solve_params(&self) -> SolveParams {
        SolveParams {
            refant: self.refant,
            max_iterations: self.max_iter,
            tolerance: self.tol,
            fix_refant_amplitude: self.fix_refant_amplitude,
        }
    }

    pub fn apply_options(&self) -> ApplyOptions {
        ApplyOptions {
            data_column: self.data_column.clone(),
            output_column: self.output_column.clone(),
            interpolation: self.interpolation,
            use_gpu: self.use_gpu,
            min_fraction: self.min_fraction,
        }
    }

    pub fn solve_options(&self) -> SolveOptions {
        SolveOptions {
            data_column: self.data_column.clone(),
            model_column: self.model_column.clone(),
            interval: self.solve_interval,
            params: self.solve_params(),
            use_gpu: self.use_gpu,
        }
    }

    /// The custom chain if one was given, otherwise the default chain (with a
    /// GPU strategy first if preferred).
    pub fn strategy_chain(&self) -> Result<StrategyChain, FlaggingError> {
        match self.strategies.as_ref() {
            Some(strategies) => StrategyChain::new(strategies.clone()),
            None if self.prefer_gpu_flagging => Ok(StrategyChain::default_with_gpu()),
            None => Ok(StrategyChain::default()),
        }
    }

    pub fn adaptive_flagging(&self) -> Result<AdaptiveFlagging, FlaggingError> {
        Ok(AdaptiveFlagging::new(self.strategy_chain()?, self.max_attempts))
    }
}
