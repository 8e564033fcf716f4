// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Calibrate synthetic data from start to finish.

use std::{cell::RefCell, path::Path};

use clap::Parser;
use log::info;

use super::GainCalCliError;
use crate::{
    adapter::{apply_calibration, solve_calibration, MeasurementStore},
    backend::Dispatcher,
    config::CalibrationConfig,
    flagging::{CalibrateFnError, CalibrationFailure, SigmaClipFlagger},
    simulate::{rms_residual, SyntheticDataset, SyntheticParams},
    GainCalError,
};

#[derive(Parser, Debug)]
pub(super) struct SimulateArgs {
    /// Defaults to the config's n_antennas, or 16.
    #[clap(short, long)]
    antennas: Option<usize>,

    /// Defaults to the config's n_channels, or 4.
    #[clap(long)]
    channels: Option<usize>,

    /// Defaults to the config's n_polarizations, or 2.
    #[clap(short, long)]
    polarizations: Option<usize>,

    /// Every baseline appears once per timestep.
    #[clap(short, long, default_value = "2")]
    timesteps: usize,

    /// The noise level relative to the model visibilities (1/SNR).
    #[clap(short, long, default_value = "0.01")]
    noise: f64,

    /// The fraction of samples to corrupt with interference.
    #[clap(long, default_value = "0")]
    rfi: f64,

    #[clap(long, default_value = "42")]
    seed: u64,

    /// Escalate through the flagging strategies until calibration is accepted.
    #[clap(short, long)]
    flag: bool,

    /// Calibration is rejected if the RMS residual between the corrected and
    /// model visibilities is larger than this.
    #[clap(long, default_value = "0.5")]
    max_residual: f64,
}

/// Degenerate output means the data wasn't good enough; anything else is a
/// real problem.
fn reject_degenerate(e: GainCalError) -> CalibrateFnError {
    match e {
        GainCalError::NumericDegeneracy(d) => CalibrationFailure::new(d.to_string()).into(),
        e => CalibrateFnError::other(e),
    }
}

impl SimulateArgs {
    pub(super) fn run(self, config: &CalibrationConfig) -> Result<(), GainCalCliError> {
        let defaults = SyntheticParams::default();
        let params = SyntheticParams {
            num_antennas: self
                .antennas
                .or(config.n_antennas)
                .unwrap_or(defaults.num_antennas),
            num_channels: self
                .channels
                .or(config.n_channels)
                .unwrap_or(defaults.num_channels),
            num_pols: self
                .polarizations
                .or(config.n_polarizations)
                .unwrap_or(defaults.num_pols),
            num_timesteps: self.timesteps,
            noise_fraction: self.noise,
            rfi_fraction: self.rfi,
            refant: config.refant,
            seed: self.seed,
            ..defaults
        };
        if !(0.0..=1.0).contains(&params.rfi_fraction) || !(params.noise_fraction >= 0.0) {
            return Err(GainCalCliError::Input(format!(
                "--rfi must be in [0, 1] and --noise must be non-negative; got {} and {}",
                params.rfi_fraction, params.noise_fraction
            )));
        }
        info!(
            "Simulating {} antennas, {} channels, {} polarisations, {} timesteps",
            params.num_antennas, params.num_channels, params.num_pols, params.num_timesteps
        );

        let dataset = SyntheticDataset::generate(&params)?;
        let uncalibrated = rms_residual(dataset.data.view(), dataset.model.view(), None);
        let store = RefCell::new(dataset.into_store("simulated.ms")?);
        let path = store.borrow().path().to_path_buf();

        let dispatcher = Dispatcher::new(config.dispatcher_options());
        let solve_opts = config.solve_options();
        let apply_opts = config.apply_options();
        let max_residual = self.max_residual;
        let calibrate = |_: &Path, _: &str| -> Result<f64, CalibrateFnError> {
            let mut store = store.borrow_mut();
            let solution =
                solve_calibration(&*store, &solve_opts, &dispatcher).map_err(reject_degenerate)?;
            if solution.num_failed() == solution.results.len() {
                return Err(CalibrationFailure::new("no gains could be solved for").into());
            }
            let result =
                apply_calibration(&mut *store, &solution.into_caltable(), &apply_opts, &dispatcher)
                    .map_err(reject_degenerate)?;
            if let Some(e) = result.error {
                return Err(CalibrateFnError::Other(e.into()));
            }

            let corrected = store
                .read_column(&apply_opts.output_column)
                .map_err(CalibrateFnError::other)?;
            let model = store
                .read_column(&solve_opts.model_column)
                .map_err(CalibrateFnError::other)?;
            let flags = store.read_flags().map_err(CalibrateFnError::other)?;
            let residual = rms_residual(corrected.view(), model.view(), Some(flags.view()))
                .ok_or_else(|| CalibrationFailure::new("every sample is flagged"))?;
            if residual > max_residual {
                return Err(CalibrationFailure::new(format!(
                    "the RMS residual ({residual:.4}) is above {max_residual}"
                ))
                .into());
            }
            Ok(residual)
        };

        let refant = config.refant.to_string();
        let calibrated = if self.flag {
            let flagging = config.adaptive_flagging()?;
            let mut flagger = SigmaClipFlagger::new(&store, &solve_opts.data_column);
            let outcome = flagging.run(&path, &refant, &mut flagger, calibrate)?;
            if !outcome.success {
                return Err(GainCalCliError::Degenerate(format!(
                    "Calibration was rejected after {} flagging attempt(s); last reason: {}",
                    outcome.attempts,
                    outcome.calibration_error.as_deref().unwrap_or("none")
                )));
            }
            info!(
                "Calibration accepted with strategy '{}' ({:.2}% flagged)",
                outcome.strategy,
                outcome.flagged_fraction * 100.0
            );
            outcome.value
        } else {
            match calibrate(&path, &refant) {
                Ok(residual) => Some(residual),
                Err(CalibrateFnError::Failure(f)) => {
                    return Err(GainCalCliError::Degenerate(format!(
                        "Calibration was rejected: {f}"
                    )))
                }
                Err(CalibrateFnError::Other(e)) => {
                    return Err(GainCalCliError::Generic(e.to_string()))
                }
            }
        };

        match (uncalibrated, calibrated) {
            (Some(before), Some(after)) => info!(
                "RMS residual: {before:.4} before calibration, {after:.4} after ({:.1}x smaller)",
                before / after
            ),
            _ => info!("No residuals to compare"),
        }
        Ok(())
    }
}
