// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use clap::Parser;
use indicatif::HumanBytes;
use log::info;

use super::GainCalCliError;
use crate::{
    backend::{DeviceProbe, GPU_PROBE},
    config::CalibrationConfig,
    memory::{estimate_applycal_memory, estimate_solve_memory, fits_on_device, rows_per_chunk},
};

#[derive(Parser, Debug, Default)]
pub(super) struct EstimateMemoryArgs {
    /// The number of visibility rows. Defaults to the config's chunk_size.
    #[clap(short, long)]
    rows: Option<usize>,

    /// Defaults to the config's n_antennas.
    #[clap(short, long)]
    antennas: Option<usize>,

    /// Defaults to the config's n_channels.
    #[clap(long)]
    channels: Option<usize>,

    /// Defaults to the config's n_polarizations.
    #[clap(short, long)]
    polarizations: Option<usize>,
}

impl EstimateMemoryArgs {
    pub(super) fn run(self, config: &CalibrationConfig) -> Result<(), GainCalCliError> {
        let num_rows = self.rows.unwrap_or(config.chunk_size);
        let num_antennas = self
            .antennas
            .or(config.n_antennas)
            .ok_or(GainCalCliError::MissingSize { what: "antennas" })?;
        let num_channels = self
            .channels
            .or(config.n_channels)
            .ok_or(GainCalCliError::MissingSize { what: "channels" })?;
        let num_pols = self
            .polarizations
            .or(config.n_polarizations)
            .ok_or(GainCalCliError::MissingSize {
                what: "polarizations",
            })?;

        info!(
            "{num_rows} rows, {num_antennas} antennas, {num_channels} channels, \
             {num_pols} polarisations"
        );
        let apply = estimate_applycal_memory(num_rows, num_channels, num_pols, num_antennas)?;
        info!("Applying gains: {apply}");
        // Solving with all channels of one polarisation is the largest solve.
        let num_samples = num_rows
            .checked_mul(num_channels)
            .ok_or(GainCalCliError::Input(
                "The number of samples overflows".to_string(),
            ))?;
        let solve = estimate_solve_memory(num_samples, num_antennas)?;
        info!("Solving for gains: {solve}");

        if !GPU_PROBE.is_available() {
            info!("No GPU: {}", GPU_PROBE.unavailable_reason());
            return Ok(());
        }
        let free_bytes = GPU_PROBE
            .free_memory(config.gpu_id)
            .map_err(GainCalCliError::Gpu)?;
        info!("GPU {} has {} free", config.gpu_id, HumanBytes(free_bytes));
        for (what, estimate) in [("Applying", apply), ("Solving", solve)] {
            if fits_on_device(estimate.device_bytes, free_bytes, config.memory_budget_gb) {
                info!("{what} fits on the GPU in one chunk");
            } else {
                info!("{what} doesn't fit on the GPU in one chunk");
            }
        }
        let rows = rows_per_chunk(
            num_rows,
            config.chunk_size,
            free_bytes,
            config.memory_budget_gb,
            |rows| estimate_applycal_memory(rows, num_channels, num_pols, num_antennas),
        )?;
        match rows {
            Some(rows) => info!("Gains would be applied {rows} rows at a time"),
            None => info!("Not even one row fits; the CPU would be used"),
        }

        Ok(())
    }
}
