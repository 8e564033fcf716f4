// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use clap::Parser;
use indicatif::HumanBytes;
use log::{info, warn};

use super::GainCalCliError;
use crate::{
    backend::{Backend, DeviceProbe, GPU_PROBE},
    config::CalibrationConfig,
};

#[derive(Parser, Debug, Default)]
pub(super) struct DeviceInfoArgs {
    /// The CUDA device to describe. Defaults to the config's gpu_id.
    #[clap(short, long)]
    gpu_id: Option<usize>,
}

impl DeviceInfoArgs {
    pub(super) fn run(self, config: &CalibrationConfig) -> Result<(), GainCalCliError> {
        let gpu_id = self.gpu_id.unwrap_or(config.gpu_id);
        info!("CPU: {}", Backend::Cpu.device_info(gpu_id)?);

        if !GPU_PROBE.is_available() {
            info!("GPU: unavailable ({})", GPU_PROBE.unavailable_reason());
            return Ok(());
        }
        match Backend::Gpu.device_info(gpu_id) {
            Ok(s) => info!("GPU {gpu_id}: {s}"),
            Err(e) => warn!("GPU {gpu_id}: {e}"),
        }
        match GPU_PROBE.free_memory(gpu_id) {
            Ok(free) => info!("GPU {gpu_id}: {} free", HumanBytes(free)),
            Err(e) => warn!("Couldn't get GPU {gpu_id}'s free memory: {e}"),
        }
        Ok(())
    }
}
