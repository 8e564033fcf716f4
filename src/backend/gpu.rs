// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use ndarray::prelude::*;

use super::{Backend, GainKernels, KernelError, RowChunks};
use crate::{
    c64,
    gains::{stefcal, SolutionResult, SolveParams, SolveProblem, StefcalAccumulator},
    gpu::{self, gpu_kernel_call, DevicePointer, GpuContext},
    InputError,
};

fn to_c_int(what: &'static str, size: usize) -> Result<i32, KernelError> {
    i32::try_from(size).map_err(|_| KernelError::TooLarge { what, size })
}

fn device_indices(ants: &[usize]) -> Result<Vec<i32>, KernelError> {
    ants.iter()
        .map(|&a| to_c_int("antenna indices", a))
        .collect()
}

/// Gain kernels that run on a CUDA device. These are created for a single
/// dispatcher call, so every chunk given to `apply` uses the same gains.
///
/// Fields drop in declaration order; the context must outlive the buffers so
/// they are freed on their own device.
pub(crate) struct GpuKernels {
    rows_per_chunk: usize,
    /// Uploaded by the first `apply` and resident from then on.
    d_gains: Option<DevicePointer<c64>>,
    d_num_flagged: DevicePointer<u64>,
    _context: GpuContext,
}

impl GpuKernels {
    pub(crate) fn new(gpu_id: usize, rows_per_chunk: usize) -> Result<GpuKernels, KernelError> {
        let context = GpuContext::new(gpu_id)?;
        Ok(GpuKernels {
            rows_per_chunk,
            d_gains: None,
            d_num_flagged: DevicePointer::copy_to_device(&[0])?,
            _context: context,
        })
    }
}

impl GainKernels for GpuKernels {
    fn backend(&self) -> Backend {
        Backend::Gpu
    }

    fn apply(
        &mut self,
        vis: ArrayView3<c64>,
        gains: ArrayView3<c64>,
        ant1: &[usize],
        ant2: &[usize],
        mut out: ArrayViewMut3<c64>,
    ) -> Result<usize, KernelError> {
        let (num_rows, num_chans, num_pols) = vis.dim();
        let (_, gain_chans, gain_pols) = gains.dim();
        if vis.is_empty() {
            return Ok(0);
        }

        if self.d_gains.is_none() {
            let host_gains: Vec<c64> = gains.iter().copied().collect();
            self.d_gains = Some(DevicePointer::copy_to_device(&host_gains)?);
        }
        let d_gains = self
            .d_gains
            .as_ref()
            .map(|d| d.get())
            .unwrap_or(std::ptr::null());

        let host_vis: Vec<c64> = vis.iter().copied().collect();
        let d_vis = DevicePointer::copy_to_device(&host_vis)?;
        let d_ant1 = DevicePointer::copy_to_device(&device_indices(ant1)?)?;
        let d_ant2 = DevicePointer::copy_to_device(&device_indices(ant2)?)?;
        let mut d_out: DevicePointer<c64> =
            DevicePointer::malloc(std::mem::size_of_val(host_vis.as_slice()))?;
        self.d_num_flagged.clear();

        gpu_kernel_call!(
            gpu::gpu_apply_gains,
            d_vis.get().cast(),
            d_gains.cast(),
            d_ant1.get(),
            d_ant2.get(),
            to_c_int("rows", num_rows)?,
            to_c_int("channels", num_chans)?,
            to_c_int("polarisations", num_pols)?,
            to_c_int("gain channels", gain_chans)?,
            to_c_int("gain polarisations", gain_pols)?,
            d_out.get_mut().cast(),
            self.d_num_flagged.get_mut(),
        )?;

        let mut host_out = host_vis;
        d_out.copy_from_device(&mut host_out)?;
        out.iter_mut()
            .zip(host_out)
            .for_each(|(out, corrected)| *out = corrected);
        let mut num_flagged = [0];
        self.d_num_flagged.copy_from_device(&mut num_flagged)?;
        Ok(num_flagged[0] as usize)
    }

    fn solve(
        &mut self,
        problem: &SolveProblem,
        params: &SolveParams,
    ) -> Result<SolutionResult, KernelError> {
        if params.refant >= problem.num_antennas() {
            return Err(InputError::RefantOutOfRange {
                refant: params.refant,
                num_antennas: problem.num_antennas(),
            }
            .into());
        }
        let mut accumulator = GpuAccumulator::new(problem, self.rows_per_chunk)?;
        stefcal(problem, params, &mut accumulator, Backend::Gpu)
    }
}

/// A solve problem's rows, copied to the device.
struct DeviceRows {
    d_vis: DevicePointer<c64>,
    d_model: DevicePointer<c64>,
    d_weights: DevicePointer<f64>,
    d_ant1: DevicePointer<i32>,
    d_ant2: DevicePointer<i32>,
    num_rows: i32,
    samples_per_row: i32,
}

impl DeviceRows {
    fn upload(problem: &SolveProblem) -> Result<DeviceRows, KernelError> {
        let vis: Vec<c64> = problem.vis().iter().copied().collect();
        let model: Vec<c64> = problem.model().iter().copied().collect();
        let weights: Vec<f64> = problem.weights().iter().copied().collect();
        Ok(DeviceRows {
            d_vis: DevicePointer::copy_to_device(&vis)?,
            d_model: DevicePointer::copy_to_device(&model)?,
            d_weights: DevicePointer::copy_to_device(&weights)?,
            d_ant1: DevicePointer::copy_to_device(&device_indices(problem.ant1())?)?,
            d_ant2: DevicePointer::copy_to_device(&device_indices(problem.ant2())?)?,
            num_rows: to_c_int("rows", problem.num_rows())?,
            samples_per_row: to_c_int("samples per row", problem.vis().len_of(Axis(1)))?,
        })
    }

    fn accumulate(
        &self,
        d_gains: &DevicePointer<c64>,
        d_top: &mut DevicePointer<c64>,
        d_bot: &mut DevicePointer<f64>,
    ) -> Result<(), KernelError> {
        gpu_kernel_call!(
            gpu::gpu_accumulate_stefcal,
            self.d_vis.get().cast(),
            self.d_model.get().cast(),
            self.d_weights.get(),
            self.d_ant1.get(),
            self.d_ant2.get(),
            self.num_rows,
            self.samples_per_row,
            d_gains.get().cast(),
            d_top.get_mut().cast(),
            d_bot.get_mut(),
        )?;
        Ok(())
    }
}

/// Forms StEFCal sums on the device. If the whole problem fits in one chunk,
/// it's uploaded once; otherwise each chunk is uploaded every iteration.
struct GpuAccumulator<'p, 'a> {
    problem: &'p SolveProblem<'a>,
    rows_per_chunk: usize,
    resident: Option<DeviceRows>,
    d_gains: DevicePointer<c64>,
    d_top: DevicePointer<c64>,
    d_bot: DevicePointer<f64>,
}

impl<'p, 'a> GpuAccumulator<'p, 'a> {
    fn new(
        problem: &'p SolveProblem<'a>,
        rows_per_chunk: usize,
    ) -> Result<GpuAccumulator<'p, 'a>, KernelError> {
        let num_antennas = problem.num_antennas();
        let resident = if problem.num_rows() <= rows_per_chunk {
            Some(DeviceRows::upload(problem)?)
        } else {
            None
        };
        Ok(GpuAccumulator {
            problem,
            rows_per_chunk,
            resident,
            d_gains: DevicePointer::malloc(num_antennas * std::mem::size_of::<c64>())?,
            d_top: DevicePointer::malloc(num_antennas * std::mem::size_of::<c64>())?,
            d_bot: DevicePointer::malloc(num_antennas * std::mem::size_of::<f64>())?,
        })
    }
}

impl StefcalAccumulator for GpuAccumulator<'_, '_> {
    type Error = KernelError;

    fn accumulate(
        &mut self,
        gains: &[c64],
        top: &mut [c64],
        bot: &mut [f64],
    ) -> Result<(), KernelError> {
        self.d_gains.overwrite(gains)?;
        self.d_top.clear();
        self.d_bot.clear();

        match self.resident.as_ref() {
            Some(rows) => rows.accumulate(&self.d_gains, &mut self.d_top, &mut self.d_bot)?,
            None => {
                for range in RowChunks::new(self.problem.num_rows(), self.rows_per_chunk) {
                    let rows = DeviceRows::upload(&self.problem.rows(range))?;
                    rows.accumulate(&self.d_gains, &mut self.d_top, &mut self.d_bot)?;
                }
            }
        }

        self.d_top.copy_from_device(top)?;
        self.d_bot.copy_from_device(bot)?;
        Ok(())
    }
}
