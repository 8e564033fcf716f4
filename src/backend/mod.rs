// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Choosing where gains are applied and solved (CPU or GPU), and running the
//! work there in memory-sized chunks.

mod chunks;
mod cpu;
mod error;
#[cfg(feature = "cuda")]
mod gpu;
mod probe;

pub use chunks::RowChunks;
pub(crate) use error::KernelError;
pub use probe::{DeviceProbe, GpuProbe, GPU_PROBE};

use std::time::Instant;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, warn};
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    c64,
    constants::DEFAULT_CHUNK_SIZE,
    gains::{ApplyResult, GainTable, SolutionResult, SolveParams, SolveProblem, VisibilityBatch},
    memory::{
        estimate_applycal_memory, estimate_solve_memory, rows_per_chunk, MemoryEstimate,
        MemoryError,
    },
    GainCalError, InputError, PROGRESS_BARS,
};

/// Where kernels run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Backend {
    Cpu,
    Gpu,
}

impl Backend {
    /// Get a formatted string with information on the device behind this
    /// backend.
    pub fn device_info(self, gpu_id: usize) -> Result<String, GainCalError> {
        match self {
            Backend::Cpu => Ok(get_cpu_info()),

            Backend::Gpu => {
                cfg_if::cfg_if! {
                    if #[cfg(feature = "cuda")] {
                        let (device_info, driver_info) = crate::gpu::get_device_info(gpu_id)
                            .map_err(|e| GainCalError::GpuUnavailable { reason: e.to_string() })?;
                        Ok(format!(
                            "{} (capability {}, {} MiB), CUDA driver {}, runtime {}",
                            device_info.name,
                            device_info.capability,
                            device_info.total_global_mem,
                            driver_info.driver_version,
                            driver_info.runtime_version
                        ))
                    } else {
                        let _ = gpu_id;
                        Err(GainCalError::GpuUnavailable {
                            reason: GPU_PROBE.unavailable_reason(),
                        })
                    }
                }
            }
        }
    }
}

/// Get a formatted string with information on the CPU.
fn get_cpu_info() -> String {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        // Non-exhaustive but perhaps most-interesting CPU features.
        let avx = std::arch::is_x86_feature_detected!("avx");
        let avx2 = std::arch::is_x86_feature_detected!("avx2");
        let avx512 = std::arch::is_x86_feature_detected!("avx512f");

        match (avx512, avx2, avx) {
            (true, _, _) => format!("{} CPU (AVX512 available)", std::env::consts::ARCH),
            (false, true, _) => format!("{} CPU (AVX2 available)", std::env::consts::ARCH),
            (false, false, true) => format!("{} CPU (AVX available)", std::env::consts::ARCH),
            (false, false, false) => {
                format!("{} CPU (AVX unavailable!)", std::env::consts::ARCH)
            }
        }
    }

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    format!("{} CPU", std::env::consts::ARCH)
}

/// An object that applies gains to, and solves for gains from, visibilities.
/// All backends implement this.
pub(crate) trait GainKernels {
    fn backend(&self) -> Backend;

    /// Correct `vis` into `out`, returning the number of flagged samples.
    /// `gains` is the whole gain table and is the same for every call on one
    /// object. Antenna indices have been validated.
    fn apply(
        &mut self,
        vis: ArrayView3<c64>,
        gains: ArrayView3<c64>,
        ant1: &[usize],
        ant2: &[usize],
        out: ArrayViewMut3<c64>,
    ) -> Result<usize, KernelError>;

    fn solve(
        &mut self,
        problem: &SolveProblem,
        params: &SolveParams,
    ) -> Result<SolutionResult, KernelError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatcherOptions {
    /// The CUDA device to use.
    pub gpu_id: usize,

    /// The most rows given to a kernel at once.
    pub chunk_size: usize,

    /// Use no more than this much device memory \[GiB\].
    pub memory_budget_gb: Option<f64>,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        DispatcherOptions {
            gpu_id: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            memory_budget_gb: None,
        }
    }
}

/// Where work will run.
#[derive(Debug, Clone, PartialEq)]
enum Selection {
    Cpu { fallback_reason: Option<String> },
    Gpu { rows_per_chunk: usize },
}

/// Routes apply and solve calls to the CPU or a GPU.
///
/// `use_gpu` arguments mean: `Some(true)` use the GPU or fail, `Some(false)`
/// use the CPU, `None` use the GPU if one is available and the work fits,
/// otherwise fall back to the CPU.
pub struct Dispatcher<'p> {
    options: DispatcherOptions,
    probe: &'p dyn DeviceProbe,
}

impl Dispatcher<'static> {
    /// A dispatcher using the process-wide [`GPU_PROBE`].
    pub fn new(options: DispatcherOptions) -> Dispatcher<'static> {
        Dispatcher {
            options,
            probe: &*GPU_PROBE,
        }
    }
}

impl<'p> Dispatcher<'p> {
    pub fn with_probe(options: DispatcherOptions, probe: &'p dyn DeviceProbe) -> Dispatcher<'p> {
        Dispatcher { options, probe }
    }

    pub fn options(&self) -> &DispatcherOptions {
        &self.options
    }

    fn select<F>(
        &self,
        use_gpu: Option<bool>,
        num_rows: usize,
        estimate: F,
    ) -> Result<Selection, GainCalError>
    where
        F: Fn(usize) -> Result<MemoryEstimate, MemoryError>,
    {
        if use_gpu == Some(false) {
            return Ok(Selection::Cpu {
                fallback_reason: None,
            });
        }

        let unavailable = |reason: String| -> Result<Selection, GainCalError> {
            if use_gpu == Some(true) {
                Err(GainCalError::GpuUnavailable { reason })
            } else {
                debug!("Using the CPU: {reason}");
                Ok(Selection::Cpu {
                    fallback_reason: Some(reason),
                })
            }
        };

        if !self.probe.is_available() {
            return unavailable(self.probe.unavailable_reason());
        }
        let free_bytes = match self.probe.free_memory(self.options.gpu_id) {
            Ok(free_bytes) => free_bytes,
            Err(e) => return unavailable(format!("couldn't query device memory: {e}")),
        };
        let rows = rows_per_chunk(
            num_rows,
            self.options.chunk_size,
            free_bytes,
            self.options.memory_budget_gb,
            estimate,
        )?;
        match rows {
            Some(rows_per_chunk) => {
                debug!(
                    "Using GPU {} with {rows_per_chunk} rows per chunk ({} free)",
                    self.options.gpu_id,
                    indicatif::HumanBytes(free_bytes)
                );
                Ok(Selection::Gpu { rows_per_chunk })
            }
            None => unavailable(format!(
                "not even one row fits in the {} of free device memory",
                indicatif::HumanBytes(free_bytes)
            )),
        }
    }

    /// Make kernels for a selection. If GPU kernels can't be set up, this is
    /// treated the same as the GPU being unavailable.
    fn kernels(
        &self,
        selection: Selection,
        use_gpu: Option<bool>,
    ) -> Result<(Box<dyn GainKernels>, usize, Option<String>), GainCalError> {
        let cpu_rows = self.options.chunk_size.max(1);
        match selection {
            Selection::Cpu { fallback_reason } => {
                Ok((Box::new(cpu::CpuKernels), cpu_rows, fallback_reason))
            }

            #[cfg(feature = "cuda")]
            Selection::Gpu { rows_per_chunk } => {
                match gpu::GpuKernels::new(self.options.gpu_id, rows_per_chunk) {
                    Ok(kernels) => Ok((Box::new(kernels), rows_per_chunk, None)),
                    Err(e) if use_gpu == Some(true) => Err(GainCalError::GpuUnavailable {
                        reason: e.to_string(),
                    }),
                    Err(e) => {
                        let reason = format!("couldn't set up the GPU: {e}");
                        warn!("{reason}; falling back to the CPU");
                        Ok((Box::new(cpu::CpuKernels), cpu_rows, Some(reason)))
                    }
                }
            }

            // Without CUDA support, a probe may claim a GPU exists (e.g. a
            // fake one), but there's nothing to run on it.
            #[cfg(not(feature = "cuda"))]
            Selection::Gpu { .. } => {
                let reason = self.probe.unavailable_reason();
                if use_gpu == Some(true) {
                    Err(GainCalError::GpuUnavailable { reason })
                } else {
                    Ok((Box::new(cpu::CpuKernels), cpu_rows, Some(reason)))
                }
            }
        }
    }

    /// Apply `gains` to `batch`, writing corrected visibilities into `out`
    /// (which must have the same shape as the batch's data).
    pub fn apply_gains(
        &self,
        batch: &VisibilityBatch,
        gains: &GainTable,
        mut out: ArrayViewMut3<c64>,
        use_gpu: Option<bool>,
    ) -> Result<ApplyResult, GainCalError> {
        gains.check_against(batch)?;
        if out.dim() != batch.dim() {
            return Err(InputError::BadShape {
                thing: "output visibilities",
                expected: batch.data().len(),
                actual: out.len(),
            }
            .into());
        }

        let (num_rows, num_chans, num_pols) = batch.dim();
        let num_antennas = gains.num_antennas();
        let selection = self.select(use_gpu, num_rows, |rows| {
            estimate_applycal_memory(rows, num_chans, num_pols, num_antennas)
        })?;
        let (mut kernels, rows_per_chunk, fallback_reason) =
            self.kernels(selection, use_gpu)?;
        if let Some(reason) = fallback_reason.as_deref() {
            warn!("Applying gains on the CPU instead of the GPU: {reason}");
        }

        let start = Instant::now();
        let chunks = RowChunks::new(num_rows, rows_per_chunk);
        let num_chunks = chunks.len();
        debug!(
            "Applying gains to {num_rows} rows in {num_chunks} chunk(s) on the {}",
            kernels.backend()
        );
        let pb = scopeguard::guard(progress_bar(num_rows as u64, "Applying gains"), |pb| {
            pb.finish_and_clear()
        });

        let samples_per_row = num_chans * num_pols;
        let mut num_processed = 0;
        let mut num_flagged = 0;
        let mut error = None;
        for range in chunks {
            let result = kernels.apply(
                batch.data().slice(s![range.clone(), .., ..]),
                gains.view(),
                &batch.ant1()[range.clone()],
                &batch.ant2()[range.clone()],
                out.slice_mut(s![range.clone(), .., ..]),
            );
            match result {
                Ok(n) => {
                    num_flagged += n;
                    num_processed += range.len() * samples_per_row;
                    pb.inc(range.len() as u64);
                }
                Err(e) => {
                    warn!("Applying gains failed: {e}");
                    error = Some(e.to_string());
                    break;
                }
            }
        }
        drop(pb);

        Ok(ApplyResult {
            num_processed,
            num_calibrated: num_processed - num_flagged,
            num_flagged,
            elapsed: start.elapsed(),
            error,
            backend: kernels.backend(),
            fallback_reason,
            num_chunks,
        })
    }

    /// Solve for one gain per antenna.
    pub fn solve_per_antenna_gains(
        &self,
        problem: &SolveProblem,
        params: &SolveParams,
        use_gpu: Option<bool>,
    ) -> Result<SolutionResult, GainCalError> {
        if params.refant >= problem.num_antennas() {
            return Err(InputError::RefantOutOfRange {
                refant: params.refant,
                num_antennas: problem.num_antennas(),
            }
            .into());
        }

        let num_rows = problem.num_rows();
        let samples_per_row = problem.vis().len_of(Axis(1));
        let num_antennas = problem.num_antennas();
        let selection = self.select(use_gpu, num_rows, |rows| {
            let samples = rows
                .checked_mul(samples_per_row)
                .ok_or(MemoryError::Overflow { what: "gain solving" })?;
            estimate_solve_memory(samples, num_antennas)
        })?;
        let (mut kernels, _, fallback_reason) = self.kernels(selection, use_gpu)?;
        if let Some(reason) = fallback_reason.as_deref() {
            warn!("Solving for gains on the CPU instead of the GPU: {reason}");
        }
        let backend = kernels.backend();
        debug!("Solving for {num_antennas} gains on the {backend}");

        let mut result = match kernels.solve(problem, params) {
            Ok(result) => result,
            Err(KernelError::Input(e)) => return Err(e.into()),
            Err(e) => {
                warn!("Solving for gains failed: {e}");
                SolutionResult::failed(e.to_string(), 0, 0, backend)
            }
        };
        result.fallback_reason = fallback_reason;
        Ok(result)
    }
}

/// A progress bar that only draws if [`PROGRESS_BARS`] is set.
fn progress_bar(len: u64, message: &'static str) -> ProgressBar {
    let style = ProgressStyle::with_template(
        "{msg:17}: [{wide_bar:.blue}] {pos}/{len} rows ({elapsed_precise}<{eta_precise})",
    )
    .map(|s| s.progress_chars("=> "))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    ProgressBar::with_draw_target(
        Some(len),
        if PROGRESS_BARS.load() {
            ProgressDrawTarget::stdout()
        } else {
            ProgressDrawTarget::hidden()
        },
    )
    .with_style(style)
    .with_message(message)
}
