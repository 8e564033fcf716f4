// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Visibility batches, gain tables and the CPU kernels that solve for and
//! apply per-antenna complex gains.

mod apply;
mod solve;

pub use apply::{apply_gains, apply_gains_cpu};
pub(crate) use solve::{stefcal, CpuAccumulator, StefcalAccumulator};
pub use solve::{solve_per_antenna_gains, solve_per_antenna_gains_cpu};

use std::{ops::Range, time::Duration};

use itertools::izip;
use ndarray::prelude::*;

use crate::{
    backend::Backend,
    c64,
    constants::{DEFAULT_MAX_ITERATIONS, DEFAULT_REFANT, DEFAULT_TOLERANCE},
    InputError,
};

/// Check that there's one antenna pair per row and that every antenna index is
/// within range.
pub(crate) fn validate_antennas(
    ant1: &[usize],
    ant2: &[usize],
    num_rows: usize,
    num_antennas: usize,
) -> Result<(), InputError> {
    for (thing, ants) in [("antenna-1 indices", ant1), ("antenna-2 indices", ant2)] {
        if ants.len() != num_rows {
            return Err(InputError::BadShape {
                thing,
                expected: num_rows,
                actual: ants.len(),
            });
        }
    }
    for (row, (&a1, &a2)) in ant1.iter().zip(ant2).enumerate() {
        for antenna in [a1, a2] {
            if antenna >= num_antennas {
                return Err(InputError::AntennaOutOfRange {
                    row,
                    antenna,
                    num_antennas,
                });
            }
        }
    }
    Ok(())
}

/// Visibilities for a number of rows. Each row is one baseline at one time and
/// has samples for every channel and polarisation.
#[derive(Debug, Clone)]
pub struct VisibilityBatch {
    /// Dimensions are (rows, channels, polarisations).
    data: Array3<c64>,
    ant1: Vec<usize>,
    ant2: Vec<usize>,
    /// Same dimensions as `data`.
    flags: Option<Array3<bool>>,
    num_antennas: usize,
}

impl VisibilityBatch {
    pub fn new(
        data: Array3<c64>,
        ant1: Vec<usize>,
        ant2: Vec<usize>,
        flags: Option<Array3<bool>>,
        num_antennas: usize,
    ) -> Result<VisibilityBatch, InputError> {
        let num_rows = data.len_of(Axis(0));
        validate_antennas(&ant1, &ant2, num_rows, num_antennas)?;
        if let Some(flags) = flags.as_ref() {
            if flags.dim() != data.dim() {
                return Err(InputError::BadShape {
                    thing: "flags",
                    expected: data.len(),
                    actual: flags.len(),
                });
            }
        }

        Ok(VisibilityBatch {
            data,
            ant1,
            ant2,
            flags,
            num_antennas,
        })
    }

    pub fn data(&self) -> ArrayView3<c64> {
        self.data.view()
    }

    pub fn ant1(&self) -> &[usize] {
        &self.ant1
    }

    pub fn ant2(&self) -> &[usize] {
        &self.ant2
    }

    pub fn flags(&self) -> Option<ArrayView3<bool>> {
        self.flags.as_ref().map(|f| f.view())
    }

    pub fn num_rows(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn num_antennas(&self) -> usize {
        self.num_antennas
    }

    /// (rows, channels, polarisations)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }
}

/// Complex gains with dimensions (antennas, channels, polarisations). The
/// channel and polarisation axes are either 1 long (the same gain is used for
/// all of the data's channels or polarisations) or as long as the data's.
///
/// A gain of exactly `0+0j` means the antenna is unusable; any visibility it
/// contributes to is flagged when the gains are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct GainTable {
    gains: Array3<c64>,
}

impl GainTable {
    pub fn new(gains: Array3<c64>) -> GainTable {
        GainTable { gains }
    }

    /// One gain per antenna, used for all channels and polarisations.
    pub fn from_vector(gains: ArrayView1<c64>) -> GainTable {
        GainTable {
            gains: gains.insert_axis(Axis(1)).insert_axis(Axis(2)).to_owned(),
        }
    }

    pub fn identity(num_antennas: usize, num_channels: usize, num_pols: usize) -> GainTable {
        GainTable {
            gains: Array3::from_elem((num_antennas, num_channels, num_pols), c64::new(1.0, 0.0)),
        }
    }

    pub fn num_antennas(&self) -> usize {
        self.gains.len_of(Axis(0))
    }

    pub fn view(&self) -> ArrayView3<c64> {
        self.gains.view()
    }

    pub fn into_inner(self) -> Array3<c64> {
        self.gains
    }

    /// Can these gains be applied to `batch`?
    pub(crate) fn check_against(&self, batch: &VisibilityBatch) -> Result<(), InputError> {
        let (num_antennas, gain_chans, gain_pols) = self.gains.dim();
        let (_, num_chans, num_pols) = batch.dim();
        if num_antennas < batch.num_antennas() {
            return Err(InputError::BadShape {
                thing: "gain antennas",
                expected: batch.num_antennas(),
                actual: num_antennas,
            });
        }
        for (axis, gain, data) in [
            ("channels", gain_chans, num_chans),
            ("polarisations", gain_pols, num_pols),
        ] {
            if gain != 1 && gain != data {
                return Err(InputError::GainAxisMismatch { axis, gain, data });
            }
        }
        Ok(())
    }
}

/// The inputs to a gain solve. Each row is one baseline (`ant1[row]`,
/// `ant2[row]`) and carries any number of samples that share that baseline's
/// gains (e.g. all channels of one polarisation).
#[derive(Debug, Clone)]
pub struct SolveProblem<'a> {
    vis: ArrayView2<'a, c64>,
    model: ArrayView2<'a, c64>,
    weights: ArrayView2<'a, f64>,
    ant1: &'a [usize],
    ant2: &'a [usize],
    num_antennas: usize,
}

impl<'a> SolveProblem<'a> {
    pub fn new(
        vis: ArrayView2<'a, c64>,
        model: ArrayView2<'a, c64>,
        weights: ArrayView2<'a, f64>,
        ant1: &'a [usize],
        ant2: &'a [usize],
        num_antennas: usize,
    ) -> Result<SolveProblem<'a>, InputError> {
        for (thing, dim) in [("model visibilities", model.dim()), ("weights", weights.dim())] {
            if dim != vis.dim() {
                return Err(InputError::BadShape {
                    thing,
                    expected: vis.len(),
                    actual: dim.0 * dim.1,
                });
            }
        }
        validate_antennas(ant1, ant2, vis.len_of(Axis(0)), num_antennas)?;
        if let Some((index, &weight)) = weights
            .iter()
            .enumerate()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(InputError::BadWeight { index, weight });
        }

        Ok(SolveProblem {
            vis,
            model,
            weights,
            ant1,
            ant2,
            num_antennas,
        })
    }

    /// One sample per row.
    pub fn from_flat(
        vis: ArrayView1<'a, c64>,
        model: ArrayView1<'a, c64>,
        weights: ArrayView1<'a, f64>,
        ant1: &'a [usize],
        ant2: &'a [usize],
        num_antennas: usize,
    ) -> Result<SolveProblem<'a>, InputError> {
        Self::new(
            vis.insert_axis(Axis(1)),
            model.insert_axis(Axis(1)),
            weights.insert_axis(Axis(1)),
            ant1,
            ant2,
            num_antennas,
        )
    }

    pub fn num_antennas(&self) -> usize {
        self.num_antennas
    }

    pub fn num_rows(&self) -> usize {
        self.vis.len_of(Axis(0))
    }

    pub fn num_samples(&self) -> usize {
        self.vis.len()
    }

    pub(crate) fn vis(&self) -> ArrayView2<c64> {
        self.vis.view()
    }

    pub(crate) fn model(&self) -> ArrayView2<c64> {
        self.model.view()
    }

    pub(crate) fn weights(&self) -> ArrayView2<f64> {
        self.weights.view()
    }

    pub(crate) fn ant1(&self) -> &[usize] {
        self.ant1
    }

    pub(crate) fn ant2(&self) -> &[usize] {
        self.ant2
    }

    /// The rows in `range`. Used when a problem is too big to be resident on a
    /// device all at once.
    #[cfg_attr(not(feature = "cuda"), allow(dead_code))]
    pub(crate) fn rows(&self, range: Range<usize>) -> SolveProblem<'_> {
        SolveProblem {
            vis: self.vis.slice(s![range.clone(), ..]),
            model: self.model.slice(s![range.clone(), ..]),
            weights: self.weights.slice(s![range.clone(), ..]),
            ant1: &self.ant1[range.clone()],
            ant2: &self.ant2[range],
            num_antennas: self.num_antennas,
        }
    }

    /// Which antennas appear in at least one cross-correlation baseline with
    /// a non-zero weight and non-zero model? Others can't be solved for.
    pub(crate) fn constrained_antennas(&self) -> Vec<bool> {
        let mut constrained = vec![false; self.num_antennas];
        for (model_row, weights_row, &a1, &a2) in izip!(
            self.model.outer_iter(),
            self.weights.outer_iter(),
            self.ant1,
            self.ant2
        ) {
            if a1 == a2 || (constrained[a1] && constrained[a2]) {
                continue;
            }
            if model_row
                .iter()
                .zip(weights_row.iter())
                .any(|(m, &w)| w > 0.0 && m.norm_sqr() > 0.0)
            {
                constrained[a1] = true;
                constrained[a2] = true;
            }
        }
        constrained
    }
}

/// How to stop (and reference) a gain solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveParams {
    /// The antenna whose phase is fixed to 0.
    pub refant: usize,

    pub max_iterations: u32,

    /// Stop when the largest per-antenna gain change is smaller than this.
    pub tolerance: f64,

    /// Also fix the reference antenna's amplitude to 1.
    pub fix_refant_amplitude: bool,
}

impl Default for SolveParams {
    fn default() -> Self {
        SolveParams {
            refant: DEFAULT_REFANT,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
            fix_refant_amplitude: false,
        }
    }
}

/// The outcome of one gain solve.
#[derive(Debug, Clone)]
pub struct SolutionResult {
    /// One gain per antenna. `None` if the solve couldn't produce gains.
    pub gains: Option<Array1<c64>>,

    pub converged: bool,

    pub num_iterations: u32,

    /// The largest per-antenna gain change when convergence was last tested.
    pub max_change: f64,

    /// The number of antennas without any usable baselines. Their gains are
    /// left at 1.
    pub num_unconstrained: usize,

    pub error: Option<String>,

    pub backend: Backend,

    /// If the GPU was wanted but the CPU was used, why.
    pub fallback_reason: Option<String>,
}

impl SolutionResult {
    /// Gains are present, no error was recorded and, if `require_converged`,
    /// the solve converged.
    pub fn success(&self, require_converged: bool) -> bool {
        self.gains.is_some() && self.error.is_none() && (self.converged || !require_converged)
    }

    pub(crate) fn failed(
        error: String,
        num_iterations: u32,
        num_unconstrained: usize,
        backend: Backend,
    ) -> SolutionResult {
        SolutionResult {
            gains: None,
            converged: false,
            num_iterations,
            max_change: f64::NAN,
            num_unconstrained,
            error: Some(error),
            backend,
            fallback_reason: None,
        }
    }
}

/// The outcome of applying gains to a batch of visibilities.
#[derive(Debug, Clone)]
pub struct ApplyResult {
    /// The number of visibility samples looked at.
    pub num_processed: usize,

    /// The number of samples that were corrected.
    pub num_calibrated: usize,

    /// The number of samples flagged because a contributing gain was zero.
    pub num_flagged: usize,

    pub elapsed: Duration,

    pub error: Option<String>,

    pub backend: Backend,

    /// If the GPU was wanted but the CPU was used, why.
    pub fallback_reason: Option<String>,

    /// How many chunks of rows the work was split into.
    pub num_chunks: usize,
}

impl ApplyResult {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}
