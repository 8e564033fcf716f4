// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use ndarray::prelude::*;

use super::{Backend, GainKernels, KernelError};
use crate::{
    c64,
    gains::{
        apply_gains_cpu, solve_per_antenna_gains_cpu, SolutionResult, SolveParams, SolveProblem,
    },
};

/// Gain kernels that run on the host.
pub(crate) struct CpuKernels;

impl GainKernels for CpuKernels {
    fn backend(&self) -> Backend {
        Backend::Cpu
    }

    fn apply(
        &mut self,
        vis: ArrayView3<c64>,
        gains: ArrayView3<c64>,
        ant1: &[usize],
        ant2: &[usize],
        out: ArrayViewMut3<c64>,
    ) -> Result<usize, KernelError> {
        Ok(apply_gains_cpu(vis, gains, ant1, ant2, out))
    }

    fn solve(
        &mut self,
        problem: &SolveProblem,
        params: &SolveParams,
    ) -> Result<SolutionResult, KernelError> {
        Ok(solve_per_antenna_gains_cpu(problem, params)?)
    }
}
