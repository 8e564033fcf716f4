// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Scalar StEFCal: an alternating least-squares solve for one complex gain per
//! antenna, as described by Salvini & Wijnholds (2014) and used by MitchCal.

use itertools::izip;
use log::{debug, trace, warn};
use ndarray::prelude::*;

use super::{SolutionResult, SolveParams, SolveProblem};
use crate::{backend::Backend, c64, InputError};

/// Something that can form the StEFCal numerators (`top`) and denominators
/// (`bot`) for every antenna given the current gain estimates. The CPU does
/// this in a loop below; the GPU does it in a kernel. Everything else about a
/// solve is done on the host, so all backends share the same iteration.
pub(crate) trait StefcalAccumulator {
    type Error;

    /// `top` and `bot` are zeroed before this is called.
    fn accumulate(
        &mut self,
        gains: &[c64],
        top: &mut [c64],
        bot: &mut [f64],
    ) -> Result<(), Self::Error>;
}

pub(crate) struct CpuAccumulator<'p, 'a> {
    problem: &'p SolveProblem<'a>,
}

impl<'p, 'a> CpuAccumulator<'p, 'a> {
    pub(crate) fn new(problem: &'p SolveProblem<'a>) -> CpuAccumulator<'p, 'a> {
        CpuAccumulator { problem }
    }
}

impl StefcalAccumulator for CpuAccumulator<'_, '_> {
    type Error = std::convert::Infallible;

    fn accumulate(
        &mut self,
        gains: &[c64],
        top: &mut [c64],
        bot: &mut [f64],
    ) -> Result<(), Self::Error> {
        let p = self.problem;
        for (vis_row, model_row, weights_row, &a1, &a2) in izip!(
            p.vis().outer_iter(),
            p.model().outer_iter(),
            p.weights().outer_iter(),
            p.ant1(),
            p.ant2()
        ) {
            // Autocorrelations don't constrain relative gains.
            if a1 == a2 {
                continue;
            }
            let (g1, g2) = (gains[a1], gains[a2]);
            for (&d, &m, &w) in izip!(vis_row, model_row, weights_row) {
                if w <= 0.0 {
                    continue;
                }
                // d = g1 (m g2^*)
                let z = m * g2.conj();
                top[a1] += z.conj() * d * w;
                bot[a1] += z.norm_sqr() * w;
                // d^* = g2 (g1 m)^*
                let y = g1 * m;
                top[a2] += y * d.conj() * w;
                bot[a2] += y.norm_sqr() * w;
            }
        }
        Ok(())
    }
}

/// Rotate all constrained gains so that the reference antenna has zero phase
/// (and, if requested, unit amplitude).
fn reference_gains(gains: &mut [c64], constrained: &[bool], refant: usize, fix_amplitude: bool) {
    let g_ref = gains[refant];
    let amp = g_ref.norm();
    if !amp.is_normal() {
        return;
    }
    let factor = if fix_amplitude {
        g_ref.conj() / (amp * amp)
    } else {
        g_ref.conj() / amp
    };
    gains
        .iter_mut()
        .zip(constrained)
        .filter(|(_, &c)| c)
        .for_each(|(g, _)| *g *= factor);
    gains[refant] = c64::new(gains[refant].norm(), 0.0);
}

/// Run StEFCal on `problem`, using `accumulator` to form the per-antenna sums.
/// `Err` is only returned if the accumulator fails; numerical failures are
/// reported in the [`SolutionResult`].
pub(crate) fn stefcal<A: StefcalAccumulator>(
    problem: &SolveProblem,
    params: &SolveParams,
    accumulator: &mut A,
    backend: Backend,
) -> Result<SolutionResult, A::Error> {
    let num_antennas = problem.num_antennas();
    let constrained = problem.constrained_antennas();
    let num_unconstrained = constrained.iter().filter(|&&c| !c).count();
    if num_unconstrained == num_antennas {
        return Ok(SolutionResult::failed(
            "Every model visibility or weight is zero; there is nothing to solve against"
                .to_string(),
            0,
            num_unconstrained,
            backend,
        ));
    }
    if num_unconstrained > 0 {
        warn!("{num_unconstrained} antenna(s) have no usable baselines; their gains are left at 1");
    }

    let mut gains = vec![c64::new(1.0, 0.0); num_antennas];
    let mut new_gains = gains.clone();
    let mut top = vec![c64::default(); num_antennas];
    let mut bot = vec![0.0; num_antennas];

    let mut iteration = 0;
    let mut converged = false;
    let mut max_change = f64::INFINITY;
    while iteration < params.max_iterations {
        iteration += 1;
        top.fill(c64::default());
        bot.fill(0.0);
        accumulator.accumulate(&gains, &mut top, &mut bot)?;

        for (new, &old, &top, &bot, &c) in
            izip!(new_gains.iter_mut(), &gains, &top, &bot, &constrained)
        {
            *new = if c && bot > 0.0 { top / bot } else { old };
        }
        if let Some(i_ant) = new_gains.iter().position(|g| !g.is_finite()) {
            return Ok(SolutionResult::failed(
                format!("The gain for antenna {i_ant} became non-finite on iteration {iteration}"),
                iteration,
                num_unconstrained,
                backend,
            ));
        }

        // On every even iteration, test for convergence and use the average
        // of the last two solutions.
        let test_convergence = iteration % 2 == 0;
        if test_convergence {
            max_change = new_gains
                .iter()
                .zip(&gains)
                .map(|(new, old)| (new - old).norm())
                .fold(0.0, f64::max);
            new_gains
                .iter_mut()
                .zip(&gains)
                .for_each(|(new, old)| *new = (*new + old) * 0.5);
        }
        std::mem::swap(&mut gains, &mut new_gains);
        reference_gains(
            &mut gains,
            &constrained,
            params.refant,
            params.fix_refant_amplitude,
        );

        if test_convergence {
            trace!("Iteration {iteration}: max change {max_change:e}");
            if max_change < params.tolerance {
                converged = true;
                break;
            }
        }
    }

    if converged {
        debug!("Converged after {iteration} iterations (max change {max_change:e})");
    } else {
        debug!(
            "Did not converge after {iteration} iterations (max change {max_change:e}, \
             tolerance {:e})",
            params.tolerance
        );
    }

    Ok(SolutionResult {
        gains: Some(Array1::from(gains)),
        converged,
        num_iterations: iteration,
        max_change,
        num_unconstrained,
        error: None,
        backend,
        fallback_reason: None,
    })
}

/// Solve for per-antenna gains on the CPU.
pub fn solve_per_antenna_gains_cpu(
    problem: &SolveProblem,
    params: &SolveParams,
) -> Result<SolutionResult, InputError> {
    if params.refant >= problem.num_antennas() {
        return Err(InputError::RefantOutOfRange {
            refant: params.refant,
            num_antennas: problem.num_antennas(),
        });
    }
    let mut accumulator = CpuAccumulator::new(problem);
    match stefcal(problem, params, &mut accumulator, Backend::Cpu) {
        Ok(result) => Ok(result),
        Err(infallible) => match infallible {},
    }
}

/// Solve for per-antenna gains on the CPU from flat arrays of visibilities,
/// model visibilities and weights (one sample per baseline).
#[allow(clippy::too_many_arguments)]
pub fn solve_per_antenna_gains<'a>(
    vis: ArrayView1<'a, c64>,
    model: ArrayView1<'a, c64>,
    ant1: &'a [usize],
    ant2: &'a [usize],
    weights: ArrayView1<'a, f64>,
    num_antennas: usize,
    refant: usize,
    max_iterations: u32,
    tolerance: f64,
) -> Result<SolutionResult, InputError> {
    let problem = SolveProblem::from_flat(vis, model, weights, ant1, ant2, num_antennas)?;
    solve_per_antenna_gains_cpu(
        &problem,
        &SolveParams {
            refant,
            max_iterations,
            tolerance,
            fix_refant_amplitude: false,
        },
    )
}
