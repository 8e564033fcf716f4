// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use itertools::izip;
use ndarray::prelude::*;
use num_traits::Zero;

use super::{validate_antennas, GainTable};
use crate::{c64, InputError};

/// What a corrected visibility becomes if it can't be corrected.
pub(crate) const FLAGGED_SENTINEL: c64 = c64::new(f64::NAN, f64::NAN);

/// Correct visibilities with `vis / (g1 * conj(g2))`, writing into `out`.
/// Samples involving a gain of exactly zero are set to NaN and counted; the
/// count is returned.
///
/// The gains' channel and polarisation axes are either 1 long or as long as
/// the visibilities'. Antenna indices must already have been validated.
pub fn apply_gains_cpu(
    vis: ArrayView3<c64>,
    gains: ArrayView3<c64>,
    ant1: &[usize],
    ant2: &[usize],
    mut out: ArrayViewMut3<c64>,
) -> usize {
    assert_eq!(vis.dim(), out.dim());
    assert_eq!(vis.len_of(Axis(0)), ant1.len());
    assert_eq!(vis.len_of(Axis(0)), ant2.len());
    let (_, num_chans, num_pols) = vis.dim();
    let (_, gain_chans, gain_pols) = gains.dim();

    let mut num_flagged = 0;
    for (vis_cp, mut out_cp, &a1, &a2) in
        izip!(vis.outer_iter(), out.outer_iter_mut(), ant1, ant2)
    {
        let g1_cp = gains.index_axis(Axis(0), a1);
        let g2_cp = gains.index_axis(Axis(0), a2);
        for i_chan in 0..num_chans {
            let g_chan = if gain_chans == 1 { 0 } else { i_chan };
            for i_pol in 0..num_pols {
                let g_pol = if gain_pols == 1 { 0 } else { i_pol };
                let g1 = g1_cp[(g_chan, g_pol)];
                let g2 = g2_cp[(g_chan, g_pol)];
                out_cp[(i_chan, i_pol)] = if g1.is_zero() || g2.is_zero() {
                    num_flagged += 1;
                    FLAGGED_SENTINEL
                } else {
                    vis_cp[(i_chan, i_pol)] / (g1 * g2.conj())
                };
            }
        }
    }
    num_flagged
}

/// Apply one gain per antenna to a flat array of visibilities (one sample per
/// baseline), returning the corrected visibilities and the number that were
/// flagged.
pub fn apply_gains(
    vis: ArrayView1<c64>,
    gains: ArrayView1<c64>,
    ant1: &[usize],
    ant2: &[usize],
) -> Result<(Array1<c64>, usize), InputError> {
    validate_antennas(ant1, ant2, vis.len(), gains.len())?;
    let table = GainTable::from_vector(gains);
    let mut out = Array2::zeros((vis.len(), 1));
    let num_flagged = apply_gains_cpu(
        vis.insert_axis(Axis(1)).insert_axis(Axis(2)),
        table.view(),
        ant1,
        ant2,
        out.view_mut().insert_axis(Axis(2)),
    );
    Ok((out.remove_axis(Axis(1)), num_flagged))
}
