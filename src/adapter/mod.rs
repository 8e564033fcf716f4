// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Moving visibilities and gains between stores and the calibration engine.
//!
//! Gains come from a [`CalTableStore`], visibilities from a
//! [`MeasurementStore`]; corrected visibilities are written back to the
//! measurement store and checked before being declared good.

mod error;
mod store;
#[cfg(test)]
mod tests;

pub use error::StoreError;
pub use store::{CalTableStore, MeasurementStore, MemoryCalTable, MemoryStore};

use itertools::izip;
use log::{debug, info, warn};
use ndarray::prelude::*;

use crate::{
    backend::Dispatcher,
    c64,
    config::{Interpolation, SolveInterval},
    constants::DEFAULT_MIN_FRACTION,
    gains::{ApplyResult, GainTable, SolutionResult, SolveParams, SolveProblem, VisibilityBatch},
    GainCalError, InputError, NumericDegeneracy,
};

const IDENTITY: c64 = c64::new(1.0, 0.0);

#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOptions {
    /// The column to correct.
    pub data_column: String,

    /// Where corrected visibilities go. Created if it doesn't exist.
    pub output_column: String,

    pub interpolation: Interpolation,

    pub use_gpu: Option<bool>,

    /// The output is rejected unless more than this fraction of it is usable.
    pub min_fraction: f64,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        ApplyOptions {
            data_column: "DATA".to_string(),
            output_column: "CORRECTED_DATA".to_string(),
            interpolation: Interpolation::default(),
            use_gpu: None,
            min_fraction: DEFAULT_MIN_FRACTION,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolveOptions {
    pub data_column: String,

    pub model_column: String,

    pub interval: SolveInterval,

    pub params: SolveParams,

    pub use_gpu: Option<bool>,
}

impl Default for SolveOptions {
    fn default() -> Self {
        SolveOptions {
            data_column: "DATA".to_string(),
            model_column: "MODEL_DATA".to_string(),
            interval: SolveInterval::default(),
            params: SolveParams::default(),
            use_gpu: None,
        }
    }
}

/// Gains solved from a measurement store, in the same layout as a calibration
/// table: (antennas, gain channels, polarisations).
#[derive(Debug, Clone)]
pub struct TableSolution {
    pub gains: Array3<c64>,

    /// Set for antennas without a solution (the solve failed or the antenna
    /// had no usable baselines).
    pub flags: Array3<bool>,

    /// One result per solve, ordered by polarisation then channel.
    pub results: Vec<SolutionResult>,
}

impl TableSolution {
    /// The number of solves without gains.
    pub fn num_failed(&self) -> usize {
        self.results.iter().filter(|r| r.gains.is_none()).count()
    }

    /// The solved gains with flagged entries set to identity.
    pub fn gain_table(&self) -> GainTable {
        let mut gains = self.gains.clone();
        gains.zip_mut_with(&self.flags, |g, &f| {
            if f {
                *g = IDENTITY
            }
        });
        GainTable::new(gains)
    }

    pub fn into_caltable(self) -> MemoryCalTable {
        MemoryCalTable {
            antenna_ids: (0..self.gains.len_of(Axis(0))).collect(),
            parameters: self.gains,
            flags: self.flags,
        }
    }
}

/// The store must have rows, and `column` must exist.
fn check_store<S: MeasurementStore + ?Sized>(store: &S, column: &str) -> Result<(), InputError> {
    if store.num_rows() == 0 {
        return Err(InputError::EmptyStore {
            path: store.path().display().to_string(),
        });
    }
    if !store.has_column(column) {
        return Err(InputError::MissingColumn {
            column: column.to_string(),
        });
    }
    Ok(())
}

/// Read the gains in a calibration table, ready to be applied to data with
/// `num_antennas` antennas and `num_channels` channels.
///
/// Flagged and non-finite parameters are replaced with `1+0j`, as are
/// antennas absent from the table, so that applying the gains never destroys
/// data. If the table's channel count is neither 1 nor `num_channels`, the
/// table's channels are mapped onto the data's with `interpolation`.
pub fn read_gain_table<C: CalTableStore + ?Sized>(
    caltable: &C,
    num_antennas: usize,
    num_channels: usize,
    interpolation: Interpolation,
) -> Result<GainTable, GainCalError> {
    let antenna_ids = caltable.antenna_ids()?;
    let parameters = caltable.parameters()?;
    let flags = caltable.flags()?;
    let (num_entries, table_chans, num_pols) = parameters.dim();
    if flags.dim() != parameters.dim() {
        return Err(StoreError::BadTable {
            thing: "flags",
            expected: parameters.len(),
            actual: flags.len(),
        }
        .into());
    }
    if antenna_ids.len() != num_entries {
        return Err(StoreError::BadTable {
            thing: "antenna IDs",
            expected: num_entries,
            actual: antenna_ids.len(),
        }
        .into());
    }
    if num_entries > 0 {
        for (thing, len) in [
            ("calibration table channels", table_chans),
            ("calibration table polarisations", num_pols),
        ] {
            if len == 0 {
                return Err(InputError::BadShape {
                    thing,
                    expected: 1,
                    actual: 0,
                }
                .into());
            }
        }
    }

    let out_chans = if table_chans == 1 || table_chans == num_channels {
        table_chans
    } else {
        debug!(
            "Mapping {table_chans} gain channels onto {num_channels} data channels \
             ({interpolation})"
        );
        num_channels
    };
    let mut gains = Array3::from_elem((num_antennas, out_chans, num_pols), IDENTITY);
    let mut num_flagged = 0;
    for (&ant, params, flags) in izip!(
        &antenna_ids,
        parameters.outer_iter(),
        flags.outer_iter()
    ) {
        if ant >= num_antennas {
            debug!(
                "Ignoring calibration table entry for antenna {ant}; \
                 the data has {num_antennas} antennas"
            );
            continue;
        }
        for (pol, (params, flags)) in params
            .axis_iter(Axis(1))
            .zip(flags.axis_iter(Axis(1)))
            .enumerate()
        {
            let usable: Vec<Option<c64>> = params
                .iter()
                .zip(flags.iter())
                .map(|(&g, &f)| (!f && g.is_finite()).then_some(g))
                .collect();
            num_flagged += usable.iter().filter(|g| g.is_none()).count();
            let mapped = map_channels(&usable, out_chans, interpolation);
            gains.slice_mut(s![ant, .., pol]).assign(&mapped);
        }
    }
    if num_flagged > 0 {
        debug!("{num_flagged} calibration table parameters are flagged; using identity for them");
    }

    Ok(GainTable::new(gains))
}

/// Map gains from `gains.len()` channels onto `num_channels` channels that
/// span the same band. `None` entries are unusable.
fn map_channels(
    gains: &[Option<c64>],
    num_channels: usize,
    interpolation: Interpolation,
) -> Array1<c64> {
    let table_chans = gains.len();
    if table_chans == num_channels {
        return gains.iter().map(|g| g.unwrap_or(IDENTITY)).collect();
    }

    let ratio = table_chans as f64 / num_channels as f64;
    (0..num_channels)
        .map(|chan| {
            let centre = (chan as f64 + 0.5) * ratio;
            match interpolation {
                Interpolation::Nearest => {
                    let nearest = (centre.floor() as usize).min(table_chans - 1);
                    gains[nearest].unwrap_or(IDENTITY)
                }
                Interpolation::Linear => {
                    let pos = (centre - 0.5).clamp(0.0, (table_chans - 1) as f64);
                    let lower = pos.floor() as usize;
                    let upper = (lower + 1).min(table_chans - 1);
                    let frac = pos - lower as f64;
                    match (gains[lower], gains[upper]) {
                        (Some(l), Some(u)) => l * (1.0 - frac) + u * frac,
                        (Some(g), None) | (None, Some(g)) => g,
                        (None, None) => IDENTITY,
                    }
                }
            }
        })
        .collect()
}

/// Apply the gains in `caltable` to the data column of `store`, writing the
/// corrected visibilities to the output column (creating it if necessary) and
/// flagging samples that couldn't be corrected. The written output is then
/// verified with [`verify_output`].
///
/// If the kernels fail part-way through, nothing is written and the returned
/// result carries the error.
pub fn apply_calibration<S, C>(
    store: &mut S,
    caltable: &C,
    opts: &ApplyOptions,
    dispatcher: &Dispatcher,
) -> Result<ApplyResult, GainCalError>
where
    S: MeasurementStore + ?Sized,
    C: CalTableStore + ?Sized,
{
    check_store(store, &opts.data_column)?;
    if !store.has_column(&opts.output_column) {
        store
            .can_create_column(&opts.output_column)
            .map_err(|reason| InputError::IllegalColumn {
                column: opts.output_column.clone(),
                reason,
            })?;
    }

    let data = store.read_column(&opts.data_column)?;
    let (ant1, ant2) = store.read_antennas()?;
    let mut flags = store.read_flags()?;
    let batch = VisibilityBatch::new(data, ant1, ant2, Some(flags.clone()), store.num_antennas())?;
    let (_, num_chans, _) = batch.dim();
    let gains = read_gain_table(caltable, batch.num_antennas(), num_chans, opts.interpolation)?;

    let mut corrected = Array3::zeros(batch.dim());
    let result = dispatcher.apply_gains(&batch, &gains, corrected.view_mut(), opts.use_gpu)?;
    if let Some(e) = result.error.as_deref() {
        warn!("Not writing to '{}': {e}", opts.output_column);
        return Ok(result);
    }

    flags.zip_mut_with(&corrected, |f, v| *f |= v.is_nan());
    if !store.has_column(&opts.output_column) {
        store.create_column(&opts.output_column)?;
    }
    store.write_column(&opts.output_column, corrected.view())?;
    store.write_flags(flags.view())?;
    info!(
        "Calibrated {} of {} samples on the {} ({} flagged, {:.3}s)",
        result.num_calibrated,
        result.num_processed,
        result.backend,
        result.num_flagged,
        result.elapsed.as_secs_f64()
    );

    verify_output(store, &opts.output_column, opts.min_fraction)?;
    Ok(result)
}

/// Solve for per-antenna gains from the data and model columns of `store`.
/// Flagged and non-finite samples are given zero weight. Each polarisation is
/// solved separately, either once per channel or once using all channels.
pub fn solve_calibration<S: MeasurementStore + ?Sized>(
    store: &S,
    opts: &SolveOptions,
    dispatcher: &Dispatcher,
) -> Result<TableSolution, GainCalError> {
    check_store(store, &opts.data_column)?;
    check_store(store, &opts.model_column)?;

    let mut data = store.read_column(&opts.data_column)?;
    let mut model = store.read_column(&opts.model_column)?;
    let (ant1, ant2) = store.read_antennas()?;
    let flags = store.read_flags()?;
    if flags.dim() != data.dim() || model.dim() != data.dim() {
        return Err(InputError::BadShape {
            thing: "model visibilities and flags",
            expected: data.len(),
            actual: model.len().min(flags.len()),
        }
        .into());
    }

    // Unusable samples get no weight and are zeroed so they can't leak NaNs.
    let mut weights = Array3::<f64>::zeros(data.dim());
    for (w, d, m, &f) in izip!(
        weights.iter_mut(),
        data.iter_mut(),
        model.iter_mut(),
        flags.iter()
    ) {
        if f || !d.is_finite() || !m.is_finite() {
            *d = c64::default();
            *m = c64::default();
        } else {
            *w = 1.0;
        }
    }

    let num_antennas = store.num_antennas();
    let (_, num_chans, num_pols) = data.dim();
    let gain_chans = match opts.interval {
        SolveInterval::PerChannel => num_chans,
        SolveInterval::Combined => 1,
    };
    let mut gains = Array3::from_elem((num_antennas, gain_chans, num_pols), IDENTITY);
    let mut gain_flags = Array3::from_elem(gains.dim(), true);
    let mut results = Vec::with_capacity(gain_chans * num_pols);

    for pol in 0..num_pols {
        for gain_chan in 0..gain_chans {
            let chans = match opts.interval {
                SolveInterval::PerChannel => gain_chan..gain_chan + 1,
                SolveInterval::Combined => 0..num_chans,
            };
            let problem = SolveProblem::new(
                data.slice(s![.., chans.clone(), pol]),
                model.slice(s![.., chans.clone(), pol]),
                weights.slice(s![.., chans, pol]),
                &ant1,
                &ant2,
                num_antennas,
            )?;
            let result = dispatcher.solve_per_antenna_gains(&problem, &opts.params, opts.use_gpu)?;
            match result.gains.as_ref() {
                Some(solved) => {
                    let constrained = problem.constrained_antennas();
                    for (ant, (&g, &c)) in solved.iter().zip(constrained.iter()).enumerate() {
                        gains[(ant, gain_chan, pol)] = g;
                        gain_flags[(ant, gain_chan, pol)] = !c;
                    }
                    if !result.converged {
                        warn!(
                            "Solve for channel {gain_chan}, polarisation {pol} didn't converge \
                             ({} iterations, max change {:e})",
                            result.num_iterations, result.max_change
                        );
                    }
                }
                None => warn!(
                    "No solution for channel {gain_chan}, polarisation {pol}: {}",
                    result.error.as_deref().unwrap_or("unknown error")
                ),
            }
            results.push(result);
        }
    }

    let solution = TableSolution {
        gains,
        flags: gain_flags,
        results,
    };
    info!(
        "Solved {} of {} gain intervals",
        solution.results.len() - solution.num_failed(),
        solution.results.len()
    );
    Ok(solution)
}

/// Check that `column` of `store` holds usable data: the store must have rows
/// and the column must exist, and more than `min_fraction` of the column's
/// samples must be unflagged, finite and non-zero. Returns that fraction.
pub fn verify_output<S: MeasurementStore + ?Sized>(
    store: &S,
    column: &str,
    min_fraction: f64,
) -> Result<f64, GainCalError> {
    check_store(store, column)?;
    let data = store.read_column(column)?;
    let flags = store.read_flags()?;

    let mut num_unflagged = 0;
    let mut num_good = 0;
    for (v, &f) in data.iter().zip(flags.iter()) {
        if !f {
            num_unflagged += 1;
            if v.is_finite() && *v != c64::default() {
                num_good += 1;
            }
        }
    }
    if num_unflagged == 0 {
        return Err(NumericDegeneracy::AllFlagged {
            column: column.to_string(),
        }
        .into());
    }

    let fraction = num_good as f64 / data.len() as f64;
    if fraction <= min_fraction {
        return Err(NumericDegeneracy::Unpopulated {
            column: column.to_string(),
            fraction,
            min_fraction,
        }
        .into());
    }
    debug!("{:.2}% of column '{column}' is usable", fraction * 100.0);
    Ok(fraction)
}
