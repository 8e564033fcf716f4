// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A simple built-in flagger: robust amplitude clipping.

use std::{cell::RefCell, path::Path};

use log::debug;
use ndarray::prelude::*;

use super::{FlaggingApplier, FlaggingError, FlaggingStrategy};
use crate::{
    adapter::MeasurementStore,
    c64,
    constants::{AGGRESSIVE_ROW_FLAG_FRACTION, DEFAULT_SIGMA, MAD_TO_SIGMA},
};

/// Flags samples of a [`MeasurementStore`] column whose amplitudes are far
/// from the median amplitude of their channel and polarisation. The spread
/// is measured with the median absolute deviation.
///
/// The store is shared through a [`RefCell`] so the calibration callback can
/// use it between flagging attempts.
pub struct SigmaClipFlagger<'s, S: MeasurementStore + ?Sized> {
    store: &'s RefCell<S>,
    column: String,
    /// The flags before this flagger first touched the store.
    original_flags: Option<Array3<bool>>,
}

impl<'s, S: MeasurementStore + ?Sized> SigmaClipFlagger<'s, S> {
    pub fn new(store: &'s RefCell<S>, column: &str) -> SigmaClipFlagger<'s, S> {
        SigmaClipFlagger {
            store,
            column: column.to_string(),
            original_flags: None,
        }
    }

    fn check_path(&self, store_path: &Path) -> Result<(), FlaggingError> {
        let store = self.store.borrow();
        if store.path() != store_path {
            return Err(FlaggingError::WrongStore {
                expected: store.path().display().to_string(),
                got: store_path.display().to_string(),
            });
        }
        Ok(())
    }
}

/// The median of `values`, which is reordered. `values` must not be empty.
fn median(values: &mut [f64]) -> f64 {
    values.sort_unstable_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Flag outliers in one channel and polarisation. Returns how many new flags
/// were set.
fn clip(vis: ArrayView1<c64>, mut flags: ArrayViewMut1<bool>, threshold: f64) -> usize {
    let mut amps: Vec<f64> = vis
        .iter()
        .zip(flags.iter())
        .filter(|(v, &f)| !f && v.is_finite())
        .map(|(v, _)| v.norm())
        .collect();
    let mut num_new = 0;
    if amps.is_empty() {
        // Only non-finite samples can be unflagged here.
        for (v, f) in vis.iter().zip(flags.iter_mut()) {
            if !*f && !v.is_finite() {
                *f = true;
                num_new += 1;
            }
        }
        return num_new;
    }

    let centre = median(&mut amps);
    amps.iter_mut().for_each(|a| *a = (*a - centre).abs());
    let sigma = MAD_TO_SIGMA * median(&mut amps);

    for (v, f) in vis.iter().zip(flags.iter_mut()) {
        if *f {
            continue;
        }
        let outlier =
            !v.is_finite() || (sigma > 0.0 && (v.norm() - centre).abs() > threshold * sigma);
        if outlier {
            *f = true;
            num_new += 1;
        }
    }
    num_new
}

impl<S: MeasurementStore + ?Sized> FlaggingApplier for SigmaClipFlagger<'_, S> {
    fn apply(
        &mut self,
        store_path: &Path,
        strategy: &FlaggingStrategy,
    ) -> Result<f64, FlaggingError> {
        self.check_path(store_path)?;
        let mut store = self.store.borrow_mut();
        let mut flags = store.read_flags()?;
        if self.original_flags.is_none() {
            self.original_flags = Some(flags.clone());
        }
        let data = store.read_column(&self.column)?;

        let threshold = DEFAULT_SIGMA * strategy.threshold_scale;
        debug!(
            "Sigma clipping '{}' at {threshold} sigma ({}{})",
            self.column,
            strategy.name,
            if strategy.aggressive { ", aggressive" } else { "" }
        );
        let mut num_new = 0;
        for (vis, mut flags) in data
            .axis_iter(Axis(1))
            .zip(flags.axis_iter_mut(Axis(1)))
        {
            for (vis, flags) in vis.axis_iter(Axis(1)).zip(flags.axis_iter_mut(Axis(1))) {
                num_new += clip(vis, flags, threshold);
            }
        }

        if strategy.aggressive {
            let mut num_rows_flagged = 0;
            for mut row in flags.outer_iter_mut() {
                let num_flagged = row.iter().filter(|&&f| f).count();
                if num_flagged < row.len()
                    && num_flagged as f64 > AGGRESSIVE_ROW_FLAG_FRACTION * row.len() as f64
                {
                    num_new += row.len() - num_flagged;
                    row.fill(true);
                    num_rows_flagged += 1;
                }
            }
            debug!("Flagged {num_rows_flagged} mostly-flagged rows");
        }

        store.write_flags(flags.view())?;
        let fraction = if flags.is_empty() {
            0.0
        } else {
            flags.iter().filter(|&&f| f).count() as f64 / flags.len() as f64
        };
        debug!(
            "Strategy '{}' set {num_new} new flags; {:.2}% of the data is flagged",
            strategy.name,
            fraction * 100.0
        );
        Ok(fraction)
    }

    fn reset_flags(&mut self, store_path: &Path) -> Result<(), FlaggingError> {
        self.check_path(store_path)?;
        if let Some(original) = self.original_flags.as_ref() {
            self.store.borrow_mut().write_flags(original.view())?;
        }
        Ok(())
    }
}
