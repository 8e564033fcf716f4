// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Estimates of how much device and host memory gain application and gain
//! solving need, and the checks that decide whether (and in how many rows at
//! a time) work fits on a GPU.
//!
//! All sizes are `usize`, so negative sizes can't be expressed; sizes so large
//! that the byte count overflows are rejected instead.

#[cfg(test)]
mod tests;

use std::mem::size_of;

use indicatif::HumanBytes;
use thiserror::Error;

use crate::{
    c64,
    constants::{GIBIBYTE, GPU_ALLOCATION_SAFETY_FACTOR, GPU_MIN_FREE_BYTES},
};

/// Bytes per complex sample.
const COMPLEX_BYTES: u64 = size_of::<c64>() as u64;
/// Antenna indices are `int` on the device.
const DEVICE_INDEX_BYTES: u64 = size_of::<i32>() as u64;
const HOST_INDEX_BYTES: u64 = size_of::<usize>() as u64;
const FLOAT_BYTES: u64 = size_of::<f64>() as u64;
const FLAG_BYTES: u64 = size_of::<bool>() as u64;
/// The device's count of flagged samples.
const COUNTER_BYTES: u64 = size_of::<u64>() as u64;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("The memory estimate for {what} overflowed; the problem size is too large to represent")]
    Overflow { what: &'static str },
}

/// How much memory a piece of work needs on the device and on the host. The
/// host always needs at least as much as the device, because everything on
/// the device is staged from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryEstimate {
    pub device_bytes: u64,
    pub host_bytes: u64,
}

impl MemoryEstimate {
    /// \[GiB\]
    pub fn device_gb(&self) -> f64 {
        self.device_bytes as f64 / GIBIBYTE
    }

    /// \[GiB\]
    pub fn host_gb(&self) -> f64 {
        self.host_bytes as f64 / GIBIBYTE
    }
}

impl std::fmt::Display for MemoryEstimate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} on device, {} on host",
            HumanBytes(self.device_bytes),
            HumanBytes(self.host_bytes)
        )
    }
}

/// Multiply all of the factors, or `None` on overflow.
fn product(factors: &[u64]) -> Option<u64> {
    factors.iter().try_fold(1_u64, |acc, &f| acc.checked_mul(f))
}

fn sum(terms: &[Option<u64>]) -> Option<u64> {
    terms
        .iter()
        .try_fold(0_u64, |acc, &t| t.and_then(|t| acc.checked_add(t)))
}

/// Estimate the memory needed to apply gains to `n_vis` rows of visibilities,
/// each with `n_channels * n_pols` samples, using a gain table with
/// `n_antennas` antennas (and the same number of channels and polarisations as
/// the data).
pub fn estimate_applycal_memory(
    n_vis: usize,
    n_channels: usize,
    n_pols: usize,
    n_antennas: usize,
) -> Result<MemoryEstimate, MemoryError> {
    let (n_vis, n_channels, n_pols, n_antennas) = (
        n_vis as u64,
        n_channels as u64,
        n_pols as u64,
        n_antennas as u64,
    );
    let overflow = || MemoryError::Overflow { what: "applycal" };

    let num_samples = product(&[n_vis, n_channels, n_pols]).ok_or_else(overflow)?;
    let device_bytes = sum(&[
        // Input and output visibilities.
        product(&[num_samples, 2, COMPLEX_BYTES]),
        // Gains.
        product(&[n_antennas, n_channels, n_pols, COMPLEX_BYTES]),
        // Both antenna indices for every row.
        product(&[n_vis, 2, DEVICE_INDEX_BYTES]),
        Some(COUNTER_BYTES),
    ])
    .ok_or_else(overflow)?;
    let host_bytes = sum(&[
        Some(device_bytes),
        product(&[num_samples, FLAG_BYTES]),
        product(&[n_vis, 2, HOST_INDEX_BYTES]),
    ])
    .ok_or_else(overflow)?;

    Ok(MemoryEstimate {
        device_bytes,
        host_bytes,
    })
}

/// Estimate the memory needed to solve for `n_antennas` gains from `n_vis`
/// visibility samples (with the same number of model samples and weights).
pub fn estimate_solve_memory(
    n_vis: usize,
    n_antennas: usize,
) -> Result<MemoryEstimate, MemoryError> {
    let (n_vis, n_antennas) = (n_vis as u64, n_antennas as u64);
    let overflow = || MemoryError::Overflow { what: "gain solving" };

    let device_bytes = sum(&[
        // Data, model, weights and antenna indices.
        product(&[
            n_vis,
            2 * COMPLEX_BYTES + FLOAT_BYTES + 2 * DEVICE_INDEX_BYTES,
        ]),
        // Gains, numerators and denominators.
        product(&[n_antennas, 2 * COMPLEX_BYTES + FLOAT_BYTES]),
    ])
    .ok_or_else(overflow)?;
    let host_bytes = sum(&[
        Some(device_bytes),
        product(&[n_vis, 2, HOST_INDEX_BYTES]),
        // The previous and next iterates.
        product(&[n_antennas, 2, COMPLEX_BYTES]),
    ])
    .ok_or_else(overflow)?;

    Ok(MemoryEstimate {
        device_bytes,
        host_bytes,
    })
}

/// Does work needing `device_bytes` fit on a device reporting `free_bytes`
/// free? The estimate is inflated by a safety factor, a reserve is always
/// kept free, and `budget_gb` (if given) caps what may be used.
pub fn fits_on_device(device_bytes: u64, free_bytes: u64, budget_gb: Option<f64>) -> bool {
    let required = device_bytes as f64 * GPU_ALLOCATION_SAFETY_FACTOR;
    let mut available = free_bytes.saturating_sub(GPU_MIN_FREE_BYTES) as f64;
    if let Some(budget_gb) = budget_gb {
        available = available.min(budget_gb * GIBIBYTE);
    }
    required <= available
}

/// Find the largest number of rows (no more than `num_rows` or `chunk_size`)
/// whose device estimate fits in `free_bytes`. `None` is returned if not even
/// a single row fits.
pub(crate) fn rows_per_chunk<F>(
    num_rows: usize,
    chunk_size: usize,
    free_bytes: u64,
    budget_gb: Option<f64>,
    estimate: F,
) -> Result<Option<usize>, MemoryError>
where
    F: Fn(usize) -> Result<MemoryEstimate, MemoryError>,
{
    let fits = |rows: usize| -> Result<bool, MemoryError> {
        Ok(fits_on_device(
            estimate(rows)?.device_bytes,
            free_bytes,
            budget_gb,
        ))
    };

    let max_rows = num_rows.min(chunk_size).max(1);
    if fits(max_rows)? {
        return Ok(Some(max_rows));
    }
    if !fits(1)? {
        return Ok(None);
    }

    // Estimates are monotonic in the number of rows, so bisect.
    let (mut lo, mut hi) = (1, max_rows);
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if fits(mid)? {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Ok(Some(lo))
}
