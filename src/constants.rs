// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Useful constants.

All gain and visibility arithmetic is done in double precision; these
constants are the defaults used when a configuration doesn't say otherwise.
 */

/// The maximum number of times to iterate when solving for gains.
pub const DEFAULT_MAX_ITERATIONS: u32 = 100;

/// Iteration stops when the largest per-antenna gain change is smaller than
/// this value.
pub const DEFAULT_TOLERANCE: f64 = 1e-6;

/// The number of visibility rows handed to a kernel at once.
pub const DEFAULT_CHUNK_SIZE: usize = 1_000_000;

/// The minimum fraction of unflagged, non-zero output samples needed before
/// corrected visibilities are accepted.
pub const DEFAULT_MIN_FRACTION: f64 = 0.01;

/// The default reference antenna index.
pub const DEFAULT_REFANT: usize = 0;

/// Device memory estimates are multiplied by this before checking whether
/// they fit.
pub const GPU_ALLOCATION_SAFETY_FACTOR: f64 = 1.5;

/// Always keep this many bytes free on the device (1 GiB).
pub const GPU_MIN_FREE_BYTES: u64 = 1024 * 1024 * 1024;

/// Flagging threshold (in units of robust standard deviations) for the
/// built-in sigma-clip flagger before a strategy's `threshold_scale` is
/// applied.
pub const DEFAULT_SIGMA: f64 = 5.0;

/// Converts a median absolute deviation into a Gaussian standard deviation.
pub const MAD_TO_SIGMA: f64 = 1.482_602_218_505_602;

/// Aggressive strategies flag an entire row when more than this fraction of
/// its samples are already flagged.
pub const AGGRESSIVE_ROW_FLAG_FRACTION: f64 = 0.5;

/// Bytes in a GiB.
pub(crate) const GIBIBYTE: f64 = 1024.0 * 1024.0 * 1024.0;
