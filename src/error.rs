// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error types shared by all of the calibration engine. [`GainCalError`] is
//! the umbrella error returned by public entry points.

use thiserror::Error;

/// Problems with the shape or content of inputs. These are never retried.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("Column '{column}' doesn't exist in the measurement store")]
    MissingColumn { column: String },

    #[error("The measurement store '{path}' has no rows")]
    EmptyStore { path: String },

    #[error("Expected {thing} to have {expected} elements, but it had {actual}")]
    BadShape {
        /// What was it that wasn't sensible? Antenna index length, flag shape,
        /// etc.
        thing: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Row {row} refers to antenna {antenna}, but there are only {num_antennas} antennas")]
    AntennaOutOfRange {
        row: usize,
        antenna: usize,
        num_antennas: usize,
    },

    #[error("Reference antenna {refant} is out of range; there are only {num_antennas} antennas")]
    RefantOutOfRange { refant: usize, num_antennas: usize },

    #[error("Gains have {gain} {axis}, but the visibilities have {data}; gains must have 1 or {data}")]
    GainAxisMismatch {
        axis: &'static str,
        gain: usize,
        data: usize,
    },

    #[error("Weight {weight} at sample {index} is negative or not finite")]
    BadWeight { index: usize, weight: f64 },

    #[error("Column '{column}' is not a legal output target: {reason}")]
    IllegalColumn { column: String, reason: String },
}

/// Corrected visibilities that can't be trusted.
#[derive(Error, Debug)]
pub enum NumericDegeneracy {
    #[error("All corrected data in column '{column}' is flagged")]
    AllFlagged { column: String },

    #[error("Column '{column}' appears unpopulated; only {fraction:.4} of its samples are unflagged and non-zero (need more than {min_fraction})")]
    Unpopulated {
        column: String,
        fraction: f64,
        min_fraction: f64,
    },
}

#[derive(Error, Debug)]
pub enum GainCalError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    NumericDegeneracy(#[from] NumericDegeneracy),

    #[error("GPU processing was requested, but {reason}")]
    GpuUnavailable { reason: String },

    #[error(transparent)]
    Memory(#[from] crate::memory::MemoryError),

    #[error(transparent)]
    Store(#[from] crate::adapter::StoreError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Flagging(#[from] crate::flagging::FlaggingError),
}
