// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors from measurement stores and calibration tables.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Column '{column}' doesn't exist in '{path}'")]
    NoSuchColumn { column: String, path: String },

    #[error("Column '{column}' already exists in '{path}'")]
    ColumnExists { column: String, path: String },

    #[error("Tried to write {thing} with shape {actual:?} to '{path}', but the store's shape is {expected:?}")]
    ShapeMismatch {
        thing: String,
        path: String,
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },

    #[error("Calibration table {thing} have {actual} entries, but {expected} were expected")]
    BadTable {
        thing: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
