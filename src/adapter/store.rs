// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Interfaces to where visibilities and calibration tables live, and
//! in-memory implementations of them.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use log::debug;
use ndarray::prelude::*;

use super::StoreError;
use crate::{c64, InputError};

/// Columns that a [`MemoryStore`] allows.
const LEGAL_COLUMNS: [&str; 3] = ["DATA", "MODEL_DATA", "CORRECTED_DATA"];

/// A table of visibilities. Every data column has the shape (rows, channels,
/// polarisations), and so do the flags.
pub trait MeasurementStore {
    /// Where the store lives. Collaborators (e.g. flaggers) are given this.
    fn path(&self) -> &Path;

    fn num_rows(&self) -> usize;

    fn num_channels(&self) -> usize;

    fn num_pols(&self) -> usize;

    fn num_antennas(&self) -> usize;

    fn has_column(&self, column: &str) -> bool;

    /// Can `column` be created? If not, the reason is returned.
    fn can_create_column(&self, column: &str) -> Result<(), String>;

    /// Add a column filled with zeros.
    fn create_column(&mut self, column: &str) -> Result<(), StoreError>;

    fn read_column(&self, column: &str) -> Result<Array3<c64>, StoreError>;

    /// The antenna-1 and antenna-2 index of every row.
    fn read_antennas(&self) -> Result<(Vec<usize>, Vec<usize>), StoreError>;

    /// Stores without flags report nothing flagged.
    fn read_flags(&self) -> Result<Array3<bool>, StoreError>;

    fn write_column(&mut self, column: &str, data: ArrayView3<c64>) -> Result<(), StoreError>;

    fn write_flags(&mut self, flags: ArrayView3<bool>) -> Result<(), StoreError>;

    fn dim(&self) -> (usize, usize, usize) {
        (self.num_rows(), self.num_channels(), self.num_pols())
    }
}

/// A table of per-antenna calibration parameters with the shape (table
/// entries, channels, polarisations). Entry `i` belongs to antenna
/// `antenna_ids()[i]`.
pub trait CalTableStore {
    fn antenna_ids(&self) -> Result<Vec<usize>, StoreError>;

    fn parameters(&self) -> Result<Array3<c64>, StoreError>;

    fn flags(&self) -> Result<Array3<bool>, StoreError>;
}

/// A [`MeasurementStore`] held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    path: PathBuf,
    columns: BTreeMap<String, Array3<c64>>,
    ant1: Vec<usize>,
    ant2: Vec<usize>,
    flags: Array3<bool>,
    num_antennas: usize,
}

impl MemoryStore {
    /// Make a store with a "DATA" column. Nothing is flagged.
    pub fn new<P: Into<PathBuf>>(
        path: P,
        data: Array3<c64>,
        ant1: Vec<usize>,
        ant2: Vec<usize>,
        num_antennas: usize,
    ) -> Result<MemoryStore, InputError> {
        crate::gains::validate_antennas(&ant1, &ant2, data.len_of(Axis(0)), num_antennas)?;
        let flags = Array3::from_elem(data.dim(), false);
        let mut columns = BTreeMap::new();
        columns.insert("DATA".to_string(), data);
        Ok(MemoryStore {
            path: path.into(),
            columns,
            ant1,
            ant2,
            flags,
            num_antennas,
        })
    }

    /// Add (or replace) a column.
    pub fn with_column(
        mut self,
        column: &str,
        data: Array3<c64>,
    ) -> Result<MemoryStore, InputError> {
        if let Err(reason) = self.can_create_column(column) {
            return Err(InputError::IllegalColumn {
                column: column.to_string(),
                reason,
            });
        }
        self.check_dim("column", data.dim())?;
        self.columns.insert(column.to_string(), data);
        Ok(self)
    }

    pub fn with_flags(mut self, flags: Array3<bool>) -> Result<MemoryStore, InputError> {
        self.check_dim("flags", flags.dim())?;
        self.flags = flags;
        Ok(self)
    }

    /// Remove a column, returning it.
    pub fn take_column(&mut self, column: &str) -> Option<Array3<c64>> {
        self.columns.remove(column)
    }

    pub fn column(&self, column: &str) -> Option<ArrayView3<c64>> {
        self.columns.get(column).map(|c| c.view())
    }

    pub fn flags(&self) -> ArrayView3<bool> {
        self.flags.view()
    }

    fn check_dim(&self, thing: &'static str, dim: (usize, usize, usize)) -> Result<(), InputError> {
        if dim != self.flags.dim() {
            return Err(InputError::BadShape {
                thing,
                expected: self.flags.len(),
                actual: dim.0 * dim.1 * dim.2,
            });
        }
        Ok(())
    }

    fn path_string(&self) -> String {
        self.path.display().to_string()
    }

    fn check_write_dim(
        &self,
        thing: &str,
        actual: (usize, usize, usize),
    ) -> Result<(), StoreError> {
        if actual != self.flags.dim() {
            return Err(StoreError::ShapeMismatch {
                thing: thing.to_string(),
                path: self.path_string(),
                expected: self.flags.dim(),
                actual,
            });
        }
        Ok(())
    }
}

impl MeasurementStore for MemoryStore {
    fn path(&self) -> &Path {
        &self.path
    }

    fn num_rows(&self) -> usize {
        self.flags.len_of(Axis(0))
    }

    fn num_channels(&self) -> usize {
        self.flags.len_of(Axis(1))
    }

    fn num_pols(&self) -> usize {
        self.flags.len_of(Axis(2))
    }

    fn num_antennas(&self) -> usize {
        self.num_antennas
    }

    fn has_column(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    fn can_create_column(&self, column: &str) -> Result<(), String> {
        if LEGAL_COLUMNS.contains(&column) {
            Ok(())
        } else {
            Err(format!(
                "the only visibility columns are {}",
                LEGAL_COLUMNS.join(", ")
            ))
        }
    }

    fn create_column(&mut self, column: &str) -> Result<(), StoreError> {
        if self.has_column(column) {
            return Err(StoreError::ColumnExists {
                column: column.to_string(),
                path: self.path_string(),
            });
        }
        debug!("Creating column '{column}' in {}", self.path.display());
        self.columns
            .insert(column.to_string(), Array3::zeros(self.flags.dim()));
        Ok(())
    }

    fn read_column(&self, column: &str) -> Result<Array3<c64>, StoreError> {
        self.columns
            .get(column)
            .cloned()
            .ok_or_else(|| StoreError::NoSuchColumn {
                column: column.to_string(),
                path: self.path_string(),
            })
    }

    fn read_antennas(&self) -> Result<(Vec<usize>, Vec<usize>), StoreError> {
        Ok((self.ant1.clone(), self.ant2.clone()))
    }

    fn read_flags(&self) -> Result<Array3<bool>, StoreError> {
        Ok(self.flags.clone())
    }

    fn write_column(&mut self, column: &str, data: ArrayView3<c64>) -> Result<(), StoreError> {
        self.check_write_dim(column, data.dim())?;
        let path = self.path_string();
        match self.columns.get_mut(column) {
            Some(c) => {
                c.assign(&data);
                Ok(())
            }
            None => Err(StoreError::NoSuchColumn {
                column: column.to_string(),
                path,
            }),
        }
    }

    fn write_flags(&mut self, flags: ArrayView3<bool>) -> Result<(), StoreError> {
        self.check_write_dim("flags", flags.dim())?;
        self.flags.assign(&flags);
        Ok(())
    }
}

/// A [`CalTableStore`] held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryCalTable {
    pub(super) antenna_ids: Vec<usize>,
    pub(super) parameters: Array3<c64>,
    pub(super) flags: Array3<bool>,
}

impl MemoryCalTable {
    /// Entry `i` is for antenna `i`.
    pub fn new(parameters: Array3<c64>, flags: Array3<bool>) -> Result<MemoryCalTable, InputError> {
        let antenna_ids = (0..parameters.len_of(Axis(0))).collect();
        MemoryCalTable::with_antenna_ids(antenna_ids, parameters, flags)
    }

    pub fn with_antenna_ids(
        antenna_ids: Vec<usize>,
        parameters: Array3<c64>,
        flags: Array3<bool>,
    ) -> Result<MemoryCalTable, InputError> {
        if flags.dim() != parameters.dim() {
            return Err(InputError::BadShape {
                thing: "calibration table flags",
                expected: parameters.len(),
                actual: flags.len(),
            });
        }
        if antenna_ids.len() != parameters.len_of(Axis(0)) {
            return Err(InputError::BadShape {
                thing: "calibration table antenna IDs",
                expected: parameters.len_of(Axis(0)),
                actual: antenna_ids.len(),
            });
        }
        Ok(MemoryCalTable {
            antenna_ids,
            parameters,
            flags,
        })
    }

    /// Nothing flagged.
    pub fn unflagged(parameters: Array3<c64>) -> MemoryCalTable {
        MemoryCalTable {
            antenna_ids: (0..parameters.len_of(Axis(0))).collect(),
            flags: Array3::from_elem(parameters.dim(), false),
            parameters,
        }
    }
}

impl CalTableStore for MemoryCalTable {
    fn antenna_ids(&self) -> Result<Vec<usize>, StoreError> {
        Ok(self.antenna_ids.clone())
    }

    fn parameters(&self) -> Result<Array3<c64>, StoreError> {
        Ok(self.parameters.clone())
    }

    fn flags(&self) -> Result<Array3<bool>, StoreError> {
        Ok(self.flags.clone())
    }
}
