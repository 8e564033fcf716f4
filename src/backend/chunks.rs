// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::ops::Range;

/// Contiguous, non-overlapping ranges of rows that together cover
/// `0..num_rows` in order. Every range has `rows_per_chunk` rows except
/// possibly the last.
#[derive(Debug, Clone)]
pub struct RowChunks {
    num_rows: usize,
    rows_per_chunk: usize,
    next: usize,
}

impl RowChunks {
    /// A `rows_per_chunk` of 0 is treated as 1.
    pub fn new(num_rows: usize, rows_per_chunk: usize) -> RowChunks {
        RowChunks {
            num_rows,
            rows_per_chunk: rows_per_chunk.max(1),
            next: 0,
        }
    }
}

impl Iterator for RowChunks {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Range<usize>> {
        if self.next >= self.num_rows {
            return None;
        }
        let start = self.next;
        let end = start.saturating_add(self.rows_per_chunk).min(self.num_rows);
        self.next = end;
        Some(start..end)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.num_rows.saturating_sub(self.next).div_ceil(self.rows_per_chunk);
        (len, Some(len))
    }
}

impl ExactSizeIterator for RowChunks {}
