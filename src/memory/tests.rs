// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use super::*;

const SIZES: [usize; 6] = [0, 1, 2, 17, 1000, 123_456];

#[test]
fn applycal_is_monotonic_in_every_input() {
    let base = [1000, 64, 4, 128];
    for axis in 0..4 {
        let mut prev: Option<MemoryEstimate> = None;
        for size in SIZES {
            let mut args = base;
            args[axis] = size;
            let est = estimate_applycal_memory(args[0], args[1], args[2], args[3]).unwrap();
            if let Some(prev) = prev {
                assert!(est.device_bytes >= prev.device_bytes, "axis {axis}");
                assert!(est.host_bytes >= prev.host_bytes, "axis {axis}");
            }
            prev = Some(est);
        }
    }
}

#[test]
fn solve_is_monotonic_in_every_input() {
    let base = [5000, 64];
    for axis in 0..2 {
        let mut prev: Option<MemoryEstimate> = None;
        for size in SIZES {
            let mut args = base;
            args[axis] = size;
            let est = estimate_solve_memory(args[0], args[1]).unwrap();
            if let Some(prev) = prev {
                assert!(est.device_gb() >= prev.device_gb(), "axis {axis}");
                assert!(est.host_gb() >= prev.host_gb(), "axis {axis}");
            }
            prev = Some(est);
        }
    }
}

#[test]
fn host_is_never_smaller_than_device() {
    for n_vis in SIZES {
        for n_ant in [0, 2, 256] {
            let est = estimate_applycal_memory(n_vis, 16, 4, n_ant).unwrap();
            assert!(est.host_bytes >= est.device_bytes);
            let est = estimate_solve_memory(n_vis, n_ant).unwrap();
            assert!(est.host_bytes >= est.device_bytes);
        }
    }
}

#[test]
fn applycal_counts_visibilities_twice() {
    let est = estimate_applycal_memory(10, 1, 1, 0).unwrap();
    // 10 input + 10 output samples, 20 antenna indices, one counter.
    assert_eq!(est.device_bytes, 10 * 2 * 16 + 10 * 2 * 4 + 8);
}

#[test]
fn huge_sizes_overflow_rather_than_wrap() {
    let result = estimate_applycal_memory(usize::MAX, usize::MAX, 4, 128);
    assert!(matches!(result, Err(MemoryError::Overflow { .. })));
    let result = estimate_solve_memory(usize::MAX, 1);
    assert!(result.is_err());
}

#[test]
fn fit_check_honours_reserve_and_budget() {
    let gib = 1024 * 1024 * 1024;
    // Nothing fits if only the reserve is free.
    assert!(!fits_on_device(1, GPU_MIN_FREE_BYTES, None));
    // 1 GiB * 1.5 fits in 3 GiB - 1 GiB reserve.
    assert!(fits_on_device(gib, 3 * gib, None));
    // ... but not within a 1 GiB budget.
    assert!(!fits_on_device(gib, 3 * gib, Some(1.0)));
}

#[test]
fn rows_per_chunk_finds_the_largest_fitting_count() {
    let estimate = |rows: usize| estimate_applycal_memory(rows, 1, 1, 0);
    let per_row = 2 * 16 + 2 * 4;
    // Enough room for exactly 1000 rows after the safety factor.
    let free = GPU_MIN_FREE_BYTES + ((1000 * per_row + 8) as f64 * 1.5) as u64;

    let rows = rows_per_chunk(1_000_000, 1_000_000, free, None, estimate)
        .unwrap()
        .unwrap();
    assert_eq!(rows, 1000);

    // The chunk size caps the result.
    let rows = rows_per_chunk(1_000_000, 10, free, None, estimate)
        .unwrap()
        .unwrap();
    assert_eq!(rows, 10);

    // No room at all.
    let rows = rows_per_chunk(1_000_000, 10, 0, None, estimate).unwrap();
    assert!(rows.is_none());
}
