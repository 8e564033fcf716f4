// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! These tests need a CUDA device.

use approx::assert_abs_diff_eq;
use ndarray::prelude::*;
use serial_test::serial;

use super::*;
use crate::{c64, gains::apply_gains_cpu};

#[test]
#[serial]
fn copy_to_and_from_device_succeeds() {
    const LEN: usize = 100;
    let heap = vec![0_u32; LEN];
    let d_ptr = DevicePointer::copy_to_device(&heap).unwrap();
    let mut heap2 = vec![1_u32; LEN];
    d_ptr.copy_from_device(&mut heap2).unwrap();
    assert_eq!(heap, heap2);
}

#[test]
#[serial]
fn gpu_malloc_huge_fails() {
    let size = 1024_usize.pow(4); // 1 TB;
    let result: Result<DevicePointer<u8>, GpuError> = DevicePointer::malloc(size);
    assert!(result.is_err());
    let err = result.unwrap_err().to_string();
    assert!(err.ends_with("cudaMalloc error: out of memory"), "{err}");
}

#[test]
fn copy_from_non_existent_pointer_fails() {
    let d_ptr: DevicePointer<u8> = DevicePointer {
        ptr: std::ptr::null_mut::<u8>(),
        size: 1,
    };
    let mut dest = [0; 100];
    let result = d_ptr.copy_from_device(&mut dest);
    assert!(result.is_err());
    let err = result.unwrap_err().to_string();
    assert!(err.contains("cudaMemcpy from device failed"));
    assert!(err.contains("Attempted to copy data from a null device pointer"));
}

#[test]
#[serial]
fn clear_works() {
    let buffer = [1; 10];
    let mut d_ptr = DevicePointer::copy_to_device(&buffer).unwrap();
    let mut copy = [2; 10];
    d_ptr.copy_from_device(&mut copy).unwrap();
    assert_eq!(&buffer, &copy);

    d_ptr.clear();
    d_ptr.copy_from_device(&mut copy).unwrap();
    assert_eq!(&[0; 10], &copy);
}

#[test]
#[serial]
fn apply_kernel_matches_cpu() {
    let _context = GpuContext::new(0).unwrap();
    let (num_rows, num_chans, num_pols) = (6, 3, 2);
    let vis = Array3::from_shape_fn((num_rows, num_chans, num_pols), |(r, c, p)| {
        c64::new(r as f64 + 1.0, c as f64 - p as f64)
    });
    let mut gains = Array3::from_shape_fn((4, num_chans, num_pols), |(a, c, p)| {
        c64::from_polar(1.0 + 0.1 * a as f64, 0.2 * (c + p) as f64)
    });
    gains[(3, 1, 0)] = c64::new(0.0, 0.0);
    let ant1 = [0, 0, 0, 1, 1, 2];
    let ant2 = [1, 2, 3, 2, 3, 3];

    let mut expected = Array3::zeros(vis.dim());
    let expected_flagged =
        apply_gains_cpu(vis.view(), gains.view(), &ant1, &ant2, expected.view_mut());

    let d_vis = DevicePointer::copy_to_device(vis.as_slice().unwrap()).unwrap();
    let d_gains = DevicePointer::copy_to_device(gains.as_slice().unwrap()).unwrap();
    let d_ant1 = DevicePointer::copy_to_device(&ant1.map(|a| a as i32)).unwrap();
    let d_ant2 = DevicePointer::copy_to_device(&ant2.map(|a| a as i32)).unwrap();
    let mut d_out: DevicePointer<c64> =
        DevicePointer::malloc(vis.len() * std::mem::size_of::<c64>()).unwrap();
    let mut d_num_flagged = DevicePointer::copy_to_device(&[0_u64]).unwrap();
    gpu_kernel_call!(
        gpu_apply_gains,
        d_vis.get().cast(),
        d_gains.get().cast(),
        d_ant1.get(),
        d_ant2.get(),
        num_rows as i32,
        num_chans as i32,
        num_pols as i32,
        num_chans as i32,
        num_pols as i32,
        d_out.get_mut().cast(),
        d_num_flagged.get_mut(),
    )
    .unwrap();

    let mut out = Array3::zeros(vis.dim());
    d_out.copy_from_device(out.as_slice_mut().unwrap()).unwrap();
    let mut num_flagged = [0_u64];
    d_num_flagged.copy_from_device(&mut num_flagged).unwrap();

    assert_eq!(num_flagged[0], expected_flagged as u64);
    for (o, e) in out.iter().zip(expected.iter()) {
        if e.re.is_nan() {
            assert!(o.re.is_nan() && o.im.is_nan());
        } else {
            assert_abs_diff_eq!(*o, *e, epsilon = 1e-12);
        }
    }
}
