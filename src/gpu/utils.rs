// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Utilities for CUDA devices.
//!
//! We assume that everything is UTF-8.

include!("utils_bindings.rs");

use std::{
    ffi::{c_char, CStr},
    panic::Location,
};

use cuda_runtime_sys::{
    cudaError::cudaSuccess, cudaGetDevice, cudaGetDeviceCount, cudaGetErrorString,
    cudaMemGetInfo, cudaSetDevice,
};
use log::debug;

use super::GpuError;

#[derive(Debug, Clone)]
pub(crate) struct GpuDriverInfo {
    /// Formatted CUDA driver version, e.g. "11.7".
    pub(crate) driver_version: Box<str>,
    /// Formatted CUDA runtime version, e.g. "11.7".
    pub(crate) runtime_version: Box<str>,
}

#[derive(Debug, Clone)]
pub(crate) struct GpuDeviceInfo {
    pub(crate) name: Box<str>,
    pub(crate) capability: Box<str>,
    /// \[MebiBytes (MiB)\]
    pub(crate) total_global_mem: usize,
}

#[track_caller]
fn cuda_error(code: cuda_runtime_sys::cudaError, what: &str) -> GpuError {
    let msg = unsafe { CStr::from_ptr(cudaGetErrorString(code)) }
        .to_str()
        .unwrap_or("<cannot read CUDA error string>");
    let location = Location::caller();
    GpuError::Generic {
        msg: format!("{what}: {msg}").into(),
        file: location.file(),
        line: location.line(),
    }
}

/// How many CUDA devices are visible? If the CUDA runtime can't answer (e.g.
/// there's no driver), 0 is returned.
pub(crate) fn device_count() -> usize {
    let mut count = 0;
    let code = unsafe { cudaGetDeviceCount(&mut count) };
    if code != cudaSuccess {
        debug!("cudaGetDeviceCount failed: {}", cuda_error(code, "device count"));
        return 0;
    }
    usize::try_from(count).unwrap_or(0)
}

/// Selects a CUDA device for as long as this is alive. The previously-selected
/// device is restored on drop.
pub(crate) struct GpuContext {
    previous_device: i32,
}

impl GpuContext {
    #[track_caller]
    pub(crate) fn new(gpu_id: usize) -> Result<GpuContext, GpuError> {
        let device = i32::try_from(gpu_id).unwrap_or(i32::MAX);
        let mut previous_device = 0;
        unsafe {
            let code = cudaGetDevice(&mut previous_device);
            if code != cudaSuccess {
                return Err(cuda_error(code, "cudaGetDevice"));
            }
            let code = cudaSetDevice(device);
            if code != cudaSuccess {
                return Err(cuda_error(code, &format!("cudaSetDevice({gpu_id})")));
            }
        }
        Ok(GpuContext { previous_device })
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            cudaSetDevice(self.previous_device);
        }
    }
}

/// The free memory on device `gpu_id` \[bytes\].
pub(crate) fn free_memory(gpu_id: usize) -> Result<u64, GpuError> {
    let _context = GpuContext::new(gpu_id)?;
    let mut free = 0;
    let mut total = 0;
    let code = unsafe { cudaMemGetInfo(&mut free, &mut total) };
    if code != cudaSuccess {
        return Err(cuda_error(code, "cudaMemGetInfo"));
    }
    Ok(free as u64)
}

/// Get CUDA device and driver information for device `gpu_id`.
pub(crate) fn get_device_info(gpu_id: usize) -> Result<(GpuDeviceInfo, GpuDriverInfo), GpuError> {
    let mut name: Vec<c_char> = vec![0; 256];
    let mut device_major = 0;
    let mut device_minor = 0;
    let mut total_global_mem = 0;
    let mut driver_version = 0;
    let mut runtime_version = 0;
    unsafe {
        let error_message_ptr = get_gpu_device_info(
            i32::try_from(gpu_id).unwrap_or(i32::MAX),
            name.as_mut_ptr(),
            &mut device_major,
            &mut device_minor,
            &mut total_global_mem,
            &mut driver_version,
            &mut runtime_version,
        );
        if !error_message_ptr.is_null() {
            // Get the CUDA error message behind the pointer.
            let error_message = CStr::from_ptr(error_message_ptr)
                .to_str()
                .unwrap_or("<cannot read CUDA error string>");
            let location = Location::caller();
            return Err(GpuError::Generic {
                msg: error_message.into(),
                file: location.file(),
                line: location.line(),
            });
        }
    }

    // Make sure the name is terminated, whatever the C side did.
    if let Some(last) = name.last_mut() {
        *last = 0;
    }
    let name = unsafe { CStr::from_ptr(name.as_ptr()) }
        .to_string_lossy()
        .into_owned()
        .into_boxed_str();
    let device_info = GpuDeviceInfo {
        name,
        capability: format!("{device_major}.{device_minor}").into_boxed_str(),
        total_global_mem: total_global_mem / 1048576,
    };

    let driver_version = format!("{}.{}", driver_version / 1000, (driver_version / 10) % 100);
    let runtime_version = format!(
        "{}.{}",
        runtime_version / 1000,
        (runtime_version / 10) % 100
    );

    Ok((
        device_info,
        GpuDriverInfo {
            driver_version: driver_version.into_boxed_str(),
            runtime_version: runtime_version.into_boxed_str(),
        },
    ))
}
