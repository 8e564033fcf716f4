// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Detecting whether a GPU can be used.

use crossbeam_utils::atomic::AtomicCell;
use log::debug;

/// Something that knows whether a GPU is available and how much memory it
/// has free.
pub trait DeviceProbe: Sync {
    fn is_available(&self) -> bool;

    /// Why [`DeviceProbe::is_available`] returned `false`.
    fn unavailable_reason(&self) -> String {
        "no GPU device is available".to_string()
    }

    /// The free memory on device `gpu_id` \[bytes\].
    fn free_memory(&self, gpu_id: usize) -> Result<u64, String>;
}

lazy_static::lazy_static! {
    /// The process-wide GPU probe. The first availability check is cached;
    /// use [`GpuProbe::reset`] to check again.
    pub static ref GPU_PROBE: GpuProbe = GpuProbe::default();
}

/// Probes the CUDA runtime (if compiled with the "cuda" feature).
#[derive(Debug, Default)]
pub struct GpuProbe {
    available: AtomicCell<Option<bool>>,
}

impl GpuProbe {
    /// Forget the cached result.
    pub fn reset(&self) {
        self.available.store(None);
    }

    fn probe() -> bool {
        cfg_if::cfg_if! {
            if #[cfg(feature = "cuda")] {
                let count = crate::gpu::device_count();
                debug!("Found {count} CUDA device(s)");
                count > 0
            } else {
                debug!("Not compiled with CUDA support; no GPU is available");
                false
            }
        }
    }
}

impl DeviceProbe for GpuProbe {
    fn is_available(&self) -> bool {
        match self.available.load() {
            Some(available) => available,
            None => {
                let available = Self::probe();
                self.available.store(Some(available));
                available
            }
        }
    }

    fn unavailable_reason(&self) -> String {
        if cfg!(feature = "cuda") {
            "no CUDA device was found".to_string()
        } else {
            "gaincal was compiled without the \"cuda\" feature".to_string()
        }
    }

    #[cfg_attr(not(feature = "cuda"), allow(unused_variables))]
    fn free_memory(&self, gpu_id: usize) -> Result<u64, String> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "cuda")] {
                crate::gpu::free_memory(gpu_id).map_err(|e| e.to_string())
            } else {
                Err(self.unavailable_reason())
            }
        }
    }
}
