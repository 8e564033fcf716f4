// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors from running kernels on a backend.

use thiserror::Error;

#[derive(Error, Debug)]
pub(crate) enum KernelError {
    #[error(transparent)]
    Input(#[from] crate::InputError),

    #[error("Problem size {size} is too large for the device's {what}")]
    TooLarge { what: &'static str, size: usize },

    #[cfg(feature = "cuda")]
    #[error(transparent)]
    Gpu(#[from] crate::gpu::GpuError),
}
