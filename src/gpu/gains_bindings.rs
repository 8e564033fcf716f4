// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Bindings to src_gpu/gains.h.

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct GpuComplex {
    pub re: f64,
    pub im: f64,
}

extern "C" {
    pub fn gpu_apply_gains(
        d_vis: *const GpuComplex,
        d_gains: *const GpuComplex,
        d_ant1: *const ::std::os::raw::c_int,
        d_ant2: *const ::std::os::raw::c_int,
        num_rows: ::std::os::raw::c_int,
        num_chans: ::std::os::raw::c_int,
        num_pols: ::std::os::raw::c_int,
        gain_chans: ::std::os::raw::c_int,
        gain_pols: ::std::os::raw::c_int,
        d_out: *mut GpuComplex,
        d_num_flagged: *mut ::std::os::raw::c_ulonglong,
    ) -> *const ::std::os::raw::c_char;
}

extern "C" {
    pub fn gpu_accumulate_stefcal(
        d_vis: *const GpuComplex,
        d_model: *const GpuComplex,
        d_weights: *const f64,
        d_ant1: *const ::std::os::raw::c_int,
        d_ant2: *const ::std::os::raw::c_int,
        num_rows: ::std::os::raw::c_int,
        samples_per_row: ::std::os::raw::c_int,
        d_gains: *const GpuComplex,
        d_top: *mut GpuComplex,
        d_bot: *mut f64,
    ) -> *const ::std::os::raw::c_char;
}
