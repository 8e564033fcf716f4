// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Bindings to src_gpu/utils.h.

extern "C" {
    pub fn get_gpu_device_info(
        device: ::std::os::raw::c_int,
        name: *mut ::std::os::raw::c_char,
        device_major: *mut ::std::os::raw::c_int,
        device_minor: *mut ::std::os::raw::c_int,
        total_global_mem: *mut usize,
        driver_version: *mut ::std::os::raw::c_int,
        runtime_version: *mut ::std::os::raw::c_int,
    ) -> *const ::std::os::raw::c_char;
}
