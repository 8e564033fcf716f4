// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::env;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Use the "built" crate to generate some useful build-time information,
    // including the git hash and compiler version.
    built::write_built_file().expect("Failed to acquire build-time information");

    #[cfg(feature = "cuda")]
    gpu::build();
}

#[cfg(feature = "cuda")]
mod gpu {
    use super::env;

    const DEFAULT_CUDA_ARCHES: &[u16] = &[60, 70, 80];
    const DEFAULT_CUDA_SMS: &[u16] = &[60, 70, 75, 80, 86];

    fn parse_and_validate_compute(c: &str, var: &str) -> Vec<u16> {
        let mut out = vec![];
        for compute in c.trim().split(',') {
            // Check that there's only two numeric characters.
            if compute.len() != 2 {
                panic!("When parsing {var}, found '{compute}', which is not a two-digit number!")
            }

            match compute.parse() {
                Ok(p) => out.push(p),
                Err(_) => panic!("'{compute}', part of {var}, couldn't be parsed into a number!"),
            }
        }
        out
    }

    pub(super) fn build() {
        println!("cargo:rerun-if-env-changed=GAINCAL_CUDA_COMPUTE");
        let (arches, sms) = match env::var("GAINCAL_CUDA_COMPUTE") {
            Ok(c) => {
                let compute = parse_and_validate_compute(&c, "GAINCAL_CUDA_COMPUTE");
                let sms = compute.clone();
                (compute, sms)
            }
            Err(_) => {
                println!("cargo:warning=No GAINCAL_CUDA_COMPUTE; Passing arch=compute_{DEFAULT_CUDA_ARCHES:?} and code=sm_{DEFAULT_CUDA_SMS:?} to nvcc");
                (DEFAULT_CUDA_ARCHES.to_vec(), DEFAULT_CUDA_SMS.to_vec())
            }
        };
        // Double-precision atomicAdd is needed.
        if let Some(arch) = arches.iter().find(|&&a| a < 60) {
            panic!("compute_{arch} is too old; at least compute_60 is required");
        }

        // Track all CUDA source files; if any of them change, tell cargo to
        // recompile.
        let mut cuda_files = vec![];
        for entry in std::fs::read_dir("src_gpu").expect("src_gpu directory doesn't exist!") {
            let entry = entry.expect("Couldn't access file in src_gpu directory");
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            match path.extension().and_then(|os_str| os_str.to_str()) {
                Some("cu") => {
                    println!("cargo:rerun-if-changed={}", path.display());
                    cuda_files.push(path);
                }

                Some("h" | "cuh") => {
                    println!("cargo:rerun-if-changed={}", path.display());
                }

                _ => (),
            }
        }

        let mut cuda_target = cc::Build::new();
        cuda_target
            .cuda(true)
            .cudart(if cfg!(feature = "cuda-static") {
                "static"
            } else {
                "shared"
            })
            .define(
                // The DEBUG env. variable is set by cargo. If running "cargo
                // build --release", DEBUG is "false", otherwise "true".
                // C/C++/CUDA like the compile option "NDEBUG" to be defined
                // when using assert.h, so if appropriate, define that here.
                match env::var("DEBUG").as_deref() {
                    Ok("false") => "NDEBUG",
                    _ => "DEBUG",
                },
                None,
            );

        for arch in arches {
            for &sm in &sms {
                if sm < arch {
                    continue;
                }

                cuda_target.flag("-gencode");
                cuda_target.flag(&format!("arch=compute_{arch},code=sm_{sm}"));
            }
        }

        cuda_target.files(cuda_files).compile("gaincal_gpu");
    }
}
