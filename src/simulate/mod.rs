// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Synthetic visibilities with known gains, for testing and benchmarking.


use std::path::PathBuf;

use log::debug;
use ndarray::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal, Uniform};

use crate::{adapter::MemoryStore, c64, InputError};

/// What to simulate.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticParams {
    pub num_antennas: usize,

    pub num_channels: usize,

    pub num_pols: usize,

    /// Every baseline appears once per timestep.
    pub num_timesteps: usize,

    /// The standard deviation of the gain amplitudes around 1.
    pub amplitude_scatter: f64,

    /// Noise standard deviation relative to each model visibility's
    /// amplitude, i.e. 1/SNR. Zero for no noise.
    pub noise_fraction: f64,

    /// The fraction of samples replaced with strong interference.
    pub rfi_fraction: f64,

    /// This antenna's gains are exactly `1+0j`.
    pub refant: usize,

    pub seed: u64,
}

impl Default for SyntheticParams {
    fn default() -> Self {
        SyntheticParams {
            num_antennas: 16,
            num_channels: 4,
            num_pols: 2,
            num_timesteps: 2,
            amplitude_scatter: 0.05,
            noise_fraction: 0.01,
            rfi_fraction: 0.0,
            refant: 0,
            seed: 42,
        }
    }
}

/// Visibilities `data = g[a1] * model * conj(g[a2]) + noise` for known gains.
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    /// (antennas, 1, polarisations); the same gains apply to every channel.
    pub true_gains: Array3<c64>,

    /// (rows, channels, polarisations)
    pub model: Array3<c64>,

    pub data: Array3<c64>,

    pub ant1: Vec<usize>,

    pub ant2: Vec<usize>,

    pub num_antennas: usize,
}

impl SyntheticDataset {
    pub fn generate(params: &SyntheticParams) -> Result<SyntheticDataset, InputError> {
        if params.num_antennas < 2 {
            return Err(InputError::BadShape {
                thing: "synthetic antennas",
                expected: 2,
                actual: params.num_antennas,
            });
        }
        if params.refant >= params.num_antennas {
            return Err(InputError::RefantOutOfRange {
                refant: params.refant,
                num_antennas: params.num_antennas,
            });
        }

        let mut rng = StdRng::seed_from_u64(params.seed);
        let phase = Uniform::new(-std::f64::consts::PI, std::f64::consts::PI);

        let gain_dim = (params.num_antennas, 1, params.num_pols);
        let true_gains = Array3::from_shape_fn(gain_dim, |(a, _, _)| {
            if a == params.refant {
                c64::new(1.0, 0.0)
            } else {
                let amp = 1.0 + params.amplitude_scatter * rng.sample::<f64, _>(StandardNormal);
                c64::from_polar(amp, phase.sample(&mut rng))
            }
        });

        let (ant1, ant2): (Vec<usize>, Vec<usize>) = (0..params.num_timesteps)
            .flat_map(|_| {
                (0..params.num_antennas)
                    .flat_map(move |a1| (a1 + 1..params.num_antennas).map(move |a2| (a1, a2)))
            })
            .unzip();
        let num_rows = ant1.len();
        debug!(
            "Simulating {num_rows} rows of {} channels and {} polarisations",
            params.num_channels, params.num_pols
        );

        let amp = Uniform::new(0.5, 1.5);
        let model = Array3::from_shape_fn((num_rows, params.num_channels, params.num_pols), |_| {
            c64::from_polar(amp.sample(&mut rng), phase.sample(&mut rng))
        });

        let mut data = Array3::from_shape_fn(model.dim(), |(r, c, p)| {
            true_gains[(ant1[r], 0, p)] * model[(r, c, p)] * true_gains[(ant2[r], 0, p)].conj()
        });
        if params.noise_fraction > 0.0 {
            let scale = params.noise_fraction / std::f64::consts::SQRT_2;
            data.zip_mut_with(&model, |d, m| {
                let sigma = scale * m.norm();
                *d += c64::new(
                    sigma * rng.sample::<f64, _>(StandardNormal),
                    sigma * rng.sample::<f64, _>(StandardNormal),
                );
            });
        }
        if params.rfi_fraction > 0.0 {
            let mut num_rfi = 0;
            for d in data.iter_mut() {
                if rng.gen_bool(params.rfi_fraction.min(1.0)) {
                    *d = c64::from_polar(1000.0, phase.sample(&mut rng));
                    num_rfi += 1;
                }
            }
            debug!("Added interference to {num_rfi} samples");
        }

        Ok(SyntheticDataset {
            true_gains,
            model,
            data,
            ant1,
            ant2,
            num_antennas: params.num_antennas,
        })
    }

    /// A store with the data in "DATA" and the model in "MODEL_DATA".
    pub fn into_store<P: Into<PathBuf>>(self, path: P) -> Result<MemoryStore, InputError> {
        MemoryStore::new(path, self.data, self.ant1, self.ant2, self.num_antennas)?
            .with_column("MODEL_DATA", self.model)
    }
}

/// The RMS of `|vis - model|` over samples that are unflagged and finite.
/// Returns `None` if there are no such samples.
pub fn rms_residual(
    vis: ArrayView3<c64>,
    model: ArrayView3<c64>,
    flags: Option<ArrayView3<bool>>,
) -> Option<f64> {
    fn accumulate<'a, I: Iterator<Item = (&'a c64, &'a c64)>>(samples: I) -> (f64, usize) {
        samples
            .filter(|(v, _)| v.is_finite())
            .fold((0.0, 0), |(sum, count), (v, m)| (sum + (v - m).norm_sqr(), count + 1))
    }

    let samples = vis.iter().zip(model.iter());
    let (sum, count) = match flags {
        Some(flags) => accumulate(
            samples
                .zip(flags.iter())
                .filter(|(_, &f)| !f)
                .map(|(s, _)| s),
        ),
        None => accumulate(samples),
    };
    (count > 0).then(|| (sum / count as f64).sqrt())
}
