// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Per-antenna complex-gain calibration for radio-interferometric visibilities.

The crate solves for antenna-based gains, applies them to raw visibilities on
the CPU or a CUDA GPU, and escalates through a chain of RFI-flagging
strategies when a downstream calibration step rejects the data.
 */

pub mod adapter;
pub mod backend;
mod cli;
pub mod config;
pub mod constants;
mod error;
pub mod flagging;
pub mod gains;
#[cfg(feature = "cuda")]
mod gpu;
pub mod memory;
pub mod simulate;

// Re-exports.
pub use adapter::{
    apply_calibration, read_gain_table, solve_calibration, verify_output, ApplyOptions,
    CalTableStore, MeasurementStore, MemoryCalTable, MemoryStore, SolveOptions, StoreError,
    TableSolution,
};
pub use backend::{Backend, Dispatcher, DispatcherOptions, GPU_PROBE};
pub use cli::{GainCal, GainCalCliError};
pub use config::{CalibrationConfig, ConfigError, Interpolation, SolveInterval};
pub use error::{GainCalError, InputError, NumericDegeneracy};
pub use flagging::{
    AdaptiveFlagging, AdaptiveOutcome, CalibrateFnError, CalibrationFailure, FlaggingApplier,
    FlaggingBackend, FlaggingStrategy, SigmaClipFlagger, StrategyChain,
};
pub use gains::{ApplyResult, GainTable, SolutionResult, SolveParams, SolveProblem, VisibilityBatch};
pub use memory::{estimate_applycal_memory, estimate_solve_memory, MemoryEstimate};

/// Double-precision complex numbers, used for all visibilities and gains.
#[allow(non_camel_case_types)]
pub type c64 = num_complex::Complex<f64>;

use crossbeam_utils::atomic::AtomicCell;

lazy_static::lazy_static! {
    /// Are progress bars being drawn? This should only ever be enabled by CLI
    /// code.
    static ref PROGRESS_BARS: AtomicCell<bool> = AtomicCell::new(false);
}
