// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors from adaptive flagging.

use thiserror::Error;

use crate::adapter::StoreError;

#[derive(Error, Debug)]
pub enum FlaggingError {
    #[error("A flagging strategy chain must have at least one strategy")]
    EmptyChain,

    #[error("Strategy '{strategy}' has a threshold scale of {scale}; it must be positive and finite")]
    BadThresholdScale { strategy: String, scale: f64 },

    #[error("This flagger works on '{expected}', but was asked to flag '{got}'")]
    WrongStore { expected: String, got: String },

    #[error("Couldn't flag with strategy '{strategy}': {message}")]
    Applier { strategy: String, message: String },

    /// The calibration callback failed for a reason other than a
    /// [`super::CalibrationFailure`].
    #[error("Calibration failed: {0}")]
    Calibrate(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Store(#[from] StoreError),
}
