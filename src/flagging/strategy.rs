// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Flagging strategies and ordered chains of them.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};
use vec1::Vec1;

use super::FlaggingError;

/// The tool a strategy is meant for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumIter, EnumString,
)]
pub enum FlaggingBackend {
    #[serde(rename = "aoflagger")]
    #[strum(serialize = "aoflagger")]
    AOFlagger,

    #[serde(rename = "casa")]
    #[strum(serialize = "casa")]
    Casa,

    #[serde(rename = "sigma-clip")]
    #[strum(serialize = "sigma-clip")]
    SigmaClip,
}

fn default_threshold_scale() -> f64 {
    1.0
}

/// One way of flagging RFI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlaggingStrategy {
    pub name: String,

    pub backend: FlaggingBackend,

    /// A strategy file for the backend, e.g. an AOFlagger .lua file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_file: Option<PathBuf>,

    /// Aggressive strategies flag more than the thresholds alone would.
    #[serde(default)]
    pub aggressive: bool,

    /// Multiplies the backend's detection thresholds. Smaller is harsher.
    #[serde(default = "default_threshold_scale")]
    pub threshold_scale: f64,

    #[serde(default)]
    pub use_gpu: bool,
}

impl FlaggingStrategy {
    pub fn new<S: Into<String>>(name: S, backend: FlaggingBackend) -> FlaggingStrategy {
        FlaggingStrategy {
            name: name.into(),
            backend,
            strategy_file: None,
            aggressive: false,
            threshold_scale: default_threshold_scale(),
            use_gpu: false,
        }
    }

    pub fn aggressive(mut self, threshold_scale: f64) -> FlaggingStrategy {
        self.aggressive = true;
        self.threshold_scale = threshold_scale;
        self
    }

    pub fn gpu(mut self) -> FlaggingStrategy {
        self.use_gpu = true;
        self
    }

    fn validate(&self) -> Result<(), FlaggingError> {
        if !(self.threshold_scale.is_finite() && self.threshold_scale > 0.0) {
            return Err(FlaggingError::BadThresholdScale {
                strategy: self.name.clone(),
                scale: self.threshold_scale,
            });
        }
        Ok(())
    }
}

/// Strategies to try in order, from most lenient to harshest. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyChain(Vec1<FlaggingStrategy>);

impl StrategyChain {
    pub fn new(strategies: Vec<FlaggingStrategy>) -> Result<StrategyChain, FlaggingError> {
        let strategies = Vec1::try_from_vec(strategies).map_err(|_| FlaggingError::EmptyChain)?;
        for strategy in &strategies {
            strategy.validate()?;
        }
        Ok(StrategyChain(strategies))
    }

    /// The default chain with a GPU AOFlagger strategy tried first.
    pub fn default_with_gpu() -> StrategyChain {
        let mut chain = StrategyChain::default();
        chain.0.insert(
            0,
            FlaggingStrategy::new("gpu-aoflagger", FlaggingBackend::AOFlagger).gpu(),
        );
        chain
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; here to keep clippy happy.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn get(&self, i: usize) -> Option<&FlaggingStrategy> {
        self.0.get(i)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FlaggingStrategy> {
        self.0.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|s| s.name.as_str()).collect()
    }
}

impl Default for StrategyChain {
    fn default() -> Self {
        StrategyChain(vec1::vec1![
            FlaggingStrategy::new("aoflagger-default", FlaggingBackend::AOFlagger),
            FlaggingStrategy::new("aoflagger-aggressive", FlaggingBackend::AOFlagger)
                .aggressive(0.75),
            FlaggingStrategy::new("casa-tfcrop-rflag-aggressive", FlaggingBackend::Casa)
                .aggressive(0.75),
        ])
    }
}

impl std::ops::Index<usize> for StrategyChain {
    type Output = FlaggingStrategy;

    fn index(&self, i: usize) -> &FlaggingStrategy {
        &self.0[i]
    }
}
