use std::{collections::BTreeMap, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    Result,
    learner_core::Learner,
    publish::{ModuleDict, ModuleSource},
};

/// The single module of a `RunningMean`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MeanState {
    pub mean: f64,
    pub count: u64,
}

/// Learns the mean of every value it has been trained on.
///
/// Small enough to exercise the whole pipeline without a model behind it.
#[derive(Debug, Default)]
pub struct RunningMean {
    state: MeanState,
}

impl RunningMean {
    pub const NAME: &'static str = "running_mean";
    pub const MODULE: &'static str = "mean";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MeanState {
        self.state
    }
}

impl ModuleSource for RunningMean {
    type State = MeanState;

    fn module_dict(&self) -> ModuleDict<MeanState> {
        BTreeMap::from([(Self::MODULE.to_string(), self.state)])
    }
}

impl Learner for RunningMean {
    type Batch = Vec<f64>;
    /// The mean after learning from the batch.
    type Output = f64;

    fn learn(&mut self, batch: Vec<f64>) -> f64 {
        let MeanState { mean, count } = &mut self.state;

        for value in batch {
            *count += 1;
            *mean += (value - *mean) / *count as f64;
        }

        *mean
    }

    fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_vec(&self.state)?)?;
        Ok(())
    }
}
