use std::convert::Infallible;

use crate::{
    Result,
    config::{ConfigTrees, CoreParams, EnvConfig, LearnerConfig, SessionConfig},
    learner_core::{Learner, LearnerCore},
    stats::PeriodicReporter,
};

/// A `LearnerCore` built out of configuration trees, reporting its speed stats every
/// `stats.update_period` iterations.
pub struct LearnerProcess<L: Learner> {
    core: LearnerCore<L>,
    learner_config: LearnerConfig,
    env_config: EnvConfig,
    session_config: SessionConfig,
    reporter: PeriodicReporter,
}

impl<L: Learner> LearnerProcess<L> {
    /// Merges every tree with its defaults and builds the learner.
    ///
    /// # Arguments
    /// * `configs` - The raw configuration trees.
    /// * `build` - Builds the learner out of the merged learner and env configs.
    ///
    /// # Returns
    /// A new process whose core is not yet initialized, or an `InvalidConfig` error.
    pub fn new<F>(configs: &ConfigTrees, build: F) -> Result<Self>
    where
        F: FnOnce(&LearnerConfig, &EnvConfig) -> Result<L>,
    {
        let learner_config = LearnerConfig::from_value(&configs.learner, &L::default_config())?;
        let env_config = EnvConfig::from_value(&configs.env)?;
        let session_config = SessionConfig::from_value(&configs.session)?;

        let params = CoreParams::from_configs(&learner_config, &session_config)?;
        let reporter = PeriodicReporter::new(session_config.update_period()?);
        let learner = build(&learner_config, &env_config)?;

        Ok(Self {
            core: LearnerCore::new(learner, params),
            learner_config,
            env_config,
            session_config,
            reporter,
        })
    }

    pub fn initialize(&mut self) -> Result<()> {
        self.core.initialize()
    }

    /// Runs one iteration of the core and feeds its speed stats to the reporter.
    pub fn step(&mut self) -> Result<L::Output> {
        let output = self.core.step()?;
        self.update_stats();
        Ok(output)
    }

    /// Feeds the current speed stats to the reporter.
    ///
    /// # Returns
    /// Whether a reporting period was completed and emitted.
    pub fn update_stats(&mut self) -> bool {
        let stats = self.core.speed_stats();
        self.reporter
            .update(stats.entries(), Some(self.core.iteration()))
    }

    pub fn run(&mut self) -> Result<Infallible> {
        loop {
            self.step()?;
        }
    }

    pub fn core(&self) -> &LearnerCore<L> {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut LearnerCore<L> {
        &mut self.core
    }

    pub fn learner_config(&self) -> &LearnerConfig {
        &self.learner_config
    }

    pub fn env_config(&self) -> &EnvConfig {
        &self.env_config
    }

    pub fn session_config(&self) -> &SessionConfig {
        &self.session_config
    }
}
