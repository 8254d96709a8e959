use std::{collections::BTreeMap, convert::Infallible};

use log::debug;

use crate::{
    LearnerErr, Result,
    config::{ConfigTrees, EnvConfig, LearnerConfig},
    learner_core::Learner,
    process::LearnerProcess,
    running_mean::RunningMean,
};

/// A type erased learner process.
pub trait Launch {
    fn initialize(&mut self) -> Result<()>;

    /// Runs forever, only returns on error.
    fn run(&mut self) -> Result<Infallible>;
}

impl<L: Learner> Launch for LearnerProcess<L> {
    fn initialize(&mut self) -> Result<()> {
        LearnerProcess::initialize(self)
    }

    fn run(&mut self) -> Result<Infallible> {
        LearnerProcess::run(self)
    }
}

/// Builds a learner process out of its raw configuration trees.
pub type Factory = Box<dyn Fn(&ConfigTrees) -> Result<Box<dyn Launch>> + Send + Sync>;

/// Learner factories by name.
#[derive(Default)]
pub struct LearnerRegistry {
    factories: BTreeMap<String, Factory>,
}

impl LearnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `name`.
    ///
    /// # Returns
    /// A `DuplicateLearner` error if `name` is taken, the registry is left untouched.
    pub fn register<F>(&mut self, name: &str, factory: F) -> Result<()>
    where
        F: Fn(&ConfigTrees) -> Result<Box<dyn Launch>> + Send + Sync + 'static,
    {
        if self.factories.contains_key(name) {
            return Err(LearnerErr::DuplicateLearner(name.to_string()));
        }

        debug!("registered learner {name}");
        self.factories.insert(name.to_string(), Box::new(factory));
        Ok(())
    }

    /// Registers a learner type wrapped in a `LearnerProcess`.
    ///
    /// # Arguments
    /// * `name` - The name the learner is looked up by.
    /// * `build` - Builds the learner out of its merged configs.
    pub fn register_learner<L, B>(&mut self, name: &str, build: B) -> Result<()>
    where
        L: Learner + 'static,
        B: Fn(&LearnerConfig, &EnvConfig) -> Result<L> + Send + Sync + 'static,
    {
        self.register(name, move |configs| {
            let process = LearnerProcess::new(configs, &build)?;
            Ok(Box::new(process) as Box<dyn Launch>)
        })
    }

    /// Builds the learner registered under `name`.
    ///
    /// # Returns
    /// An `UnknownLearner` error if nothing is registered under `name`.
    pub fn build(&self, name: &str, configs: &ConfigTrees) -> Result<Box<dyn Launch>> {
        let factory = self
            .get(name)
            .ok_or_else(|| LearnerErr::UnknownLearner(name.to_string()))?;

        factory(configs)
    }

    pub fn get(&self, name: &str) -> Option<&Factory> {
        self.factories.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// The registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

/// A registry holding every learner shipped with this crate.
pub fn builtin_registry() -> Result<LearnerRegistry> {
    let mut registry = LearnerRegistry::new();
    registry.register_learner(RunningMean::NAME, |_, _| Ok(RunningMean::new()))?;
    Ok(registry)
}
