use std::{env, path::PathBuf};

use anyhow::Context;
use learner::{config::ConfigTrees, registry};
use log::info;

const DEFAULT_LEARNER: &str = "running_mean";

fn path_var(name: &str) -> Option<PathBuf> {
    env::var_os(name).map(PathBuf::from)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let name = env::var("LEARNER").unwrap_or_else(|_| DEFAULT_LEARNER.to_string());
    let configs = ConfigTrees::load(
        path_var("LEARNER_CONFIG").as_deref(),
        path_var("ENV_CONFIG").as_deref(),
        path_var("SESSION_CONFIG").as_deref(),
    )?;

    let registry = registry::builtin_registry()?;
    let mut process = registry
        .build(&name, &configs)
        .with_context(|| format!("failed to build learner {name}"))?;

    info!("starting learner {name}");
    process.initialize().context("failed to initialize learner")?;

    match process.run()? {}
}
