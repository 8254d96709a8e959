//! Configuration trees of a learner process.
//!
//! Every tree is a JSON document merged with its defaults through `extend_config`
//! and then viewed through an immutable typed struct.

use std::{fs, num::NonZeroUsize, path::Path};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value, json};

use crate::{LearnerErr, Result};

/// Merges `config` on top of `defaults`.
///
/// Objects are merged key by key, recursively. Any other value in `config` replaces
/// the default, except `null` which is treated as missing. Merging an already merged
/// tree with the same defaults yields the same tree.
///
/// # Arguments
/// * `config` - The user supplied tree.
/// * `defaults` - The tree holding the default values.
///
/// # Returns
/// A new merged tree.
pub fn extend_config(config: &Value, defaults: &Value) -> Value {
    match (config, defaults) {
        (Value::Object(config), Value::Object(defaults)) => {
            let mut merged = defaults.clone();

            for (key, value) in config {
                let value = match defaults.get(key) {
                    Some(default) => extend_config(value, default),
                    None => value.clone(),
                };

                merged.insert(key.clone(), value);
            }

            Value::Object(merged)
        }
        (Value::Null, defaults) => defaults.clone(),
        (config, _) => config.clone(),
    }
}

/// Reads a JSON tree from `path`.
pub fn load_json(path: impl AsRef<Path>) -> Result<Value> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| {
        LearnerErr::InvalidConfig(format!("cannot read '{}': {e}", path.display()))
    })?;

    serde_json::from_str(&content)
        .map_err(|e| LearnerErr::InvalidConfig(format!("invalid JSON in '{}': {e}", path.display())))
}

/// The three raw trees a learner process is built from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigTrees {
    pub learner: Value,
    pub env: Value,
    pub session: Value,
}

impl ConfigTrees {
    /// Reads every tree from its own JSON file, a missing path means an empty tree.
    pub fn load(
        learner: Option<&Path>,
        env: Option<&Path>,
        session: Option<&Path>,
    ) -> Result<Self> {
        let load = |path: Option<&Path>| path.map_or(Ok(Value::Null), |path| load_json(path));

        Ok(Self {
            learner: load(learner)?,
            env: load(env)?,
            session: load(session)?,
        })
    }
}

fn typed<T: DeserializeOwned>(section: &str, merged: Value) -> Result<T> {
    serde_json::from_value(merged)
        .map_err(|e| LearnerErr::InvalidConfig(format!("{section} config: {e}")))
}

/// Defaults of every learner config tree.
pub fn base_learner_config() -> Value {
    json!({
        "replay": {
            "batch_size": 64,
        },
    })
}

/// Defaults of the environment config tree.
pub fn base_env_config() -> Value {
    json!({})
}

/// Defaults of the session config tree.
pub fn base_session_config() -> Value {
    json!({
        "replay": {
            "sampler_host": "localhost",
            "sampler_port": 7001,
            "max_prefetch_batch_queue": 10,
        },
        "ps": {
            "publish_port": 7002,
        },
        "fetch": {
            "workers": 2,
        },
        "stats": {
            "update_period": 100,
        },
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerReplayConfig {
    pub batch_size: usize,
}

/// The learner tree, algorithm specific keys are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerConfig {
    pub replay: LearnerReplayConfig,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LearnerConfig {
    /// Merges `config` with `defaults` and validates the result.
    ///
    /// # Arguments
    /// * `config` - The user supplied learner tree.
    /// * `defaults` - Usually `Learner::default_config()`.
    pub fn from_value(config: &Value, defaults: &Value) -> Result<Self> {
        typed("learner", extend_config(config, defaults))
    }
}

/// The environment tree, opaque to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvConfig {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl EnvConfig {
    pub fn from_value(config: &Value) -> Result<Self> {
        typed("env", extend_config(config, &base_env_config()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReplayConfig {
    pub sampler_host: String,
    pub sampler_port: u16,
    pub max_prefetch_batch_queue: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PsConfig {
    pub publish_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    pub workers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsConfig {
    pub update_period: usize,
}

/// The session tree, shared by every process of a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub replay: SessionReplayConfig,
    pub ps: PsConfig,
    pub fetch: FetchConfig,
    pub stats: StatsConfig,
}

impl SessionConfig {
    pub fn from_value(config: &Value) -> Result<Self> {
        typed("session", extend_config(config, &base_session_config()))
    }

    /// The reporting period of the speed stats.
    pub fn update_period(&self) -> Result<NonZeroUsize> {
        non_zero("stats.update_period", self.stats.update_period)
    }
}

fn non_zero(name: &str, value: usize) -> Result<NonZeroUsize> {
    NonZeroUsize::new(value)
        .ok_or_else(|| LearnerErr::InvalidConfig(format!("{name} must be greater than 0")))
}

/// The construction parameters of a `LearnerCore`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreParams {
    pub sampler_host: String,
    pub sampler_port: u16,
    pub ps_publish_port: u16,
    pub batch_size: NonZeroUsize,
    pub max_prefetch_batch_queue: NonZeroUsize,
    pub fetch_workers: NonZeroUsize,
}

impl CoreParams {
    /// Extracts and validates the core parameters out of the merged trees.
    ///
    /// # Arguments
    /// * `learner` - The learner tree.
    /// * `session` - The session tree.
    ///
    /// # Returns
    /// The parameters or an `InvalidConfig` error naming the offending key.
    pub fn from_configs(learner: &LearnerConfig, session: &SessionConfig) -> Result<Self> {
        if session.replay.sampler_host.is_empty() {
            return Err(LearnerErr::InvalidConfig(
                "replay.sampler_host must not be empty".into(),
            ));
        }

        Ok(Self {
            sampler_host: session.replay.sampler_host.clone(),
            sampler_port: session.replay.sampler_port,
            ps_publish_port: session.ps.publish_port,
            batch_size: non_zero("replay.batch_size", learner.replay.batch_size)?,
            max_prefetch_batch_queue: non_zero(
                "replay.max_prefetch_batch_queue",
                session.replay.max_prefetch_batch_queue,
            )?,
            fetch_workers: non_zero("fetch.workers", session.fetch.workers)?,
        })
    }
}
