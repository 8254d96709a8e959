pub mod config;
pub mod error;
pub mod fetch;
pub mod learner_core;
pub mod process;
pub mod publish;
pub mod queue;
pub mod registry;
pub mod running_mean;
pub mod stats;
pub mod subscribe;
pub mod timing;

pub use error::{LearnerErr, Result};
pub use learner_core::{CoreState, Learner, LearnerCore};
pub use process::LearnerProcess;
pub use publish::{ModuleDict, ModuleSource, ParameterPublisher};
pub use registry::{Launch, LearnerRegistry};
pub use subscribe::ParameterSubscriber;
