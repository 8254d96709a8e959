use std::{error::Error, fmt, io};

/// The learner module's result type.
pub type Result<T> = std::result::Result<T, LearnerErr>;

/// Learner pipeline failures.
#[derive(Debug)]
pub enum LearnerErr {
    /// `initialize` was called on an already initialized core.
    AlreadyInitialized,
    /// `start` was called on a fetch pool that is already running.
    AlreadyRunning,
    /// The main loop was entered before `initialize`.
    NotInitialized,
    /// `publish` was called before the publisher was bound.
    NotBound,
    /// A learner seam was invoked but the learner doesn't provide it.
    NotImplemented(&'static str),
    InvalidConfig(String),
    /// The published modules differ from the ones bound at initialization.
    InconsistentModules {
        expected: Vec<String>,
        got: Vec<String>,
    },
    Serialization(serde_json::Error),
    UnknownLearner(String),
    DuplicateLearner(String),
    Io(io::Error),
}

impl LearnerErr {
    /// Whether this error comes from a misconfigured or misused pipeline rather than
    /// from the outside world.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyInitialized
                | Self::AlreadyRunning
                | Self::NotInitialized
                | Self::NotBound
                | Self::InvalidConfig(_)
                | Self::UnknownLearner(_)
                | Self::DuplicateLearner(_)
        )
    }
}

impl fmt::Display for LearnerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInitialized => write!(f, "invalid config: learner is already initialized"),
            Self::AlreadyRunning => write!(f, "invalid config: fetch pool is already running"),
            Self::NotInitialized => write!(f, "invalid config: learner was not initialized"),
            Self::NotBound => write!(f, "invalid config: parameter publisher is not bound"),
            Self::NotImplemented(seam) => write!(f, "learner doesn't implement `{seam}`"),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::InconsistentModules { expected, got } => write!(
                f,
                "module dict changed since initialization: expected {expected:?}, got {got:?}"
            ),
            Self::Serialization(e) => write!(f, "failed to serialize module state: {e}"),
            Self::UnknownLearner(name) => write!(f, "invalid config: unknown learner `{name}`"),
            Self::DuplicateLearner(name) => {
                write!(f, "invalid config: learner `{name}` is already registered")
            }
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for LearnerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Serialization(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for LearnerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for LearnerErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orchestration_errors_are_config_errors() {
        assert!(LearnerErr::AlreadyInitialized.is_config_error());
        assert!(LearnerErr::AlreadyRunning.is_config_error());
        assert!(LearnerErr::NotBound.is_config_error());
        assert!(!LearnerErr::NotImplemented("save").is_config_error());
        assert!(!LearnerErr::Io(io::Error::other("boom")).is_config_error());
    }

    #[test]
    fn io_errors_keep_their_source() {
        let err = LearnerErr::from(io::Error::other("boom"));
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "io error: boom");
    }
}
