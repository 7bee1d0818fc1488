use thiserror::Error;

/// Errors raised while building or ticking a tree.
///
/// Both `Logic` and `Runtime` abort the current tick and unwind to whoever
/// called the tick driver. Nothing in this crate attempts to recover from them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A mistake in how the tree was put together: a child returned `Idle`,
    /// wrong number of children, conflicting blackboard types and so on.
    #[error("logic error: {0}")]
    Logic(String),
    /// Something that could only be detected while running: missing input
    /// ports, scripts that don't validate, a failed background worker.
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("{error} to {node}")]
    AddChild { error: AddChildError, node: String },
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    pub fn logic(msg: impl Into<String>) -> Self {
        Self::Logic(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum AddChildError {
    #[error("Attempted to add too many nodes")]
    TooManyNodes,
}

pub type AddChildResult = Result<(), AddChildError>;
