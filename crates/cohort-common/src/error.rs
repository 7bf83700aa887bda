//! Error types shared across Cohort components
//!
//! Dispatch-layer errors never reach registry or singleton callers; they are
//! logged at the call site and treated as "that node contributed no data".

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Failure of a command dispatch, either for one node or for a whole broadcast
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum DispatchError {
    #[error("command dispatcher '{0}' is closed")]
    Closed(String),

    #[error("cluster unreachable: {0}")]
    Unreachable(String),

    #[error("node '{0}' is not a member of the group")]
    NodeUnreachable(String),

    #[error("no command dispatcher '{id}' on node '{node}'")]
    NoHandler { id: String, node: String },

    #[error("command dispatcher '{0}' already exists on this node")]
    AlreadyRegistered(String),

    #[error("response from '{node}' timed out after {timeout:?}")]
    Timeout { node: String, timeout: Duration },

    #[error("command failed on '{node}': {message}")]
    CommandFailed { node: String, message: String },

    #[error("codec error: {0}")]
    Codec(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Error raised by a command while executing against its context
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct CommandError {
    pub message: String,
}

impl CommandError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for CommandError {
    fn from(message: String) -> Self {
        CommandError { message }
    }
}
