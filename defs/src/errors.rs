use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeploymentError {
    #[error("Invalid deployment request: {0}")]
    Validation(String),

    #[error("Command `{command}` failed: {exit_message}")]
    Execution {
        command: String,
        exit_message: String,
    },

    #[error(transparent)]
    Branch(#[from] BranchError),

    // The provider's own message is surfaced without rewording
    #[error("{message}")]
    RemoteOperation {
        operation: String,
        result: String,
        message: String,
    },

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeploymentError {
    /// Stable name of the error category, used as the failure cause reported
    /// to the workflow engine.
    pub fn kind(&self) -> &'static str {
        match self {
            DeploymentError::Validation(_) => "ValidationError",
            DeploymentError::Execution { .. } => "ExecutionError",
            DeploymentError::Branch(_) => "BranchError",
            DeploymentError::RemoteOperation { .. } => "RemoteOperationError",
            DeploymentError::Transport(_) => "TransportError",
            DeploymentError::Serialization(_) => "SerializationError",
            DeploymentError::Io(_) => "IoError",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchStep {
    Workspace,
    Lookup,
    Clone,
    Checkout,
    Push,
    Delete,
}

impl fmt::Display for BranchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            BranchStep::Workspace => "prepare a checkout for",
            BranchStep::Lookup => "look up",
            BranchStep::Clone => "clone the source of",
            BranchStep::Checkout => "create",
            BranchStep::Push => "push",
            BranchStep::Delete => "delete",
        };
        write!(f, "{}", step)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to {step} branch {branch}: {message}")]
pub struct BranchError {
    pub step: BranchStep,
    pub branch: String,
    pub message: String,
}

impl BranchError {
    pub fn new(step: BranchStep, branch: &str, message: impl Into<String>) -> Self {
        BranchError {
            step,
            branch: branch.to_string(),
            message: message.into(),
        }
    }
}
