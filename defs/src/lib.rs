mod config;
mod errors;
mod request;
mod result;
mod settings;
mod stack;

pub use config::{DeploymentConfig, FailurePolicy, DEFAULT_ORGANIZATION, DEFAULT_REGION};
pub use errors::{BranchError, BranchStep, DeploymentError};
pub use request::{
    extract_task_token, DeploymentRequest, InvocationPayload, StackOperation, DEFAULT_STACK,
};
pub use result::{OperationResult, OperationStatus, OperationSummary};
pub use settings::{
    build_pre_run_commands, DeploymentSettings, GitSource, OperationContext, SourceContext,
};
pub use stack::StackIdentity;
