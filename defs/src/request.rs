use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::DeploymentError;

pub const DEFAULT_STACK: &str = "dev";

/// A single deployment as submitted by the catalog, either through the
/// workflow engine or by a direct invocation.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct DeploymentRequest {
    pub repository_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub project: String,
    #[serde(
        rename = "projectPath",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub project_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environments: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destroy: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOperation {
    Up,
    Destroy,
}

impl StackOperation {
    pub fn command(&self) -> &'static str {
        match self {
            StackOperation::Up => "up",
            StackOperation::Destroy => "destroy",
        }
    }
}

impl DeploymentRequest {
    pub fn stack_name(&self) -> &str {
        match self.stack.as_deref() {
            Some(stack) if !stack.is_empty() => stack,
            _ => DEFAULT_STACK,
        }
    }

    pub fn operation(&self) -> StackOperation {
        if self.destroy.unwrap_or(false) {
            StackOperation::Destroy
        } else {
            StackOperation::Up
        }
    }

    pub fn environments(&self) -> &[String] {
        self.environments.as_deref().unwrap_or(&[])
    }

    pub fn source_branch(&self) -> Option<&str> {
        self.branch.as_deref().filter(|b| !b.trim().is_empty())
    }

    pub fn project_path(&self) -> Option<&str> {
        self.project_path.as_deref().filter(|p| !p.is_empty())
    }

    /// Rejects requests that cannot be turned into a stack identity or whose
    /// values would be read as command-line options by git or pulumi.
    pub fn validate(&self) -> Result<(), DeploymentError> {
        if self.repository_url.trim().is_empty() {
            return Err(DeploymentError::Validation(
                "repository_url must not be empty".to_string(),
            ));
        }
        if self.repository_url.starts_with('-') {
            return Err(DeploymentError::Validation(format!(
                "repository_url '{}' is not a valid repository location",
                self.repository_url
            )));
        }
        if !is_valid_name(&self.project) {
            return Err(DeploymentError::Validation(format!(
                "project '{}' may only contain letters, digits, '-', '_' and '.'",
                self.project
            )));
        }
        if !is_valid_name(self.stack_name()) {
            return Err(DeploymentError::Validation(format!(
                "stack '{}' may only contain letters, digits, '-', '_' and '.'",
                self.stack_name()
            )));
        }
        if self.operation() == StackOperation::Up {
            match self.source_branch() {
                None => {
                    return Err(DeploymentError::Validation(
                        "branch is required to create or update a stack".to_string(),
                    ))
                }
                Some(branch) if branch.starts_with('-') || branch.contains(char::is_whitespace) => {
                    return Err(DeploymentError::Validation(format!(
                        "branch '{}' is not a valid git ref",
                        branch
                    )))
                }
                Some(_) => {}
            }
        }
        if let Some(path) = self.project_path() {
            if path.starts_with('-') || path.split('/').any(|segment| segment == "..") {
                return Err(DeploymentError::Validation(format!(
                    "projectPath '{}' must be a relative path inside the repository",
                    path
                )));
            }
        }
        for environment in self.environments() {
            // Environments may be qualified with their project, e.g. "shared/prod"
            if !environment.split('/').all(is_valid_name) {
                return Err(DeploymentError::Validation(format!(
                    "environment '{}' is not a valid environment name",
                    environment
                )));
            }
        }
        Ok(())
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(['-', '.'])
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Payload received by the deployment handler. The state machine wraps the
/// request as `{"input": {...}, "taskToken": "..."}` while direct callers send
/// the request fields at the top level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationPayload {
    pub input: DeploymentRequest,
    pub task_token: Option<String>,
}

impl InvocationPayload {
    pub fn from_value(mut value: Value) -> Result<Self, DeploymentError> {
        let task_token = extract_task_token(&value);
        let input = if value.get("input").is_some_and(Value::is_object) {
            value["input"].take()
        } else {
            value
        };
        let input: DeploymentRequest = serde_json::from_value(input).map_err(|e| {
            DeploymentError::Validation(format!("malformed deployment request: {}", e))
        })?;
        Ok(InvocationPayload { input, task_token })
    }
}

pub fn extract_task_token(value: &Value) -> Option<String> {
    value
        .get("taskToken")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}
