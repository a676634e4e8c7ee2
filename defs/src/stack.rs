use std::fmt;

use crate::DeploymentRequest;

/// Fully-qualified identity of a stack. The same value names the stack at the
/// provider and the dedicated source branch that pins its deployments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StackIdentity {
    pub organization: String,
    pub project: String,
    pub stack: String,
}

impl StackIdentity {
    pub fn new(organization: &str, project: &str, stack: &str) -> Self {
        StackIdentity {
            organization: organization.to_string(),
            project: project.to_string(),
            stack: stack.to_string(),
        }
    }

    pub fn from_request(organization: &str, request: &DeploymentRequest) -> Self {
        StackIdentity::new(organization, &request.project, request.stack_name())
    }

    pub fn fully_qualified_name(&self) -> String {
        format!("{}/{}/{}", self.organization, self.project, self.stack)
    }

    pub fn branch_name(&self) -> String {
        self.fully_qualified_name()
    }
}

impl fmt::Display for StackIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.organization, self.project, self.stack)
    }
}
