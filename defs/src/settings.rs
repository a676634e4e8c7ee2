use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{DeploymentRequest, StackIdentity};

/// Body of the provider's deployment-settings endpoint.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSettings {
    pub source_context: SourceContext,
    pub operation_context: OperationContext,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct SourceContext {
    pub git: GitSource,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct GitSource {
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    #[serde(rename = "repoDir", default, skip_serializing_if = "Option::is_none")]
    pub repo_dir: Option<String>,
    pub branch: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OperationContext {
    pub pre_run_commands: Vec<String>,
    pub environment_variables: BTreeMap<String, String>,
}

impl DeploymentSettings {
    pub fn for_request(
        stack: &StackIdentity,
        request: &DeploymentRequest,
        branch: &str,
        environment_variables: BTreeMap<String, String>,
    ) -> Self {
        DeploymentSettings {
            source_context: SourceContext {
                git: GitSource {
                    repo_url: request.repository_url.clone(),
                    repo_dir: request.project_path().map(str::to_string),
                    branch: branch.to_string(),
                },
            },
            operation_context: OperationContext {
                pre_run_commands: build_pre_run_commands(stack, request.environments()),
                environment_variables,
            },
        }
    }
}

/// One `config env add` command attaching every requested environment, or
/// nothing when no environments were requested.
pub fn build_pre_run_commands(stack: &StackIdentity, environments: &[String]) -> Vec<String> {
    if environments.is_empty() {
        return vec![];
    }
    vec![format!(
        "pulumi config env add {} --stack {} --yes",
        environments.join(" "),
        stack.fully_qualified_name()
    )]
}
