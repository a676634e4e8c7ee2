use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use sc_defs::{DeploymentConfig, DeploymentError, DeploymentRequest, DeploymentSettings, StackIdentity};
use serde_json::Value;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait SettingsPatcher: Send + Sync {
    /// Stores source and operation settings on the stack. Must complete
    /// before the stack run starts, as the remote executor reads them at start.
    async fn patch_settings(
        &self,
        stack: &StackIdentity,
        request: &DeploymentRequest,
        branch: &str,
    ) -> Result<Value, DeploymentError>;
}

pub struct PulumiSettingsClient {
    http: reqwest::Client,
    api_url: String,
    access_token: String,
    environment: BTreeMap<String, String>,
}

impl PulumiSettingsClient {
    pub fn new(config: &DeploymentConfig) -> Result<Self, DeploymentError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DeploymentError::Transport(e.to_string()))?;
        Ok(PulumiSettingsClient {
            http,
            api_url: config.api_url.clone(),
            access_token: config.access_token.clone(),
            environment: config.remote_environment(),
        })
    }
}

pub fn settings_url(api_url: &str, stack: &StackIdentity) -> String {
    format!(
        "{}/api/stacks/{}/{}/{}/deployments/settings",
        api_url.trim_end_matches('/'),
        stack.organization,
        stack.project,
        stack.stack
    )
}

#[async_trait]
impl SettingsPatcher for PulumiSettingsClient {
    async fn patch_settings(
        &self,
        stack: &StackIdentity,
        request: &DeploymentRequest,
        branch: &str,
    ) -> Result<Value, DeploymentError> {
        let url = settings_url(&self.api_url, stack);
        let body = DeploymentSettings::for_request(stack, request, branch, self.environment.clone());

        info!("Patching deployment settings of {}", stack);
        debug!(
            "Pre-run commands for {}: {:?}",
            stack, body.operation_context.pre_run_commands
        );

        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("Authorization", format!("token {}", self.access_token))
            .json(&body)
            .send()
            .await
            .map_err(|e| DeploymentError::Transport(format!("POST {}: {}", url, e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DeploymentError::Transport(format!("POST {}: {}", url, e)))?;

        if !status.is_success() {
            return Err(DeploymentError::Transport(format!(
                "POST {} returned {}: {}",
                url, status, text
            )));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}
