use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_sdk_sfn::error::DisplayErrorContext;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde_json::Value;

use crate::config::CatalogConfig;
use crate::structs::{ExecutionDescription, StartExecutionResponse};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Starts and inspects executions of the deployment workflow.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    async fn start_execution(&self, name: &str, input: String)
        -> Result<StartExecutionResponse>;

    async fn describe_execution(&self, execution_arn: &str) -> Result<ExecutionDescription>;
}

/// Lists the stacks the catalog has deployed.
#[async_trait]
pub trait StackCatalog: Send + Sync {
    async fn list_stacks(&self, project: &str) -> Result<Value>;
}

pub struct StepFunctionsEngine {
    client: aws_sdk_sfn::Client,
    state_machine_arn: String,
}

impl StepFunctionsEngine {
    pub fn new(client: aws_sdk_sfn::Client, state_machine_arn: &str) -> Self {
        StepFunctionsEngine {
            client,
            state_machine_arn: state_machine_arn.to_string(),
        }
    }

    pub async fn from_env(state_machine_arn: &str) -> Self {
        let shared_config = aws_config::load_from_env().await;
        StepFunctionsEngine::new(aws_sdk_sfn::Client::new(&shared_config), state_machine_arn)
    }
}

#[async_trait]
impl WorkflowEngine for StepFunctionsEngine {
    async fn start_execution(
        &self,
        name: &str,
        input: String,
    ) -> Result<StartExecutionResponse> {
        let output = self
            .client
            .start_execution()
            .state_machine_arn(&self.state_machine_arn)
            .name(name)
            .input(input)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to start execution {}: {}", name, DisplayErrorContext(&e)))?;

        let started = output.start_date();
        let start_date = DateTime::<Utc>::from_timestamp(started.secs(), started.subsec_nanos())
            .map(|date| date.to_rfc3339())
            .unwrap_or_default();
        info!("Started execution {}", output.execution_arn());

        Ok(StartExecutionResponse {
            execution_arn: output.execution_arn().to_string(),
            start_date,
        })
    }

    async fn describe_execution(&self, execution_arn: &str) -> Result<ExecutionDescription> {
        let output = self
            .client
            .describe_execution()
            .execution_arn(execution_arn)
            .send()
            .await
            .map_err(|e| {
                anyhow!(
                    "Failed to describe execution {}: {}",
                    execution_arn,
                    DisplayErrorContext(&e)
                )
            })?;

        Ok(ExecutionDescription {
            status: output.status().as_str().to_string(),
            output: output.output().map(str::to_string),
        })
    }
}

pub struct PulumiStackCatalog {
    http: reqwest::Client,
    api_url: String,
    organization: String,
    access_token: String,
    tag_name: String,
}

impl PulumiStackCatalog {
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(PulumiStackCatalog {
            http,
            api_url: config.api_url.clone(),
            organization: config.organization.clone(),
            access_token: config.access_token.clone(),
            tag_name: config.catalog_tag_name.clone(),
        })
    }
}

#[async_trait]
impl StackCatalog for PulumiStackCatalog {
    async fn list_stacks(&self, project: &str) -> Result<Value> {
        let url = format!("{}/api/user/stacks", self.api_url);
        debug!("Listing stacks of {}/{}", self.organization, project);

        let response = self
            .http
            .get(&url)
            .query(&[
                ("organization", self.organization.as_str()),
                ("project", project),
                ("tagName", self.tag_name.as_str()),
            ])
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("Authorization", format!("token {}", self.access_token))
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("GET {} returned {}: {}", url, status, body));
        }
        response
            .json()
            .await
            .with_context(|| format!("GET {} returned invalid JSON", url))
    }
}
