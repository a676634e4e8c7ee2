use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_sfn::error::DisplayErrorContext;
use log::{debug, info, warn};
use sc_defs::{DeploymentError, OperationResult};
use sc_utils::truncate_chars;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Largest failure message the workflow engine accepts.
pub const MAX_ERROR_LENGTH: usize = 255;

/// Task-token callbacks of the workflow engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkflowReporter: Send + Sync {
    async fn send_success(&self, task_token: &str, output: String) -> Result<(), DeploymentError>;

    async fn send_failure(
        &self,
        task_token: &str,
        error: String,
        cause: String,
    ) -> Result<(), DeploymentError>;

    async fn send_heartbeat(&self, task_token: &str) -> Result<(), DeploymentError>;
}

pub struct StepFunctionsReporter {
    client: aws_sdk_sfn::Client,
}

impl StepFunctionsReporter {
    pub fn new(client: aws_sdk_sfn::Client) -> Self {
        StepFunctionsReporter { client }
    }

    pub async fn from_env() -> Self {
        let config = aws_config::load_from_env().await;
        StepFunctionsReporter::new(aws_sdk_sfn::Client::new(&config))
    }
}

#[async_trait]
impl WorkflowReporter for StepFunctionsReporter {
    async fn send_success(&self, task_token: &str, output: String) -> Result<(), DeploymentError> {
        self.client
            .send_task_success()
            .task_token(task_token)
            .output(output)
            .send()
            .await
            .map_err(|e| {
                DeploymentError::Transport(format!("SendTaskSuccess: {}", DisplayErrorContext(&e)))
            })?;
        Ok(())
    }

    async fn send_failure(
        &self,
        task_token: &str,
        error: String,
        cause: String,
    ) -> Result<(), DeploymentError> {
        self.client
            .send_task_failure()
            .task_token(task_token)
            .error(error)
            .cause(cause)
            .send()
            .await
            .map_err(|e| {
                DeploymentError::Transport(format!("SendTaskFailure: {}", DisplayErrorContext(&e)))
            })?;
        Ok(())
    }

    async fn send_heartbeat(&self, task_token: &str) -> Result<(), DeploymentError> {
        self.client
            .send_task_heartbeat()
            .task_token(task_token)
            .send()
            .await
            .map_err(|e| {
                DeploymentError::Transport(format!(
                    "SendTaskHeartbeat: {}",
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }
}

pub async fn report_success<R>(
    reporter: &R,
    task_token: &str,
    result: &OperationResult,
) -> Result<(), DeploymentError>
where
    R: WorkflowReporter + ?Sized,
{
    let output = serde_json::to_string(result)?;
    reporter.send_success(task_token, output).await?;
    info!("Reported success to the workflow engine");
    Ok(())
}

pub async fn report_failure<R>(
    reporter: &R,
    task_token: &str,
    error: &DeploymentError,
) -> Result<(), DeploymentError>
where
    R: WorkflowReporter + ?Sized,
{
    let message = truncate_chars(&error.to_string(), MAX_ERROR_LENGTH);
    reporter
        .send_failure(task_token, message, error.kind().to_string())
        .await?;
    info!("Reported {} to the workflow engine", error.kind());
    Ok(())
}

/// Sends one heartbeat per signal from a task of its own, so a slow or
/// failing heartbeat never holds up the stack output.
pub struct HeartbeatPump {
    signals: mpsc::UnboundedSender<()>,
    handle: JoinHandle<usize>,
}

impl HeartbeatPump {
    pub fn start<R>(reporter: Arc<R>, task_token: String) -> Self
    where
        R: WorkflowReporter + ?Sized + 'static,
    {
        let (signals, mut rx) = mpsc::unbounded_channel::<()>();
        let handle = tokio::spawn(async move {
            let mut sent = 0;
            while rx.recv().await.is_some() {
                match reporter.send_heartbeat(&task_token).await {
                    Ok(()) => {
                        sent += 1;
                        debug!("Heartbeat {} sent", sent);
                    }
                    Err(e) => warn!(
                        "Failed to send heartbeat, the workflow may time out: {}",
                        e
                    ),
                }
            }
            sent
        });
        HeartbeatPump { signals, handle }
    }

    pub fn beat(&self) {
        let _ = self.signals.send(());
    }

    /// Waits for queued heartbeats and returns how many were delivered.
    pub async fn finish(self) -> usize {
        drop(self.signals);
        match self.handle.await {
            Ok(sent) => sent,
            Err(e) => {
                warn!("Heartbeat task stopped: {}", e);
                0
            }
        }
    }
}
