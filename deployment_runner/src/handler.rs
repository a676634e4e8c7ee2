use log::{error, info, warn};
use sc_defs::{extract_task_token, DeploymentError, InvocationPayload};
use serde_json::{json, Value};

use crate::driver::DeploymentDriver;
use crate::git::SourceControl;
use crate::pulumi::StackBackend;
use crate::reporter::{report_failure, report_success, WorkflowReporter};
use crate::settings::SettingsPatcher;

/// Entry point for one invocation. With a task token the outcome is reported
/// to the workflow engine and a short acknowledgement is returned; without
/// one the result itself is returned to the caller.
pub async fn handle_invocation<S, P, B, R>(
    driver: &DeploymentDriver<S, P, B, R>,
    payload: Value,
) -> Result<Value, DeploymentError>
where
    S: SourceControl,
    P: SettingsPatcher,
    B: StackBackend,
    R: WorkflowReporter + ?Sized + 'static,
{
    let task_token = extract_task_token(&payload);
    let outcome = match InvocationPayload::from_value(payload) {
        Ok(invocation) => {
            driver
                .deploy(&invocation.input, task_token.as_deref())
                .await
        }
        Err(e) => Err(e),
    };

    let Some(task_token) = task_token else {
        warn!("No task token in payload, returning result to the caller");
        let result = outcome?;
        return Ok(serde_json::to_value(result)?);
    };

    match outcome {
        Ok(result) => {
            info!("Deployment finished with {:?}", result.result);
            report_success(driver.reporter(), &task_token, &result).await?;
            Ok(json!({ "reported": "success" }))
        }
        Err(e) => {
            error!("Deployment failed: {}", e);
            report_failure(driver.reporter(), &task_token, &e).await?;
            Ok(json!({ "reported": "failure", "error": e.kind() }))
        }
    }
}
