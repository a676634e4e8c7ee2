use std::sync::Arc;

use deployment_runner::{
    handle_invocation, DeploymentDriver, GitCli, PulumiCli, PulumiSettingsClient,
    StepFunctionsReporter,
};
use lambda_runtime::{service_fn, Error, LambdaEvent};
use log::info;
use sc_defs::DeploymentConfig;
use serde_json::Value;

#[tokio::main]
async fn main() -> Result<(), Error> {
    if let Err(e) = sc_utils::setup_logging() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let config = DeploymentConfig::from_env();
    info!("Starting deployment handler with {:?}", config);

    let reporter = Arc::new(StepFunctionsReporter::from_env().await);
    let driver = Arc::new(DeploymentDriver::new(
        config.clone(),
        GitCli::new(&config),
        PulumiSettingsClient::new(&config)?,
        PulumiCli::new(&config),
        reporter,
    ));

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let driver = Arc::clone(&driver);
        async move {
            let (payload, context) = event.into_parts();
            info!("Handling request {}", context.request_id);
            handle_invocation(driver.as_ref(), payload)
                .await
                .map_err(Error::from)
        }
    }))
    .await
}
