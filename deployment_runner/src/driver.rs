use std::fmt;
use std::sync::Arc;

use log::{debug, error, info, warn};
use sc_defs::{
    build_pre_run_commands, BranchError, DeploymentConfig, DeploymentError, DeploymentRequest,
    FailurePolicy, OperationResult, OperationSummary, StackIdentity, StackOperation,
};
use serde_json::Map;

use crate::events::StackEvent;
use crate::git::SourceControl;
use crate::pulumi::{RemoteSource, StackBackend};
use crate::reporter::{HeartbeatPump, WorkflowReporter};
use crate::settings::SettingsPatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Initializing,
    BranchPreparing,
    SettingsPatching,
    Running,
    PostProcessing,
    Completed,
    Failed,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// States visited by one deployment, logged as they are entered, along with
/// the named steps run inside each state.
#[derive(Debug, Clone)]
pub struct StateTrail {
    label: String,
    states: Vec<DriverState>,
    steps: Vec<(DriverState, &'static str)>,
}

impl StateTrail {
    fn new(label: &str) -> Self {
        debug!("{}: entering {}", label, DriverState::Initializing);
        StateTrail {
            label: label.to_string(),
            states: vec![DriverState::Initializing],
            steps: vec![],
        }
    }

    fn step(&mut self, step: &'static str) {
        debug!("{}: {} / {}", self.label, self.current(), step);
        self.steps.push((self.current(), step));
    }

    fn enter(&mut self, state: DriverState) {
        info!("{}: {} -> {}", self.label, self.current(), state);
        self.states.push(state);
    }

    pub fn current(&self) -> DriverState {
        self.states
            .last()
            .copied()
            .unwrap_or(DriverState::Initializing)
    }

    pub fn states(&self) -> &[DriverState] {
        &self.states
    }

    pub fn steps(&self) -> &[(DriverState, &'static str)] {
        &self.steps
    }
}

/// Runs one deployment request from branch preparation through the stack
/// operation to its post-processing side effects.
pub struct DeploymentDriver<S, P, B, R: ?Sized> {
    config: DeploymentConfig,
    source_control: S,
    settings: P,
    backend: B,
    reporter: Arc<R>,
}

impl<S, P, B, R> DeploymentDriver<S, P, B, R>
where
    S: SourceControl,
    P: SettingsPatcher,
    B: StackBackend,
    R: WorkflowReporter + ?Sized + 'static,
{
    pub fn new(
        config: DeploymentConfig,
        source_control: S,
        settings: P,
        backend: B,
        reporter: Arc<R>,
    ) -> Self {
        DeploymentDriver {
            config,
            source_control,
            settings,
            backend,
            reporter,
        }
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    /// Runs the deployment. Heartbeats are sent for every engine event when a
    /// task token is given.
    pub async fn deploy(
        &self,
        request: &DeploymentRequest,
        task_token: Option<&str>,
    ) -> Result<OperationResult, DeploymentError> {
        let (result, trail) = self.deploy_with_trail(request, task_token).await;
        debug!("Visited states: {:?}", trail.states());
        result
    }

    pub async fn deploy_with_trail(
        &self,
        request: &DeploymentRequest,
        task_token: Option<&str>,
    ) -> (Result<OperationResult, DeploymentError>, StateTrail) {
        let identity = StackIdentity::from_request(&self.config.organization, request);
        let mut trail = StateTrail::new(&identity.fully_qualified_name());

        let result = self
            .execute(request, &identity, task_token, &mut trail)
            .await;
        match &result {
            Ok(_) => trail.enter(DriverState::Completed),
            Err(e) => {
                error!("Deployment of {} failed in {}: {}", identity, trail.current(), e);
                trail.enter(DriverState::Failed);
            }
        }
        (result, trail)
    }

    async fn execute(
        &self,
        request: &DeploymentRequest,
        identity: &StackIdentity,
        task_token: Option<&str>,
        trail: &mut StateTrail,
    ) -> Result<OperationResult, DeploymentError> {
        request.validate()?;
        info!("Deploying Stack {}", request.stack_name());

        let operation = request.operation();
        let branch = identity.branch_name();

        if operation == StackOperation::Up {
            trail.enter(DriverState::BranchPreparing);
            trail.step("create_branch");
            // validate() guarantees a branch for updates
            let source_branch = request.source_branch().unwrap_or_default();
            let prepared = self
                .source_control
                .create_stack_branch(&request.repository_url, source_branch, &branch)
                .await;
            self.apply_branch_policy(prepared)?;

            trail.enter(DriverState::SettingsPatching);
            // The settings endpoint only accepts stacks that already exist
            trail.step("select");
            self.backend.select_or_create(identity).await?;
            trail.step("patch");
            let response = self
                .settings
                .patch_settings(identity, request, &branch)
                .await?;
            debug!("Deployment settings of {}: {}", identity, response);
            trail.enter(DriverState::Running);
        } else {
            trail.enter(DriverState::Running);
            trail.step("select");
            self.backend.select_or_create(identity).await?;
        }

        trail.step("run");
        let source = RemoteSource {
            repository_url: request.repository_url.clone(),
            branch: branch.clone(),
            project_path: request.project_path().map(str::to_string),
            environment: self.config.remote_environment(),
            pre_run_commands: build_pre_run_commands(identity, request.environments()),
        };
        let summary = self
            .run_stack(identity, operation, &source, task_token)
            .await?;
        info!(
            "{} of {} finished with {:?}: {}",
            operation.command(),
            identity,
            summary.result,
            summary.message
        );

        trail.enter(DriverState::PostProcessing);
        let outputs = match operation {
            StackOperation::Up => {
                trail.step("tag");
                self.tag_stack(identity).await?;
                trail.step("outputs");
                self.backend.outputs(identity).await?
            }
            StackOperation::Destroy => {
                trail.step("remove");
                self.backend.remove(identity).await?;
                trail.step("delete_branch");
                let deleted = self
                    .source_control
                    .delete_stack_branch(&request.repository_url, &branch)
                    .await;
                self.apply_branch_policy(deleted)?;
                Map::new()
            }
        };

        Ok(OperationResult {
            result: summary.result,
            message: summary.message,
            outputs,
        })
    }

    /// Consumes the run's events: output lines go to the log, engine events
    /// trigger heartbeats.
    async fn run_stack(
        &self,
        identity: &StackIdentity,
        operation: StackOperation,
        source: &RemoteSource,
        task_token: Option<&str>,
    ) -> Result<OperationSummary, DeploymentError> {
        let mut run = self.backend.run(identity, operation, source).await?;
        let pump = task_token
            .map(|token| HeartbeatPump::start(Arc::clone(&self.reporter), token.to_string()));

        let mut engine_events = 0;
        while let Some(event) = run.events.recv().await {
            match event {
                StackEvent::Output(line) => info!("{}", line),
                StackEvent::Engine(event) => {
                    engine_events += 1;
                    debug!("Engine event {} ({})", event.sequence, event.kind());
                    if let Some(pump) = &pump {
                        pump.beat();
                    }
                }
            }
        }

        // Completion is not gated on queued heartbeats
        let summary = run.completion.await;
        if let Some(pump) = pump {
            let sent = pump.finish().await;
            debug!("{} heartbeats sent for {} engine events", sent, engine_events);
        }
        summary
    }

    async fn tag_stack(&self, identity: &StackIdentity) -> Result<(), DeploymentError> {
        let tagged = self
            .backend
            .tag(
                identity,
                &self.config.catalog_tag_name,
                &self.config.catalog_tag_value,
            )
            .await;
        match (tagged, self.config.tag_failure_policy) {
            (Ok(()), _) => Ok(()),
            (Err(e), FailurePolicy::Continue) => {
                error!("Failed to tag {}: {}", identity, e);
                Ok(())
            }
            (Err(e), FailurePolicy::Abort) => Err(e),
        }
    }

    fn apply_branch_policy(&self, outcome: Result<(), BranchError>) -> Result<(), DeploymentError> {
        match (outcome, self.config.branch_failure_policy) {
            (Ok(()), _) => Ok(()),
            (Err(e), FailurePolicy::Continue) => {
                warn!("Continuing despite branch failure: {}", e);
                Ok(())
            }
            (Err(e), FailurePolicy::Abort) => Err(e.into()),
        }
    }
}
