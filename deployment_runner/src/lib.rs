mod cmd;
mod driver;
mod events;
mod git;
mod handler;
mod pulumi;
mod reporter;
mod settings;

pub use cmd::{
    describe_command, run_command, run_command_streaming, CommandError, CommandOutput,
    MAX_OUTPUT_LINES,
};
pub use driver::{DeploymentDriver, DriverState, StateTrail};
pub use events::{parse_engine_event, EngineEvent, StackEvent};
pub use git::{normalize_branch, GitCli, SourceControl};
pub use handler::handle_invocation;
pub use pulumi::{
    parse_history, remote_args, summarize_run, PulumiCli, RemoteSource, StackBackend, StackRun,
    UpdateRecord,
};
pub use reporter::{
    report_failure, report_success, HeartbeatPump, StepFunctionsReporter, WorkflowReporter,
    MAX_ERROR_LENGTH,
};
pub use settings::{settings_url, PulumiSettingsClient, SettingsPatcher};
