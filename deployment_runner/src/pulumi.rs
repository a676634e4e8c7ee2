use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{info, warn};
use sc_defs::{
    DeploymentConfig, DeploymentError, OperationStatus, OperationSummary, StackIdentity,
    StackOperation,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

use crate::cmd::{run_command_streaming, CommandError};
use crate::events::{tail_event_log, StackEvent};

// Passed to the remote executor as secrets rather than plain variables
const SECRET_ENVIRONMENT_KEYS: &[&str] = &["PULUMI_ACCESS_TOKEN"];

// Lines of CLI output kept as the message when no update was recorded
const OUTPUT_TAIL_LINES: usize = 5;

/// Where and how the remote executor obtains the program for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSource {
    pub repository_url: String,
    pub branch: String,
    pub project_path: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub pre_run_commands: Vec<String>,
}

/// A stack operation in flight. `events` closes once the provider stops
/// producing output; `completion` then resolves with the provider's summary.
pub struct StackRun {
    pub events: mpsc::UnboundedReceiver<StackEvent>,
    pub completion: BoxFuture<'static, Result<OperationSummary, DeploymentError>>,
}

#[async_trait]
pub trait StackBackend: Send + Sync {
    async fn select_or_create(&self, stack: &StackIdentity) -> Result<(), DeploymentError>;

    async fn run(
        &self,
        stack: &StackIdentity,
        operation: StackOperation,
        source: &RemoteSource,
    ) -> Result<StackRun, DeploymentError>;

    async fn outputs(&self, stack: &StackIdentity) -> Result<Map<String, Value>, DeploymentError>;

    async fn tag(&self, stack: &StackIdentity, name: &str, value: &str)
        -> Result<(), DeploymentError>;

    async fn remove(&self, stack: &StackIdentity) -> Result<(), DeploymentError>;
}

/// Stack backend driving the pulumi CLI against remote deployments. Every
/// call works from its own temporary project directory.
#[derive(Debug, Clone)]
pub struct PulumiCli {
    binary: String,
    work_root: PathBuf,
    access_token: String,
}

impl PulumiCli {
    pub fn new(config: &DeploymentConfig) -> Self {
        PulumiCli {
            binary: config.pulumi_binary.clone(),
            work_root: config.work_root.clone(),
            access_token: config.access_token.clone(),
        }
    }

    fn project_dir(&self, stack: &StackIdentity) -> Result<TempDir, DeploymentError> {
        let dir = tempfile::Builder::new()
            .prefix("stack-workspace-")
            .tempdir_in(&self.work_root)?;
        // The program itself lives in the repository; the CLI only needs the project name
        std::fs::write(
            dir.path().join("Pulumi.yaml"),
            format!("name: {}\nruntime: yaml\n", stack.project),
        )?;
        Ok(dir)
    }

    fn pulumi(&self, workdir: &Path) -> Command {
        let mut exec = Command::new(&self.binary);
        exec.current_dir(workdir)
            .env("PULUMI_SKIP_UPDATE_CHECK", "true")
            .env("PULUMI_ACCESS_TOKEN", &self.access_token);
        exec
    }

    async fn run_in_project(
        &self,
        stack: &StackIdentity,
        args: &[&str],
    ) -> Result<String, DeploymentError> {
        let workspace = self.project_dir(stack)?;
        let mut exec = self.pulumi(workspace.path());
        exec.args(args);
        // Stack outputs are printed with secrets revealed
        Ok(run_command_streaming(&mut exec, |_| {}).await?.stdout)
    }

    /// Newest update recorded for the stack, if the history can be read.
    async fn latest_update(&self, stack: &StackIdentity) -> Option<UpdateRecord> {
        let fqsn = stack.fully_qualified_name();
        let history = self
            .run_in_project(
                stack,
                &["stack", "history", "--json", "--page-size", "1", "--stack", fqsn.as_str()],
            )
            .await;
        match history {
            Ok(stdout) => parse_history(&stdout),
            Err(e) => {
                warn!("Could not read the update history of {}: {}", stack, e);
                None
            }
        }
    }
}

pub fn remote_args(source: &RemoteSource) -> Vec<String> {
    let mut args = vec![
        "--remote".to_string(),
        source.repository_url.clone(),
        "--remote-git-branch".to_string(),
        source.branch.clone(),
    ];
    if let Some(dir) = &source.project_path {
        args.push("--remote-git-repo-dir".to_string());
        args.push(dir.clone());
    }
    for (key, value) in &source.environment {
        let flag = if SECRET_ENVIRONMENT_KEYS.contains(&key.as_str()) {
            "--remote-env-secret"
        } else {
            "--remote-env"
        };
        args.push(flag.to_string());
        args.push(format!("{}={}", key, value));
    }
    for command in &source.pre_run_commands {
        args.push("--remote-pre-run-command".to_string());
        args.push(command.clone());
    }
    args
}

/// One entry of `stack history --json`.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UpdateRecord {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub message: String,
}

/// Reads the most recent entry of `stack history --json`.
pub fn parse_history(json: &str) -> Option<UpdateRecord> {
    let entries: Vec<UpdateRecord> = serde_json::from_str(json).ok()?;
    entries.into_iter().next()
}

/// Summary of a run whose CLI exited successfully. The newest update is only
/// used when it is newer than `previous`, the version seen before the run;
/// otherwise the tail of the CLI output stands in for the message.
pub fn summarize_run(
    previous: Option<u64>,
    latest: Option<UpdateRecord>,
    stdout: &str,
) -> OperationSummary {
    match latest {
        Some(update) if previous.map_or(true, |version| update.version > version) => {
            OperationSummary {
                result: OperationStatus::from_provider(&update.result),
                message: update.message,
            }
        }
        _ => OperationSummary {
            result: OperationStatus::Succeeded,
            message: output_tail(stdout),
        },
    }
}

fn output_tail(stdout: &str) -> String {
    let lines: Vec<&str> = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    lines[lines.len().saturating_sub(OUTPUT_TAIL_LINES)..].join("\n")
}

#[async_trait]
impl StackBackend for PulumiCli {
    async fn select_or_create(&self, stack: &StackIdentity) -> Result<(), DeploymentError> {
        let fqsn = stack.fully_qualified_name();
        self.run_in_project(
            stack,
            &["stack", "select", "--create", "--non-interactive", "--stack", fqsn.as_str()],
        )
        .await?;
        info!("Selected stack {}", stack);
        Ok(())
    }

    async fn run(
        &self,
        stack: &StackIdentity,
        operation: StackOperation,
        source: &RemoteSource,
    ) -> Result<StackRun, DeploymentError> {
        let previous = self.latest_update(stack).await.map(|update| update.version);
        let workspace = self.project_dir(stack)?;
        let event_log = workspace.path().join("events.jsonl");

        let mut exec = self.pulumi(workspace.path());
        exec.arg(operation.command())
            .args(["--yes", "--skip-preview", "--non-interactive"])
            .arg("--stack")
            .arg(stack.fully_qualified_name())
            .arg("--event-log")
            .arg(&event_log)
            .args(remote_args(source));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cli = self.clone();
        let stack = stack.clone();

        let task = tokio::spawn(async move {
            // Keeps the project directory alive until the run is over
            let _workspace = workspace;

            let (done_tx, done_rx) = oneshot::channel();
            let tail_tx = events_tx.clone();
            let tailer =
                tokio::spawn(async move { tail_event_log(&event_log, tail_tx, done_rx).await });

            let output_tx = events_tx.clone();
            let status = run_command_streaming(&mut exec, move |line| {
                let _ = output_tx.send(StackEvent::Output(line.to_string()));
            })
            .await;

            let _ = done_tx.send(());
            if let Err(e) = tailer.await {
                warn!("Event log reader for {} stopped: {}", stack, e);
            }
            drop(events_tx);

            match status {
                Ok(output) => {
                    let latest = cli.latest_update(&stack).await;
                    Ok(summarize_run(previous, latest, &output.stdout))
                }
                // The provider's own error text is on stderr
                Err(e @ CommandError::Failed { .. }) => Err(DeploymentError::RemoteOperation {
                    operation: operation.command().to_string(),
                    result: "failed".to_string(),
                    message: e.exit_message(),
                }),
                Err(e) => Err(e.into()),
            }
        });

        let completion = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(DeploymentError::RemoteOperation {
                    operation: operation.command().to_string(),
                    result: "failed".to_string(),
                    message: format!("stack run was interrupted: {}", e),
                }),
            }
        }
        .boxed();

        Ok(StackRun {
            events: events_rx,
            completion,
        })
    }

    async fn outputs(&self, stack: &StackIdentity) -> Result<Map<String, Value>, DeploymentError> {
        let fqsn = stack.fully_qualified_name();
        let stdout = self
            .run_in_project(
                stack,
                &["stack", "output", "--json", "--show-secrets", "--stack", fqsn.as_str()],
            )
            .await?;
        if stdout.trim().is_empty() {
            return Ok(Map::new());
        }
        Ok(serde_json::from_str(&stdout)?)
    }

    async fn tag(
        &self,
        stack: &StackIdentity,
        name: &str,
        value: &str,
    ) -> Result<(), DeploymentError> {
        let fqsn = stack.fully_qualified_name();
        self.run_in_project(stack, &["stack", "tag", "set", name, value, "--stack", fqsn.as_str()])
            .await?;
        info!("Tagged {} with {}={}", stack, name, value);
        Ok(())
    }

    async fn remove(&self, stack: &StackIdentity) -> Result<(), DeploymentError> {
        let fqsn = stack.fully_qualified_name();
        self.run_in_project(stack, &["stack", "rm", fqsn.as_str(), "--yes", "--non-interactive"])
            .await?;
        info!("Removed stack {}", stack);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn source() -> RemoteSource {
        let mut environment = BTreeMap::new();
        environment.insert("AWS_REGION".to_string(), "us-west-2".to_string());
        environment.insert("PULUMI_ACCESS_TOKEN".to_string(), "pul-123".to_string());
        RemoteSource {
            repository_url: "git@x/y.git".to_string(),
            branch: "initech/demo/dev".to_string(),
            project_path: Some("infra".to_string()),
            environment,
            pre_run_commands: vec![
                "pulumi config env add prod eu --stack initech/demo/dev --yes".to_string(),
            ],
        }
    }

    #[test]
    fn test_remote_args() {
        assert_eq!(
            remote_args(&source()),
            vec![
                "--remote",
                "git@x/y.git",
                "--remote-git-branch",
                "initech/demo/dev",
                "--remote-git-repo-dir",
                "infra",
                "--remote-env",
                "AWS_REGION=us-west-2",
                "--remote-env-secret",
                "PULUMI_ACCESS_TOKEN=pul-123",
                "--remote-pre-run-command",
                "pulumi config env add prod eu --stack initech/demo/dev --yes",
            ]
        );
    }

    #[test]
    fn test_parse_history() {
        let update = parse_history(
            r#"[{"kind":"update","message":"Update via catalog","result":"succeeded","version":4}]"#,
        )
        .unwrap();
        assert_eq!(update.version, 4);
        assert_eq!(update.result, "succeeded");
        assert_eq!(update.message, "Update via catalog");

        let update = parse_history(r#"[{"kind":"destroy","result":"failed"}]"#).unwrap();
        assert_eq!(update.message, "");

        assert!(parse_history("[]").is_none());
        assert!(parse_history("error: no stack").is_none());
    }

    fn update(version: u64, result: &str, message: &str) -> UpdateRecord {
        UpdateRecord {
            version,
            result: result.to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_summary_uses_update_recorded_by_the_run() {
        let summary = summarize_run(Some(3), Some(update(4, "failed", "Update via catalog")), "");
        assert_eq!(summary.result, OperationStatus::Failed);
        assert_eq!(summary.message, "Update via catalog");

        // First update of a new stack
        let summary = summarize_run(None, Some(update(1, "succeeded", "Initial")), "");
        assert_eq!(summary.result, OperationStatus::Succeeded);
        assert_eq!(summary.message, "Initial");
    }

    #[test]
    fn test_summary_ignores_earlier_update() {
        let stdout = "Updating (initech/demo/dev)\n\nResources:\n    3 unchanged\n\nDuration: 4s\n";
        let summary = summarize_run(Some(4), Some(update(4, "failed", "Merge pull request #4")), stdout);
        assert_eq!(summary.result, OperationStatus::Succeeded);
        assert_eq!(
            summary.message,
            "Updating (initech/demo/dev)\nResources:\n3 unchanged\nDuration: 4s"
        );

        let summary = summarize_run(None, None, "");
        assert_eq!(summary.message, "");
    }

    // Stands in for the pulumi binary. `@STATE@` is replaced by a scratch
    // directory the script may keep markers in.
    fn scripted_cli(root: &Path, script: &str) -> PulumiCli {
        use std::os::unix::fs::PermissionsExt;

        let state = root.join("state");
        let work = root.join("work");
        std::fs::create_dir_all(&state).unwrap();
        std::fs::create_dir_all(&work).unwrap();

        let binary = root.join("pulumi");
        let script = script.replace("@STATE@", &state.to_string_lossy());
        std::fs::write(&binary, format!("#!/bin/sh\n{}", script)).unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        PulumiCli {
            binary: binary.to_string_lossy().to_string(),
            work_root: work,
            access_token: "pul-123".to_string(),
        }
    }

    const WRITE_EVENTS: &str = r#"
while [ $# -gt 0 ]; do
  if [ "$1" = "--event-log" ]; then log="$2"; fi
  shift
done
echo '{"sequence":0,"timestamp":1,"preludeEvent":{}}' >> "$log"
echo '{"sequence":1,"timestamp":2,"resourcePreEvent":{}}' >> "$log"
echo '{"sequence":2,"timestamp":3,"summaryEvent":{}}' >> "$log"
echo "Updating (initech/demo/dev)"
"#;

    async fn collect(run: StackRun) -> (Vec<String>, Vec<String>, Result<OperationSummary, DeploymentError>) {
        let StackRun {
            mut events,
            completion,
        } = run;
        let mut lines = vec![];
        let mut kinds = vec![];
        while let Some(event) = events.recv().await {
            match event {
                StackEvent::Output(line) => lines.push(line),
                StackEvent::Engine(event) => kinds.push(event.kind().to_string()),
            }
        }
        (lines, kinds, completion.await)
    }

    #[tokio::test]
    async fn test_run_streams_events_and_reads_new_update() {
        let root = TempDir::new().unwrap();
        let script = format!(
            r#"if [ "$1" = "stack" ]; then
  if [ -f @STATE@/ran ]; then
    echo '[{{"version":2,"result":"succeeded","message":"Update via catalog"}}]'
  else
    echo '[{{"version":1,"result":"succeeded","message":"Merge pull request #4"}}]'
  fi
  exit 0
fi
touch @STATE@/ran
{}"#,
            WRITE_EVENTS
        );
        let cli = scripted_cli(root.path(), &script);
        let stack = StackIdentity::new("initech", "demo", "dev");

        let run = cli.run(&stack, StackOperation::Up, &source()).await.unwrap();
        let (lines, kinds, summary) = collect(run).await;

        assert_eq!(lines, vec!["Updating (initech/demo/dev)"]);
        assert_eq!(kinds, vec!["preludeEvent", "resourcePreEvent", "summaryEvent"]);
        let summary = summary.unwrap();
        assert_eq!(summary.result, OperationStatus::Succeeded);
        assert_eq!(summary.message, "Update via catalog");
        assert_eq!(std::fs::read_dir(root.path().join("work")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_run_without_new_update_reports_cli_output() {
        let root = TempDir::new().unwrap();
        let script = format!(
            r#"if [ "$1" = "stack" ]; then
  echo '[{{"version":1,"result":"failed","message":"Merge pull request #4"}}]'
  exit 0
fi
{}"#,
            WRITE_EVENTS
        );
        let cli = scripted_cli(root.path(), &script);
        let stack = StackIdentity::new("initech", "demo", "dev");

        let run = cli.run(&stack, StackOperation::Up, &source()).await.unwrap();
        let (_, kinds, summary) = collect(run).await;

        assert_eq!(kinds.len(), 3);
        let summary = summary.unwrap();
        assert_eq!(summary.result, OperationStatus::Succeeded);
        assert_eq!(summary.message, "Updating (initech/demo/dev)");
    }

    #[tokio::test]
    async fn test_failed_run_reports_provider_error() {
        let root = TempDir::new().unwrap();
        let script = r#"if [ "$1" = "stack" ]; then
  echo '[{"version":4,"result":"succeeded","message":"Merge pull request #4"}]'
  exit 0
fi
echo "Updating (initech/demo/dev)"
echo "error: update failed: AccessDenied creating aws:s3:Bucket" >&2
exit 255
"#;
        let cli = scripted_cli(root.path(), script);
        let stack = StackIdentity::new("initech", "demo", "dev");

        let run = cli.run(&stack, StackOperation::Destroy, &source()).await.unwrap();
        let (lines, _, summary) = collect(run).await;

        assert_eq!(lines, vec!["Updating (initech/demo/dev)"]);
        match summary.unwrap_err() {
            DeploymentError::RemoteOperation {
                operation,
                result,
                message,
            } => {
                assert_eq!(operation, "destroy");
                assert_eq!(result, "failed");
                assert_eq!(message, "error: update failed: AccessDenied creating aws:s3:Bucket");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_execution_error() {
        let work = TempDir::new().unwrap();
        let cli = PulumiCli {
            binary: work.path().join("no-pulumi").to_string_lossy().to_string(),
            work_root: work.path().to_path_buf(),
            access_token: String::new(),
        };
        let stack = StackIdentity::new("initech", "demo", "dev");

        let run = cli.run(&stack, StackOperation::Up, &source()).await.unwrap();
        let (_, _, summary) = collect(run).await;

        assert_eq!(summary.unwrap_err().kind(), "ExecutionError");
    }

    #[test]
    fn test_project_dir_names_project() {
        let work = TempDir::new().unwrap();
        let cli = PulumiCli {
            binary: "pulumi".to_string(),
            work_root: work.path().to_path_buf(),
            access_token: String::new(),
        };
        let stack = StackIdentity::new("initech", "demo", "dev");
        let dir = cli.project_dir(&stack).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("Pulumi.yaml")).unwrap(),
            "name: demo\nruntime: yaml\n"
        );
        drop(dir);
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }
}
