use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};

use log::{info, warn};
use sc_defs::DeploymentError;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Lines of stderr kept for the error message of a failed command.
pub const MAX_OUTPUT_LINES: usize = 50;

// Arguments following these flags carry credentials and are masked in logs
const SECRET_FLAGS: &[&str] = &["--remote-env-secret"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {exit_message}")]
    Failed {
        command: String,
        status: String,
        code: Option<i32>,
        exit_message: String,
    },

    #[error("failed while waiting for `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl CommandError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            CommandError::Failed { code, .. } => *code,
            _ => None,
        }
    }

    pub fn exit_message(&self) -> String {
        match self {
            CommandError::Failed { exit_message, .. } => exit_message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<CommandError> for DeploymentError {
    fn from(e: CommandError) -> Self {
        let command = match &e {
            CommandError::Spawn { command, .. }
            | CommandError::Failed { command, .. }
            | CommandError::Wait { command, .. } => command.clone(),
        };
        DeploymentError::Execution {
            command,
            exit_message: e.exit_message(),
        }
    }
}

/// Renders a command line for logging, masking secret arguments.
pub fn describe_command(exec: &Command) -> String {
    let std_cmd = exec.as_std();
    let mut parts = vec![std_cmd.get_program().to_string_lossy().to_string()];
    let mut mask_next = false;
    for arg in std_cmd.get_args() {
        let arg = arg.to_string_lossy();
        if mask_next {
            let key = arg.split('=').next().unwrap_or_default();
            parts.push(format!("{}=***", key));
            mask_next = false;
        } else {
            mask_next = SECRET_FLAGS.iter().any(|flag| *flag == arg);
            parts.push(arg.to_string());
        }
    }
    parts.join(" ")
}

/// Runs a command to completion and returns its stdout. Only a non-zero exit
/// is an error; output on stderr alone is logged and otherwise ignored.
pub async fn run_command(exec: &mut Command) -> Result<CommandOutput, CommandError> {
    run_command_streaming(exec, |line| info!("{}", line)).await
}

/// Same as [`run_command`], but every stdout line is handed to `on_line` as
/// soon as it is read instead of being logged.
pub async fn run_command_streaming<F>(
    exec: &mut Command,
    mut on_line: F,
) -> Result<CommandOutput, CommandError>
where
    F: FnMut(&str),
{
    let command = describe_command(exec);
    info!("> {}", command);

    exec.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = exec.spawn().map_err(|source| CommandError::Spawn {
        command: command.clone(),
        source,
    })?;

    let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
        (Some(stdout), Some(stderr)) => (stdout, stderr),
        _ => {
            return Err(CommandError::Spawn {
                command,
                source: std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "output of the child process was not captured",
                ),
            })
        }
    };

    let mut stdout_reader = BufReader::new(stdout).lines();
    let mut stderr_reader = BufReader::new(stderr).lines();

    let mut stdout_text = String::new();
    let mut last_stderr_lines = VecDeque::new();

    let mut stdout_done = false;
    let mut stderr_done = false;

    while !stdout_done || !stderr_done {
        tokio::select! {
            stdout_line = stdout_reader.next_line(), if !stdout_done => {
                match stdout_line {
                    Ok(Some(line)) => {
                        on_line(&line);
                        stdout_text.push_str(&line);
                        stdout_text.push('\n');
                    },
                    Ok(None) => stdout_done = true,
                    Err(e) => {
                        warn!("Error reading stdout of `{}`: {}", command, e);
                        stdout_done = true;
                    },
                }
            },
            stderr_line = stderr_reader.next_line(), if !stderr_done => {
                match stderr_line {
                    Ok(Some(line)) => {
                        warn!("{}", line);
                        last_stderr_lines.push_back(line);
                        if last_stderr_lines.len() > MAX_OUTPUT_LINES {
                            last_stderr_lines.pop_front();
                        }
                    },
                    Ok(None) => stderr_done = true,
                    Err(e) => {
                        warn!("Error reading stderr of `{}`: {}", command, e);
                        stderr_done = true;
                    },
                }
            },
        }
    }

    let status = child.wait().await.map_err(|source| CommandError::Wait {
        command: command.clone(),
        source,
    })?;

    let stderr_text = last_stderr_lines
        .iter()
        .fold(String::new(), |acc, line| acc + line.as_str() + "\n");

    if !status.success() {
        return Err(CommandError::Failed {
            exit_message: exit_message(&status, &stderr_text, &stdout_text),
            status: status.to_string(),
            code: status.code(),
            command,
        });
    }

    Ok(CommandOutput {
        stdout: stdout_text,
        stderr: stderr_text,
    })
}

fn exit_message(status: &ExitStatus, stderr: &str, stdout: &str) -> String {
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    let last_stdout = stdout
        .lines()
        .rev()
        .take(MAX_OUTPUT_LINES)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect::<Vec<_>>()
        .join("\n");
    if !last_stdout.trim().is_empty() {
        return last_stdout.trim().to_string();
    }
    status.to_string()
}
