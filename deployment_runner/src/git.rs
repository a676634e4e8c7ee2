use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::info;
use sc_defs::{BranchError, BranchStep, DeploymentConfig};
use tempfile::TempDir;
use tokio::process::Command;

use crate::cmd::run_command;

/// Lifecycle of the dedicated per-stack branch.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Creates `new_branch` from `source_branch` and pushes it to origin.
    /// A branch that already exists on the remote is reused.
    async fn create_stack_branch(
        &self,
        repository_url: &str,
        source_branch: &str,
        new_branch: &str,
    ) -> Result<(), BranchError>;

    /// Deletes `branch` from origin. A branch that no longer exists is
    /// treated as deleted.
    async fn delete_stack_branch(&self, repository_url: &str, branch: &str)
        -> Result<(), BranchError>;
}

/// Drives the git binary, one argument vector per step, inside a throwaway
/// checkout directory that is removed on every exit path.
#[derive(Debug, Clone)]
pub struct GitCli {
    git_binary: String,
    work_root: PathBuf,
}

impl GitCli {
    pub fn new(config: &DeploymentConfig) -> Self {
        GitCli {
            git_binary: config.git_binary.clone(),
            work_root: config.work_root.clone(),
        }
    }

    fn git(&self) -> Command {
        let mut exec = Command::new(&self.git_binary);
        exec.env("GIT_TERMINAL_PROMPT", "0");
        exec
    }

    fn checkout_dir(&self, branch: &str) -> Result<TempDir, BranchError> {
        tempfile::Builder::new()
            .prefix("stack-branch-")
            .tempdir_in(&self.work_root)
            .map_err(|e| BranchError::new(BranchStep::Workspace, branch, e.to_string()))
    }

    async fn remote_branch_exists(
        &self,
        repository_url: &str,
        branch: &str,
    ) -> Result<bool, BranchError> {
        let mut exec = self.git();
        exec.args(["ls-remote", "--exit-code", "--heads", "--"])
            .arg(repository_url)
            .arg(format!("refs/heads/{}", branch));
        match run_command(&mut exec).await {
            Ok(_) => Ok(true),
            // ls-remote --exit-code exits with 2 when no ref matched
            Err(e) if e.exit_code() == Some(2) => Ok(false),
            Err(e) => Err(BranchError::new(BranchStep::Lookup, branch, e.exit_message())),
        }
    }

    async fn shallow_clone(
        &self,
        repository_url: &str,
        branch: &str,
        target: &Path,
        target_branch: &str,
    ) -> Result<(), BranchError> {
        let mut exec = self.git();
        exec.args(["clone", "--depth", "1", "--single-branch", "--branch"])
            .arg(branch)
            .arg("--")
            .arg(repository_url)
            .arg(target);
        run_command(&mut exec)
            .await
            .map(|_| ())
            .map_err(|e| BranchError::new(BranchStep::Clone, target_branch, e.exit_message()))
    }

    async fn git_in(
        &self,
        repo: &Path,
        args: &[&str],
        step: BranchStep,
        branch: &str,
    ) -> Result<(), BranchError> {
        let mut exec = self.git();
        exec.arg("-C").arg(repo).args(args);
        run_command(&mut exec)
            .await
            .map(|_| ())
            .map_err(|e| BranchError::new(step, branch, e.exit_message()))
    }
}

#[async_trait]
impl SourceControl for GitCli {
    async fn create_stack_branch(
        &self,
        repository_url: &str,
        source_branch: &str,
        new_branch: &str,
    ) -> Result<(), BranchError> {
        if self.remote_branch_exists(repository_url, new_branch).await? {
            info!(
                "Branch {} already exists on {}, reusing it",
                new_branch, repository_url
            );
            return Ok(());
        }

        let source_branch = normalize_branch(source_branch);
        let checkout = self.checkout_dir(new_branch)?;
        let repo = checkout.path().join("repo");

        info!(
            "Creating branch {} from {} of {}",
            new_branch, source_branch, repository_url
        );
        self.shallow_clone(repository_url, source_branch, &repo, new_branch)
            .await?;
        self.git_in(&repo, &["checkout", "-b", new_branch], BranchStep::Checkout, new_branch)
            .await?;
        let refspec = format!("refs/heads/{0}:refs/heads/{0}", new_branch);
        self.git_in(
            &repo,
            &["push", "origin", refspec.as_str()],
            BranchStep::Push,
            new_branch,
        )
        .await?;

        info!("Branch {} pushed", new_branch);
        Ok(())
    }

    async fn delete_stack_branch(
        &self,
        repository_url: &str,
        branch: &str,
    ) -> Result<(), BranchError> {
        if !self.remote_branch_exists(repository_url, branch).await? {
            info!(
                "Branch {} does not exist on {}, nothing to delete",
                branch, repository_url
            );
            return Ok(());
        }

        let checkout = self.checkout_dir(branch)?;
        let repo = checkout.path().join("repo");

        info!("Deleting branch {} of {}", branch, repository_url);
        self.shallow_clone(repository_url, branch, &repo, branch)
            .await?;
        self.git_in(
            &repo,
            &["push", "origin", "--delete", branch],
            BranchStep::Delete,
            branch,
        )
        .await?;

        info!("Branch {} deleted", branch);
        Ok(())
    }
}

/// The catalog front-end submits refs such as `refs/heads/main`, while
/// `git clone --branch` expects the short name.
pub fn normalize_branch(branch: &str) -> &str {
    let branch = branch.trim().trim_start_matches('/');
    branch.strip_prefix("refs/heads/").unwrap_or(branch)
}
