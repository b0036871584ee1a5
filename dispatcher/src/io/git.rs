//! Git adapter for dispatcher commands.
//!
//! Every call goes through a [`CommandRunner`] so orchestration tests can
//! script git responses and inspect which commands were issued.

use std::path::PathBuf;

use anyhow::Result;
use tracing::{debug, instrument, warn};

use super::process::{
    CommandFailed, CommandOutput, CommandRunner, CommandSpec, git_command, run_checked, run_probe,
};

/// Result of publishing a claim branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Published,
    /// The branch was already on the remote or the update was refused as
    /// non-fast-forward: someone else owns the name.
    Rejected { status: String },
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git<R> {
    runner: R,
    workdir: PathBuf,
}

impl<R: CommandRunner> Git<R> {
    pub fn new(runner: R, workdir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            workdir: workdir.into(),
        }
    }

    /// `git fetch <remote>`.
    #[instrument(skip_all, fields(remote))]
    pub fn fetch(&self, remote: &str) -> Result<()> {
        debug!(remote, "fetching remote");
        self.run_checked(&["fetch", remote])?;
        Ok(())
    }

    /// Checkout an existing branch.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// `git pull <remote> <branch>`.
    #[instrument(skip_all, fields(remote, branch))]
    pub fn pull(&self, remote: &str, branch: &str) -> Result<()> {
        debug!(remote, branch, "pulling branch");
        self.run_checked(&["pull", remote, branch])?;
        Ok(())
    }

    /// Create and checkout a new branch at current HEAD.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating and checking out new branch");
        self.run_checked(&["checkout", "-b", branch])?;
        Ok(())
    }

    /// Force-delete a local branch.
    #[instrument(skip_all, fields(branch))]
    pub fn delete_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "deleting local branch");
        self.run_checked(&["branch", "-D", branch])?;
        Ok(())
    }

    /// Publish `branch` to `remote` with upstream tracking.
    ///
    /// The claim is won only when the remote reports a newly created ref
    /// (porcelain flag `*`). An up-to-date ref (`=`), a fast-forward of an
    /// existing ref or a non-fast-forward rejection means another dispatcher
    /// got there first: [`PushOutcome::Rejected`]. Anything else, including
    /// hook declines, is a [`CommandFailed`] error.
    #[instrument(skip_all, fields(remote, branch))]
    pub fn push_upstream(&self, remote: &str, branch: &str) -> Result<PushOutcome> {
        let args = ["push", "--porcelain", "-u", remote, branch];
        let output = self.run(&args)?;
        let refname = format!("refs/heads/{branch}");
        let stdout = String::from_utf8_lossy(&output.stdout);
        let status = porcelain_ref_status(&stdout, &refname);
        match status {
            Some(('*', _)) if output.success() => {
                debug!(remote, branch, "branch published");
                return Ok(PushOutcome::Published);
            }
            Some(('=' | ' ' | '+', summary)) => {
                warn!(remote, branch, summary, "claim branch already on remote");
                return Ok(PushOutcome::Rejected {
                    status: summary.to_string(),
                });
            }
            Some(('!', summary)) if summary.starts_with("[rejected]") => {
                warn!(remote, branch, summary, "push rejected by remote");
                return Ok(PushOutcome::Rejected {
                    status: summary.to_string(),
                });
            }
            _ => {}
        }
        let mut stderr = output.stderr_text();
        if let Some((_, summary)) = status {
            if !stderr.is_empty() {
                stderr.push('\n');
            }
            stderr.push_str(summary);
        }
        Err(CommandFailed {
            command: self.spec(&args).display(),
            exit_code: output.exit_code,
            timed_out: output.timed_out,
            stderr,
        }
        .into())
    }

    /// True if `refs/heads/<branch>` exists on `remote`.
    ///
    /// Probe mode: a failing `ls-remote` counts as "absent".
    #[instrument(skip_all, fields(remote, branch))]
    pub fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool> {
        let refname = format!("refs/heads/{branch}");
        let out = self.run_probe(&["ls-remote", "--heads", remote, &refname])?;
        let exists = ls_remote_has_ref(&out, &refname);
        debug!(remote, branch, exists, "remote branch lookup");
        Ok(exists)
    }

    /// Current branch name, `None` when detached or undeterminable.
    pub fn current_branch(&self) -> Result<Option<String>> {
        let out = self.run_probe(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        if out.is_empty() || out == "HEAD" {
            debug!("no current branch (detached or unborn HEAD)");
            return Ok(None);
        }
        Ok(Some(out))
    }

    /// Default branch advertised by `remote` (from `refs/remotes/<remote>/HEAD`).
    pub fn remote_default_branch(&self, remote: &str) -> Result<Option<String>> {
        let refname = format!("refs/remotes/{remote}/HEAD");
        let out = self.run_probe(&["symbolic-ref", "--short", &refname])?;
        let prefix = format!("{remote}/");
        let branch = out.strip_prefix(&prefix).unwrap_or(&out).trim();
        if branch.is_empty() {
            return Ok(None);
        }
        Ok(Some(branch.to_string()))
    }

    fn spec(&self, args: &[&str]) -> CommandSpec {
        git_command(&self.workdir).args(args.iter().copied())
    }

    fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        self.runner.run(&self.spec(args))
    }

    fn run_checked(&self, args: &[&str]) -> Result<String> {
        run_checked(&self.runner, &self.spec(args))
    }

    fn run_probe(&self, args: &[&str]) -> Result<String> {
        run_probe(&self.runner, &self.spec(args))
    }
}

/// True if `ls-remote` output lists exactly `refname`.
fn ls_remote_has_ref(output: &str, refname: &str) -> bool {
    output.lines().any(|line| {
        line.split_whitespace()
            .nth(1)
            .is_some_and(|name| name == refname)
    })
}

/// Flag and summary of the `git push --porcelain` line updating `refname`.
///
/// Ref lines are `<flag>\t<from>:<to>\t<summary>`.
fn porcelain_ref_status<'a>(stdout: &'a str, refname: &str) -> Option<(char, &'a str)> {
    stdout.lines().find_map(|line| {
        let mut fields = line.split('\t');
        let flag = fields.next()?.chars().next()?;
        let (_, to) = fields.next()?.split_once(':')?;
        let summary = fields.next().unwrap_or_default().trim();
        (to == refname).then_some((flag, summary))
    })
}
