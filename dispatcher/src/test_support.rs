//! Test-only helpers: tracker builders, a scripted command runner and a git
//! repository with a bare `origin` remote.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};

use crate::io::process::{CommandOutput, CommandRunner, CommandSpec};
use crate::tracker::{Phase, Task, TaskStatus, Tracker};

/// Create a deterministic task with default fields.
pub fn task(id: &str, status: TaskStatus) -> Task {
    Task {
        id: id.to_string(),
        title: format!("{id} title"),
        status,
        attempts: 0,
        spec_ref: None,
        depends_on: Vec::new(),
    }
}

/// Create a task with explicit attempt state (useful for breaker tests).
pub fn task_with_attempts(id: &str, status: TaskStatus, attempts: u32) -> Task {
    Task {
        attempts,
        ..task(id, status)
    }
}

pub fn phase(name: &str, tasks: Vec<Task>) -> Phase {
    Phase {
        name: name.to_string(),
        phase_id: None,
        tasks,
    }
}

pub fn tracker(current_phase: &str, phases: Vec<Phase>) -> Tracker {
    Tracker {
        current_phase: Some(current_phase.to_string()),
        phases,
        ..Tracker::default()
    }
}

/// Serialize `tracker` to `path`, creating parent directories.
pub fn write_tracker(path: &Path, tracker: &Tracker) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(tracker)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

/// Successful output with the given stdout.
pub fn success(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(0),
        stdout: stdout.as_bytes().to_vec(),
        ..CommandOutput::default()
    }
}

/// Failed output with the given exit code and stderr.
pub fn failure(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(code),
        stderr: stderr.as_bytes().to_vec(),
        ..CommandOutput::default()
    }
}

/// Output of `git push --porcelain` for a single ref update.
pub fn push_porcelain(branch: &str, flag: char, summary: &str, code: i32) -> CommandOutput {
    let stdout =
        format!("To origin\n{flag}\trefs/heads/{branch}:refs/heads/{branch}\t{summary}\nDone\n");
    CommandOutput {
        exit_code: Some(code),
        stdout: stdout.into_bytes(),
        ..CommandOutput::default()
    }
}

/// Command runner that records every call and answers from a script.
///
/// Responses match on a prefix of the argument list; the first matching rule
/// wins. Unmatched commands succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Vec<(Vec<String>, CommandOutput)>,
    calls: RefCell<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, args_prefix: &[&str], output: CommandOutput) -> Self {
        let prefix = args_prefix.iter().map(|arg| arg.to_string()).collect();
        self.rules.push((prefix, output));
        self
    }

    /// Recorded command lines, in call order.
    pub fn commands(&self) -> Vec<String> {
        self.calls.borrow().iter().map(CommandSpec::display).collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.borrow_mut().push(spec.clone());
        let output = self
            .rules
            .iter()
            .find(|(prefix, _)| spec.args.starts_with(prefix))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| success(""));
        Ok(output)
    }
}

/// Working repository on `main` with a bare `origin` that already has `main`.
pub struct TestRepo {
    _temp: tempfile::TempDir,
    root: PathBuf,
    remote: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let remote = temp.path().join("origin.git");
        let root = temp.path().join("work");
        fs::create_dir_all(&root).context("create work dir")?;

        git(temp.path(), &["init", "--bare", "-b", "main", "origin.git"])?;
        git(&root, &["init", "-b", "main"])?;
        git(&root, &["config", "user.email", "dispatcher@example.com"])?;
        git(&root, &["config", "user.name", "Dispatcher Test"])?;
        git(&root, &["config", "commit.gpgsign", "false"])?;
        fs::write(root.join("README.md"), "# fixture\n").context("write README")?;
        git(&root, &["add", "README.md"])?;
        git(&root, &["commit", "-m", "init"])?;
        let remote_str = remote.to_string_lossy().to_string();
        git(&root, &["remote", "add", "origin", &remote_str])?;
        git(&root, &["push", "-u", "origin", "main"])?;

        Ok(Self {
            _temp: temp,
            root,
            remote,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn remote(&self) -> &Path {
        &self.remote
    }

    /// Write `tracker` at `rel` under the working copy (left untracked).
    pub fn write_tracker(&self, rel: &str, tracker: &Tracker) -> Result<PathBuf> {
        let path = self.root.join(rel);
        write_tracker(&path, tracker)?;
        Ok(path)
    }

    /// Create `branch` on the remote from the current `main`, as another
    /// dispatcher would after claiming a task.
    pub fn push_remote_branch(&self, branch: &str) -> Result<()> {
        git(
            &self.root,
            &["push", "origin", &format!("main:refs/heads/{branch}")],
        )?;
        Ok(())
    }

    pub fn current_branch(&self) -> Result<String> {
        git(&self.root, &["rev-parse", "--abbrev-ref", "HEAD"])
    }

    pub fn local_branch_exists(&self, branch: &str) -> Result<bool> {
        let status = Command::new("git")
            .args(["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .current_dir(&self.root)
            .status()
            .context("spawn git show-ref")?;
        Ok(status.success())
    }
}

/// Run git in `dir`, returning trimmed stdout.
pub fn git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
