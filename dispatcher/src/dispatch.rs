//! Orchestration for a single `dispatcher dispatch` run.
//!
//! Tracker → selection → remote lock check → local claim branch → task
//! package. Each stage may end the run early; only terminal conditions that
//! need a human (breaker, broken tracker, failed git) are errors.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::lock::lock_name;
use crate::io::config::DispatcherConfig;
use crate::io::git::{Git, PushOutcome};
use crate::io::process::CommandRunner;
use crate::lock::{LockStatus, check_lock};
use crate::resolve::{resolve_agent, resolve_base_branch};
use crate::select::{
    AttemptsExhausted, SelectOutcome, SelectedTask, load_configured_tracker, select_next,
};

/// Work description handed to the external worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPackage {
    pub task_id: String,
    pub spec_ref: Option<String>,
    pub branch: String,
    pub base_branch: String,
    pub rules_dir: String,
}

/// Why a task counts as locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReason {
    /// The claim branch already exists on the remote.
    RemoteBranchExists,
    /// Another dispatcher published the branch first.
    PushRejected,
}

/// Terminal state of a run that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No phase matches `current_phase`.
    Idle,
    /// Current phase has nothing pending.
    Waiting { phase: String },
    /// Someone else owns the task.
    Locked { branch: String, reason: LockReason },
    /// Task claimed locally (and published when `push_claim` is set).
    Dispatched(TaskPackage),
}

/// Progress notifications emitted while a run advances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    TrackerLoaded { path: PathBuf },
    CheckingLock { branch: String },
    Dispatching { task: SelectedTask, agent: String, base_branch: String },
    BranchCreated { branch: String },
    BranchPublished { branch: String, remote: String },
    ClaimRolledBack { branch: String },
}

/// Task dispatcher bound to one repository and configuration.
#[derive(Debug)]
pub struct Dispatcher<R> {
    root: PathBuf,
    config: DispatcherConfig,
    git: Git<R>,
}

impl<R: CommandRunner> Dispatcher<R> {
    pub fn new(root: impl Into<PathBuf>, config: DispatcherConfig, runner: R) -> Self {
        let root = root.into();
        let git = Git::new(runner, root.clone());
        Self { root, config, git }
    }

    /// Run one dispatch cycle.
    ///
    /// Version control is only touched once a task has been selected.
    #[instrument(skip_all, fields(root = %self.root.display(), strategy = %self.config.strategy))]
    pub fn run<F: FnMut(&DispatchEvent)>(&self, mut on_event: F) -> Result<DispatchOutcome> {
        let loaded = load_configured_tracker(&self.root, &self.config)?;
        on_event(&DispatchEvent::TrackerLoaded {
            path: loaded.path.clone(),
        });

        let task = match select_next(&loaded.tracker, self.config.max_attempts) {
            SelectOutcome::AllPhasesComplete => {
                info!("all phases completed");
                return Ok(DispatchOutcome::Idle);
            }
            SelectOutcome::PhaseExhausted { phase } => {
                info!(phase = %phase, "current phase has no pending task");
                return Ok(DispatchOutcome::Waiting { phase });
            }
            SelectOutcome::AttemptsExhausted(task) => {
                warn!(task_id = %task.id, attempts = task.attempts, "attempts exhausted");
                return Err(AttemptsExhausted::new(&task, self.config.max_attempts).into());
            }
            SelectOutcome::Ready(task) => task,
        };
        debug!(task_id = %task.id, "task selected");

        let agent = resolve_agent(&self.config, Some(&loaded.tracker));
        let remote = self.config.remote.as_str();
        on_event(&DispatchEvent::CheckingLock {
            branch: lock_name(&agent, &task.id),
        });
        let branch = match check_lock(&self.git, remote, &agent, &task.id)? {
            LockStatus::Available(branch) => branch,
            LockStatus::Held(branch) => {
                return Ok(DispatchOutcome::Locked {
                    branch,
                    reason: LockReason::RemoteBranchExists,
                });
            }
        };

        let base_branch = resolve_base_branch(&self.config, &self.git, &agent)?;
        on_event(&DispatchEvent::Dispatching {
            task: task.clone(),
            agent: agent.clone(),
            base_branch: base_branch.clone(),
        });

        self.git.fetch(remote)?;
        self.git.checkout_branch(&base_branch)?;
        self.git.pull(remote, &base_branch)?;
        self.git.checkout_new_branch(&branch)?;
        on_event(&DispatchEvent::BranchCreated {
            branch: branch.clone(),
        });

        if self.config.push_claim {
            match self.publish_claim(&branch, &base_branch, &mut on_event)? {
                PushOutcome::Published => {}
                PushOutcome::Rejected { .. } => {
                    return Ok(DispatchOutcome::Locked {
                        branch,
                        reason: LockReason::PushRejected,
                    });
                }
            }
        }

        info!(task_id = %task.id, branch = %branch, "task dispatched");
        Ok(DispatchOutcome::Dispatched(TaskPackage {
            task_id: task.id,
            spec_ref: task.spec_ref,
            branch,
            base_branch,
            rules_dir: self.config.rules_dir.clone(),
        }))
    }

    /// Push the claim branch; on any failure restore the base branch and drop
    /// the local claim so the next cycle starts clean.
    fn publish_claim<F: FnMut(&DispatchEvent)>(
        &self,
        branch: &str,
        base_branch: &str,
        on_event: &mut F,
    ) -> Result<PushOutcome> {
        let remote = self.config.remote.as_str();
        match self.git.push_upstream(remote, branch) {
            Ok(PushOutcome::Published) => {
                on_event(&DispatchEvent::BranchPublished {
                    branch: branch.to_string(),
                    remote: remote.to_string(),
                });
                Ok(PushOutcome::Published)
            }
            Ok(rejected @ PushOutcome::Rejected { .. }) => {
                self.roll_back_claim(branch, base_branch)?;
                on_event(&DispatchEvent::ClaimRolledBack {
                    branch: branch.to_string(),
                });
                Ok(rejected)
            }
            Err(err) => {
                if let Err(rollback_err) = self.roll_back_claim(branch, base_branch) {
                    warn!(err = %rollback_err, "rollback after failed push also failed");
                } else {
                    on_event(&DispatchEvent::ClaimRolledBack {
                        branch: branch.to_string(),
                    });
                }
                Err(err)
            }
        }
    }

    fn roll_back_claim(&self, branch: &str, base_branch: &str) -> Result<()> {
        debug!(branch, base_branch, "rolling back local claim");
        self.git.checkout_branch(base_branch)?;
        self.git.delete_branch(branch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::Strategy;
    use crate::io::process::{CommandFailed, CommandOutput, CommandSpec, SystemRunner};
    use crate::io::tracker_store::TrackerNotFound;
    use crate::test_support::{
        ScriptedRunner, TestRepo, failure, phase, push_porcelain, success, task,
        task_with_attempts, tracker, write_tracker,
    };
    use crate::tracker::{TaskStatus, Tracker};

    fn fixed_config() -> DispatcherConfig {
        DispatcherConfig {
            strategy: Strategy::Fixed,
            agent_name: Some("agent".to_string()),
            base_branch: Some("main".to_string()),
            ..DispatcherConfig::default()
        }
    }

    fn build_tracker() -> Tracker {
        let mut t2 = task("T2", TaskStatus::Pending);
        t2.spec_ref = Some("specs/t2.md".to_string());
        tracker(
            "build",
            vec![phase("build", vec![task("T1", TaskStatus::Completed), t2])],
        )
    }

    fn setup(tracker: &Tracker) -> tempfile::TempDir {
        let temp = tempfile::tempdir().expect("tempdir");
        write_tracker(&temp.path().join(".agent/tracker.json"), tracker).expect("write tracker");
        temp
    }

    #[test]
    fn dispatches_first_pending_task() {
        let temp = setup(&build_tracker());
        let runner = ScriptedRunner::new();
        let dispatcher = Dispatcher::new(temp.path(), fixed_config(), &runner);

        let mut events = Vec::new();
        let outcome = dispatcher.run(|event| events.push(event.clone())).expect("run");

        assert_eq!(
            outcome,
            DispatchOutcome::Dispatched(TaskPackage {
                task_id: "T2".to_string(),
                spec_ref: Some("specs/t2.md".to_string()),
                branch: "agent/task-T2".to_string(),
                base_branch: "main".to_string(),
                rules_dir: ".agents/rules/".to_string(),
            })
        );
        assert_eq!(
            runner.commands(),
            vec![
                "git ls-remote --heads origin refs/heads/agent/task-T2",
                "git fetch origin",
                "git checkout main",
                "git pull origin main",
                "git checkout -b agent/task-T2",
            ]
        );
        assert!(events.contains(&DispatchEvent::BranchCreated {
            branch: "agent/task-T2".to_string()
        }));
    }

    #[test]
    fn held_lock_stops_before_checkout() {
        let temp = setup(&build_tracker());
        let runner = ScriptedRunner::new().respond(
            &["ls-remote"],
            success("abc\trefs/heads/agent/task-T2\n"),
        );
        let dispatcher = Dispatcher::new(temp.path(), fixed_config(), &runner);

        let outcome = dispatcher.run(|_| {}).expect("run");
        assert_eq!(
            outcome,
            DispatchOutcome::Locked {
                branch: "agent/task-T2".to_string(),
                reason: LockReason::RemoteBranchExists,
            }
        );
        assert_eq!(
            runner.commands(),
            vec!["git ls-remote --heads origin refs/heads/agent/task-T2"]
        );
    }

    #[test]
    fn exhausted_attempts_fail_before_lock_check() {
        let tracker = tracker(
            "build",
            vec![phase(
                "build",
                vec![
                    task_with_attempts("T3", TaskStatus::Pending, 5),
                    task("T4", TaskStatus::Pending),
                ],
            )],
        );
        let temp = setup(&tracker);
        let runner = ScriptedRunner::new();
        let dispatcher = Dispatcher::new(temp.path(), fixed_config(), &runner);

        let err = dispatcher.run(|_| {}).expect_err("breaker");
        let exhausted = err
            .downcast_ref::<AttemptsExhausted>()
            .expect("AttemptsExhausted");
        assert_eq!(exhausted.task_id, "T3");
        assert!(err.to_string().contains("manual intervention required"));
        assert!(runner.commands().is_empty());
    }

    #[test]
    fn idle_and_waiting_touch_no_version_control() {
        let idle = tracker(
            "release",
            vec![phase("build", vec![task("T1", TaskStatus::Pending)])],
        );
        let waiting = tracker(
            "build",
            vec![phase("build", vec![task("T1", TaskStatus::InProgress)])],
        );
        for (tracker, expected) in [
            (idle, DispatchOutcome::Idle),
            (
                waiting,
                DispatchOutcome::Waiting {
                    phase: "build".to_string(),
                },
            ),
        ] {
            let temp = setup(&tracker);
            let runner = ScriptedRunner::new();
            let dispatcher = Dispatcher::new(temp.path(), fixed_config(), &runner);
            assert_eq!(dispatcher.run(|_| {}).expect("run"), expected);
            assert!(runner.commands().is_empty());
        }
    }

    #[test]
    fn missing_tracker_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedRunner::new();
        let dispatcher = Dispatcher::new(temp.path(), fixed_config(), &runner);

        let err = dispatcher.run(|_| {}).expect_err("missing");
        assert!(err.downcast_ref::<TrackerNotFound>().is_some());
        assert!(runner.commands().is_empty());
    }

    #[test]
    fn checked_failure_aborts_without_branch_creation() {
        let temp = setup(&build_tracker());
        let runner = ScriptedRunner::new().respond(&["pull"], failure(1, "merge conflict"));
        let dispatcher = Dispatcher::new(temp.path(), fixed_config(), &runner);

        let err = dispatcher.run(|_| {}).expect_err("pull fails");
        let failed = err.downcast_ref::<CommandFailed>().expect("CommandFailed");
        assert_eq!(failed.command, "git pull origin main");
        assert!(!runner.commands().iter().any(|c| c.contains("checkout -b")));
    }

    #[test]
    fn rejected_push_rolls_back_and_reports_locked() {
        let temp = setup(&build_tracker());
        let runner = ScriptedRunner::new().respond(
            &["push"],
            push_porcelain("agent/task-T2", '!', "[rejected] (fetch first)", 1),
        );
        let config = DispatcherConfig {
            push_claim: true,
            ..fixed_config()
        };
        let dispatcher = Dispatcher::new(temp.path(), config, &runner);

        let outcome = dispatcher.run(|_| {}).expect("run");
        assert_eq!(
            outcome,
            DispatchOutcome::Locked {
                branch: "agent/task-T2".to_string(),
                reason: LockReason::PushRejected,
            }
        );
        let commands = runner.commands();
        assert_eq!(
            &commands[commands.len() - 3..],
            [
                "git push --porcelain -u origin agent/task-T2",
                "git checkout main",
                "git branch -D agent/task-T2",
            ]
        );
    }

    #[test]
    fn published_claim_is_dispatched() {
        let temp = setup(&build_tracker());
        let runner = ScriptedRunner::new().respond(
            &["push"],
            push_porcelain("agent/task-T2", '*', "[new branch]", 0),
        );
        let config = DispatcherConfig {
            push_claim: true,
            ..fixed_config()
        };
        let dispatcher = Dispatcher::new(temp.path(), config, &runner);

        let mut events = Vec::new();
        let outcome = dispatcher.run(|event| events.push(event.clone())).expect("run");
        assert!(matches!(outcome, DispatchOutcome::Dispatched(_)));
        assert!(events.contains(&DispatchEvent::BranchPublished {
            branch: "agent/task-T2".to_string(),
            remote: "origin".to_string(),
        }));
    }

    #[test]
    fn failed_push_rolls_back_and_surfaces_error() {
        let temp = setup(&build_tracker());
        let runner = ScriptedRunner::new().respond(
            &["push"],
            failure(128, "fatal: unable to access remote"),
        );
        let config = DispatcherConfig {
            push_claim: true,
            ..fixed_config()
        };
        let dispatcher = Dispatcher::new(temp.path(), config, &runner);

        let mut events = Vec::new();
        let err = dispatcher
            .run(|event| events.push(event.clone()))
            .expect_err("push fails");
        let failed = err.downcast_ref::<CommandFailed>().expect("CommandFailed");
        assert_eq!(failed.command, "git push --porcelain -u origin agent/task-T2");
        assert!(events.contains(&DispatchEvent::ClaimRolledBack {
            branch: "agent/task-T2".to_string()
        }));
        let commands = runner.commands();
        assert_eq!(
            &commands[commands.len() - 2..],
            ["git checkout main", "git branch -D agent/task-T2"]
        );
    }

    #[test]
    fn failed_rollback_keeps_push_error() {
        let temp = setup(&build_tracker());
        let runner = ScriptedRunner::new()
            .respond(&["push"], failure(128, "fatal: unable to access remote"))
            .respond(&["branch", "-D"], failure(1, "error: branch not found"));
        let config = DispatcherConfig {
            push_claim: true,
            ..fixed_config()
        };
        let dispatcher = Dispatcher::new(temp.path(), config, &runner);

        let mut events = Vec::new();
        let err = dispatcher
            .run(|event| events.push(event.clone()))
            .expect_err("push fails");
        let failed = err.downcast_ref::<CommandFailed>().expect("CommandFailed");
        assert_eq!(failed.command, "git push --porcelain -u origin agent/task-T2");
        assert!(
            !events
                .iter()
                .any(|event| matches!(event, DispatchEvent::ClaimRolledBack { .. }))
        );
    }

    /// Publishes the same claim from another clone right before our push.
    struct CompetingClaimRunner<'a> {
        inner: SystemRunner,
        repo: &'a TestRepo,
        branch: &'static str,
    }

    impl CommandRunner for CompetingClaimRunner<'_> {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            if spec.args.first().is_some_and(|arg| arg == "push") {
                self.repo.push_remote_branch(self.branch)?;
            }
            self.inner.run(spec)
        }
    }

    #[test]
    fn claim_published_by_someone_else_after_lock_check_is_locked() {
        let repo = TestRepo::new().expect("repo");
        repo.write_tracker(".agent/tracker.json", &build_tracker())
            .expect("tracker");
        let runner = CompetingClaimRunner {
            inner: SystemRunner::default(),
            repo: &repo,
            branch: "agent/task-T2",
        };
        let config = DispatcherConfig {
            push_claim: true,
            ..fixed_config()
        };
        let dispatcher = Dispatcher::new(repo.root(), config, runner);

        let outcome = dispatcher.run(|_| {}).expect("run");
        assert_eq!(
            outcome,
            DispatchOutcome::Locked {
                branch: "agent/task-T2".to_string(),
                reason: LockReason::PushRejected,
            }
        );
        assert_eq!(repo.current_branch().expect("branch"), "main");
        assert!(!repo.local_branch_exists("agent/task-T2").expect("show-ref"));
    }

    #[test]
    fn auto_strategy_uses_tracker_agent_and_current_branch() {
        let mut tracker = build_tracker();
        tracker.agent_name = Some("jules".to_string());
        let temp = tempfile::tempdir().expect("tempdir");
        write_tracker(&temp.path().join(".jules/tracker.json"), &tracker).expect("write");
        let runner = ScriptedRunner::new().respond(&["rev-parse"], success("develop\n"));
        let dispatcher = Dispatcher::new(temp.path(), DispatcherConfig::default(), &runner);

        match dispatcher.run(|_| {}).expect("run") {
            DispatchOutcome::Dispatched(package) => {
                assert_eq!(package.branch, "jules/task-T2");
                assert_eq!(package.base_branch, "develop");
            }
            other => panic!("expected dispatch, got {other:?}"),
        }
    }
}
