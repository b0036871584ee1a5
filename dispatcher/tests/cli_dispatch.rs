//! CLI tests for `dispatcher dispatch`.
//!
//! Spawns the dispatcher binary against a real repository with a bare
//! `origin` and checks exit codes, printed packages and branch state.

use std::process::{Command, Output};

use dispatcher::dispatch::TaskPackage;
use dispatcher::exit_codes;
use dispatcher::test_support::{TestRepo, git, phase, task, task_with_attempts, tracker};
use dispatcher::tracker::{TaskStatus, Tracker};

fn build_tracker() -> Tracker {
    let mut t2 = task("T2", TaskStatus::Pending);
    t2.spec_ref = Some("specs/t2.md".to_string());
    let mut tracker = tracker(
        "build",
        vec![phase("build", vec![task("T1", TaskStatus::Completed), t2])],
    );
    tracker.agent_name = Some("agent".to_string());
    tracker
}

fn dispatcher(repo: &TestRepo, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dispatcher"))
        .current_dir(repo.root())
        .env("RUST_LOG", "off")
        .args(args)
        .output()
        .expect("spawn dispatcher")
}

#[test]
fn dispatch_prints_package_and_checks_out_claim_branch() {
    let repo = TestRepo::new().expect("repo");
    repo.write_tracker(".agents/tracker.json", &build_tracker())
        .expect("tracker");

    let output = dispatcher(&repo, &["dispatch", "--package-only"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));

    let package: TaskPackage = serde_json::from_slice(&output.stdout).expect("package json");
    assert_eq!(package.task_id, "T2");
    assert_eq!(package.branch, "agent/task-T2");
    assert_eq!(package.base_branch, "main");
    assert_eq!(package.spec_ref.as_deref(), Some("specs/t2.md"));
    assert_eq!(package.rules_dir, ".agents/rules/");
    assert_eq!(repo.current_branch().expect("branch"), "agent/task-T2");
}

#[test]
fn default_command_is_dispatch_with_progress() {
    let repo = TestRepo::new().expect("repo");
    repo.write_tracker(".agents/tracker.json", &build_tracker())
        .expect("tracker");

    let output = dispatcher(&repo, &[]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Checking remote lock for branch: agent/task-T2"));
    assert!(stdout.contains("Task package:"));
    assert!(stdout.contains("\"task_id\": \"T2\""));
}

#[test]
fn remote_branch_means_locked_and_untouched_checkout() {
    let repo = TestRepo::new().expect("repo");
    repo.write_tracker(".agents/tracker.json", &build_tracker())
        .expect("tracker");
    repo.push_remote_branch("agent/task-T2").expect("remote lock");

    let output = dispatcher(&repo, &["dispatch"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Task is locked"), "stdout: {stdout}");
    assert_eq!(repo.current_branch().expect("branch"), "main");
    assert!(!repo.local_branch_exists("agent/task-T2").expect("show-ref"));
}

#[test]
fn exhausted_attempts_exit_failure() {
    let repo = TestRepo::new().expect("repo");
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
    repo.write_tracker(".agents/tracker.json", &tracker)
        .expect("tracker");

    let output = dispatcher(&repo, &["dispatch"]);
    assert_eq!(output.status.code(), Some(exit_codes::FAILURE));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("manual intervention required"), "stderr: {stderr}");
    assert_eq!(repo.current_branch().expect("branch"), "main");
}

#[test]
fn missing_tracker_exits_failure() {
    let repo = TestRepo::new().expect("repo");

    let output = dispatcher(&repo, &["dispatch"]);
    assert_eq!(output.status.code(), Some(exit_codes::FAILURE));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not found"), "stderr: {stderr}");
}

#[test]
fn idle_and_waiting_exit_ok() {
    let repo = TestRepo::new().expect("repo");
    let idle = tracker(
        "release",
        vec![phase("build", vec![task("T1", TaskStatus::Pending)])],
    );
    repo.write_tracker(".agents/tracker.json", &idle)
        .expect("tracker");
    let output = dispatcher(&repo, &["dispatch"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&output.stdout).contains("idle"));

    let waiting = tracker(
        "build",
        vec![phase("build", vec![task("T1", TaskStatus::InProgress)])],
    );
    repo.write_tracker(".agents/tracker.json", &waiting)
        .expect("tracker");
    let output = dispatcher(&repo, &["dispatch"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Waiting"));
    assert_eq!(repo.current_branch().expect("branch"), "main");
}

#[test]
fn push_publishes_claim_to_remote() {
    let repo = TestRepo::new().expect("repo");
    repo.write_tracker(".agents/tracker.json", &build_tracker())
        .expect("tracker");

    let output = dispatcher(&repo, &["dispatch", "--push", "--package-only"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));

    let heads = git(repo.remote(), &["branch", "--list", "agent/task-T2"]).expect("branches");
    assert!(heads.contains("agent/task-T2"), "remote heads: {heads}");

    // A second run sees the published lock.
    git(repo.root(), &["checkout", "main"]).expect("back to main");
    let output = dispatcher(&repo, &["dispatch"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Task is locked"));
}

#[test]
fn fixed_strategy_reads_configured_tracker() {
    let repo = TestRepo::new().expect("repo");
    repo.write_tracker(".jules/tracker.json", &build_tracker())
        .expect("tracker");
    std::fs::write(
        repo.root().join("dispatcher.toml"),
        "strategy = \"fixed\"\nagent_name = \"jules\"\nbase_branch = \"main\"\n",
    )
    .expect("config");

    let output = dispatcher(&repo, &["dispatch", "--package-only"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let package: TaskPackage = serde_json::from_slice(&output.stdout).expect("package json");
    assert_eq!(package.branch, "jules/task-T2");
}

#[test]
fn invalid_config_exits_failure() {
    let repo = TestRepo::new().expect("repo");
    std::fs::write(repo.root().join("dispatcher.toml"), "strategy = \"fixed\"\n")
        .expect("config");

    let output = dispatcher(&repo, &["dispatch"]);
    assert_eq!(output.status.code(), Some(exit_codes::FAILURE));
}
