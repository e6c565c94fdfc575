//! Batch scheduling and maintenance

use chrono::{Duration, Utc};

use forksync::app::options::RunOptions;
use forksync::app::run::Orchestrator;
use forksync::app::shutdown::{self, ShutdownSignal};
use forksync::errors::ErrorKind;
use forksync::maintenance::cleanup::cleanup;
use forksync::models::checkpoint::CheckpointLabel;
use forksync::models::run::{GitOutcome, RunMode, RunStatus, Stage};
use forksync::registry::project::{Hook, HookPhase, Project};

use crate::support::{has_git, settings, state, Fixture};

fn options(mode: RunMode) -> RunOptions {
    RunOptions {
        mode,
        max_workers: 2,
        ..RunOptions::default()
    }
}

fn summary(report: &forksync::models::run::RunReport) -> Vec<(String, RunStatus, Vec<CheckpointLabel>)> {
    report
        .runs
        .iter()
        .map(|r| (r.project.clone(), r.status, r.labels()))
        .collect()
}

/// Two healthy projects and one that fails with a push rejection
fn batch() -> (Fixture, Fixture, Fixture, Vec<Project>) {
    let chat = Fixture::new("chat");
    chat.upstream_commit("feature.txt", "chat\n");
    let toolbox = Fixture::new("toolbox");
    toolbox.upstream_commit("feature.txt", "toolbox\n");
    let broken = Fixture::new("broken");
    broken.origin_commit("fork.txt", "diverged\n");
    broken.upstream_commit("feature.txt", "broken\n");
    let projects = vec![chat.project(), broken.project(), toolbox.project()];
    (chat, toolbox, broken, projects)
}

#[tokio::test]
async fn test_parallel_matches_sequential() {
    if !has_git() {
        return;
    }

    let mut reports = Vec::new();
    for mode in [RunMode::Sequential, RunMode::Parallel] {
        let (_chat, _toolbox, _broken, projects) = batch();
        let home = tempfile::tempdir().unwrap();
        let state = state(home.path(), settings(), projects, ShutdownSignal::never());
        let report = Orchestrator::new(state, None, options(mode))
            .update(None)
            .await
            .unwrap();
        assert_eq!(report.mode, mode);
        reports.push(report);
    }

    let sequential = summary(&reports[0]);
    assert_eq!(sequential, summary(&reports[1]));
    let names: Vec<&str> = sequential.iter().map(|(n, _, _)| n.as_str()).collect();
    assert_eq!(names, vec!["chat", "broken", "toolbox"]);
    assert_eq!(sequential[0].1, RunStatus::Success);
    assert_eq!(sequential[1].1, RunStatus::Failed);
    assert_eq!(sequential[2].1, RunStatus::Success);

    let broken = reports[1].run("broken").unwrap();
    assert_eq!(broken.error.as_ref().unwrap().kind, ErrorKind::PushRejectedError);
    assert_eq!(broken.stage, Stage::Push);
}

#[tokio::test]
async fn test_fail_fast_skips_remaining_projects() {
    if !has_git() {
        return;
    }
    let (_chat, toolbox, _broken, projects) = batch();
    let toolbox_head = toolbox.head();
    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), projects, ShutdownSignal::never());

    let options = RunOptions {
        fail_fast: true,
        ..options(RunMode::Sequential)
    };
    let report = Orchestrator::new(state, None, options).update(Some("all")).await.unwrap();

    assert_eq!(report.runs.len(), 3);
    let skipped = report.run("toolbox").unwrap();
    assert_eq!(skipped.error.as_ref().unwrap().kind, ErrorKind::CancelledError);
    assert!(skipped.checkpoints.is_empty());
    assert_eq!(toolbox.head(), toolbox_head);
}

#[tokio::test]
async fn test_rejected_project_is_reported() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("chat");
    let twin = Project {
        name: "chat-copy".to_string(),
        ..fx.project()
    };

    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), vec![fx.project(), twin], ShutdownSignal::never());
    let report = Orchestrator::new(state.clone(), None, options(RunMode::Sequential))
        .update(None)
        .await
        .unwrap();

    assert_eq!(report.runs.len(), 2);
    assert_eq!(report.run("chat").unwrap().status, RunStatus::Success);
    let rejected = report.run("chat-copy").unwrap();
    assert_eq!(rejected.status, RunStatus::Failed);
    assert_eq!(rejected.stage, Stage::Config);
    assert_eq!(rejected.error.as_ref().unwrap().kind, ErrorKind::ConfigError);
    assert!(!report.all_succeeded());

    // The report is kept for `status`
    let last = state.history.last().await.unwrap().unwrap();
    assert_eq!(last.run_id, report.run_id);
}

#[tokio::test]
async fn test_unknown_selector_fails_without_touching_anything() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("chat");
    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), vec![fx.project()], ShutdownSignal::never());

    let report = Orchestrator::new(state.clone(), None, options(RunMode::Sequential))
        .update(Some("nope"))
        .await
        .unwrap();
    assert_eq!(report.runs.len(), 1);
    assert_eq!(report.runs[0].status, RunStatus::Failed);
    assert!(state.store.list("chat").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_required_post_hook_failure_rolls_back() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("chat");
    let before = fx.head();
    fx.upstream_commit("feature.txt", "x\n");
    let project = fx.project_with_hooks(vec![Hook {
        phase: HookPhase::Post,
        command: "exit 3".to_string(),
        required: true,
    }]);

    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), vec![project], ShutdownSignal::never());
    let report = Orchestrator::new(state.clone(), None, options(RunMode::Sequential))
        .update(Some("chat"))
        .await
        .unwrap();

    let run = report.run("chat").unwrap();
    assert_eq!(run.status, RunStatus::RolledBack);
    assert_eq!(run.git, GitOutcome::RolledBack);
    assert_eq!(run.error.as_ref().unwrap().kind, ErrorKind::HookError);
    assert_eq!(run.reached().unwrap().label, CheckpointLabel::AfterRollback);
    assert_eq!(fx.head(), before);
}

#[tokio::test]
async fn test_optional_hook_failure_degrades() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("chat");
    let project = fx.project_with_hooks(vec![Hook {
        phase: HookPhase::Pre,
        command: "echo broken >&2; exit 1".to_string(),
        required: false,
    }]);

    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), vec![project], ShutdownSignal::never());
    let report = Orchestrator::new(state, None, options(RunMode::Sequential))
        .update(None)
        .await
        .unwrap();

    let run = report.run("chat").unwrap();
    assert_eq!(run.status, RunStatus::PartialFailure);
    assert!(run.degraded);
    assert_eq!(run.git, GitOutcome::Pushed);
}

#[tokio::test]
async fn test_cancelled_batch_starts_nothing() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("chat");
    let (trigger, signal) = shutdown::channel();
    trigger.cancel();

    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), vec![fx.project()], signal);
    for mode in [RunMode::Sequential, RunMode::Parallel] {
        let report = Orchestrator::new(state.clone(), None, options(mode))
            .update(None)
            .await
            .unwrap();
        let run = report.run("chat").unwrap();
        assert_eq!(run.error.as_ref().unwrap().kind, ErrorKind::CancelledError);
        assert!(run.checkpoints.is_empty());
    }
}

#[tokio::test]
async fn test_cleanup_keeps_latest_before_update() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("chat");
    fx.upstream_commit("one.txt", "1\n");

    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), vec![fx.project()], ShutdownSignal::never());
    let orchestrator = Orchestrator::new(state.clone(), None, options(RunMode::Sequential));
    orchestrator.update(None).await.unwrap();
    fx.upstream_commit("two.txt", "2\n");
    orchestrator.update(None).await.unwrap();
    assert_eq!(state.store.list("chat").await.unwrap().len(), 10);

    let later = Utc::now() + Duration::days(365);
    let report = cleanup(&state, None, later).await.unwrap();
    assert_eq!(report.checkpoints_removed, 9);
    assert_eq!(report.bundles_removed, 1);
    assert!(report.errors.is_empty());

    let kept = state.store.list("chat").await.unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].label, CheckpointLabel::BeforeUpdate);
    assert_eq!(kept[0].seq, 6);

    // Repeating changes nothing
    let again = cleanup(&state, None, later).await.unwrap();
    assert!(!again.removed_anything());
    assert_eq!(state.store.list("chat").await.unwrap().len(), 1);
}
