//! Synchronization pipeline against local repositories

use forksync::app::shutdown::ShutdownSignal;
use forksync::errors::SyncError;
use forksync::models::checkpoint::CheckpointLabel;
use forksync::models::run::{GitOutcome, Stage, UpdateRun};

use crate::support::{git, has_git, settings, state, Fixture};

#[tokio::test]
async fn test_update_merges_and_pushes() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("chat");
    let before = fx.head();
    let upstream = fx.upstream_commit("feature.txt", "new upstream feature\n");

    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), vec![fx.project()], ShutdownSignal::never());
    let mut run = UpdateRun::new("chat");
    state
        .synchronizer(false)
        .sync(&fx.project(), &mut run, "run-1")
        .await
        .unwrap();

    assert_eq!(run.git, GitOutcome::Pushed);
    assert_eq!(run.labels(), CheckpointLabel::PIPELINE.to_vec());
    assert_eq!(run.before_revision.as_deref(), Some(before.as_str()));
    assert_eq!(run.after_revision.as_deref(), Some(upstream.as_str()));
    assert_eq!(run.files_changed, 1);
    assert_eq!(fx.origin_head(), upstream);
    assert_eq!(fx.read("feature.txt"), "new upstream feature\n");

    // Sequence numbers are contiguous and the backup bundle is attached
    let stored = state.store.list("chat").await.unwrap();
    let seqs: Vec<u64> = stored.iter().map(|c| c.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    assert!(stored[0].bundle.is_some());
    assert_eq!(stored[0].revision, before);
    assert_eq!(stored[0].metadata["run_id"], "run-1");
}

#[tokio::test]
async fn test_second_update_is_up_to_date() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("chat");
    fx.upstream_commit("feature.txt", "x\n");

    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), vec![fx.project()], ShutdownSignal::never());
    let sync = state.synchronizer(false);

    let mut first = UpdateRun::new("chat");
    sync.sync(&fx.project(), &mut first, "run-1").await.unwrap();
    let mut second = UpdateRun::new("chat");
    sync.sync(&fx.project(), &mut second, "run-2").await.unwrap();

    assert_eq!(second.git, GitOutcome::Pushed);
    assert_eq!(second.files_changed, 0);
    assert_eq!(second.before_revision, second.after_revision);
    assert_eq!(second.checkpoints.first().unwrap().seq, 6);
}

#[tokio::test]
async fn test_dirty_tree_is_refused() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("chat");
    std::fs::write(fx.work.join("app.txt"), "edited locally\n").unwrap();

    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), vec![fx.project()], ShutdownSignal::never());
    let mut run = UpdateRun::new("chat");
    let err = state
        .synchronizer(false)
        .sync(&fx.project(), &mut run, "run-1")
        .await
        .unwrap_err();

    match err {
        SyncError::DirtyWorkingTree { project, files } => {
            assert_eq!(project, "chat");
            assert!(files.iter().any(|f| f.ends_with("app.txt")));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(run.stage, Stage::Preconditions);
    assert!(state.store.list("chat").await.unwrap().is_empty());
    assert_eq!(fx.read("app.txt"), "edited locally\n");
}

#[tokio::test]
async fn test_auto_stash_keeps_local_edits() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("chat");
    let upstream = fx.upstream_commit("feature.txt", "x\n");
    std::fs::write(fx.work.join("README.md"), "# local notes\n").unwrap();

    let project = forksync::registry::project::Project {
        auto_stash: true,
        ..fx.project()
    };
    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), vec![project.clone()], ShutdownSignal::never());
    let mut run = UpdateRun::new("chat");
    state.synchronizer(false).sync(&project, &mut run, "run-1").await.unwrap();

    assert_eq!(fx.origin_head(), upstream);
    assert_eq!(fx.read("README.md"), "# local notes\n");
    let after_fetch = state.store.get("chat", CheckpointLabel::AfterFetch).await.unwrap();
    assert_eq!(after_fetch.metadata["stashed"], true);
}

#[tokio::test]
async fn test_missing_origin_is_a_config_error() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("chat");
    let project = forksync::registry::project::Project {
        origin_url: None,
        ..fx.project()
    };

    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), vec![project.clone()], ShutdownSignal::never());
    let mut run = UpdateRun::new("chat");
    let err = state
        .synchronizer(false)
        .sync(&project, &mut run, "run-1")
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::ConfigError(_)));
    assert!(run.checkpoints.is_empty());
    assert!(state.store.list("chat").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_text_conflict_takes_upstream_version() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("chat");
    fx.local_commit("app.txt", "version = local\n");
    fx.upstream_commit("app.txt", "version = 2\n");

    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), vec![fx.project()], ShutdownSignal::never());
    let mut run = UpdateRun::new("chat");
    state
        .synchronizer(false)
        .sync(&fx.project(), &mut run, "run-1")
        .await
        .unwrap();

    assert_eq!(fx.read("app.txt"), "version = 2\n");
    assert_eq!(fx.origin_head(), fx.head());
    assert!(run.events.iter().any(|e| e.message.contains("app.txt")));

    let merge = state.store.get("chat", CheckpointLabel::AfterMerge).await.unwrap();
    assert_eq!(merge.metadata["conflicts_resolved"][0], "app.txt");
}

#[tokio::test]
async fn test_conflict_without_auto_merge_aborts() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("chat");
    let local = fx.local_commit("app.txt", "version = local\n");
    fx.upstream_commit("app.txt", "version = 2\n");

    let mut settings = settings();
    settings.general.auto_merge_conflicts = false;
    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings, vec![fx.project()], ShutdownSignal::never());
    let mut run = UpdateRun::new("chat");
    let err = state
        .synchronizer(false)
        .sync(&fx.project(), &mut run, "run-1")
        .await
        .unwrap_err();

    match err {
        SyncError::MergeConflict { files } => assert_eq!(files, vec!["app.txt".to_string()]),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(run.stage, Stage::Merge);
    assert_eq!(
        run.labels(),
        vec![
            CheckpointLabel::BeforeUpdate,
            CheckpointLabel::AfterRemoteSetup,
            CheckpointLabel::AfterFetch
        ]
    );
    assert_eq!(fx.head(), local);
    assert_eq!(fx.read("app.txt"), "version = local\n");
    assert!(git(&fx.work, &["status", "--porcelain", "--untracked-files=no"]).is_empty());
}

#[tokio::test]
async fn test_binary_conflict_needs_manual_resolution() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("chat");
    let local = fx.local_commit("logo.bin", "PNG\0local");
    fx.upstream_commit("logo.bin", "PNG\0upstream");

    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), vec![fx.project()], ShutdownSignal::never());
    let mut run = UpdateRun::new("chat");
    let err = state
        .synchronizer(false)
        .sync(&fx.project(), &mut run, "run-1")
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::MergeConflict { ref files } if files == &vec!["logo.bin".to_string()]));
    assert_eq!(fx.head(), local);
}

#[tokio::test]
async fn test_push_rejection_stops_after_merge() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("chat");
    let fork = fx.origin_commit("fork.txt", "someone else pushed\n");
    fx.upstream_commit("feature.txt", "x\n");

    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), vec![fx.project()], ShutdownSignal::never());
    let mut run = UpdateRun::new("chat");
    let err = state
        .synchronizer(false)
        .sync(&fx.project(), &mut run, "run-1")
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::PushRejected(_)), "{:?}", err);
    assert_eq!(run.stage, Stage::Push);
    assert_eq!(run.git, GitOutcome::NotStarted);
    assert_eq!(run.reached().unwrap().label, CheckpointLabel::AfterMerge);
    assert_eq!(fx.origin_head(), fork);
}

#[tokio::test]
async fn test_force_push_overwrites_fork() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("chat");
    fx.origin_commit("fork.txt", "someone else pushed\n");
    let upstream = fx.upstream_commit("feature.txt", "x\n");

    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), vec![fx.project()], ShutdownSignal::never());
    let mut run = UpdateRun::new("chat");

    // --force-with-lease compares against the remote-tracking ref
    git(&fx.work, &["fetch", "-q", "origin"]);
    state
        .synchronizer(true)
        .sync(&fx.project(), &mut run, "run-1")
        .await
        .unwrap();

    assert_eq!(fx.origin_head(), upstream);
    let push = state.store.get("chat", CheckpointLabel::AfterPush).await.unwrap();
    assert_eq!(push.metadata["forced"], true);
}

#[tokio::test]
async fn test_update_switches_to_configured_branch() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("chat");
    git(&fx.work, &["checkout", "-q", "-b", "feature"]);
    let feature = fx.local_commit("notes.txt", "feature work\n");
    let upstream = fx.upstream_commit("feature.txt", "x\n");

    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), vec![fx.project()], ShutdownSignal::never());
    let mut run = UpdateRun::new("chat");
    state
        .synchronizer(false)
        .sync(&fx.project(), &mut run, "run-1")
        .await
        .unwrap();

    assert_eq!(fx.branch(), "main");
    assert_eq!(fx.head(), upstream);
    assert_eq!(fx.origin_head(), upstream);
    assert_eq!(run.after_revision.as_deref(), Some(upstream.as_str()));
    assert!(run.events.iter().any(|e| e.message.contains("Switched from feature")));

    // The feature branch is left alone
    assert_eq!(git(&fx.work, &["rev-parse", "feature"]), feature);
    let merge = state.store.get("chat", CheckpointLabel::AfterMerge).await.unwrap();
    assert_eq!(merge.metadata["branch"], "main");
}

#[tokio::test]
async fn test_dirty_tree_on_other_branch_is_refused() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("chat");
    git(&fx.work, &["checkout", "-q", "-b", "feature"]);
    std::fs::write(fx.work.join("app.txt"), "edited locally\n").unwrap();
    fx.upstream_commit("feature.txt", "x\n");
    let origin_before = fx.origin_head();

    let project = forksync::registry::project::Project {
        auto_stash: true,
        ..fx.project()
    };
    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), vec![project.clone()], ShutdownSignal::never());
    let mut run = UpdateRun::new("chat");
    let err = state
        .synchronizer(false)
        .sync(&project, &mut run, "run-1")
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::ConfigError(_)), "{:?}", err);
    assert_eq!(fx.branch(), "feature");
    assert_eq!(fx.read("app.txt"), "edited locally\n");
    assert_eq!(fx.origin_head(), origin_before);
    assert!(state.store.list("chat").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_wrong_origin_is_corrected() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("chat");
    let wrong = fx.root.path().join("wrong.git").display().to_string();
    git(&fx.work, &["remote", "set-url", "origin", &wrong]);
    let upstream = fx.upstream_commit("feature.txt", "x\n");

    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), vec![fx.project()], ShutdownSignal::never());
    let mut run = UpdateRun::new("chat");
    state
        .synchronizer(false)
        .sync(&fx.project(), &mut run, "run-1")
        .await
        .unwrap();

    assert!(run
        .events
        .iter()
        .any(|e| e.message.starts_with("Corrected remote origin") && e.message.contains(&wrong)));
    assert_eq!(git(&fx.work, &["remote", "get-url", "origin"]), fx.origin.display().to_string());
    assert_eq!(fx.origin_head(), upstream);
}

#[tokio::test]
async fn test_separate_push_url_is_corrected() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("chat");
    let elsewhere = fx.root.path().join("elsewhere.git").display().to_string();
    git(&fx.work, &["config", "remote.origin.pushurl", &elsewhere]);
    let upstream = fx.upstream_commit("feature.txt", "x\n");

    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), vec![fx.project()], ShutdownSignal::never());
    let mut run = UpdateRun::new("chat");
    state
        .synchronizer(false)
        .sync(&fx.project(), &mut run, "run-1")
        .await
        .unwrap();

    assert!(run.events.iter().any(|e| e.message.starts_with("Corrected push URL of origin")));
    assert_eq!(
        git(&fx.work, &["remote", "get-url", "--push", "origin"]),
        fx.origin.display().to_string()
    );
    assert_eq!(fx.origin_head(), upstream);
}
