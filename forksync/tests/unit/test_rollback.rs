//! Rollback against local repositories

use forksync::app::shutdown::ShutdownSignal;
use forksync::errors::{ErrorKind, SyncError};
use forksync::models::checkpoint::CheckpointLabel;
use forksync::models::run::{GitOutcome, UpdateRun};
use forksync::rollback::engine::RollbackTarget;

use crate::support::{git, has_git, has_object, settings, state, Fixture};

#[tokio::test]
async fn test_rollback_restores_before_update_once() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("toolbox");
    let before = fx.head();
    fx.upstream_commit("feature.txt", "x\n");

    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), vec![fx.project()], ShutdownSignal::never());
    let mut run = UpdateRun::new("toolbox");
    state
        .synchronizer(false)
        .sync(&fx.project(), &mut run, "run-1")
        .await
        .unwrap();
    assert_ne!(fx.head(), before);

    let engine = state.rollback_engine(None);
    let mut first = UpdateRun::new("toolbox");
    let restored = engine
        .rollback(&fx.project(), RollbackTarget::default(), false, &mut first, "run-2")
        .await
        .unwrap();
    assert_eq!(restored.label, CheckpointLabel::BeforeUpdate);
    assert_eq!(fx.head(), before);
    assert!(!fx.work.join("feature.txt").exists());
    assert_eq!(first.git, GitOutcome::RolledBack);

    let ledger = state.store.ledger("toolbox").await.unwrap();
    assert_eq!(ledger.reverted_to, Some(restored.seq));
    let last = ledger.checkpoints.last().unwrap();
    assert_eq!(last.label, CheckpointLabel::AfterRollback);
    assert_eq!(last.revision, before);
    assert_eq!(last.metadata["restored_seq"], restored.seq);
    let count = ledger.checkpoints.len();

    // Same target again: nothing restored, nothing written
    let mut second = UpdateRun::new("toolbox");
    engine
        .rollback(&fx.project(), RollbackTarget::default(), false, &mut second, "run-3")
        .await
        .unwrap();
    assert_eq!(fx.head(), before);
    assert!(second.checkpoints.is_empty());
    assert_eq!(second.finish().status, forksync::models::run::RunStatus::RolledBack);
    assert_eq!(state.store.list("toolbox").await.unwrap().len(), count);
}

#[tokio::test]
async fn test_rollback_by_label_and_seq() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("toolbox");
    let before = fx.head();
    let merged = fx.upstream_commit("feature.txt", "x\n");

    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), vec![fx.project()], ShutdownSignal::never());
    let mut run = UpdateRun::new("toolbox");
    state
        .synchronizer(false)
        .sync(&fx.project(), &mut run, "run-1")
        .await
        .unwrap();

    let engine = state.rollback_engine(None);
    let mut first = UpdateRun::new("toolbox");
    engine
        .rollback(&fx.project(), RollbackTarget::Seq(1), false, &mut first, "run-2")
        .await
        .unwrap();
    assert_eq!(fx.head(), before);

    let mut second = UpdateRun::new("toolbox");
    let restored = engine
        .rollback(
            &fx.project(),
            RollbackTarget::Label(CheckpointLabel::AfterMerge),
            false,
            &mut second,
            "run-3",
        )
        .await
        .unwrap();
    assert_eq!(restored.revision, merged);
    assert_eq!(fx.head(), merged);
}

#[tokio::test]
async fn test_rollback_refuses_dirty_tree_without_force() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("toolbox");
    let before = fx.head();
    fx.upstream_commit("feature.txt", "x\n");

    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), vec![fx.project()], ShutdownSignal::never());
    let mut run = UpdateRun::new("toolbox");
    state
        .synchronizer(false)
        .sync(&fx.project(), &mut run, "run-1")
        .await
        .unwrap();
    std::fs::write(fx.work.join("app.txt"), "uncommitted\n").unwrap();

    let engine = state.rollback_engine(None);
    let mut refused = UpdateRun::new("toolbox");
    let err = engine
        .rollback(&fx.project(), RollbackTarget::default(), false, &mut refused, "run-2")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::RollbackConflict { .. }));
    assert_eq!(err.kind(), ErrorKind::RollbackConflictError);
    assert_eq!(fx.read("app.txt"), "uncommitted\n");

    let mut forced = UpdateRun::new("toolbox");
    engine
        .rollback(&fx.project(), RollbackTarget::default(), true, &mut forced, "run-3")
        .await
        .unwrap();
    assert_eq!(fx.head(), before);
    assert_eq!(fx.read("app.txt"), "version = 1\n");
}

#[tokio::test]
async fn test_rollback_without_checkpoints() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("toolbox");
    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), vec![fx.project()], ShutdownSignal::never());

    let mut run = UpdateRun::new("toolbox");
    let err = state
        .rollback_engine(None)
        .rollback(&fx.project(), RollbackTarget::default(), false, &mut run, "run-1")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CheckpointNotFoundError);
}

#[tokio::test]
async fn test_rollback_to_after_rollback_is_invalid() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("toolbox");
    fx.upstream_commit("feature.txt", "x\n");

    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), vec![fx.project()], ShutdownSignal::never());
    let mut run = UpdateRun::new("toolbox");
    state
        .synchronizer(false)
        .sync(&fx.project(), &mut run, "run-1")
        .await
        .unwrap();

    let engine = state.rollback_engine(None);
    let mut first = UpdateRun::new("toolbox");
    engine
        .rollback(&fx.project(), RollbackTarget::default(), false, &mut first, "run-2")
        .await
        .unwrap();
    let after_rollback = first.reached().unwrap().seq;

    let err = engine
        .resolve("toolbox", RollbackTarget::Seq(after_rollback))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidRollbackTarget(_)));
}

#[tokio::test]
async fn test_rollback_restores_lost_commit_from_bundle() {
    if !has_git() {
        return;
    }
    let fx = Fixture::new("toolbox");
    let local = fx.local_commit("local.txt", "only here\n");
    fx.origin_commit("fork.txt", "diverged\n");
    fx.upstream_commit("feature.txt", "x\n");

    let home = tempfile::tempdir().unwrap();
    let state = state(home.path(), settings(), vec![fx.project()], ShutdownSignal::never());

    // The push is rejected, so the local commit only lives in this clone
    let mut run = UpdateRun::new("toolbox");
    let err = state
        .synchronizer(false)
        .sync(&fx.project(), &mut run, "run-1")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::PushRejected(_)));
    let before_update = state.store.get("toolbox", CheckpointLabel::BeforeUpdate).await.unwrap();
    assert_eq!(before_update.revision, local);
    assert!(before_update.bundle.is_some());

    git(&fx.work, &["reset", "-q", "--hard", "origin/main"]);
    let _ = std::fs::remove_file(fx.work.join(".git").join("ORIG_HEAD"));
    git(&fx.work, &["reflog", "expire", "--expire=now", "--all"]);
    git(&fx.work, &["gc", "-q", "--prune=now"]);
    assert!(!has_object(&fx.work, &local));

    let mut rollback = UpdateRun::new("toolbox");
    let restored = state
        .rollback_engine(None)
        .rollback(&fx.project(), RollbackTarget::default(), false, &mut rollback, "run-2")
        .await
        .unwrap();
    assert_eq!(restored.seq, before_update.seq);
    assert_eq!(fx.head(), local);
    assert_eq!(fx.read("local.txt"), "only here\n");
}
