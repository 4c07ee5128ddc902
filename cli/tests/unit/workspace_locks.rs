//! Per-workspace single-flight locking across tasks and lock sets.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use spotdeploy_cli::application::services::locks::KeyedLocks;
use spotdeploy_cli::domain::identity::WorkspaceIdentity;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn same_workspace_never_runs_concurrently() {
    let dir = tempfile::TempDir::new().unwrap_or_else(|e| panic!("tempdir: {e}"));
    // one lock set per simulated process, all sharing the state directory
    let sets: Vec<Arc<KeyedLocks>> = (0..2)
        .map(|_| Arc::new(KeyedLocks::in_dir(dir.path().join("locks"))))
        .collect();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = ["Blog", "blog", "BLOG", "blog"]
        .into_iter()
        .enumerate()
        .map(|(i, workspace)| {
            let locks = sets[i % sets.len()].clone();
            let (active, peak) = (active.clone(), peak.clone());
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                let _guard = locks
                    .lock(&WorkspaceIdentity::new("alice", workspace), &cancel)
                    .await
                    .unwrap_or_else(|e| panic!("lock: {e}"));
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap_or_else(|e| panic!("task failed: {e}"));
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn different_workspaces_proceed_independently() {
    let dir = tempfile::TempDir::new().unwrap_or_else(|e| panic!("tempdir: {e}"));
    let locks = KeyedLocks::in_dir(dir.path());
    let cancel = CancellationToken::new();
    let _blog = locks
        .lock(&WorkspaceIdentity::new("alice", "blog"), &cancel)
        .await
        .unwrap_or_else(|e| panic!("lock: {e}"));
    let shop = tokio::time::timeout(
        Duration::from_secs(1),
        locks.lock(&WorkspaceIdentity::new("alice", "shop"), &cancel),
    )
    .await;
    assert!(matches!(shop, Ok(Ok(_))), "unrelated workspace was blocked");
}
