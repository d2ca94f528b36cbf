//! Concurrency tests for watch arming, superseding and cancellation.

use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use livemark_core::{
    DocumentFilter, EventBus, FileIndexWalker, IgnoreRules, PathBoundary, SessionCorrelator,
    WatchConfig, WatchError, WatchRole, WatchSupervisor, Whitelist,
};
use tempfile::TempDir;
use tokio::task::JoinSet;

fn supervisor(home: &std::path::Path) -> Arc<WatchSupervisor> {
    let walker = FileIndexWalker::new(
        Arc::new(PathBoundary::new(home).unwrap()),
        Arc::new(IgnoreRules::new()),
        DocumentFilter::default(),
    );
    Arc::new(WatchSupervisor::new(
        walker,
        Arc::new(Whitelist::new()),
        Arc::new(EventBus::new()),
        Arc::new(SessionCorrelator::new()),
        WatchConfig::default(),
    ))
}

/// Polls until the running-loop count reaches `expected`, returning the
/// time it took, or `None` after two seconds.
async fn settle(supervisor: &WatchSupervisor, expected: usize) -> Option<Duration> {
    let started = Instant::now();
    while started.elapsed() < Duration::from_secs(2) {
        if supervisor.running_loops() == expected {
            return Some(started.elapsed());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    None
}

fn tree(width: usize) -> TempDir {
    let home = TempDir::new().unwrap();
    for i in 0..width {
        let dir = home.path().join(format!("d{i}/nested"));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("doc.md"), "# doc").unwrap();
    }
    home
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_arms_leave_one_active_loop() {
    let home = tree(20);
    let supervisor = supervisor(home.path());

    let mut arms = JoinSet::new();
    for _ in 0..8 {
        let supervisor = Arc::clone(&supervisor);
        let root = home.path().to_path_buf();
        arms.spawn(async move { supervisor.arm_directory(&root).await });
    }

    let mut armed = 0;
    let mut superseded = 0;
    while let Some(result) = arms.join_next().await {
        match result.unwrap() {
            Ok(()) => armed += 1,
            Err(WatchError::Superseded(WatchRole::Directory)) => superseded += 1,
            Err(e) => panic!("unexpected arm failure: {e}"),
        }
    }

    assert!(armed >= 1);
    assert_eq!(armed + superseded, 8);
    assert!(supervisor.is_active(WatchRole::Directory));
    assert!(settle(&supervisor, 1).await.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_during_arm_supersedes_it() {
    let home = tree(50);
    let supervisor = supervisor(home.path());

    let arming = {
        let supervisor = Arc::clone(&supervisor);
        let root = home.path().to_path_buf();
        tokio::spawn(async move { supervisor.arm_directory(&root).await })
    };
    supervisor.close_directory();

    // Either the close landed during enumeration, or the arm completed
    // first and was then closed. Both end with nothing running.
    match arming.await.unwrap() {
        Ok(()) | Err(WatchError::Superseded(_)) => {}
        Err(e) => panic!("unexpected arm failure: {e}"),
    }
    supervisor.close_directory();
    assert!(!supervisor.is_active(WatchRole::Directory));
    assert!(settle(&supervisor, 0).await.is_some());
}

#[tokio::test]
async fn cancellation_is_prompt() {
    let home = tree(3);
    let supervisor = supervisor(home.path());
    supervisor.arm_directory(home.path()).await.unwrap();
    supervisor
        .arm_file(&home.path().join("d0/nested/doc.md"))
        .await
        .unwrap();
    assert_eq!(supervisor.running_loops(), 2);

    supervisor.close();
    let elapsed = settle(&supervisor, 0).await.expect("loops did not stop");
    assert!(elapsed < Duration::from_millis(500), "took {elapsed:?}");
}

#[tokio::test]
async fn file_and_directory_roles_are_independent() {
    let home = tree(2);
    let supervisor = supervisor(home.path());
    supervisor.arm_directory(home.path()).await.unwrap();
    supervisor
        .arm_file(&home.path().join("d1/nested/doc.md"))
        .await
        .unwrap();

    supervisor.close_file();
    assert!(supervisor.is_active(WatchRole::Directory));
    assert!(!supervisor.is_active(WatchRole::File));
    assert!(settle(&supervisor, 1).await.is_some());
}
