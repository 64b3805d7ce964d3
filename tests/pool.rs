//! Worker pool integration tests: dedup, draining, ordering, crash recovery,
//! shutdown.

mod common;

use common::{heic_fixture, pool, Behaviour, StubStrategy, STUB_JPEG};
use edgequake_heic::{
    ConversionFailure, ConversionProgressCallback, ConverterConfig, OutputLayout, Pipeline,
    Submission, WorkerPool,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn pending(s: Submission) -> edgequake_heic::ConversionHandle {
    match s {
        Submission::Pending(h) => h,
        Submission::Cached(p) => panic!("expected a pending task, got cached {}", p.display()),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_share_one_execution() {
    let dir = tempfile::tempdir().unwrap();
    let src = heic_fixture(dir.path(), "IMG_0001.HEIC");
    let stub = StubStrategy::new(Behaviour::Succeed, Duration::from_millis(150));
    let pool = Arc::new(pool(dir.path(), 2, stub.clone()));

    let mut joins = Vec::new();
    for _ in 0..10 {
        let pool = pool.clone();
        let src = src.clone();
        joins.push(tokio::spawn(async move {
            pending(pool.submit(&src, None).unwrap()).wait().await
        }));
    }

    let mut outcomes = Vec::new();
    for j in joins {
        outcomes.push(j.await.unwrap());
    }

    assert_eq!(stub.calls(), 1, "exactly one pipeline execution");
    let first = outcomes[0].clone().unwrap();
    assert!(outcomes.iter().all(|o| o.as_ref() == Ok(&first)));
    assert_eq!(std::fs::read(&first).unwrap(), STUB_JPEG);

    pool.shutdown().await;
}

#[tokio::test]
async fn waiters_are_notified_once_in_registration_order() {
    let dir = tempfile::tempdir().unwrap();
    let src = heic_fixture(dir.path(), "IMG_0002.HEIC");
    let stub = StubStrategy::new(Behaviour::Succeed, Duration::from_millis(50));
    let pool = pool(dir.path(), 1, stub.clone());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut handle = None;
    for i in 0..4 {
        let seen = seen.clone();
        let sub = pool
            .submit(&src, Some(Box::new(move |o| seen.lock().unwrap().push((i, o.is_ok())))))
            .unwrap();
        handle = Some(pending(sub));
    }

    handle.unwrap().wait().await.unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(0, true), (1, true), (2, true), (3, true)]
    );
    assert_eq!(stub.calls(), 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn queue_drains_with_bounded_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let stub = StubStrategy::new(Behaviour::Succeed, Duration::from_millis(40));
    let pool = pool(dir.path(), 2, stub.clone());

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let src = heic_fixture(dir.path(), &format!("IMG_{i}.HEIC"));
            pending(pool.submit(&src, None).unwrap())
        })
        .collect();

    let stats = pool.stats();
    assert_eq!(stats.workers, 2);
    assert_eq!(stats.busy_workers, 2);
    assert_eq!(stats.queued, 4);

    for h in &handles {
        assert!(h.wait().await.is_ok());
    }

    assert_eq!(stub.calls(), 6);
    assert!(stub.max_active() <= 2, "max_active = {}", stub.max_active());
    let stats = pool.stats();
    assert_eq!(stats.dispatched, 6);
    assert_eq!(stats.cached, 6);
    assert_eq!((stats.queued, stats.running, stats.busy_workers), (0, 0, 0));

    pool.shutdown().await;
}

#[tokio::test]
async fn single_worker_runs_tasks_in_submission_order() {
    let dir = tempfile::tempdir().unwrap();
    let stub = StubStrategy::new(Behaviour::Succeed, Duration::from_millis(5));
    let pool = pool(dir.path(), 1, stub.clone());

    let sources: Vec<PathBuf> = ["c.heic", "a.heic", "b.heic", "d.heic"]
        .iter()
        .map(|n| heic_fixture(dir.path(), n))
        .collect();
    let handles: Vec<_> = sources
        .iter()
        .map(|s| pending(pool.submit(s, None).unwrap()))
        .collect();
    for h in &handles {
        h.wait().await.unwrap();
    }

    assert_eq!(stub.started(), sources);
    pool.shutdown().await;
}

#[tokio::test]
async fn crashed_worker_fails_its_task_and_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let bad = heic_fixture(dir.path(), "crash.heic");
    let good = heic_fixture(dir.path(), "fine.heic");
    let stub = StubStrategy::new(Behaviour::Succeed, Duration::from_millis(5));
    let pool = pool(dir.path(), 1, stub.clone());

    let bad_h = pending(pool.submit(&bad, None).unwrap());
    let good_h = pending(pool.submit(&good, None).unwrap());

    match bad_h.wait().await {
        Err(ConversionFailure::WorkerCrashed { detail, .. }) => {
            assert!(detail.contains("stub crashed"), "{detail}")
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert!(good_h.wait().await.is_ok(), "queue keeps draining after a crash");
    assert_eq!(pool.stats().workers, 1, "capacity restored");

    pool.shutdown().await;
}

#[tokio::test]
async fn failures_are_delivered_and_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let src = heic_fixture(dir.path(), "broken.heic");
    let stub = StubStrategy::new(Behaviour::Fail, Duration::from_millis(5));
    let pool = pool(dir.path(), 1, stub.clone());

    let got = Arc::new(Mutex::new(None));
    let g = got.clone();
    let h = pending(
        pool.submit(&src, Some(Box::new(move |o| *g.lock().unwrap() = Some(o.clone()))))
            .unwrap(),
    );
    let outcome = h.wait().await;
    assert!(matches!(
        outcome,
        Err(ConversionFailure::AllStrategiesFailed { .. })
    ));
    assert_eq!(*got.lock().unwrap(), Some(outcome));

    // A later request retries instead of replaying the failure.
    let again = pending(pool.submit(&src, None).unwrap());
    assert!(again.wait().await.is_err());
    assert_eq!(stub.calls(), 2);
    assert_eq!(pool.stats().cached, 0);

    pool.shutdown().await;
}

#[tokio::test]
async fn shutdown_finishes_running_and_cancels_queued() {
    let dir = tempfile::tempdir().unwrap();
    let stub = StubStrategy::new(Behaviour::Succeed, Duration::from_millis(100));
    let pool = pool(dir.path(), 1, stub.clone());

    let notified = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for name in ["first.heic", "second.heic", "third.heic"] {
        let src = heic_fixture(dir.path(), name);
        let n = notified.clone();
        let sub = pool
            .submit(&src, Some(Box::new(move |o| n.lock().unwrap().push(o.is_ok()))))
            .unwrap();
        handles.push(pending(sub));
    }

    pool.shutdown().await;

    assert!(handles[0].peek().unwrap().is_ok(), "running task completes");
    for h in &handles[1..] {
        assert!(matches!(
            h.peek(),
            Some(Err(ConversionFailure::PoolUnavailable { .. }))
        ));
    }
    let mut seen = notified.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec![false, false, true], "every waiter called once");
    assert_eq!(stub.calls(), 1);
}

/// Progress sink that blows up the first time a task completes.
#[derive(Default)]
struct FlakyProgress {
    fired: AtomicBool,
}

impl ConversionProgressCallback for FlakyProgress {
    fn on_task_complete(&self, _source: &Path, _output: &Path) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            panic!("progress sink failed");
        }
    }
}

#[tokio::test]
async fn panicking_progress_callback_does_not_wedge_the_pool() {
    let dir = tempfile::tempdir().unwrap();
    let stub = StubStrategy::new(Behaviour::Succeed, Duration::from_millis(10));
    let cfg = ConverterConfig::builder()
        .work_dir(dir.path().join("work"))
        .workers(1)
        .progress_callback(Arc::new(FlakyProgress::default()))
        .build()
        .unwrap();
    let pool = WorkerPool::new(
        Arc::new(Pipeline::new(vec![stub.clone()])),
        OutputLayout::new(&cfg.work_dir),
        &cfg,
    );

    let a = pending(pool.submit(&heic_fixture(dir.path(), "a.heic"), None).unwrap());
    let b = pending(pool.submit(&heic_fixture(dir.path(), "b.heic"), None).unwrap());

    let limit = Duration::from_secs(5);
    let a_out = tokio::time::timeout(limit, a.wait()).await.expect("a hung");
    assert_eq!(std::fs::read(a_out.unwrap()).unwrap(), STUB_JPEG);
    assert!(tokio::time::timeout(limit, b.wait()).await.expect("b hung").is_ok());

    // Later work is still served.
    let c = pending(pool.submit(&heic_fixture(dir.path(), "c.heic"), None).unwrap());
    assert!(tokio::time::timeout(limit, c.wait()).await.expect("c hung").is_ok());

    let stats = pool.stats();
    assert_eq!((stats.busy_workers, stats.running, stats.cached), (0, 0, 3));
    assert_eq!(stub.calls(), 3);

    pool.shutdown().await;
}
