//! Task queue and worker pool.
//!
//! ## Architecture
//!
//! ```text
//!  submit() ──▶ [cache?] ──hit──▶ Cached(path)
//!                  │miss
//!                  ▼
//!            [in flight?] ──yes──▶ attach waiter, Pending(existing handle)
//!                  │no
//!                  ▼
//!            queue (FIFO) ──dispatch──▶ worker N ──job──▶ Pipeline::run
//!                                          │
//!            controller ◀──────report──────┘
//!              │ cache insert, free worker, resolve task, dispatch next
//! ```
//!
//! One `std::sync::Mutex` guards the queue, the task table, the worker busy
//! flags and the cache. "Check cache, check in-flight, enqueue" is therefore
//! a single atomic step, and a completed task is moved into the cache in the
//! same critical section that removes it from the task table; no request can
//! slip between the two and start a duplicate conversion.
//!
//! Nothing user-supplied ever runs under the lock. Waiters, handle
//! resolution and progress events are collected into a [`Deferred`] and run
//! after the guard is dropped. A panicking waiter or progress callback is
//! logged and skipped; it cannot take the controller down with it.
//!
//! Each job runs in its own spawned task. A panic inside a strategy is
//! caught at that boundary, reported as [`ConversionFailure::WorkerCrashed`],
//! and the worker is replaced.

use crate::cache::{reusable_output, ConversionCache};
use crate::config::ConverterConfig;
use crate::error::{ConversionFailure, HeicError};
use crate::notify::{self, ConversionHandle, ConversionOutcome, Resolver, Waiter, WaiterList};
use crate::paths::{normalize_source, OutputLayout};
use crate::pipeline::Pipeline;
use crate::progress::{ConversionProgressCallback, ProgressCallback};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::SendError, UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

/// Result of [`WorkerPool::submit`].
#[derive(Debug, Clone)]
pub enum Submission {
    /// A converted output already exists; nothing was queued.
    Cached(PathBuf),
    /// A task is queued or running (possibly one created by an earlier request).
    Pending(ConversionHandle),
}

/// Point-in-time counters, cheap to take.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Live workers.
    pub workers: usize,
    /// Workers currently running a job.
    pub busy_workers: usize,
    /// Tasks waiting for a worker.
    pub queued: usize,
    /// Tasks assigned to a worker and not yet finished.
    pub running: usize,
    /// Entries in the conversion cache.
    pub cached: usize,
    /// Jobs handed to workers since start.
    pub dispatched: u64,
}

/// Fixed-size pool of conversion workers with a shared FIFO queue.
///
/// Dropping the pool closes it (queued tasks fail with
/// [`ConversionFailure::PoolUnavailable`]); use [`WorkerPool::shutdown`] to
/// also wait for running jobs.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    pipeline: Arc<Pipeline>,
    layout: OutputLayout,
    worker_count: usize,
    reuse_existing: bool,
    progress: Option<ProgressCallback>,
    state: Mutex<PoolState>,
}

#[derive(Default)]
struct PoolState {
    started: bool,
    closed: bool,
    runtime: Option<Handle>,
    workers: Vec<WorkerSlot>,
    next_worker_id: usize,
    queue: VecDeque<PathBuf>,
    tasks: HashMap<PathBuf, Task>,
    cache: ConversionCache,
    report_tx: Option<UnboundedSender<Report>>,
    controller: Option<JoinHandle<()>>,
    /// Join handles of workers that exited after a crash.
    retired: Vec<JoinHandle<()>>,
    dispatched: u64,
}

struct WorkerSlot {
    id: usize,
    busy: bool,
    jobs: UnboundedSender<Job>,
    join: JoinHandle<()>,
}

struct Job {
    source: PathBuf,
    output: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskStatus {
    Queued,
    Assigned(usize),
}

struct Task {
    status: TaskStatus,
    handle: ConversionHandle,
    resolver: Resolver,
    waiters: WaiterList,
}

struct Report {
    worker: usize,
    source: PathBuf,
    outcome: ConversionOutcome,
    crashed: bool,
}

// ── Deferred side effects ────────────────────────────────────────────────────

enum Event {
    Queued(PathBuf, usize),
    Started(PathBuf, usize),
    Complete(PathBuf, PathBuf),
    Failed(PathBuf, String),
    CacheHit(PathBuf),
}

/// Work collected under the lock and executed after it is released.
#[derive(Default)]
struct Deferred {
    events: Vec<Event>,
    finished: Vec<(Task, ConversionOutcome)>,
    immediate: Vec<(Waiter, ConversionOutcome)>,
}

impl Deferred {
    fn finish(&mut self, source: PathBuf, task: Task, outcome: ConversionOutcome) {
        self.events.push(match &outcome {
            Ok(out) => Event::Complete(source, out.clone()),
            Err(e) => Event::Failed(source, e.to_string()),
        });
        self.finished.push((task, outcome));
    }

    fn run(self, progress: Option<&ProgressCallback>) {
        if let Some(cb) = progress {
            for event in &self.events {
                if catch_unwind(AssertUnwindSafe(|| event.emit(cb.as_ref()))).is_err() {
                    warn!("Progress callback panicked on {}; continuing", event.source().display());
                }
            }
        }
        // Waiters before the handle: whoever awaits the handle may rely on
        // every callback having run.
        for (task, outcome) in self.finished {
            task.waiters.notify(&outcome);
            task.resolver.resolve(outcome);
        }
        for (waiter, outcome) in self.immediate {
            let mut list = WaiterList::new();
            list.push(waiter);
            list.notify(&outcome);
        }
    }
}

impl Event {
    fn emit(&self, cb: &dyn ConversionProgressCallback) {
        match self {
            Event::Queued(s, n) => cb.on_task_queued(s, *n),
            Event::Started(s, w) => cb.on_task_started(s, *w),
            Event::Complete(s, o) => cb.on_task_complete(s, o),
            Event::Failed(s, e) => cb.on_task_failed(s, e),
            Event::CacheHit(s) => cb.on_cache_hit(s),
        }
    }

    fn source(&self) -> &Path {
        match self {
            Event::Queued(s, _)
            | Event::Started(s, _)
            | Event::Complete(s, _)
            | Event::Failed(s, _)
            | Event::CacheHit(s) => s,
        }
    }
}

// ── Public API ───────────────────────────────────────────────────────────────

impl WorkerPool {
    pub fn new(pipeline: Arc<Pipeline>, layout: OutputLayout, config: &ConverterConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                pipeline,
                layout,
                worker_count: config.workers.max(1),
                reuse_existing: config.reuse_existing_outputs,
                progress: config.progress_callback.clone(),
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    /// Spawn the workers on the current Tokio runtime.
    ///
    /// Idempotent. [`WorkerPool::submit`] starts the pool on first use, so
    /// calling this is only needed to surface [`HeicError::NoRuntime`] early.
    pub fn start(&self) -> Result<(), HeicError> {
        let mut st = self.inner.lock();
        self.inner.start_locked(&mut st)
    }

    /// Request a conversion of `source`.
    ///
    /// `waiter`, if given, is invoked exactly once with the outcome: right
    /// away for a cache hit or a rejected submission, otherwise when the
    /// (possibly shared) task finishes.
    pub fn submit(&self, source: &Path, waiter: Option<Waiter>) -> Result<Submission, HeicError> {
        let source = normalize_source(source);
        let mut deferred = Deferred::default();

        let result = {
            let mut st = self.inner.lock();
            self.inner.submit_locked(&mut st, source, waiter, &mut deferred)
        };

        deferred.run(self.inner.progress.as_ref());
        result
    }

    /// Cached output for `source`, without queueing anything.
    pub fn cached(&self, source: &Path) -> Option<PathBuf> {
        let source = normalize_source(source);
        self.inner.lock().cache.lookup(&source)
    }

    /// Forget the cached output for `source` and delete the file, so the
    /// next request converts again. Returns the forgotten path.
    pub fn invalidate(&self, source: &Path) -> Option<PathBuf> {
        let source = normalize_source(source);
        let forgotten = self.inner.lock().cache.invalidate(&source);
        if let Some(out) = &forgotten {
            if let Err(e) = std::fs::remove_file(out) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Cannot remove {}: {}", out.display(), e);
                }
            }
        }
        forgotten
    }

    pub fn stats(&self) -> PoolStats {
        let st = self.inner.lock();
        PoolStats {
            workers: st.workers.len(),
            busy_workers: st.workers.iter().filter(|w| w.busy).count(),
            queued: st.queue.len(),
            running: st
                .tasks
                .values()
                .filter(|t| matches!(t.status, TaskStatus::Assigned(_)))
                .count(),
            cached: st.cache.len(),
            dispatched: st.dispatched,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Stop accepting work, fail queued tasks, and wait for running jobs.
    ///
    /// Every outstanding waiter has been invoked when this returns.
    pub async fn shutdown(&self) {
        let (joins, controller) = self.inner.close();

        for join in joins {
            if let Err(e) = join.await {
                debug!("Worker join: {}", e);
            }
        }
        if let Some(controller) = controller {
            if let Err(e) = controller.await {
                warn!("Pool controller ended abnormally: {}", e);
            }
        }

        // Tasks whose worker vanished without reporting.
        let mut deferred = Deferred::default();
        {
            let mut st = self.inner.lock();
            for (source, task) in st.tasks.drain() {
                let failure = ConversionFailure::PoolUnavailable {
                    path: source.clone(),
                    reason: "worker stopped before reporting".into(),
                };
                deferred.finish(source, task, Err(failure));
            }
        }
        deferred.run(self.inner.progress.as_ref());
        info!("Worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let _ = self.inner.close();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker_count", &self.inner.worker_count)
            .field("stats", &self.stats())
            .finish()
    }
}

// ── Internals ────────────────────────────────────────────────────────────────

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Callbacks never run under this lock, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_locked(self: &Arc<Self>, st: &mut PoolState) -> Result<(), HeicError> {
        if st.closed {
            return Err(HeicError::PoolShutDown);
        }
        if st.started {
            return Ok(());
        }
        let runtime = Handle::try_current().map_err(|_| HeicError::NoRuntime)?;

        let (report_tx, report_rx) = mpsc::unbounded_channel();
        st.runtime = Some(runtime.clone());
        st.report_tx = Some(report_tx);
        for _ in 0..self.worker_count {
            if let Some(slot) = self.spawn_worker(st) {
                st.workers.push(slot);
            }
        }
        st.controller = Some(runtime.spawn(run_controller(Arc::clone(self), report_rx)));
        st.started = true;

        info!(
            "Worker pool started: {} workers, strategies {:?}",
            st.workers.len(),
            self.pipeline.strategy_names()
        );
        Ok(())
    }

    fn submit_locked(
        self: &Arc<Self>,
        st: &mut PoolState,
        source: PathBuf,
        waiter: Option<Waiter>,
        deferred: &mut Deferred,
    ) -> Result<Submission, HeicError> {
        if let Err(e) = self.start_locked(st) {
            if let Some(w) = waiter {
                let failure = ConversionFailure::PoolUnavailable {
                    path: source,
                    reason: e.to_string(),
                };
                deferred.immediate.push((w, Err(failure)));
            }
            return Err(e);
        }

        // ── Step 1: cache ────────────────────────────────────────────────────
        if let Some(out) = st.cache.lookup(&source) {
            return Ok(Self::cache_hit(source, out, waiter, deferred));
        }

        // ── Step 2: join an existing task ────────────────────────────────────
        if let Some(task) = st.tasks.get_mut(&source) {
            if let Some(w) = waiter {
                task.waiters.push(w);
            }
            debug!("{} already in flight; joined", source.display());
            return Ok(Submission::Pending(task.handle.clone()));
        }

        // ── Step 3: output left by a previous run ────────────────────────────
        let output = self.layout.converted_path(&source);
        if self.reuse_existing && reusable_output(&source, &output) {
            debug!("Reusing {} for {}", output.display(), source.display());
            st.cache.insert(source.clone(), output.clone());
            return Ok(Self::cache_hit(source, output, waiter, deferred));
        }

        // ── Step 4: new task ─────────────────────────────────────────────────
        let (resolver, handle) = notify::pending(source.clone());
        let mut waiters = WaiterList::new();
        if let Some(w) = waiter {
            waiters.push(w);
        }
        st.tasks.insert(
            source.clone(),
            Task {
                status: TaskStatus::Queued,
                handle: handle.clone(),
                resolver,
                waiters,
            },
        );
        st.queue.push_back(source.clone());
        deferred.events.push(Event::Queued(source, st.queue.len()));

        self.dispatch(st, deferred);
        Ok(Submission::Pending(handle))
    }

    fn cache_hit(
        source: PathBuf,
        output: PathBuf,
        waiter: Option<Waiter>,
        deferred: &mut Deferred,
    ) -> Submission {
        if let Some(w) = waiter {
            deferred.immediate.push((w, Ok(output.clone())));
        }
        deferred.events.push(Event::CacheHit(source));
        Submission::Cached(output)
    }

    /// Hand queued tasks to idle workers in FIFO order.
    fn dispatch(self: &Arc<Self>, st: &mut PoolState, deferred: &mut Deferred) {
        let mut replaced = HashSet::new();

        while let Some(idx) = st.workers.iter().position(|w| !w.busy) {
            let Some(source) = st.queue.pop_front() else {
                break;
            };
            let worker_id = st.workers[idx].id;
            let job = Job {
                output: self.layout.converted_path(&source),
                source: source.clone(),
            };

            if let Err(SendError(job)) = st.workers[idx].jobs.send(job) {
                // The worker task is gone (aborted or its runtime stopped).
                let fresh = if replaced.insert(idx) {
                    self.spawn_worker(st)
                } else {
                    None
                };
                match fresh {
                    Some(slot) => {
                        warn!("Worker {} is gone; replaced by worker {}", worker_id, slot.id);
                        let old = std::mem::replace(&mut st.workers[idx], slot);
                        st.retired.push(old.join);
                        st.queue.push_front(job.source);
                    }
                    None => {
                        if let Some(task) = st.tasks.remove(&job.source) {
                            let failure = ConversionFailure::PoolUnavailable {
                                path: job.source.clone(),
                                reason: "no worker could accept the task".into(),
                            };
                            deferred.finish(job.source, task, Err(failure));
                        }
                    }
                }
                continue;
            }

            st.workers[idx].busy = true;
            st.dispatched += 1;
            if let Some(task) = st.tasks.get_mut(&source) {
                task.status = TaskStatus::Assigned(worker_id);
            }
            debug!("Dispatched {} to worker {}", source.display(), worker_id);
            deferred.events.push(Event::Started(source, worker_id));
        }
    }

    fn spawn_worker(&self, st: &mut PoolState) -> Option<WorkerSlot> {
        let runtime = st.runtime.clone()?;
        let reports = st.report_tx.clone()?;
        let id = st.next_worker_id;
        st.next_worker_id += 1;

        let (jobs, rx) = mpsc::unbounded_channel();
        let join = runtime.spawn(run_worker(id, rx, reports, Arc::clone(&self.pipeline)));
        Some(WorkerSlot {
            id,
            busy: false,
            jobs,
            join,
        })
    }

    fn handle_report(self: &Arc<Self>, report: Report) -> Deferred {
        let mut deferred = Deferred::default();
        let mut st = self.lock();

        if let Some(pos) = st.workers.iter().position(|w| w.id == report.worker) {
            if report.crashed {
                let old = st.workers.remove(pos);
                st.retired.push(old.join);
                if !st.closed {
                    if let Some(slot) = self.spawn_worker(&mut st) {
                        warn!("Worker {} crashed; replaced by worker {}", report.worker, slot.id);
                        st.workers.insert(pos, slot);
                    }
                }
            } else {
                st.workers[pos].busy = false;
            }
        }

        if let Some(task) = st.tasks.remove(&report.source) {
            if let Ok(out) = &report.outcome {
                st.cache.insert(report.source.clone(), out.clone());
            }
            deferred.finish(report.source, task, report.outcome);
        }

        if !st.closed {
            self.dispatch(&mut st, &mut deferred);
        }
        deferred
    }

    /// Mark closed, fail queued tasks, and release every sender so workers
    /// and the controller wind down. Returns the handles to join.
    fn close(&self) -> (Vec<JoinHandle<()>>, Option<JoinHandle<()>>) {
        let mut deferred = Deferred::default();
        let result = {
            let mut st = self.lock();
            if !st.closed {
                st.closed = true;
                let queued: Vec<PathBuf> = st.queue.drain(..).collect();
                if !queued.is_empty() {
                    info!("Closing pool; {} queued tasks cancelled", queued.len());
                }
                for source in queued {
                    if let Some(task) = st.tasks.remove(&source) {
                        let failure = ConversionFailure::PoolUnavailable {
                            path: source.clone(),
                            reason: "service shut down before the task started".into(),
                        };
                        deferred.finish(source, task, Err(failure));
                    }
                }
                st.report_tx = None;
            }

            // Dropping the slots drops the job senders.
            let mut joins: Vec<JoinHandle<()>> =
                std::mem::take(&mut st.workers).into_iter().map(|w| w.join).collect();
            joins.append(&mut st.retired);
            let controller = st.controller.take();
            (joins, controller)
        };
        deferred.run(self.progress.as_ref());
        result
    }
}

async fn run_worker(
    id: usize,
    mut jobs: UnboundedReceiver<Job>,
    reports: UnboundedSender<Report>,
    pipeline: Arc<Pipeline>,
) {
    debug!("Worker {} started", id);
    while let Some(Job { source, output }) = jobs.recv().await {
        let pipeline = Arc::clone(&pipeline);
        let src = source.clone();
        let job = tokio::spawn(async move { pipeline.run(&src, &output).await });

        let (outcome, crashed) = match job.await {
            Ok(outcome) => (outcome, false),
            Err(e) => (
                Err(ConversionFailure::WorkerCrashed {
                    path: source.clone(),
                    detail: panic_detail(e),
                }),
                true,
            ),
        };

        let report = Report {
            worker: id,
            source,
            outcome,
            crashed,
        };
        if reports.send(report).is_err() || crashed {
            break;
        }
    }
    debug!("Worker {} stopped", id);
}

async fn run_controller(inner: Arc<PoolInner>, mut reports: UnboundedReceiver<Report>) {
    while let Some(report) = reports.recv().await {
        let deferred = inner.handle_report(report);
        deferred.run(inner.progress.as_ref());
    }
    debug!("Pool controller stopped");
}

fn panic_detail(e: JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let payload = e.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic".into()
    }
}
