//! Completion notification.
//!
//! A task resolves exactly once. Its outcome is delivered two ways:
//!
//! * [`Waiter`] closures registered at submission time, invoked in
//!   registration order by [`WaiterList::notify`];
//! * a [`ConversionHandle`], a cloneable future that any number of tasks can
//!   `.await`.
//!
//! Both are fed by the same resolution, so a closure and a handle for the
//! same task always observe the same [`ConversionOutcome`].

use crate::error::ConversionFailure;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use tokio::sync::oneshot;
use tracing::warn;

/// Final result of one conversion task: the converted file, or why not.
pub type ConversionOutcome = Result<PathBuf, ConversionFailure>;

/// One-shot completion callback.
pub type Waiter = Box<dyn FnOnce(&ConversionOutcome) + Send + 'static>;

/// Waiters attached to one task, notified in registration order.
#[derive(Default)]
pub struct WaiterList {
    waiters: Vec<Waiter>,
}

impl WaiterList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, waiter: Waiter) {
        self.waiters.push(waiter);
    }

    /// Invoke every waiter once with `outcome`.
    ///
    /// A panicking waiter is logged and skipped; the remaining waiters still
    /// run. Returns the number of waiters that panicked.
    pub fn notify(self, outcome: &ConversionOutcome) -> usize {
        let mut panicked = 0;
        for (idx, waiter) in self.waiters.into_iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| waiter(outcome))).is_err() {
                warn!("Completion callback #{} panicked; continuing", idx);
                panicked += 1;
            }
        }
        panicked
    }
}

impl fmt::Debug for WaiterList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaiterList")
            .field("len", &self.waiters.len())
            .finish()
    }
}

/// Awaitable, cloneable view of one task's outcome.
///
/// Every clone resolves to the same value. Dropping handles has no effect on
/// the task itself.
#[derive(Clone)]
pub struct ConversionHandle {
    source: PathBuf,
    result: Shared<BoxFuture<'static, ConversionOutcome>>,
}

impl ConversionHandle {
    /// A handle that is already resolved (cache hits).
    pub fn ready(source: PathBuf, outcome: ConversionOutcome) -> Self {
        Self {
            source,
            result: futures::future::ready(outcome).boxed().shared(),
        }
    }

    /// Normalised source path of the task.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Wait for the task to finish.
    pub async fn wait(&self) -> ConversionOutcome {
        self.result.clone().await
    }

    /// The outcome if the task has already finished, without waiting.
    pub fn peek(&self) -> Option<ConversionOutcome> {
        if let Some(done) = self.result.peek() {
            return Some(done.clone());
        }
        self.result.clone().now_or_never()
    }
}

impl fmt::Debug for ConversionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionHandle")
            .field("source", &self.source)
            .field("resolved", &self.result.peek().is_some())
            .finish()
    }
}

/// Write side of a [`ConversionHandle`]. Consumed on resolution.
pub(crate) struct Resolver {
    tx: oneshot::Sender<ConversionOutcome>,
}

impl Resolver {
    pub(crate) fn resolve(self, outcome: ConversionOutcome) {
        // No live handle is fine: nobody is awaiting this task.
        let _ = self.tx.send(outcome);
    }
}

/// Create an unresolved handle for `source` and the resolver that completes it.
///
/// If the resolver is dropped without resolving (pool torn down mid-flight),
/// the handle resolves to [`ConversionFailure::PoolUnavailable`].
pub(crate) fn pending(source: PathBuf) -> (Resolver, ConversionHandle) {
    let (tx, rx) = oneshot::channel();
    let path = source.clone();
    let result = async move {
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(ConversionFailure::PoolUnavailable {
                path,
                reason: "task was dropped before completing".into(),
            }),
        }
    }
    .boxed()
    .shared();

    (Resolver { tx }, ConversionHandle { source, result })
}
