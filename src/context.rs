//! Dedicated threads which own and serialise all pipeline state.
//!
//! Each [`ExecutionContext`] runs a single-threaded tokio runtime on its own OS
//! thread. Work only reaches a context by being posted to it, so any value created
//! by a task on that context can never be touched from another thread.

use crate::error::ContextError;
use flume::{Receiver, Sender};
use parking_lot::Mutex;
use std::{
    cell::Cell,
    fmt::{Debug, Formatter, Result as FmtResult},
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::JoinHandle,
};
use tokio::{runtime::Builder, task::LocalSet};
use tracing::{error, instrument, trace};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_CONTEXT: Cell<u64> = Cell::new(0);
}

type LocalFuture = Pin<Box<dyn Future<Output = ()>>>;

enum ContextTask {
    Run(Box<dyn FnOnce() + Send>),
    Spawn(Box<dyn FnOnce() -> LocalFuture + Send>),
    Shutdown,
}

struct Inner {
    id: u64,
    name: String,
    tx: Sender<ContextTask>,
    closed: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// A handle to a named thread which runs posted work in order.
///
/// Handles are cheap to clone. The thread exits once every handle is dropped, or
/// once [`shutdown`] is called, after finishing any work queued before that point.
///
/// [`shutdown`]: ExecutionContext::shutdown
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<Inner>,
}

impl ExecutionContext {
    /// Starts a new context on a thread named `name`.
    pub fn new(name: impl Into<String>) -> Result<Self, ContextError> {
        let name = name.into();
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = flume::unbounded();

        let thread_name = name.clone();
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                trace!("Context {} started.", thread_name);
                runner(id, rx);
                trace!("Context {} finished.", thread_name);
            })?;

        Ok(Self {
            inner: Arc::new(Inner {
                id,
                name,
                tx,
                closed: AtomicBool::new(false),
                thread: Mutex::new(Some(handle)),
            }),
        })
    }

    /// The name given to this context's thread.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns whether the calling thread is this context's thread.
    #[must_use]
    pub fn runs_tasks_on_current_thread(&self) -> bool {
        CURRENT_CONTEXT.with(|c| c.get() == self.inner.id)
    }

    /// Returns whether this context still accepts work.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire) && !self.inner.tx.is_disconnected()
    }

    /// Queues a closure to run on this context.
    pub fn post<F>(&self, task: F) -> Result<(), ContextError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(ContextTask::Run(Box::new(task)))
    }

    /// Queues a task to be spawned onto this context.
    ///
    /// `make` is sent to the context thread and called there, so the future it
    /// returns need not be `Send`: it may freely hold values owned by the context.
    pub fn spawn<F, Fut>(&self, make: F) -> Result<(), ContextError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.send(ContextTask::Spawn(Box::new(move || Box::pin(make()))))
    }

    /// Runs a closure on this context, blocking the caller until it completes.
    ///
    /// When called from this context's own thread the closure runs inline. Fails
    /// with [`ContextError::Closed`] if the context shuts down before the closure
    /// has run.
    pub fn post_and_wait<F, T>(&self, task: F) -> Result<T, ContextError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.runs_tasks_on_current_thread() {
            return Ok(task());
        }

        let (tx, rx) = flume::bounded(1);
        self.post(move || drop(tx.send(task())))?;

        rx.recv().map_err(|_| ContextError::Closed)
    }

    /// Stops accepting work, and waits for the context thread to exit.
    ///
    /// Work queued before this call still runs. When called on the context
    /// itself, the thread is left to exit once the current task returns.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        drop(self.inner.tx.send(ContextTask::Shutdown));

        if self.runs_tasks_on_current_thread() {
            return;
        }

        if let Some(handle) = self.inner.thread.lock().take() {
            if handle.join().is_err() {
                error!("Context {} panicked.", self.inner.name);
            }
        }
    }

    fn send(&self, task: ContextTask) -> Result<(), ContextError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ContextError::Closed);
        }

        self.inner.tx.send(task).map_err(|_| ContextError::Closed)
    }
}

impl Debug for ExecutionContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ExecutionContext")
            .field("name", &self.inner.name)
            .field("running", &self.is_running())
            .finish()
    }
}

#[instrument(skip(rx))]
fn runner(id: u64, rx: Receiver<ContextTask>) {
    CURRENT_CONTEXT.with(|c| c.set(id));

    let rt = match Builder::new_current_thread().enable_time().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build context runtime: {e}.");
            return;
        },
    };

    let local = LocalSet::new();
    local.block_on(&rt, async move {
        while let Ok(task) = rx.recv_async().await {
            match task {
                ContextTask::Run(f) => f(),
                ContextTask::Spawn(make) => {
                    tokio::task::spawn_local(make());
                },
                ContextTask::Shutdown => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn posted_work_runs_in_order() {
        let ctx = ExecutionContext::new("test-order").unwrap();
        let (tx, rx) = flume::unbounded();

        for i in 0..16 {
            let tx = tx.clone();
            ctx.post(move || tx.send(i).unwrap()).unwrap();
        }
        ctx.shutdown();

        let seen: Vec<i32> = rx.try_iter().collect();
        assert_eq!(seen, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn affinity_is_only_reported_on_context_thread() {
        let ctx = ExecutionContext::new("test-affinity").unwrap();
        let other = ExecutionContext::new("test-affinity-other").unwrap();

        assert!(!ctx.runs_tasks_on_current_thread());

        let probe = ctx.clone();
        assert!(ctx
            .post_and_wait(move || probe.runs_tasks_on_current_thread())
            .unwrap());

        let probe = ctx.clone();
        assert!(!other
            .post_and_wait(move || probe.runs_tasks_on_current_thread())
            .unwrap());
    }

    #[test]
    #[ntest::timeout(10_000)]
    fn nested_round_trip_runs_inline() {
        let ctx = ExecutionContext::new("test-inline").unwrap();
        let inner = ctx.clone();

        let out = ctx
            .post_and_wait(move || inner.post_and_wait(|| 7).unwrap())
            .unwrap();

        assert_eq!(out, 7);
    }

    #[test]
    #[ntest::timeout(10_000)]
    fn spawned_tasks_can_hold_local_state() {
        let ctx = ExecutionContext::new("test-spawn").unwrap();
        let (tx, rx) = flume::bounded(1);

        ctx.spawn(move || async move {
            let local = std::rc::Rc::new(3);
            tokio::task::yield_now().await;
            tx.send_async(*local).await.unwrap();
        })
        .unwrap();

        assert_eq!(rx.recv().unwrap(), 3);
    }

    #[test]
    #[ntest::timeout(10_000)]
    fn closed_context_rejects_work() {
        let ctx = ExecutionContext::new("test-closed").unwrap();
        let count = Arc::new(AtomicUsize::new(0));

        ctx.shutdown();
        ctx.shutdown();

        let c = count.clone();
        assert!(matches!(
            ctx.post(move || {
                c.fetch_add(1, Ordering::Relaxed);
            }),
            Err(ContextError::Closed)
        ));
        assert!(matches!(ctx.post_and_wait(|| 1), Err(ContextError::Closed)));
        assert!(!ctx.is_running());
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }
}
