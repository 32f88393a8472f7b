//! Cooperative tasks and the bounded-parallelism engine that runs them.
//!
//! A task receives a [`TaskContext`] carrying watch channels for cancel and
//! pause, plus a progress slot the owner can read while the task runs.

use crate::error::TaskError;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

pub mod concurrent;

pub use concurrent::{ConcurrentTask, SubTaskFailure};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait Task: Send + Sync {
    fn name(&self) -> String;
    /// Relative share of a parent's progress bar.
    fn weight(&self) -> u64 {
        1
    }
    /// Whether an abort request can actually stop this task.
    fn can_abort(&self) -> bool {
        true
    }
    /// Execute task work.
    fn run<'a>(&'a self, ctx: TaskContext) -> BoxFuture<'a, Result<(), TaskError>>;
}

/// Progress, status line and warnings published by a running task.
#[derive(Default)]
pub struct TaskProgress {
    current: AtomicU64,
    total: AtomicU64,
    status: Mutex<String>,
    warnings: Mutex<Vec<String>>,
}

impl TaskProgress {
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Completed fraction in `[0, 1]`. Unknown totals count as not started.
    pub fn fraction(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.current() as f64 / total as f64).clamp(0.0, 1.0)
    }

    pub fn status(&self) -> String {
        self.status.lock().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().clone()
    }

    pub fn take_warnings(&self) -> Vec<String> {
        std::mem::take(&mut *self.warnings.lock())
    }
}

#[derive(Clone)]
pub struct TaskContext {
    pub cancel_rx: watch::Receiver<bool>,
    pub pause_rx: watch::Receiver<bool>,
    progress: Arc<TaskProgress>,
}

impl TaskContext {
    /// A context nobody can cancel or pause.
    pub fn detached() -> Self {
        let (_, cancel_rx) = watch::channel(false);
        let (_, pause_rx) = watch::channel(false);
        Self {
            cancel_rx,
            pause_rx,
            progress: Arc::new(TaskProgress::default()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    pub fn is_paused(&self) -> bool {
        *self.pause_rx.borrow()
    }

    /// Suspend while paused; fails with [`TaskError::Aborted`] once cancelled.
    pub async fn checkpoint(&self) -> Result<(), TaskError> {
        let mut cancel = self.cancel_rx.clone();
        let mut pause = self.pause_rx.clone();
        loop {
            if *cancel.borrow_and_update() {
                return Err(TaskError::Aborted);
            }
            if !*pause.borrow_and_update() {
                return Ok(());
            }
            tokio::select! {
                res = pause.changed() => {
                    if res.is_err() {
                        return Ok(());
                    }
                }
                res = cancel.changed() => {
                    if res.is_err() {
                        // Can no longer be cancelled, only resumed.
                        let _ = pause.wait_for(|paused| !*paused).await.map(|_| ());
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Resolves once the context is cancelled. Never resolves for detached contexts.
    pub async fn cancelled(&self) {
        let mut cancel = self.cancel_rx.clone();
        let fired = cancel.wait_for(|c| *c).await.map(|_| ());
        if fired.is_err() {
            futures::future::pending::<()>().await;
        }
    }

    /// Drive `fut` until it completes or the context is cancelled, whichever
    /// comes first. A cancelled future is dropped mid-flight.
    pub async fn abortable<F: Future>(&self, fut: F) -> Result<F::Output, TaskError> {
        tokio::select! {
            out = fut => Ok(out),
            _ = self.cancelled() => Err(TaskError::Aborted),
        }
    }

    pub fn set_progress(&self, current: u64, total: u64) {
        self.progress.current.store(current, Ordering::Relaxed);
        self.progress.total.store(total, Ordering::Relaxed);
    }

    pub fn set_status(&self, status: impl Into<String>) {
        let status = status.into();
        log::debug!("{}", status);
        *self.progress.status.lock() = status;
    }

    pub fn warn(&self, warning: impl Into<String>) {
        let warning = warning.into();
        log::warn!("{}", warning);
        self.progress.warnings.lock().push(warning);
    }

    pub fn progress(&self) -> Arc<TaskProgress> {
        self.progress.clone()
    }
}

/// Owner side of the cancel and pause channels.
pub struct TaskControl {
    cancel_tx: watch::Sender<bool>,
    pause_tx: watch::Sender<bool>,
}

impl Default for TaskControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskControl {
    pub fn new() -> Self {
        let (cancel_tx, _) = watch::channel(false);
        let (pause_tx, _) = watch::channel(false);
        Self {
            cancel_tx,
            pause_tx,
        }
    }

    /// A fresh context wired to this control.
    pub fn context(&self) -> TaskContext {
        TaskContext {
            cancel_rx: self.cancel_tx.subscribe(),
            pause_rx: self.pause_tx.subscribe(),
            progress: Arc::new(TaskProgress::default()),
        }
    }

    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn pause(&self) {
        self.pause_tx.send_replace(true);
    }

    pub fn resume(&self) {
        self.pause_tx.send_replace(false);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    pub fn is_paused(&self) -> bool {
        *self.pause_tx.borrow()
    }

    pub(crate) fn subscribe_pause(&self) -> watch::Receiver<bool> {
        self.pause_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_checkpoint_waits_for_resume() {
        let control = TaskControl::new();
        let ctx = control.context();
        control.pause();

        let waiter = tokio::spawn(async move { ctx.checkpoint().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        control.resume();
        assert_eq!(waiter.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_checkpoint_aborts_while_paused() {
        let control = TaskControl::new();
        let ctx = control.context();
        control.pause();

        let waiter = tokio::spawn(async move { ctx.checkpoint().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        control.cancel();
        assert_eq!(waiter.await.unwrap(), Err(TaskError::Aborted));
    }

    #[tokio::test]
    async fn test_detached_context_never_blocks() {
        let ctx = TaskContext::detached();
        assert!(!ctx.is_cancelled());
        assert_eq!(ctx.checkpoint().await, Ok(()));
        ctx.set_progress(1, 4);
        assert_eq!(ctx.progress().fraction(), 0.25);
    }
}
