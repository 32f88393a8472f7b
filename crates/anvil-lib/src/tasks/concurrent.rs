use super::{BoxFuture, Task, TaskContext, TaskControl, TaskProgress};
use crate::error::TaskError;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

type InFlight = FuturesUnordered<BoxFuture<'static, (usize, Result<(), TaskError>)>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubTaskFailure {
    pub name: String,
    pub reason: String,
}

struct Running {
    name: String,
    weight: u64,
    can_abort: bool,
    progress: Arc<TaskProgress>,
}

#[derive(Default)]
struct EngineState {
    queue: VecDeque<Arc<dyn Task>>,
    running: HashMap<usize, Running>,
    succeeded: Vec<String>,
    failed: Vec<SubTaskFailure>,
    warnings: Vec<String>,
    next_id: usize,
    total: usize,
    total_weight: u64,
    done_weight: u64,
    started: bool,
    aborted: bool,
}

impl EngineState {
    fn done(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Runs queued tasks with at most `max_concurrent` in flight at any time.
///
/// Slots are refilled one at a time as tasks finish. A failing task never
/// stops its siblings; failures are collected and reported once the queue
/// has drained.
pub struct ConcurrentTask {
    name: String,
    max_concurrent: usize,
    control: TaskControl,
    state: Mutex<EngineState>,
}

impl ConcurrentTask {
    pub fn new(name: impl Into<String>, max_concurrent: usize) -> Self {
        Self {
            name: name.into(),
            max_concurrent: max_concurrent.max(1),
            control: TaskControl::new(),
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Queue a task. Ignored once the engine has started.
    pub fn add_task(&self, task: Arc<dyn Task>) {
        let mut st = self.state.lock();
        if st.started {
            log::warn!(
                "Tried to add task '{}' to running concurrent task '{}'",
                task.name(),
                self.name
            );
            return;
        }
        st.total_weight += task.weight();
        st.queue.push_back(task);
    }

    pub fn len(&self) -> usize {
        let st = self.state.lock();
        st.queue.len() + st.running.len() + st.done()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run to completion with a context nobody else controls.
    pub async fn start(&self) -> Result<(), TaskError> {
        self.execute(TaskContext::detached()).await
    }

    /// Pause every running task and stop admitting new ones.
    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    /// Drop everything still queued and cancel what is running.
    ///
    /// Returns `false` when some running task cannot be aborted.
    pub fn abort(&self) -> bool {
        let all_abortable = {
            let mut st = self.state.lock();
            if !st.queue.is_empty() {
                log::info!("{}: dropping {} queued task(s)", self.name, st.queue.len());
            }
            st.queue.clear();
            st.aborted = true;
            st.running.values().all(|r| r.can_abort)
        };
        self.control.cancel();
        if !all_abortable {
            log::warn!("{}: Failed to abort all running tasks.", self.name);
        }
        all_abortable
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }

    pub fn succeeded(&self) -> Vec<String> {
        self.state.lock().succeeded.clone()
    }

    pub fn failures(&self) -> Vec<SubTaskFailure> {
        self.state.lock().failed.clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.state.lock().warnings.clone()
    }

    pub fn running_count(&self) -> usize {
        self.state.lock().running.len()
    }

    /// Weighted completion in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        let st = self.state.lock();
        if st.total_weight == 0 {
            return if st.started { 1.0 } else { 0.0 };
        }
        let running: f64 = st
            .running
            .values()
            .map(|r| r.weight as f64 * r.progress.fraction())
            .sum();
        ((st.done_weight as f64 + running) / st.total_weight as f64).min(1.0)
    }

    pub fn status(&self) -> String {
        let st = self.state.lock();
        format!(
            "Executing {} task(s) ({} out of {} are done)",
            st.running.len(),
            st.done(),
            st.total
        )
    }

    async fn execute(&self, parent: TaskContext) -> Result<(), TaskError> {
        {
            let mut st = self.state.lock();
            if st.started {
                return Err(TaskError::failed(format!("{} was already started", self.name)));
            }
            st.started = true;
            st.total = st.queue.len();
            log::info!(
                "{}: running {} task(s), {} at a time",
                self.name,
                st.total,
                self.max_concurrent
            );
        }

        let mut in_flight = InFlight::new();
        let mut own_pause = self.control.subscribe_pause();
        let mut parent_cancel = parent.cancel_rx.clone();
        let mut parent_pause = parent.pause_rx.clone();
        if *parent_cancel.borrow_and_update() {
            self.abort();
        }
        if *parent_pause.borrow_and_update() {
            self.control.pause();
        }

        loop {
            if !*own_pause.borrow_and_update() {
                self.start_next(&mut in_flight);
            }
            self.publish(&parent);

            if in_flight.is_empty() && self.state.lock().queue.is_empty() {
                break;
            }

            tokio::select! {
                Some((id, result)) = in_flight.next(), if !in_flight.is_empty() => {
                    self.on_finished(id, result);
                }
                Ok(()) = own_pause.changed() => {}
                Ok(()) = parent_cancel.changed() => {
                    if *parent_cancel.borrow_and_update() {
                        self.abort();
                    }
                }
                Ok(()) = parent_pause.changed() => {
                    if *parent_pause.borrow_and_update() {
                        self.control.pause();
                    } else {
                        self.control.resume();
                    }
                }
                else => break,
            }
        }

        self.publish(&parent);
        self.finish()
    }

    fn start_next(&self, in_flight: &mut InFlight) {
        let mut st = self.state.lock();
        while in_flight.len() < self.max_concurrent && !st.aborted {
            let Some(task) = st.queue.pop_front() else {
                break;
            };
            let id = st.next_id;
            st.next_id += 1;

            let ctx = self.control.context();
            let name = task.name();
            log::debug!("{}: starting '{}'", self.name, name);
            st.running.insert(
                id,
                Running {
                    name,
                    weight: task.weight(),
                    can_abort: task.can_abort(),
                    progress: ctx.progress(),
                },
            );
            in_flight.push(Box::pin(async move {
                let result = task.run(ctx).await;
                (id, result)
            }));
        }
    }

    fn on_finished(&self, id: usize, result: Result<(), TaskError>) {
        let mut st = self.state.lock();
        let Some(running) = st.running.remove(&id) else {
            return;
        };
        st.done_weight += running.weight;
        st.warnings.extend(running.progress.take_warnings());
        match result {
            Ok(()) => {
                log::debug!("{}: '{}' succeeded", self.name, running.name);
                st.succeeded.push(running.name);
            }
            Err(e) => {
                if !(st.aborted && e.is_aborted()) {
                    log::warn!("{}: '{}' failed: {}", self.name, running.name, e);
                }
                st.failed.push(SubTaskFailure {
                    name: running.name,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn publish(&self, parent: &TaskContext) {
        let (current, total) = {
            let st = self.state.lock();
            let running: f64 = st
                .running
                .values()
                .map(|r| r.weight as f64 * r.progress.fraction())
                .sum();
            (
                st.done_weight * 1000 + (running * 1000.0) as u64,
                st.total_weight * 1000,
            )
        };
        parent.set_progress(current, total);
        let status = self.status();
        if parent.progress().status() != status {
            parent.set_status(status);
        }
    }

    fn finish(&self) -> Result<(), TaskError> {
        let st = self.state.lock();
        if st.aborted {
            log::info!(
                "{}: aborted after {} of {} task(s)",
                self.name,
                st.done(),
                st.total
            );
            return Err(TaskError::Aborted);
        }
        if !st.failed.is_empty() {
            return Err(TaskError::SubTasksFailed {
                failed: st.failed.len(),
                total: st.total,
            });
        }
        log::info!("{}: all {} task(s) succeeded", self.name, st.total);
        Ok(())
    }
}

impl Task for ConcurrentTask {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn run<'a>(&'a self, ctx: TaskContext) -> BoxFuture<'a, Result<(), TaskError>> {
        Box::pin(self.execute(ctx))
    }
}
