//! Task runner owned by the event loop thread.
//!
//! Work runs on a detached worker thread per submission. Workers never see the
//! callbacks: they only push `Send` payloads into a channel, and the loop that
//! owns the runner drains that channel and invokes the callbacks itself.
//! Because the runner holds non-`Send` callbacks it cannot leave its thread,
//! so every callback runs on the loop thread by construction.

use crate::cancel::CancellationToken;
use crate::context::TaskContext;
use crate::error::{BoxError, TaskError, panic_message};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

/// Identifier of a submitted task. Unique per runner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type Payload = Box<dyn Any + Send>;

enum DeliveryKind {
    Progress(Payload),
    Finished(Result<Payload, TaskError>),
}

/// A message from a worker thread, waiting to be handed to [`TaskRunner::deliver`].
pub struct Delivery {
    id: TaskId,
    kind: DeliveryKind,
}

impl Delivery {
    pub(crate) fn progress(id: TaskId, payload: Payload) -> Self {
        Self {
            id,
            kind: DeliveryKind::Progress(payload),
        }
    }

    fn finished(id: TaskId, outcome: Result<Payload, TaskError>) -> Self {
        Self {
            id,
            kind: DeliveryKind::Finished(outcome),
        }
    }

    /// True for the single success/error message that ends a task.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, DeliveryKind::Finished(_))
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("id", &self.id)
            .field("terminal", &self.is_terminal())
            .finish()
    }
}

/// Returned by every submission. Cheap to clone.
#[derive(Clone, Debug)]
pub struct TaskHandle {
    id: TaskId,
    name: String,
    token: CancellationToken,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Snapshot of an active task, as reported by [`TaskRunner::list_active`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    pub cancel_requested: bool,
}

/// Type-erased callbacks of one task, living on the loop thread.
trait Callbacks {
    fn progress(&mut self, payload: Payload);
    fn finish(self: Box<Self>, outcome: Result<Payload, TaskError>);
}

struct TypedCallbacks<T, P, S, F> {
    on_progress: Option<Box<dyn FnMut(P)>>,
    on_success: S,
    on_error: F,
    _result: PhantomData<fn(T)>,
}

impl<T, P, S, F> Callbacks for TypedCallbacks<T, P, S, F>
where
    T: 'static,
    P: 'static,
    S: FnOnce(T),
    F: FnOnce(TaskError),
{
    fn progress(&mut self, payload: Payload) {
        let Some(on_progress) = self.on_progress.as_mut() else {
            return;
        };
        match payload.downcast::<P>() {
            Ok(event) => on_progress(*event),
            Err(_) => warn!("Dropping progress event of unexpected type"),
        }
    }

    fn finish(self: Box<Self>, outcome: Result<Payload, TaskError>) {
        let this = *self;
        match outcome {
            Ok(value) => match value.downcast::<T>() {
                Ok(value) => (this.on_success)(*value),
                Err(_) => (this.on_error)(TaskError::Failed(
                    "task result had an unexpected type".into(),
                )),
            },
            Err(err) => (this.on_error)(err),
        }
    }
}

struct ActiveTask {
    name: String,
    token: CancellationToken,
    callbacks: Rc<RefCell<Box<dyn Callbacks>>>,
}

/// Runs work off the loop thread and delivers results back onto it.
///
/// The owner is expected to feed [`TaskRunner::receiver`] messages into
/// [`TaskRunner::deliver`] (or call [`TaskRunner::dispatch_pending`]) from its loop.
pub struct TaskRunner {
    tx: Sender<Delivery>,
    rx: Receiver<Delivery>,
    active: RefCell<BTreeMap<TaskId, ActiveTask>>,
    next_id: Cell<u64>,
    dispatching: Cell<bool>,
    exiting: Cell<bool>,
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRunner {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            active: RefCell::new(BTreeMap::new()),
            next_id: Cell::new(0),
            dispatching: Cell::new(false),
            exiting: Cell::new(false),
        }
    }

    /// Submit work without progress reporting.
    ///
    /// Exactly one of `on_success` / `on_error` runs, on this thread, once the
    /// owner delivers the worker's result.
    pub fn submit<T, E, W, S, F>(&self, work: W, on_success: S, on_error: F) -> TaskHandle
    where
        W: FnOnce(&TaskContext<()>) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError>,
        S: FnOnce(T) + 'static,
        F: FnOnce(TaskError) + 'static,
    {
        self.build(work).spawn(on_success, on_error)
    }

    /// Start configuring a submission (name, progress callback, throttling).
    pub fn build<P, T, E, W>(&self, work: W) -> TaskBuilder<'_, P, T, E, W>
    where
        P: Send + 'static,
        T: Send + 'static,
        E: Into<BoxError>,
        W: FnOnce(&TaskContext<P>) -> Result<T, E> + Send + 'static,
    {
        TaskBuilder {
            runner: self,
            work,
            name: None,
            on_progress: None,
            throttle: None,
            _types: PhantomData,
        }
    }

    /// Request cooperative cancellation.
    ///
    /// Returns whether the task was still active. Work that never polls its
    /// token runs to completion and its result is delivered as usual.
    pub fn cancel(&self, handle: &TaskHandle) -> bool {
        handle.token.cancel();
        let active = self.is_active(handle.id);
        if active {
            info!("Cancellation requested for task {} ({})", handle.id, handle.name);
        }
        active
    }

    /// Tasks whose terminal callback has not been dispatched yet, oldest first.
    pub fn list_active(&self) -> Vec<TaskInfo> {
        self.active
            .borrow()
            .iter()
            .map(|(id, task)| TaskInfo {
                id: *id,
                name: task.name.clone(),
                cancel_requested: task.token.is_cancelled(),
            })
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.borrow().len()
    }

    pub fn is_active(&self, id: TaskId) -> bool {
        self.active.borrow().contains_key(&id)
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting.get()
    }

    /// Channel the owning loop should wait on.
    pub fn receiver(&self) -> &Receiver<Delivery> {
        &self.rx
    }

    /// Invoke the callback a worker message is addressed to.
    ///
    /// Messages for tasks that already finished, or that arrive after
    /// [`TaskRunner::shutdown`], are dropped silently.
    pub fn deliver(&self, delivery: Delivery) {
        if self.exiting.get() {
            debug!("Runner exiting, dropping message for task {}", delivery.id);
            return;
        }

        let Delivery { id, kind } = delivery;
        match kind {
            DeliveryKind::Progress(payload) => {
                let callbacks = self
                    .active
                    .borrow()
                    .get(&id)
                    .map(|task| Rc::clone(&task.callbacks));
                let Some(callbacks) = callbacks else {
                    debug!("Dropping progress for finished task {}", id);
                    return;
                };

                let result =
                    panic::catch_unwind(AssertUnwindSafe(|| callbacks.borrow_mut().progress(payload)));
                if let Err(payload) = result {
                    error!(
                        "Error in progress callback for task {}: {}",
                        id,
                        panic_message(payload.as_ref())
                    );
                }
            }
            DeliveryKind::Finished(outcome) => {
                // Leave the active set before the callback runs.
                let task = self.active.borrow_mut().remove(&id);
                let Some(task) = task else {
                    debug!("Dropping result for unknown task {}", id);
                    return;
                };

                match &outcome {
                    Ok(_) => debug!("Task {} ({}) completed", id, task.name),
                    Err(e) => debug!("Task {} ({}) ended with error: {}", id, task.name, e),
                }

                let callbacks = match Rc::try_unwrap(task.callbacks) {
                    Ok(cell) => cell.into_inner(),
                    Err(_) => {
                        error!("Callbacks of task {} are still in use, dropping result", id);
                        return;
                    }
                };

                let result = panic::catch_unwind(AssertUnwindSafe(move || callbacks.finish(outcome)));
                if let Err(payload) = result {
                    error!(
                        "Error in thread callback {} ({}): {}",
                        id,
                        task.name,
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
    }

    /// Deliver everything queued right now. Returns how many messages were handled.
    pub fn dispatch_pending(&self) -> usize {
        if self.dispatching.replace(true) {
            warn!("dispatch_pending called from inside a task callback, ignoring");
            return 0;
        }

        let queued = self.rx.len();
        let mut handled = 0;
        for _ in 0..queued {
            match self.rx.try_recv() {
                Ok(delivery) => {
                    self.deliver(delivery);
                    handled += 1;
                }
                Err(_) => break,
            }
        }

        self.dispatching.set(false);
        handled
    }

    /// Pump deliveries until no task is active or the timeout elapses.
    /// Returns true when the runner went idle.
    pub fn run_until_idle(&self, timeout: Duration) -> bool {
        if self.dispatching.replace(true) {
            warn!("run_until_idle called from inside a task callback, ignoring");
            return false;
        }

        let deadline = Instant::now() + timeout;
        let idle = loop {
            if self.active.borrow().is_empty() {
                break true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(delivery) => self.deliver(delivery),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break false,
            }
        };

        self.dispatching.set(false);
        idle
    }

    /// Stop delivering anything. Active tasks are flagged as cancelled and
    /// forgotten; their worker threads are left to finish on their own.
    pub fn shutdown(&self) {
        if self.exiting.replace(true) {
            return;
        }

        let abandoned = std::mem::take(&mut *self.active.borrow_mut());
        for task in abandoned.values() {
            task.token.cancel();
        }
        info!("Task runner stopped, abandoning {} task(s)", abandoned.len());
    }

    fn spawn_task<P, T, E, W, S, F>(
        &self,
        name: Option<String>,
        work: W,
        on_progress: Option<Box<dyn FnMut(P)>>,
        throttle: Option<Duration>,
        on_success: S,
        on_error: F,
    ) -> TaskHandle
    where
        P: Send + 'static,
        T: Send + 'static,
        E: Into<BoxError>,
        W: FnOnce(&TaskContext<P>) -> Result<T, E> + Send + 'static,
        S: FnOnce(T) + 'static,
        F: FnOnce(TaskError) + 'static,
    {
        let counter = self.next_id.get() + 1;
        self.next_id.set(counter);
        let id = TaskId(counter);
        let name = name.unwrap_or_else(|| "task".to_string());
        let token = CancellationToken::new();

        let progress_tx = on_progress.as_ref().map(|_| self.tx.clone());
        let ctx = TaskContext::<P>::new(id, name.clone(), token.clone(), progress_tx, throttle);

        let callbacks: Box<dyn Callbacks> = Box::new(TypedCallbacks {
            on_progress,
            on_success,
            on_error,
            _result: PhantomData,
        });
        self.active.borrow_mut().insert(
            id,
            ActiveTask {
                name: name.clone(),
                token: token.clone(),
                callbacks: Rc::new(RefCell::new(callbacks)),
            },
        );

        let tx = self.tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}_{}", name, counter))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(&ctx)));
                let result = match outcome {
                    Ok(Ok(value)) => Ok(Box::new(value) as Payload),
                    Ok(Err(err)) => Err(TaskError::from_work(err)),
                    Err(payload) => Err(TaskError::from_panic(payload)),
                };
                // The runner may be gone already; nothing to report to then.
                let _ = tx.send(Delivery::finished(id, result));
            });

        match spawned {
            Ok(_) => debug!("Started task {} ({})", id, name),
            Err(e) => {
                error!("Failed to spawn worker for task '{}': {}", name, e);
                let _ = self.tx.send(Delivery::finished(id, Err(TaskError::Spawn(e))));
            }
        }

        TaskHandle { id, name, token }
    }
}

/// Builder returned by [`TaskRunner::build`].
pub struct TaskBuilder<'r, P, T, E, W> {
    runner: &'r TaskRunner,
    work: W,
    name: Option<String>,
    on_progress: Option<Box<dyn FnMut(P)>>,
    throttle: Option<Duration>,
    _types: PhantomData<fn() -> (T, E)>,
}

impl<P, T, E, W> TaskBuilder<'_, P, T, E, W>
where
    P: Send + 'static,
    T: Send + 'static,
    E: Into<BoxError>,
    W: FnOnce(&TaskContext<P>) -> Result<T, E> + Send + 'static,
{
    /// Human-readable name, also used for the worker thread name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Receive events passed to [`TaskContext::progress`], in order, on the loop thread.
    pub fn on_progress(mut self, on_progress: impl FnMut(P) + 'static) -> Self {
        self.on_progress = Some(Box::new(on_progress));
        self
    }

    /// Drop progress events emitted less than `interval` after the previous one.
    pub fn throttle(mut self, interval: Duration) -> Self {
        self.throttle = Some(interval);
        self
    }

    pub fn spawn<S, F>(self, on_success: S, on_error: F) -> TaskHandle
    where
        S: FnOnce(T) + 'static,
        F: FnOnce(TaskError) + 'static,
    {
        self.runner.spawn_task(
            self.name,
            self.work,
            self.on_progress,
            self.throttle,
            on_success,
            on_error,
        )
    }
}
