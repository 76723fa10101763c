//! Worker-side view of a running task.

use crate::cancel::{CancellationToken, Cancelled};
use crate::runner::{Delivery, TaskId};
use crossbeam_channel::Sender;
use std::cell::Cell;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

/// Handed to task work on its worker thread.
///
/// Gives access to the cancellation flag and to the progress stream.
/// Progress events are marshalled to the owning loop one by one, in call order.
pub struct TaskContext<P> {
    id: TaskId,
    name: String,
    token: CancellationToken,
    progress: Option<Sender<Delivery>>,
    throttle: Option<Duration>,
    last_emit: Cell<Option<Instant>>,
    _event: PhantomData<fn(P)>,
}

impl<P: Send + 'static> TaskContext<P> {
    pub(crate) fn new(
        id: TaskId,
        name: String,
        token: CancellationToken,
        progress: Option<Sender<Delivery>>,
        throttle: Option<Duration>,
    ) -> Self {
        Self {
            id,
            name,
            token,
            progress,
            throttle,
            last_emit: Cell::new(None),
            _event: PhantomData,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// `Err(Cancelled)` once cancellation was requested.
    #[inline]
    pub fn check_cancelled(&self) -> Result<(), Cancelled> {
        self.token.check()
    }

    /// Report progress to the loop.
    ///
    /// Returns false when the event was not queued: no progress callback was
    /// registered, the event fell inside the throttle window, or the runner is gone.
    pub fn progress(&self, event: P) -> bool {
        let Some(tx) = &self.progress else {
            return false;
        };

        if let Some(interval) = self.throttle {
            let now = Instant::now();
            if let Some(last) = self.last_emit.get() {
                if now.duration_since(last) < interval {
                    return false;
                }
            }
            self.last_emit.set(Some(now));
        }

        tx.send(Delivery::progress(self.id, Box::new(event))).is_ok()
    }
}
