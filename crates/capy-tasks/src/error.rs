//! Error types for capy-tasks

use crate::cancel::Cancelled;
use std::any::Any;
use std::error::Error as StdError;

/// Error type accepted from task work.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Terminal failure of a background task, handed to its error callback.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(BoxError),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task was cancelled")]
    Cancelled,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl TaskError {
    /// True when the work stopped because it observed a cancellation request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }

    /// Classify an error returned by work.
    /// Anything with a [`Cancelled`] in its source chain counts as a cancellation.
    pub(crate) fn from_work<E: Into<BoxError>>(err: E) -> Self {
        let boxed: BoxError = err.into();
        if is_cancellation(boxed.as_ref()) {
            TaskError::Cancelled
        } else {
            TaskError::Failed(boxed)
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        TaskError::Panicked(panic_message(payload.as_ref()))
    }
}

fn is_cancellation(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<Cancelled>() {
            return true;
        }
        current = e.source();
    }
    false
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("wrapped: {0}")]
    struct Wrapper(#[source] Cancelled);

    #[test]
    fn test_cancelled_marker_is_recognised() {
        assert!(TaskError::from_work(Cancelled).is_cancelled());
    }

    #[test]
    fn test_cancelled_in_source_chain_is_recognised() {
        assert!(TaskError::from_work(Wrapper(Cancelled)).is_cancelled());
    }

    #[test]
    fn test_plain_error_is_failure() {
        let err = TaskError::from_work("device busy");
        assert!(!err.is_cancelled());
        assert_eq!(err.to_string(), "device busy");
    }

    #[test]
    fn test_panic_message_extraction() {
        let err = TaskError::from_panic(Box::new("boom"));
        assert_eq!(err.to_string(), "task panicked: boom");

        let err = TaskError::from_panic(Box::new(String::from("bad state")));
        assert_eq!(err.to_string(), "task panicked: bad state");
    }
}
