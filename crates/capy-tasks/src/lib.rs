//! capy-tasks - background work for single-threaded UI loops
//!
//! Features:
//! - One detached worker thread per task (operations are human-scale)
//! - Success/error/progress callbacks run on the thread that owns the runner
//! - Cooperative cancellation through a shared token
//! - Deliveries are plain channel messages, so any loop can `select!` on them

mod cancel;
mod context;
pub mod error;
mod runner;

pub use cancel::{CancellationToken, Cancelled};
pub use context::TaskContext;
pub use error::{BoxError, TaskError};
pub use runner::{Delivery, TaskBuilder, TaskHandle, TaskId, TaskInfo, TaskRunner};
