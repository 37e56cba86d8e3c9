//! Workspace orchestration for the codebox control plane.
//!
//! Every state-changing operation on a workspace runs as a durable job:
//! the HTTP layer only enqueues, the scheduler claims and dispatches, and
//! the handlers here drive the runner and persist the outcome. Handlers
//! are re-run-safe; the queue is at-least-once.

pub mod error;
pub mod jobs;
pub mod scheduler;
pub mod source;

pub use error::{OrchestrationError, Result};
pub use jobs::JobContext;
pub use scheduler::Scheduler;
