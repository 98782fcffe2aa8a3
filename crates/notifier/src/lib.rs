//! Notification dispatch.
//!
//! The [`Dispatcher`] is the single consumer of the message queue: it pulls
//! pending messages, routes each one to the handler for its kind and reports
//! the outcome back to the queue.

pub mod dispatcher;

pub use dispatcher::{DispatchOutcome, Dispatcher};
