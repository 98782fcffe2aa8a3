//! HTTP surface for producers and operators.
//!
//! Producers submit typed messages; operators inspect the queue, retry
//! failed messages and clear the failed set. Every route is a thin
//! pass-through to a `MessageQueue` operation.

pub mod requests;
pub mod routes;
pub mod state;
