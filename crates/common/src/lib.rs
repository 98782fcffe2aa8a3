//! Shared building blocks for the Courier notification queue: the message
//! model, queue statistics, the common error type, configuration and the
//! Postgres pool helper.

pub mod config;
pub mod db;
pub mod error;
pub mod types;
