//! Message lifecycle engine.
//!
//! - `store`: the durable record collaborator (`MessageStore`) and its
//!   Postgres and in-memory implementations
//! - `queue`: the in-memory buffers and lifecycle state machine

pub mod memory_store;
pub mod pg_store;
pub mod queue;
pub mod store;

pub use memory_store::InMemoryMessageStore;
pub use pg_store::PgMessageStore;
pub use queue::MessageQueue;
pub use store::MessageStore;
