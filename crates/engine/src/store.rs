//! Durable message record collaborator used by the queue.

use async_trait::async_trait;

use courier_common::error::AppError;
use courier_common::types::Message;

/// Append/update log of message records.
///
/// Only the queue writes through this trait. Every failure is reported as
/// `AppError::Persistence`.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a newly created message record.
    async fn insert(&self, message: &Message) -> Result<(), AppError>;

    /// Persist a status transition: `status`, `processed_at`, `last_error`
    /// and `retry_count` are written, every other field is left as inserted.
    async fn update_status(&self, message: &Message) -> Result<(), AppError>;

    /// Every record whose persisted status is `pending` or `processing`,
    /// oldest first. Used once at startup for recovery.
    async fn load_pending_or_processing(&self) -> Result<Vec<Message>, AppError>;
}
