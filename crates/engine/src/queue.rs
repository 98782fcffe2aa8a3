//! Message queue: in-memory buffers plus the lifecycle state machine.
//!
//! A message lives in exactly one of four buckets:
//!
//! - **pending**: FIFO buffer of messages waiting for the dispatch loop
//! - **in-flight**: dequeued, handler attempt under way
//! - **completed**: delivered
//! - **failed**: retry budget exhausted, waiting for a manual retry or a clear
//!
//! Every operation runs under one async mutex, and each mutating operation
//! writes the store while holding it. The new record is built first and
//! persisted before any bucket changes, so a store failure leaves the queue
//! exactly as it was. Store latency therefore gates throughput; with a
//! single consumer that is acceptable.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{Message, MessageStatus, QueueStatistics};

use crate::store::MessageStore;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Message>,
    in_flight: HashMap<Uuid, Message>,
    completed: HashMap<Uuid, Message>,
    failed: HashMap<Uuid, Message>,
}

impl QueueState {
    fn find(&self, id: Uuid) -> Option<&Message> {
        self.pending
            .iter()
            .find(|m| m.id == id)
            .or_else(|| self.in_flight.get(&id))
            .or_else(|| self.completed.get(&id))
            .or_else(|| self.failed.get(&id))
    }

    fn all(&self) -> impl Iterator<Item = &Message> {
        self.pending
            .iter()
            .chain(self.in_flight.values())
            .chain(self.completed.values())
            .chain(self.failed.values())
    }
}

/// Single-consumer durable work queue.
///
/// Construct once at startup (normally through [`MessageQueue::recover`]),
/// wrap in an `Arc`, and share between the HTTP surface and the dispatch loop.
pub struct MessageQueue {
    store: Arc<dyn MessageStore>,
    state: Mutex<QueueState>,
}

impl MessageQueue {
    /// Queue with empty buckets. Use for a store known to hold no
    /// unfinished work.
    pub fn empty(store: Arc<dyn MessageStore>) -> Self {
        Self {
            store,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Rebuild the pending buffer from the store's non-terminal records.
    ///
    /// Records persisted as `processing` were interrupted mid-attempt by the
    /// previous run and are requeued as `pending`; they may be delivered twice.
    pub async fn recover(store: Arc<dyn MessageStore>) -> Result<Self, AppError> {
        let records = store.load_pending_or_processing().await?;

        let mut pending = VecDeque::with_capacity(records.len());
        let mut seen = HashSet::with_capacity(records.len());
        let mut interrupted = 0usize;

        for mut message in records {
            match message.status {
                MessageStatus::Pending => {}
                MessageStatus::Processing => interrupted += 1,
                MessageStatus::Completed | MessageStatus::Failed => {
                    tracing::warn!(
                        message_id = %message.id,
                        status = %message.status,
                        "Store returned a terminal record for recovery, ignoring"
                    );
                    continue;
                }
            }
            if !seen.insert(message.id) {
                continue;
            }
            message.status = MessageStatus::Pending;
            pending.push_back(message);
        }

        tracing::info!(
            recovered = pending.len(),
            interrupted,
            "Loaded unfinished messages from store into queue"
        );

        Ok(Self {
            store,
            state: Mutex::new(QueueState {
                pending,
                ..QueueState::default()
            }),
        })
    }

    /// Persist a new message, then append it to the pending buffer.
    ///
    /// The message must be `Pending` with no failed attempts and an id the
    /// queue has not seen. If the store write fails the message is not
    /// buffered.
    pub async fn enqueue(&self, message: Message) -> Result<(), AppError> {
        if message.status != MessageStatus::Pending {
            return Err(AppError::Validation(format!(
                "message {} must be pending to enqueue, found {}",
                message.id, message.status
            )));
        }
        if message.retry_count != 0 {
            return Err(AppError::Validation(format!(
                "message {} must have no failed attempts to enqueue",
                message.id
            )));
        }

        let mut state = self.state.lock().await;

        if state.find(message.id).is_some() {
            return Err(AppError::Validation(format!(
                "message {} is already queued",
                message.id
            )));
        }

        self.store.insert(&message).await?;

        tracing::info!(
            message_id = %message.id,
            kind = %message.kind(),
            max_retries = message.max_retries,
            "Message enqueued"
        );

        state.pending.push_back(message);
        Ok(())
    }

    /// Take the head of the pending buffer and mark it in flight.
    ///
    /// Returns `Ok(None)` when the buffer is empty or `cancel` has fired;
    /// never waits for work to arrive. If the `processing` status cannot be
    /// persisted the message stays at the head of the buffer.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Result<Option<Message>, AppError> {
        if cancel.is_cancelled() {
            return Ok(None);
        }

        let mut state = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            state = self.state.lock() => state,
        };

        let Some(head) = state.pending.front() else {
            return Ok(None);
        };

        let mut message = head.clone();
        message.status = MessageStatus::Processing;
        self.store.update_status(&message).await?;

        state.pending.pop_front();
        state.in_flight.insert(message.id, message.clone());

        tracing::info!(
            message_id = %message.id,
            kind = %message.kind(),
            retry_count = message.retry_count,
            "Message dequeued for processing"
        );

        Ok(Some(message))
    }

    /// Copy of the head of the pending buffer.
    pub async fn peek(&self) -> Option<Message> {
        self.state.lock().await.pending.front().cloned()
    }

    /// Number of pending messages.
    pub async fn size(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Pending messages in dispatch order.
    pub async fn list_pending(&self) -> Vec<Message> {
        self.state.lock().await.pending.iter().cloned().collect()
    }

    /// Failed messages, oldest first.
    pub async fn list_failed(&self) -> Vec<Message> {
        let state = self.state.lock().await;
        let mut failed: Vec<Message> = state.failed.values().cloned().collect();
        failed.sort_by_key(|m| m.created_at);
        failed
    }

    /// Copy of the message with `id`, whichever bucket holds it.
    pub async fn find(&self, id: Uuid) -> Option<Message> {
        self.state.lock().await.find(id).cloned()
    }

    /// Mark an in-flight message delivered.
    ///
    /// `NotFound` when `id` is not in flight; callers treat that as a benign
    /// race.
    pub async fn complete(&self, id: Uuid) -> Result<Message, AppError> {
        let mut state = self.state.lock().await;

        let mut message = state
            .in_flight
            .get(&id)
            .cloned()
            .ok_or_else(|| not_in_flight(id))?;

        message.status = MessageStatus::Completed;
        message.processed_at = Some(Utc::now());
        self.store.update_status(&message).await?;

        state.in_flight.remove(&id);
        state.completed.insert(id, message.clone());

        tracing::info!(
            message_id = %id,
            kind = %message.kind(),
            retry_count = message.retry_count,
            "Message marked as completed"
        );

        Ok(message)
    }

    /// Record a failed attempt for an in-flight message.
    ///
    /// The message goes back to the tail of the pending buffer while it has
    /// retry budget left, otherwise to the failed bucket. The returned copy
    /// carries the resulting status.
    pub async fn fail(&self, id: Uuid, reason: impl Into<String>) -> Result<Message, AppError> {
        let reason = reason.into();
        let mut state = self.state.lock().await;

        let mut message = state
            .in_flight
            .get(&id)
            .cloned()
            .ok_or_else(|| not_in_flight(id))?;

        message.retry_count = message.retry_count.saturating_add(1);
        message.last_error = Some(reason.clone());
        message.status = if message.retries_exhausted() {
            MessageStatus::Failed
        } else {
            MessageStatus::Pending
        };
        self.store.update_status(&message).await?;

        state.in_flight.remove(&id);

        if message.status == MessageStatus::Failed {
            tracing::error!(
                message_id = %id,
                kind = %message.kind(),
                retry_count = message.retry_count,
                error = %reason,
                "Message failed permanently"
            );
            state.failed.insert(id, message.clone());
        } else {
            tracing::warn!(
                message_id = %id,
                kind = %message.kind(),
                retry_count = message.retry_count,
                max_retries = message.max_retries,
                error = %reason,
                "Message failed, requeued for retry"
            );
            state.pending.push_back(message.clone());
        }

        Ok(message)
    }

    /// Return an in-flight message to the head of the pending buffer without
    /// counting an attempt. Used when delivery was interrupted by shutdown
    /// rather than failed by the channel.
    pub async fn release(&self, id: Uuid) -> Result<Message, AppError> {
        let mut state = self.state.lock().await;

        let mut message = state
            .in_flight
            .get(&id)
            .cloned()
            .ok_or_else(|| not_in_flight(id))?;

        message.status = MessageStatus::Pending;
        self.store.update_status(&message).await?;

        state.in_flight.remove(&id);
        state.pending.push_front(message.clone());

        tracing::info!(
            message_id = %id,
            kind = %message.kind(),
            retry_count = message.retry_count,
            "Message released back to queue"
        );

        Ok(message)
    }

    /// Move a failed message back to the pending tail with a fresh retry budget.
    ///
    /// `NotFound` when `id` is not in the failed bucket.
    pub async fn retry(&self, id: Uuid) -> Result<Message, AppError> {
        let mut state = self.state.lock().await;

        let mut message = state
            .failed
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Message {} is not in the failed set", id)))?;

        message.status = MessageStatus::Pending;
        message.retry_count = 0;
        message.last_error = None;
        self.store.update_status(&message).await?;

        state.failed.remove(&id);
        state.pending.push_back(message.clone());

        tracing::info!(message_id = %id, kind = %message.kind(), "Message retried");

        Ok(message)
    }

    /// Drop every failed message from memory. Stored records are kept.
    /// Returns how many were removed.
    pub async fn clear_failed(&self) -> usize {
        let mut state = self.state.lock().await;
        let cleared = state.failed.len();
        state.failed.clear();

        tracing::info!(cleared, "Failed messages cleared");
        cleared
    }

    /// Bucket counts and per-kind breakdown from one consistent snapshot.
    pub async fn statistics(&self) -> QueueStatistics {
        let state = self.state.lock().await;

        let mut messages_by_kind = BTreeMap::new();
        for message in state.all() {
            *messages_by_kind.entry(message.kind()).or_insert(0) += 1;
        }

        let pending_messages = state.pending.len();
        let processing_messages = state.in_flight.len();
        let completed_messages = state.completed.len();
        let failed_messages = state.failed.len();

        QueueStatistics {
            total_messages: pending_messages
                + processing_messages
                + completed_messages
                + failed_messages,
            pending_messages,
            processing_messages,
            completed_messages,
            failed_messages,
            messages_by_kind,
        }
    }
}

fn not_in_flight(id: Uuid) -> AppError {
    AppError::NotFound(format!("Message {} is not in flight", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_common::types::MessageKind;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::memory_store::InMemoryMessageStore;

    fn setup() -> (Arc<InMemoryMessageStore>, MessageQueue) {
        let store = Arc::new(InMemoryMessageStore::new());
        let queue = MessageQueue::empty(store.clone());
        (store, queue)
    }

    /// Every bucket holding `id`, by name.
    async fn buckets_of(queue: &MessageQueue, id: Uuid) -> Vec<&'static str> {
        let state = queue.state.lock().await;
        let mut found = Vec::new();
        for _ in state.pending.iter().filter(|m| m.id == id) {
            found.push("pending");
        }
        if state.in_flight.contains_key(&id) {
            found.push("in_flight");
        }
        if state.completed.contains_key(&id) {
            found.push("completed");
        }
        if state.failed.contains_key(&id) {
            found.push("failed");
        }
        found
    }

    async fn dequeue(queue: &MessageQueue) -> Message {
        queue
            .dequeue(&CancellationToken::new())
            .await
            .unwrap()
            .expect("pending message")
    }

    // ============================================================
    // enqueue / dequeue
    // ============================================================

    #[tokio::test]
    async fn test_enqueue_persists_then_buffers() {
        let (store, queue) = setup();
        let message = Message::sms("+15550100", "hi");
        let id = message.id;

        queue.enqueue(message).await.unwrap();

        assert_eq!(queue.size().await, 1);
        assert_eq!(queue.peek().await.unwrap().id, id);
        assert_eq!(store.get(id).unwrap().status, MessageStatus::Pending);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_non_fresh_messages() {
        let (_store, queue) = setup();

        let mut processing = Message::sms("1", "t");
        processing.status = MessageStatus::Processing;
        assert!(matches!(
            queue.enqueue(processing).await,
            Err(AppError::Validation(_))
        ));

        let mut retried = Message::sms("1", "t");
        retried.retry_count = 1;
        assert!(matches!(
            queue.enqueue(retried).await,
            Err(AppError::Validation(_))
        ));

        let message = Message::sms("1", "t");
        queue.enqueue(message.clone()).await.unwrap();
        assert!(matches!(
            queue.enqueue(message).await,
            Err(AppError::Validation(_))
        ));
        assert_eq!(queue.size().await, 1);
    }

    #[tokio::test]
    async fn test_enqueue_persistence_failure_does_not_buffer() {
        let (store, queue) = setup();
        store.set_fail_writes(true);

        let result = queue.enqueue(Message::email("a@example.com", "s", "b")).await;

        assert!(matches!(result, Err(AppError::Persistence(_))));
        assert_eq!(queue.size().await, 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_dequeue_empty_returns_none() {
        let (_store, queue) = setup();
        let result = queue.dequeue(&CancellationToken::new()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_dequeue_is_fifo_and_marks_processing() {
        let (store, queue) = setup();
        let first = Message::sms("1", "first");
        let second = Message::email("a@example.com", "second", "b");
        queue.enqueue(first.clone()).await.unwrap();
        queue.enqueue(second.clone()).await.unwrap();

        let taken = dequeue(&queue).await;
        assert_eq!(taken.id, first.id);
        assert_eq!(taken.status, MessageStatus::Processing);
        assert_eq!(store.get(first.id).unwrap().status, MessageStatus::Processing);
        assert_eq!(buckets_of(&queue, first.id).await, vec!["in_flight"]);

        assert_eq!(dequeue(&queue).await.id, second.id);
        assert_eq!(queue.statistics().await.processing_messages, 2);
    }

    #[tokio::test]
    async fn test_dequeue_cancelled_has_no_side_effects() {
        let (_store, queue) = setup();
        queue.enqueue(Message::sms("1", "t")).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(queue.dequeue(&cancel).await.unwrap().is_none());
        assert_eq!(queue.size().await, 1);
        assert_eq!(queue.statistics().await.processing_messages, 0);
    }

    #[tokio::test]
    async fn test_dequeue_persistence_failure_keeps_head() {
        let (store, queue) = setup();
        let message = Message::sms("1", "t");
        queue.enqueue(message.clone()).await.unwrap();
        store.set_fail_writes(true);

        let result = queue.dequeue(&CancellationToken::new()).await;

        assert!(matches!(result, Err(AppError::Persistence(_))));
        let head = queue.peek().await.unwrap();
        assert_eq!(head.id, message.id);
        assert_eq!(head.status, MessageStatus::Pending);
        assert_eq!(buckets_of(&queue, message.id).await, vec!["pending"]);
    }

    // ============================================================
    // complete / fail / retry
    // ============================================================

    #[tokio::test]
    async fn test_complete_sets_processed_at() {
        let (store, queue) = setup();
        let message = Message::push("tok", "t", "b");
        queue.enqueue(message.clone()).await.unwrap();
        dequeue(&queue).await;

        let completed = queue.complete(message.id).await.unwrap();

        assert_eq!(completed.status, MessageStatus::Completed);
        assert!(completed.processed_at.is_some());
        assert_eq!(buckets_of(&queue, message.id).await, vec!["completed"]);
        let stored = store.get(message.id).unwrap();
        assert_eq!(stored.status, MessageStatus::Completed);
        assert_eq!(stored.processed_at, completed.processed_at);
    }

    #[tokio::test]
    async fn test_complete_requires_in_flight() {
        let (_store, queue) = setup();
        let message = Message::sms("1", "t");
        queue.enqueue(message.clone()).await.unwrap();

        // Still pending
        assert!(queue.complete(message.id).await.unwrap_err().is_not_found());
        // Unknown id
        assert!(queue.complete(Uuid::new_v4()).await.unwrap_err().is_not_found());

        dequeue(&queue).await;
        queue.complete(message.id).await.unwrap();
        // Already completed
        assert!(queue.complete(message.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_fail_with_budget_left_requeues_at_tail() {
        let (store, queue) = setup();
        let message = Message::sms("1", "t").with_max_retries(3);
        let other = Message::sms("2", "t");
        queue.enqueue(message.clone()).await.unwrap();
        queue.enqueue(other.clone()).await.unwrap();
        dequeue(&queue).await;

        let failed = queue.fail(message.id, "network timeout").await.unwrap();

        assert_eq!(failed.status, MessageStatus::Pending);
        assert_eq!(failed.retry_count, 1);
        assert_eq!(failed.last_error.as_deref(), Some("network timeout"));

        let pending: Vec<Uuid> = queue.list_pending().await.iter().map(|m| m.id).collect();
        assert_eq!(pending, vec![other.id, message.id]);

        let stored = store.get(message.id).unwrap();
        assert_eq!(stored.status, MessageStatus::Pending);
        assert_eq!(stored.retry_count, 1);
    }

    #[tokio::test]
    async fn test_fail_exhausting_budget_moves_to_failed() {
        let (store, queue) = setup();
        let message = Message::email("a@example.com", "s", "b").with_max_retries(2);
        queue.enqueue(message.clone()).await.unwrap();

        dequeue(&queue).await;
        queue.fail(message.id, "first").await.unwrap();
        dequeue(&queue).await;
        let failed = queue.fail(message.id, "second").await.unwrap();

        assert_eq!(failed.status, MessageStatus::Failed);
        assert_eq!(failed.retry_count, 2);
        assert_eq!(buckets_of(&queue, message.id).await, vec!["failed"]);

        let listed = queue.list_failed().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].last_error.as_deref(), Some("second"));
        assert_eq!(store.get(message.id).unwrap().status, MessageStatus::Failed);
    }

    #[tokio::test]
    async fn test_fail_requires_in_flight() {
        let (_store, queue) = setup();
        let err = queue.fail(Uuid::new_v4(), "boom").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_fail_persistence_failure_leaves_message_in_flight() {
        let (store, queue) = setup();
        let message = Message::sms("1", "t");
        queue.enqueue(message.clone()).await.unwrap();
        dequeue(&queue).await;
        store.set_fail_writes(true);

        assert!(queue.fail(message.id, "boom").await.is_err());

        let current = queue.find(message.id).await.unwrap();
        assert_eq!(current.status, MessageStatus::Processing);
        assert_eq!(current.retry_count, 0);
        assert!(current.last_error.is_none());
        assert_eq!(buckets_of(&queue, message.id).await, vec!["in_flight"]);
    }

    #[tokio::test]
    async fn test_release_returns_message_to_head_without_counting_attempt() {
        let (store, queue) = setup();
        let message = Message::sms("1", "t").with_max_retries(1);
        let other = Message::sms("2", "t");
        queue.enqueue(message.clone()).await.unwrap();
        queue.enqueue(other.clone()).await.unwrap();
        dequeue(&queue).await;

        let released = queue.release(message.id).await.unwrap();

        assert_eq!(released.status, MessageStatus::Pending);
        assert_eq!(released.retry_count, 0);
        assert!(released.last_error.is_none());
        let pending: Vec<Uuid> = queue.list_pending().await.iter().map(|m| m.id).collect();
        assert_eq!(pending, vec![message.id, other.id]);
        let stored = store.get(message.id).unwrap();
        assert_eq!(stored.status, MessageStatus::Pending);
        assert_eq!(stored.retry_count, 0);
    }

    #[tokio::test]
    async fn test_release_requires_in_flight_and_persists_first() {
        let (store, queue) = setup();
        let message = Message::sms("1", "t");
        queue.enqueue(message.clone()).await.unwrap();
        assert!(queue.release(message.id).await.unwrap_err().is_not_found());

        dequeue(&queue).await;
        store.set_fail_writes(true);
        assert!(matches!(
            queue.release(message.id).await,
            Err(AppError::Persistence(_))
        ));
        assert_eq!(buckets_of(&queue, message.id).await, vec!["in_flight"]);
    }

    #[tokio::test]
    async fn test_retry_resets_failed_message() {
        let (store, queue) = setup();
        let message = Message::sms("1", "t").with_max_retries(1);
        queue.enqueue(message.clone()).await.unwrap();
        dequeue(&queue).await;
        queue.fail(message.id, "boom").await.unwrap();

        let retried = queue.retry(message.id).await.unwrap();

        assert_eq!(retried.status, MessageStatus::Pending);
        assert_eq!(retried.retry_count, 0);
        assert!(retried.last_error.is_none());
        assert_eq!(buckets_of(&queue, message.id).await, vec!["pending"]);
        let stored = store.get(message.id).unwrap();
        assert_eq!(stored.retry_count, 0);
        assert!(stored.last_error.is_none());
    }

    #[tokio::test]
    async fn test_retry_unknown_id_changes_nothing() {
        let (_store, queue) = setup();
        let message = Message::sms("1", "t");
        queue.enqueue(message.clone()).await.unwrap();
        let before = queue.statistics().await;

        // Pending, not failed
        assert!(queue.retry(message.id).await.unwrap_err().is_not_found());
        assert!(queue.retry(Uuid::new_v4()).await.unwrap_err().is_not_found());

        assert_eq!(queue.statistics().await, before);
        assert_eq!(queue.list_pending().await, vec![message]);
    }

    #[tokio::test]
    async fn test_clear_failed_keeps_store_record() {
        let (store, queue) = setup();
        let message = Message::sms("1", "t").with_max_retries(1);
        queue.enqueue(message.clone()).await.unwrap();
        dequeue(&queue).await;
        queue.fail(message.id, "boom").await.unwrap();

        assert_eq!(queue.clear_failed().await, 1);
        assert!(queue.list_failed().await.is_empty());
        assert!(queue.find(message.id).await.is_none());
        assert_eq!(store.get(message.id).unwrap().status, MessageStatus::Failed);
        assert_eq!(queue.clear_failed().await, 0);
    }

    // ============================================================
    // statistics / recovery
    // ============================================================

    #[tokio::test]
    async fn test_statistics_across_buckets() {
        let (_store, queue) = setup();
        let sms = Message::sms("1", "t");
        let email = Message::email("a@example.com", "s", "b").with_max_retries(1);
        queue.enqueue(sms.clone()).await.unwrap();
        queue.enqueue(email.clone()).await.unwrap();

        dequeue(&queue).await;
        queue.complete(sms.id).await.unwrap();
        dequeue(&queue).await;
        queue.fail(email.id, "bounced").await.unwrap();

        let stats = queue.statistics().await;
        assert_eq!(stats.total_messages, 2);
        assert_eq!(stats.completed_messages, 1);
        assert_eq!(stats.failed_messages, 1);
        assert_eq!(stats.pending_messages, 0);
        assert_eq!(stats.processing_messages, 0);
        assert_eq!(stats.messages_by_kind.get(&MessageKind::Sms), Some(&1));
        assert_eq!(stats.messages_by_kind.get(&MessageKind::Email), Some(&1));
        assert_eq!(stats.messages_by_kind.get(&MessageKind::PushNotification), None);
    }

    #[tokio::test]
    async fn test_recover_requeues_pending_and_processing_only() {
        let base = Utc::now();
        let mut pending = Message::sms("1", "pending");
        pending.created_at = base - chrono::Duration::seconds(5);
        let mut processing = Message::email("a@example.com", "processing", "b");
        processing.status = MessageStatus::Processing;
        processing.retry_count = 1;
        processing.created_at = base - chrono::Duration::seconds(10);
        let mut completed = Message::push("tok", "completed", "b");
        completed.status = MessageStatus::Completed;
        let mut failed = Message::push("tok", "failed", "b");
        failed.status = MessageStatus::Failed;

        let store = Arc::new(InMemoryMessageStore::with_messages([
            pending.clone(),
            processing.clone(),
            completed,
            failed,
        ]));
        let queue = MessageQueue::recover(store).await.unwrap();

        let recovered = queue.list_pending().await;
        let ids: Vec<Uuid> = recovered.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![processing.id, pending.id]);
        assert!(recovered.iter().all(|m| m.status == MessageStatus::Pending));
        // Failed-attempt accounting survives the restart
        assert_eq!(recovered[0].retry_count, 1);
        assert_eq!(queue.statistics().await.total_messages, 2);
    }

    #[tokio::test]
    async fn test_recovered_messages_can_be_dispatched() {
        let mut interrupted = Message::sms("1", "t");
        interrupted.status = MessageStatus::Processing;
        let store = Arc::new(InMemoryMessageStore::with_messages([interrupted.clone()]));
        let queue = MessageQueue::recover(store.clone()).await.unwrap();

        dequeue(&queue).await;
        queue.complete(interrupted.id).await.unwrap();
        assert_eq!(
            store.get(interrupted.id).unwrap().status,
            MessageStatus::Completed
        );
    }

    // ============================================================
    // invariants under random operation sequences
    // ============================================================

    #[tokio::test]
    async fn test_random_operations_preserve_invariants() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let (store, queue) = setup();
        let mut ids: Vec<Uuid> = Vec::new();
        let mut last_retry_count: HashMap<Uuid, u32> = HashMap::new();
        let mut failures_since_reset: HashMap<Uuid, u32> = HashMap::new();
        let cancel = CancellationToken::new();

        for _ in 0..600 {
            let target = if ids.is_empty() {
                None
            } else {
                Some(ids[rng.gen_range(0..ids.len())])
            };
            let mut retried = None;

            match rng.gen_range(0..8) {
                0 => {
                    let message = Message::sms("1", "t").with_max_retries(rng.gen_range(1..4));
                    ids.push(message.id);
                    queue.enqueue(message).await.unwrap();
                }
                1 | 2 => {
                    queue.dequeue(&cancel).await.unwrap();
                }
                3 => {
                    if let Some(id) = target {
                        let _ = queue.complete(id).await;
                    }
                }
                4 | 5 => {
                    if let Some(id) = target {
                        if queue.fail(id, "boom").await.is_ok() {
                            *failures_since_reset.entry(id).or_insert(0) += 1;
                        }
                    }
                }
                6 => {
                    if let Some(id) = target {
                        let _ = queue.release(id).await;
                    }
                }
                _ => {
                    if let Some(id) = target {
                        if queue.retry(id).await.is_ok() {
                            retried = Some(id);
                            failures_since_reset.insert(id, 0);
                        }
                    }
                }
            }

            let state = queue.state.lock().await;
            for id in &ids {
                let copies = state.pending.iter().filter(|m| m.id == *id).count()
                    + usize::from(state.in_flight.contains_key(id))
                    + usize::from(state.completed.contains_key(id))
                    + usize::from(state.failed.contains_key(id));
                assert_eq!(copies, 1, "message {} must be in exactly one bucket", id);

                let message = state.find(*id).unwrap();
                let expected_status = if state.in_flight.contains_key(id) {
                    MessageStatus::Processing
                } else if state.completed.contains_key(id) {
                    MessageStatus::Completed
                } else if state.failed.contains_key(id) {
                    MessageStatus::Failed
                } else {
                    MessageStatus::Pending
                };
                assert_eq!(message.status, expected_status);

                let previous = last_retry_count.insert(*id, message.retry_count).unwrap_or(0);
                if retried == Some(*id) {
                    assert_eq!(message.retry_count, 0);
                } else {
                    assert!(message.retry_count >= previous, "retry_count decreased");
                }

                let failures = failures_since_reset.get(id).copied().unwrap_or(0);
                assert_eq!(message.retry_count, failures);
                assert_eq!(
                    state.failed.contains_key(id),
                    failures >= message.max_retries,
                    "failed bucket iff retry budget exhausted"
                );

                assert_eq!(store.get(*id).unwrap().status, message.status);
            }
        }
    }
}
