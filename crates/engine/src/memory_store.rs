//! In-process message store.
//!
//! Used when no database is configured and by tests. Records live only as
//! long as the process, so recovery after a restart finds nothing.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{Message, MessageStatus};

use crate::store::MessageStore;

#[derive(Default)]
pub struct InMemoryMessageStore {
    records: Mutex<HashMap<Uuid, Message>>,
    fail_writes: AtomicBool,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with records, e.g. left over from a previous run.
    pub fn with_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        let records = messages.into_iter().map(|m| (m.id, m)).collect();
        Self {
            records: Mutex::new(records),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Simulate an outage: while set, `insert` and `update_status` fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Copy of the stored record for `id`.
    pub fn get(&self, id: Uuid) -> Option<Message> {
        self.lock().ok()?.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, Message>>, AppError> {
        self.records
            .lock()
            .map_err(|_| AppError::Persistence("in-memory store lock poisoned".to_string()))
    }

    fn check_writable(&self) -> Result<(), AppError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Persistence("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert(&self, message: &Message) -> Result<(), AppError> {
        self.check_writable()?;
        let mut records = self.lock()?;
        if records.contains_key(&message.id) {
            return Err(AppError::Persistence(format!(
                "message {} already stored",
                message.id
            )));
        }
        records.insert(message.id, message.clone());
        Ok(())
    }

    async fn update_status(&self, message: &Message) -> Result<(), AppError> {
        self.check_writable()?;
        let mut records = self.lock()?;
        let record = records.get_mut(&message.id).ok_or_else(|| {
            AppError::Persistence(format!("message {} has no stored record", message.id))
        })?;
        record.status = message.status;
        record.processed_at = message.processed_at;
        record.last_error = message.last_error.clone();
        record.retry_count = message.retry_count;
        Ok(())
    }

    async fn load_pending_or_processing(&self) -> Result<Vec<Message>, AppError> {
        let records = self.lock()?;
        let mut messages: Vec<Message> = records
            .values()
            .filter(|m| matches!(m.status, MessageStatus::Pending | MessageStatus::Processing))
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_update() {
        let store = InMemoryMessageStore::new();
        let mut message = Message::sms("+15550100", "hi");
        store.insert(&message).await.unwrap();

        message.status = MessageStatus::Failed;
        message.retry_count = 3;
        message.last_error = Some("boom".to_string());
        store.update_status(&message).await.unwrap();

        let stored = store.get(message.id).unwrap();
        assert_eq!(stored.status, MessageStatus::Failed);
        assert_eq!(stored.retry_count, 3);
        assert_eq!(stored.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_duplicate_insert_fails() {
        let store = InMemoryMessageStore::new();
        let message = Message::sms("+15550100", "hi");
        store.insert(&message).await.unwrap();
        assert!(matches!(
            store.insert(&message).await,
            Err(AppError::Persistence(_))
        ));
    }

    #[tokio::test]
    async fn test_update_of_unknown_record_fails() {
        let store = InMemoryMessageStore::new();
        let message = Message::sms("+15550100", "hi");
        assert!(store.update_status(&message).await.is_err());
    }

    #[tokio::test]
    async fn test_fail_writes_toggle() {
        let store = InMemoryMessageStore::new();
        store.set_fail_writes(true);
        let message = Message::email("a@example.com", "s", "b");
        assert!(store.insert(&message).await.is_err());
        assert!(store.is_empty());

        store.set_fail_writes(false);
        store.insert(&message).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_load_filters_terminal_records_and_orders_by_creation() {
        let base = chrono::Utc::now();
        let mut newer = Message::sms("1", "newer");
        newer.created_at = base;
        let mut older = Message::sms("2", "older");
        older.created_at = base - chrono::Duration::seconds(10);
        older.status = MessageStatus::Processing;
        let mut done = Message::sms("3", "done");
        done.status = MessageStatus::Completed;
        let mut dead = Message::sms("4", "dead");
        dead.status = MessageStatus::Failed;

        let store = InMemoryMessageStore::with_messages([newer.clone(), older.clone(), done, dead]);
        let loaded = store.load_pending_or_processing().await.unwrap();
        let ids: Vec<Uuid> = loaded.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![older.id, newer.id]);
    }
}
