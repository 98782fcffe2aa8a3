use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use courier_common::config::AppConfig;
use courier_common::error::AppError;
use courier_common::types::MessageStatus;
use courier_engine::MessageQueue;
use courier_handlers::HandlerRegistry;

/// Failure reason recorded when a handler returns an explicit negative result.
const NEGATIVE_RESULT_REASON: &str = "processing failed";

/// Result of a single dispatch iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The pending buffer was empty.
    Idle,
    /// The message was delivered.
    Completed(Uuid),
    /// The attempt failed and the message went back to the pending buffer.
    Requeued(Uuid),
    /// The attempt failed and exhausted the retry budget.
    Exhausted(Uuid),
    /// Shutdown interrupted the attempt; the message went back to the head
    /// of the pending buffer with its retry budget untouched.
    Released(Uuid),
    /// The message left the in-flight set before the outcome was reported.
    Skipped(Uuid),
}

/// Single consumer driving messages from pending to a terminal or retried state.
///
/// Exactly one dispatcher may run per queue.
pub struct Dispatcher {
    queue: Arc<MessageQueue>,
    handlers: HandlerRegistry,
    poll_interval: Duration,
    error_backoff: Duration,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<MessageQueue>,
        handlers: HandlerRegistry,
        poll_interval: Duration,
        error_backoff: Duration,
    ) -> Self {
        Self {
            queue,
            handlers,
            poll_interval,
            error_backoff,
        }
    }

    /// Dispatcher with the poll interval and error backoff from configuration.
    pub fn from_config(
        queue: Arc<MessageQueue>,
        handlers: HandlerRegistry,
        config: &AppConfig,
    ) -> Self {
        Self::new(queue, handlers, config.poll_interval(), config.error_backoff())
    }

    /// Run the loop on a tokio task until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Dispatch until `cancel` fires.
    ///
    /// Cancellation is checked at the top of every iteration and during the
    /// idle and backoff waits. A message already handed to a handler is
    /// always reported back to the queue before the loop returns: a handler
    /// that gives up because of the shutdown gets its message released
    /// rather than failed.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            handlers = self.handlers.len(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            error_backoff_ms = self.error_backoff.as_millis() as u64,
            "Dispatcher started"
        );

        while !cancel.is_cancelled() {
            let wait = match self.dispatch_once(&cancel).await {
                Ok(DispatchOutcome::Idle) => self.poll_interval,
                Ok(_) => continue,
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        backoff_ms = self.error_backoff.as_millis() as u64,
                        "Dispatch iteration failed, backing off"
                    );
                    self.error_backoff
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        tracing::info!("Dispatcher stopped");
    }

    /// Take one message from the queue, deliver it and record the outcome.
    ///
    /// Queue errors other than `NotFound` are returned to the caller; the
    /// message involved stays wherever the failed operation left it.
    pub async fn dispatch_once(
        &self,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, AppError> {
        let Some(message) = self.queue.dequeue(cancel).await? else {
            return Ok(DispatchOutcome::Idle);
        };

        let id = message.id;
        let kind = message.kind();

        let Some(handler) = self.handlers.get(kind) else {
            tracing::error!(message_id = %id, kind = %kind, "No handler registered for message kind");
            return self.record_failure(id, format!("no handler for kind {}", kind)).await;
        };

        let started = Instant::now();
        let result = handler.process(&message, cancel).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(true) => {
                tracing::debug!(
                    message_id = %id,
                    handler = handler.name(),
                    elapsed_ms,
                    "Handler delivered message"
                );
                match self.queue.complete(id).await {
                    Ok(_) => Ok(DispatchOutcome::Completed(id)),
                    Err(e) if e.is_not_found() => Ok(skipped(id, &e)),
                    Err(e) => Err(e),
                }
            }
            Ok(false) => {
                tracing::debug!(
                    message_id = %id,
                    handler = handler.name(),
                    elapsed_ms,
                    "Handler reported delivery failure"
                );
                self.record_failure(id, NEGATIVE_RESULT_REASON).await
            }
            Err(e) if cancel.is_cancelled() => {
                tracing::info!(
                    message_id = %id,
                    handler = handler.name(),
                    elapsed_ms,
                    error = %e,
                    "Delivery interrupted by shutdown, releasing message"
                );
                match self.queue.release(id).await {
                    Ok(_) => Ok(DispatchOutcome::Released(id)),
                    Err(e) if e.is_not_found() => Ok(skipped(id, &e)),
                    Err(e) => Err(e),
                }
            }
            Err(e) => {
                tracing::debug!(
                    message_id = %id,
                    handler = handler.name(),
                    elapsed_ms,
                    error = %e,
                    "Handler raised a fault"
                );
                self.record_failure(id, e.to_string()).await
            }
        }
    }

    async fn record_failure(
        &self,
        id: Uuid,
        reason: impl Into<String>,
    ) -> Result<DispatchOutcome, AppError> {
        match self.queue.fail(id, reason).await {
            Ok(message) if message.status == MessageStatus::Failed => {
                Ok(DispatchOutcome::Exhausted(id))
            }
            Ok(_) => Ok(DispatchOutcome::Requeued(id)),
            Err(e) if e.is_not_found() => Ok(skipped(id, &e)),
            Err(e) => Err(e),
        }
    }
}

fn skipped(id: Uuid, reason: &AppError) -> DispatchOutcome {
    tracing::debug!(message_id = %id, reason = %reason, "Message no longer in flight, skipping");
    DispatchOutcome::Skipped(id)
}
