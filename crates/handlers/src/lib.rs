pub mod email;
pub mod push;
pub mod simulation;
pub mod sms;


use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use courier_common::error::AppError;
use courier_common::types::{Message, MessageKind};

pub use simulation::SimulationProfile;

/// Trait that every delivery channel must implement.
///
/// Handlers attempt delivery only. They never write message status; the
/// queue is the sole writer. A message may be handed to `process` more than
/// once (crash recovery, retries), so duplicate attempts must be safe.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// The message kind this handler delivers.
    fn kind(&self) -> MessageKind;

    /// Human-readable name for this handler (e.g., "SMS gateway").
    fn name(&self) -> &'static str;

    /// Attempt delivery.
    ///
    /// `Ok(true)` means delivered, `Ok(false)` is an explicit negative
    /// result and `Err` is a raised fault whose text becomes the failure
    /// reason. Implementations should watch `cancel` during long waits.
    async fn process(&self, message: &Message, cancel: &CancellationToken)
    -> Result<bool, AppError>;
}

/// Registry mapping each message kind to its handler, used by the dispatch loop.
pub struct HandlerRegistry {
    handlers: HashMap<MessageKind, Box<dyn MessageHandler>>,
}

impl HandlerRegistry {
    /// Create a registry with the simulated SMS, Email and Push handlers,
    /// including their random failure injection.
    pub fn new() -> Self {
        Self::simulated(true)
    }

    /// Create a registry with the simulated handlers. When `inject_failures`
    /// is false the handlers keep their latency but always succeed.
    pub fn simulated(inject_failures: bool) -> Self {
        let (sms, email, push) = if inject_failures {
            (
                SimulationProfile::sms(),
                SimulationProfile::email(),
                SimulationProfile::push(),
            )
        } else {
            (
                SimulationProfile::sms().without_failures(),
                SimulationProfile::email().without_failures(),
                SimulationProfile::push().without_failures(),
            )
        };

        Self::empty()
            .with_handler(sms::SmsHandler::with_profile(sms))
            .with_handler(email::EmailHandler::with_profile(email))
            .with_handler(push::PushHandler::with_profile(push))
    }

    /// Create a registry with no handlers. Messages of an unregistered kind
    /// are failed by the dispatch loop.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Builder form of [`HandlerRegistry::register`].
    pub fn with_handler(mut self, handler: impl MessageHandler + 'static) -> Self {
        self.register(handler);
        self
    }

    /// Register a handler for its kind, replacing any earlier registration.
    pub fn register(&mut self, handler: impl MessageHandler + 'static) {
        let kind = handler.kind();
        let name = handler.name();
        if let Some(previous) = self.handlers.insert(kind, Box::new(handler)) {
            tracing::warn!(
                kind = %kind,
                replaced = previous.name(),
                handler = name,
                "Handler replaced"
            );
        } else {
            tracing::debug!(kind = %kind, handler = name, "Handler registered");
        }
    }

    /// Look up the handler for a kind.
    pub fn get(&self, kind: MessageKind) -> Option<&dyn MessageHandler> {
        self.handlers.get(&kind).map(|h| h.as_ref())
    }

    /// Registered kinds, in stable order.
    pub fn kinds(&self) -> Vec<MessageKind> {
        let mut kinds: Vec<MessageKind> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
