use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use courier_common::error::AppError;
use courier_common::types::{Message, MessageKind, MessagePayload};

use crate::MessageHandler;
use crate::simulation::SimulationProfile;

/// Simulated email relay. Slower than SMS, fails less often.
pub struct EmailHandler {
    profile: SimulationProfile,
}

impl EmailHandler {
    pub fn new() -> Self {
        Self::with_profile(SimulationProfile::email())
    }

    pub fn with_profile(profile: SimulationProfile) -> Self {
        Self { profile }
    }
}

impl Default for EmailHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageHandler for EmailHandler {
    fn kind(&self) -> MessageKind {
        MessageKind::Email
    }

    fn name(&self) -> &'static str {
        "Email relay"
    }

    async fn process(
        &self,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<bool, AppError> {
        let MessagePayload::Email(email) = &message.payload else {
            tracing::error!(
                message_id = %message.id,
                kind = %message.kind(),
                "Invalid message kind for Email handler"
            );
            return Ok(false);
        };

        tracing::info!(
            message_id = %message.id,
            to = %email.to,
            from = email.from.as_deref().unwrap_or("default"),
            "Sending email"
        );

        self.profile.simulate(cancel).await?;

        tracing::info!(message_id = %message.id, "Email sent");
        Ok(true)
    }
}
