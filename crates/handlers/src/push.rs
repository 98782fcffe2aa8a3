use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use courier_common::error::AppError;
use courier_common::types::{Message, MessageKind, MessagePayload};

use crate::MessageHandler;
use crate::simulation::SimulationProfile;

/// Simulated mobile push service.
pub struct PushHandler {
    profile: SimulationProfile,
}

impl PushHandler {
    pub fn new() -> Self {
        Self::with_profile(SimulationProfile::push())
    }

    pub fn with_profile(profile: SimulationProfile) -> Self {
        Self { profile }
    }
}

impl Default for PushHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageHandler for PushHandler {
    fn kind(&self) -> MessageKind {
        MessageKind::PushNotification
    }

    fn name(&self) -> &'static str {
        "Push service"
    }

    async fn process(
        &self,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<bool, AppError> {
        let MessagePayload::PushNotification(push) = &message.payload else {
            tracing::error!(
                message_id = %message.id,
                kind = %message.kind(),
                "Invalid message kind for Push handler"
            );
            return Ok(false);
        };

        tracing::info!(
            message_id = %message.id,
            device_token = %push.device_token,
            data_keys = push.data.as_ref().map(|d| d.len()).unwrap_or(0),
            "Sending push notification"
        );

        self.profile.simulate(cancel).await?;

        tracing::info!(message_id = %message.id, "Push notification sent");
        Ok(true)
    }
}
