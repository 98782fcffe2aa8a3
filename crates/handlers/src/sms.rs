use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use courier_common::error::AppError;
use courier_common::types::{Message, MessageKind, MessagePayload};

use crate::MessageHandler;
use crate::simulation::SimulationProfile;

/// Simulated SMS gateway.
pub struct SmsHandler {
    profile: SimulationProfile,
}

impl SmsHandler {
    pub fn new() -> Self {
        Self::with_profile(SimulationProfile::sms())
    }

    pub fn with_profile(profile: SimulationProfile) -> Self {
        Self { profile }
    }
}

impl Default for SmsHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageHandler for SmsHandler {
    fn kind(&self) -> MessageKind {
        MessageKind::Sms
    }

    fn name(&self) -> &'static str {
        "SMS gateway"
    }

    async fn process(
        &self,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<bool, AppError> {
        let MessagePayload::Sms(sms) = &message.payload else {
            tracing::error!(
                message_id = %message.id,
                kind = %message.kind(),
                "Invalid message kind for SMS handler"
            );
            return Ok(false);
        };

        tracing::info!(
            message_id = %message.id,
            phone_number = %sms.phone_number,
            "Sending SMS"
        );

        self.profile.simulate(cancel).await?;

        tracing::info!(message_id = %message.id, "SMS sent");
        Ok(true)
    }
}
