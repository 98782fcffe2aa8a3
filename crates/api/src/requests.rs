//! Producer request bodies and their validation.

use serde::Deserialize;

use courier_common::error::AppError;
use courier_common::types::{
    EmailPayload, MAX_RETRIES_LIMIT, Message, MessagePayload, PushPayload, SmsPayload,
};

/// POST /api/messages/sms
#[derive(Debug, Deserialize)]
pub struct SmsRequest {
    pub phone_number: String,
    pub text: String,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// POST /api/messages/email
#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub to: String,
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// POST /api/messages/push
#[derive(Debug, Deserialize)]
pub struct PushRequest {
    pub device_token: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub data: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl SmsRequest {
    /// Validate and build a fresh message, falling back to `default_max_retries`.
    pub fn into_message(self, default_max_retries: u32) -> Result<Message, AppError> {
        require_non_empty("phone_number", &self.phone_number)?;
        require_non_empty("text", &self.text)?;
        let max_retries = resolve_max_retries(self.max_retries, default_max_retries)?;

        let payload = MessagePayload::Sms(SmsPayload {
            phone_number: self.phone_number.trim().to_string(),
            text: self.text,
        });
        Ok(Message::new(payload).with_max_retries(max_retries))
    }
}

impl EmailRequest {
    pub fn into_message(self, default_max_retries: u32) -> Result<Message, AppError> {
        let to = self.to.trim();
        if !to.contains('@') {
            return Err(AppError::Validation(format!(
                "to must be an email address, got '{}'",
                to
            )));
        }
        require_non_empty("subject", &self.subject)?;
        if let Some(from) = &self.from {
            if !from.contains('@') {
                return Err(AppError::Validation(format!(
                    "from must be an email address, got '{}'",
                    from
                )));
            }
        }
        let max_retries = resolve_max_retries(self.max_retries, default_max_retries)?;

        let payload = MessagePayload::Email(EmailPayload {
            to: to.to_string(),
            subject: self.subject,
            body: self.body,
            from: self.from,
        });
        Ok(Message::new(payload).with_max_retries(max_retries))
    }
}

impl PushRequest {
    pub fn into_message(self, default_max_retries: u32) -> Result<Message, AppError> {
        require_non_empty("device_token", &self.device_token)?;
        require_non_empty("title", &self.title)?;
        let max_retries = resolve_max_retries(self.max_retries, default_max_retries)?;

        let payload = MessagePayload::PushNotification(PushPayload {
            device_token: self.device_token.trim().to_string(),
            title: self.title,
            body: self.body,
            data: self.data,
        });
        Ok(Message::new(payload).with_max_retries(max_retries))
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn resolve_max_retries(requested: Option<u32>, default: u32) -> Result<u32, AppError> {
    match requested {
        None => Ok(default),
        Some(n) if (1..=MAX_RETRIES_LIMIT).contains(&n) => Ok(n),
        Some(n) => Err(AppError::Validation(format!(
            "max_retries must be between 1 and {}, got {}",
            MAX_RETRIES_LIMIT, n
        ))),
    }
}
