use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Retry budget assigned to a message when the producer does not pick one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Largest retry budget a producer or the configuration may request.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Kinds of outbound notification the queue accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Sms,
    Email,
    PushNotification,
}

impl MessageKind {
    pub const ALL: [MessageKind; 3] = [
        MessageKind::Sms,
        MessageKind::Email,
        MessageKind::PushNotification,
    ];
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Sms => write!(f, "sms"),
            MessageKind::Email => write!(f, "email"),
            MessageKind::PushNotification => write!(f, "push_notification"),
        }
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sms" => Ok(MessageKind::Sms),
            "email" => Ok(MessageKind::Email),
            "push_notification" => Ok(MessageKind::PushNotification),
            other => Err(format!("unknown message kind '{}'", other)),
        }
    }
}

/// Lifecycle status of a message.
///
/// `Pending -> Processing -> Completed | Pending (retry) | Failed`, and
/// `Failed -> Pending` only through an explicit manual retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageStatus::Pending => write!(f, "pending"),
            MessageStatus::Processing => write!(f, "processing"),
            MessageStatus::Completed => write!(f, "completed"),
            MessageStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "processing" => Ok(MessageStatus::Processing),
            "completed" => Ok(MessageStatus::Completed),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(format!("unknown message status '{}'", other)),
        }
    }
}

/// SMS delivery fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmsPayload {
    pub phone_number: String,
    pub text: String,
}

/// Email delivery fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailPayload {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Sender override (provider default when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

/// Push notification delivery fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    pub device_token: String,
    pub title: String,
    pub body: String,
    /// Custom key/value data forwarded to the device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Kind-specific content of a message. The variant is the kind discriminator.
///
/// Serialized with an internal `kind` tag so the persisted JSON is
/// self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePayload {
    Sms(SmsPayload),
    Email(EmailPayload),
    PushNotification(PushPayload),
}

impl MessagePayload {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessagePayload::Sms(_) => MessageKind::Sms,
            MessagePayload::Email(_) => MessageKind::Email,
            MessagePayload::PushNotification(_) => MessageKind::PushNotification,
        }
    }
}

/// The unit of work held by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    /// Set once, when the message is completed
    pub processed_at: Option<DateTime<Utc>>,
    /// Reason given by the most recent failed attempt
    pub last_error: Option<String>,
    /// Number of failed attempts so far
    pub retry_count: u32,
    pub max_retries: u32,
    pub payload: MessagePayload,
}

impl Message {
    /// Create a fresh `Pending` message with the default retry budget.
    pub fn new(payload: MessagePayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: MessageStatus::Pending,
            created_at: Utc::now(),
            processed_at: None,
            last_error: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            payload,
        }
    }

    pub fn sms(phone_number: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(MessagePayload::Sms(SmsPayload {
            phone_number: phone_number.into(),
            text: text.into(),
        }))
    }

    pub fn email(
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::new(MessagePayload::Email(EmailPayload {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            from: None,
        }))
    }

    pub fn push(
        device_token: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::new(MessagePayload::PushNotification(PushPayload {
            device_token: device_token.into(),
            title: title.into(),
            body: body.into(),
            data: None,
        }))
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// True once the failed-attempt count has used up the retry budget.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// One-line human-readable rendering of the message content.
    pub fn content(&self) -> String {
        match &self.payload {
            MessagePayload::Sms(sms) => format!("SMS to {}: {}", sms.phone_number, sms.text),
            MessagePayload::Email(email) => format!("Email to {}: {}", email.to, email.subject),
            MessagePayload::PushNotification(push) => {
                format!("Push to {}: {} - {}", push.device_token, push.title, push.body)
            }
        }
    }
}

/// Point-in-time counts over every queue bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStatistics {
    pub total_messages: usize,
    pub pending_messages: usize,
    pub processing_messages: usize,
    pub completed_messages: usize,
    pub failed_messages: usize,
    /// Message count per kind across all buckets
    pub messages_by_kind: BTreeMap<MessageKind, usize>,
}
