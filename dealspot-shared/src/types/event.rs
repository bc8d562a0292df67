use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// RabbitMQ Event envelope wrapping all domain events.
///
/// Routing key format: `dealspot.{domain}.{entity}.{action}`
/// Example: `dealspot.chat.message.sent`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T: Serialize> {
    pub id: Uuid,
    pub source: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub data: T,
}

impl<T: Serialize> Event<T> {
    pub fn new(source: impl Into<String>, event_type: impl Into<String>, data: T) -> Self {
        Self {
            id: Uuid::now_v7(),
            source: source.into(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            correlation_id: None,
            user_id: None,
            data,
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// RabbitMQ routing keys
pub mod routing_keys {
    // Identity events (consumed; published by the identity service)
    pub const IDENTITY_USER_REGISTERED: &str = "dealspot.identity.user.registered";

    // Chat events
    pub const CHAT_MESSAGE_SENT: &str = "dealspot.chat.message.sent";
    pub const CHAT_REQUEST_CREATED: &str = "dealspot.chat.request.created";
    pub const CHAT_REQUEST_RESPONDED: &str = "dealspot.chat.request.responded";

    // Moderation events
    pub const MODERATION_BAN_ISSUED: &str = "dealspot.moderation.ban.issued";
    pub const MODERATION_BAN_LIFTED: &str = "dealspot.moderation.ban.lifted";
}

/// Common event data payloads
pub mod payloads {
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct UserRegistered {
        pub user_id: Uuid,
        pub username: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct MessageSent {
        pub message_id: Uuid,
        pub channel_id: Uuid,
        pub sender_id: Uuid,
        pub mentioned_users: Vec<Uuid>,
        pub content_preview: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ChatRequestCreated {
        pub request_id: Uuid,
        pub requester_id: Uuid,
        pub recipient_id: Uuid,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ChatRequestResponded {
        pub request_id: Uuid,
        pub requester_id: Uuid,
        pub recipient_id: Uuid,
        pub status: String,
        pub channel_id: Option<Uuid>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct BanIssued {
        pub ban_id: Uuid,
        pub user_id: Uuid,
        pub channel_id: Option<Uuid>,
        pub reason: String,
        pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct BanLifted {
        pub ban_id: Uuid,
        pub user_id: Uuid,
    }
}
