use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::{
    banned_words, blocked_users, channel_members, channels, chat_bans, chat_preferences,
    chat_requests, message_reactions, messages, unban_requests,
};

/// Placeholder content stored and served for soft-deleted messages. The
/// original text moves to `original_content` for moderator audit only.
pub const REDACTED_CONTENT: &str = "[message removed]";

// --- Channel ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Global,
    Group,
    Private,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Global => "global",
            ChannelType::Group => "group",
            ChannelType::Private => "private",
        }
    }
}

/// Normalized key for the unordered user pair of a private channel.
/// Order-independent so (a, b) and (b, a) map to the same channel row.
pub fn private_pair_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = channels)]
pub struct Channel {
    pub id: Uuid,
    pub channel_type: String,
    pub name: Option<String>,
    pub is_global: bool,
    #[serde(skip_serializing)]
    pub private_key: Option<String>,
    pub created_by: Option<Uuid>,
    pub is_active: bool,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = channels)]
pub struct NewChannel {
    pub channel_type: String,
    pub name: Option<String>,
    pub is_global: bool,
    pub private_key: Option<String>,
    pub created_by: Option<Uuid>,
}

// --- ChannelMember ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = channel_members)]
pub struct ChannelMember {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub unread_count: i32,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = channel_members)]
pub struct NewChannelMember {
    pub channel_id: Uuid,
    pub user_id: Uuid,
}

// --- Message ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    File,
    DealShare,
    System,
    Ping,
    Gif,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
            MessageType::DealShare => "deal_share",
            MessageType::System => "system",
            MessageType::Ping => "ping",
            MessageType::Gif => "gif",
        }
    }

    /// The message type selects which metadata shape is valid. Structured
    /// data never rides inside `content`.
    pub fn validate_metadata(&self, metadata: Option<&serde_json::Value>) -> Result<(), String> {
        let field = match self {
            MessageType::Gif => Some("gif_url"),
            MessageType::DealShare => Some("deal_id"),
            MessageType::Image | MessageType::File => Some("url"),
            MessageType::Text | MessageType::System | MessageType::Ping => None,
        };

        match field {
            None => Ok(()),
            Some(field) => {
                let present = metadata
                    .and_then(|m| m.get(field))
                    .map(|v| match v {
                        serde_json::Value::String(s) => !s.is_empty(),
                        serde_json::Value::Null => false,
                        _ => true,
                    })
                    .unwrap_or(false);
                if present {
                    Ok(())
                } else {
                    Err(format!(
                        "{} messages require metadata.{field}",
                        self.as_str()
                    ))
                }
            }
        }
    }

    /// Whether empty text content is acceptable for this type (the payload
    /// lives in metadata).
    pub fn allows_empty_content(&self) -> bool {
        matches!(
            self,
            MessageType::Gif | MessageType::Image | MessageType::File | MessageType::DealShare
        )
    }
}

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = messages)]
pub struct Message {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub message_type: String,
    pub reply_to_id: Option<Uuid>,
    pub mentioned_users: Vec<Uuid>,
    pub metadata: Option<serde_json::Value>,
    pub is_deleted: bool,
    #[serde(skip_serializing)]
    pub deleted_reason: Option<String>,
    #[serde(skip_serializing)]
    pub original_content: Option<String>,
    pub edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// GIF URL for this message. Canonical location is `metadata.gif_url`;
    /// rows written by the legacy client embedded a `[GIF: url]` marker in
    /// `content` instead, which is recognized read-only and never written.
    pub fn gif_url(&self) -> Option<String> {
        if let Some(url) = self
            .metadata
            .as_ref()
            .and_then(|m| m.get("gif_url"))
            .and_then(|v| v.as_str())
        {
            return Some(url.to_string());
        }
        let rest = self.content.strip_prefix("[GIF: ")?;
        let url = rest.strip_suffix(']')?;
        if url.is_empty() { None } else { Some(url.to_string()) }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub channel_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub message_type: String,
    pub reply_to_id: Option<Uuid>,
    pub mentioned_users: Vec<Uuid>,
    pub metadata: Option<serde_json::Value>,
}

// --- MessageReaction ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = message_reactions)]
pub struct MessageReaction {
    pub id: Uuid,
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = message_reactions)]
pub struct NewMessageReaction {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
}

// --- ChatRequest ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRequestStatus {
    Pending,
    Accepted,
    Rejected,
    Ignored,
    Expired,
}

impl ChatRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRequestStatus::Pending => "pending",
            ChatRequestStatus::Accepted => "accepted",
            ChatRequestStatus::Rejected => "rejected",
            ChatRequestStatus::Ignored => "ignored",
            ChatRequestStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = chat_requests)]
pub struct ChatRequest {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub recipient_id: Uuid,
    pub message: Option<String>,
    pub status: String,
    pub responded_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ChatRequest {
    pub fn is_pending(&self) -> bool {
        self.status == ChatRequestStatus::Pending.as_str()
    }

    /// Lazy expiry: a pending request past its TTL reads as expired without
    /// needing a background sweep. Treated as `ignored` for callers,
    /// distinct for audit.
    pub fn effective_status(&self, now: DateTime<Utc>) -> ChatRequestStatus {
        match self.status.as_str() {
            "pending" if now > self.expires_at => ChatRequestStatus::Expired,
            "pending" => ChatRequestStatus::Pending,
            "accepted" => ChatRequestStatus::Accepted,
            "rejected" => ChatRequestStatus::Rejected,
            "ignored" => ChatRequestStatus::Ignored,
            _ => ChatRequestStatus::Expired,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = chat_requests)]
pub struct NewChatRequest {
    pub requester_id: Uuid,
    pub recipient_id: Uuid,
    pub message: Option<String>,
    pub status: String,
    pub expires_at: DateTime<Utc>,
}

// --- ChatBan ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = chat_bans)]
pub struct ChatBan {
    pub id: Uuid,
    pub user_id: Uuid,
    pub channel_id: Option<Uuid>,
    pub banned_by: Uuid,
    pub reason: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatBan {
    pub fn is_global(&self) -> bool {
        self.channel_id.is_none()
    }

    /// Active and not yet expired at `now`.
    pub fn is_in_force(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |exp| exp > now)
    }

    /// Whether this ban prevents sending in `channel_id`. A global ban
    /// covers every channel.
    pub fn covers(&self, channel_id: Uuid, now: DateTime<Utc>) -> bool {
        self.is_in_force(now) && self.channel_id.map_or(true, |c| c == channel_id)
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = chat_bans)]
pub struct NewChatBan {
    pub user_id: Uuid,
    pub channel_id: Option<Uuid>,
    pub banned_by: Uuid,
    pub reason: String,
    pub expires_at: Option<DateTime<Utc>>,
}

// --- UnbanRequest ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnbanRequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl UnbanRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnbanRequestStatus::Pending => "pending",
            UnbanRequestStatus::Approved => "approved",
            UnbanRequestStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = unban_requests)]
pub struct UnbanRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub reason: String,
    pub status: String,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = unban_requests)]
pub struct NewUnbanRequest {
    pub user_id: Uuid,
    pub reason: String,
}

// --- ChatPreferences ---

#[derive(Debug, Queryable, Identifiable, Insertable, Serialize, Clone)]
#[diesel(table_name = chat_preferences, primary_key(user_id))]
pub struct ChatPreferences {
    pub user_id: Uuid,
    pub allow_private_messages: bool,
    pub require_request_for_private: bool,
    pub auto_accept_requests_from_followers: bool,
    pub show_online_status: bool,
    pub notifications_enabled: bool,
    pub sound_enabled: bool,
    pub updated_at: DateTime<Utc>,
}

impl ChatPreferences {
    /// Row created lazily on first read with these defaults.
    pub fn defaults_for(user_id: Uuid) -> Self {
        Self {
            user_id,
            allow_private_messages: true,
            require_request_for_private: true,
            auto_accept_requests_from_followers: false,
            show_online_status: true,
            notifications_enabled: true,
            sound_enabled: true,
            updated_at: Utc::now(),
        }
    }
}

// --- BlockedUser ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = blocked_users)]
pub struct BlockedUser {
    pub id: Uuid,
    pub blocker_id: Uuid,
    pub blocked_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = blocked_users)]
pub struct NewBlockedUser {
    pub blocker_id: Uuid,
    pub blocked_id: Uuid,
}

// --- BannedWord ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = banned_words)]
pub struct BannedWord {
    pub id: Uuid,
    pub word: String,
    pub added_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = banned_words)]
pub struct NewBannedWord {
    pub word: String,
    pub added_by: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn uuid(n: u8) -> Uuid {
        Uuid::from_bytes([n; 16])
    }

    #[test]
    fn pair_key_is_order_independent() {
        let a = uuid(1);
        let b = uuid(2);
        assert_eq!(private_pair_key(a, b), private_pair_key(b, a));
        assert_ne!(private_pair_key(a, b), private_pair_key(a, uuid(3)));
    }

    #[test]
    fn pair_key_of_self_is_stable() {
        let a = uuid(7);
        assert_eq!(private_pair_key(a, a), format!("{a}:{a}"));
    }

    #[test]
    fn gif_metadata_is_required_for_gif_messages() {
        let meta = serde_json::json!({ "gif_url": "https://media.example/g.gif" });
        assert!(MessageType::Gif.validate_metadata(Some(&meta)).is_ok());
        assert!(MessageType::Gif.validate_metadata(None).is_err());
        let empty = serde_json::json!({ "gif_url": "" });
        assert!(MessageType::Gif.validate_metadata(Some(&empty)).is_err());
    }

    #[test]
    fn deal_share_requires_deal_id() {
        let meta = serde_json::json!({ "deal_id": uuid(9).to_string() });
        assert!(MessageType::DealShare.validate_metadata(Some(&meta)).is_ok());
        let wrong = serde_json::json!({ "url": "x" });
        assert!(MessageType::DealShare.validate_metadata(Some(&wrong)).is_err());
    }

    #[test]
    fn text_messages_need_no_metadata() {
        assert!(MessageType::Text.validate_metadata(None).is_ok());
        assert!(!MessageType::Text.allows_empty_content());
        assert!(MessageType::Gif.allows_empty_content());
    }

    fn request_with(status: &str, expires_in: Duration) -> ChatRequest {
        let now = Utc::now();
        ChatRequest {
            id: uuid(1),
            requester_id: uuid(2),
            recipient_id: uuid(3),
            message: None,
            status: status.to_string(),
            responded_at: None,
            expires_at: now + expires_in,
            created_at: now,
        }
    }

    #[test]
    fn pending_request_past_ttl_reads_as_expired() {
        let now = Utc::now();
        let live = request_with("pending", Duration::days(7));
        assert_eq!(live.effective_status(now), ChatRequestStatus::Pending);

        let stale = request_with("pending", Duration::days(-1));
        assert_eq!(stale.effective_status(now), ChatRequestStatus::Expired);
    }

    #[test]
    fn terminal_request_status_is_unaffected_by_ttl() {
        let now = Utc::now();
        let accepted = request_with("accepted", Duration::days(-1));
        assert_eq!(accepted.effective_status(now), ChatRequestStatus::Accepted);
    }

    fn ban(channel_id: Option<Uuid>, expires_in: Option<Duration>, active: bool) -> ChatBan {
        let now = Utc::now();
        ChatBan {
            id: uuid(1),
            user_id: uuid(2),
            channel_id,
            banned_by: uuid(3),
            reason: "spam".to_string(),
            expires_at: expires_in.map(|d| now + d),
            is_active: active,
            created_at: now,
        }
    }

    #[test]
    fn global_ban_covers_every_channel() {
        let now = Utc::now();
        let global = ban(None, None, true);
        assert!(global.covers(uuid(10), now));
        assert!(global.covers(uuid(11), now));
    }

    #[test]
    fn channel_ban_covers_only_its_channel() {
        let now = Utc::now();
        let scoped = ban(Some(uuid(10)), None, true);
        assert!(scoped.covers(uuid(10), now));
        assert!(!scoped.covers(uuid(11), now));
    }

    #[test]
    fn expired_or_lifted_ban_does_not_cover() {
        let now = Utc::now();
        let expired = ban(None, Some(Duration::hours(-1)), true);
        assert!(!expired.covers(uuid(10), now));

        let lifted = ban(None, None, false);
        assert!(!lifted.covers(uuid(10), now));
    }

    #[test]
    fn gif_url_prefers_metadata_over_legacy_marker() {
        let now = Utc::now();
        let mut msg = Message {
            id: uuid(1),
            channel_id: uuid(2),
            sender_id: uuid(3),
            content: "[GIF: https://legacy.example/old.gif]".to_string(),
            message_type: "gif".to_string(),
            reply_to_id: None,
            mentioned_users: vec![],
            metadata: Some(serde_json::json!({ "gif_url": "https://media.example/new.gif" })),
            is_deleted: false,
            deleted_reason: None,
            original_content: None,
            edited_at: None,
            created_at: now,
        };
        assert_eq!(msg.gif_url().as_deref(), Some("https://media.example/new.gif"));

        msg.metadata = None;
        assert_eq!(msg.gif_url().as_deref(), Some("https://legacy.example/old.gif"));

        msg.content = "plain text".to_string();
        assert_eq!(msg.gif_url(), None);
    }
}
