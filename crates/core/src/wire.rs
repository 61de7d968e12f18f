//! Payloads received from the push channel and the request/response API.
//!
//! Every field is optional on the wire. Missing or malformed fields fall back
//! to empty containers and `false` flags instead of failing the whole payload.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::ids::IdRef;
use crate::model::{
    BlockState, BlockedBy, Conversation, Counterpart, Message, MessageKind, Pagination,
    UserSummary,
};

/// Accept RFC 3339 strings or epoch milliseconds; anything else is `None`.
fn lenient_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => match DateTime::parse_from_rfc3339(&s) {
            Ok(dt) => Some(dt.with_timezone(&Utc)),
            Err(e) => {
                warn!(value = %s, error = %e, "ignoring malformed timestamp");
                None
            }
        },
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Some(other) => {
            warn!(value = %other, "ignoring non-timestamp value");
            None
        }
    })
}

/// Accept a number or a numeric string; anything else is zero.
fn lenient_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64().map(|n| n.min(u64::from(u32::MAX)) as u32),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .unwrap_or(0))
}

/// Accept a boolean; `null` and anything else is `false`.
fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(matches!(value, Some(Value::Bool(true))))
}

/// A message as sent by the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessagePayload {
    #[serde(rename = "_id")]
    pub id: IdRef,
    #[serde(alias = "chatId")]
    pub chat: IdRef,
    pub sender: IdRef,
    pub content: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub is_my_msg: Option<bool>,
    pub is_delivered: Option<bool>,
    pub is_read: Option<bool>,
    #[serde(deserialize_with = "lenient_datetime")]
    pub created_at: Option<DateTime<Utc>>,
}

impl MessagePayload {
    /// Convert into the domain model. `fallback_chat_id` is used when the
    /// payload does not name its conversation; `now` when it has no time.
    pub fn to_message(&self, fallback_chat_id: &str, now: DateTime<Utc>) -> Message {
        let chat_id = match self.chat.normalized() {
            id if id.is_empty() => fallback_chat_id.to_string(),
            id => id,
        };
        let read = self.is_read.unwrap_or(false);
        Message {
            id: self.id.normalized(),
            chat_id,
            sender_id: self.sender.normalized(),
            content: self.content.clone().unwrap_or_default(),
            kind: MessageKind::from_wire(self.kind.as_deref()),
            is_mine: self.is_my_msg,
            delivered: read || self.is_delivered.unwrap_or(false),
            read,
            created_at: self.created_at.unwrap_or(now),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawUser {
    #[serde(rename = "_id")]
    id: IdRef,
    full_name: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    profile_picture: Option<String>,
}

/// A user reference: either populated or a bare id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", rename_all = "camelCase")]
pub struct UserPayload {
    #[serde(rename = "_id")]
    pub id: IdRef,
    pub full_name: Option<String>,
    pub profile_picture: Option<String>,
}

impl From<Value> for UserPayload {
    fn from(value: Value) -> Self {
        if !value.is_object() {
            return Self {
                id: IdRef::from_value(value),
                ..Self::default()
            };
        }
        let raw: RawUser = serde_json::from_value(value).unwrap_or_default();
        let full_name = raw.full_name.filter(|n| !n.trim().is_empty()).or_else(|| {
            let joined = [raw.first_name, raw.last_name]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            (!joined.trim().is_empty()).then_some(joined)
        });
        Self {
            id: raw.id,
            full_name,
            profile_picture: raw.profile_picture,
        }
    }
}

impl UserPayload {
    pub fn to_counterpart(&self) -> Counterpart {
        Counterpart {
            id: self.id.normalized(),
            full_name: self.full_name.clone(),
            avatar: self.profile_picture.clone(),
        }
    }

    pub fn to_summary(&self) -> UserSummary {
        UserSummary {
            id: self.id.normalized(),
            full_name: self.full_name.clone(),
            avatar: self.profile_picture.clone(),
        }
    }
}

/// A conversation as returned by the list endpoint and the `new-chat` push.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatPayload {
    #[serde(rename = "_id")]
    pub id: IdRef,
    pub to: Option<UserPayload>,
    pub messages: Vec<MessagePayload>,
    #[serde(deserialize_with = "lenient_count")]
    pub unread_messages_count: u32,
    #[serde(deserialize_with = "lenient_datetime")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient_bool")]
    pub is_blocked: bool,
    pub blocked_by: Option<String>,
}

impl ChatPayload {
    pub fn to_conversation(&self, now: DateTime<Utc>) -> Conversation {
        let id = self.id.normalized();
        let messages: Vec<Message> = self
            .messages
            .iter()
            .map(|m| m.to_message(&id, now))
            .collect();
        let last_message_at = self
            .last_message_at
            .or_else(|| messages.iter().map(|m| m.created_at).max());
        Conversation {
            id,
            counterpart: self.to.as_ref().map(UserPayload::to_counterpart),
            last_message_at,
            unread: self.unread_messages_count,
            block: BlockState::from_wire(self.is_blocked, self.blocked_by.as_deref()),
            messages,
        }
    }
}

/// The single-conversation fetch. Block flags arrive under their own names
/// and are mapped into [`BlockState`]; "blocked by me" wins if both are set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatDetailPayload {
    #[serde(flatten)]
    pub chat: ChatPayload,
    #[serde(alias = "blockedByMe", deserialize_with = "lenient_bool")]
    pub is_blocked_by_me: bool,
    #[serde(alias = "hasBlockedMe", deserialize_with = "lenient_bool")]
    pub is_blocked_by_them: bool,
}

impl ChatDetailPayload {
    pub fn block_state(&self) -> BlockState {
        if self.is_blocked_by_me {
            BlockState::blocked_by(BlockedBy::Me)
        } else if self.is_blocked_by_them {
            BlockState::blocked_by(BlockedBy::Them)
        } else {
            BlockState::from_wire(self.chat.is_blocked, self.chat.blocked_by.as_deref())
        }
    }

    pub fn to_conversation(&self, now: DateTime<Utc>) -> Conversation {
        Conversation {
            block: self.block_state(),
            ..self.chat.to_conversation(now)
        }
    }
}

/// One page of a paginated listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default, alias = "data", alias = "chats", alias = "messages", alias = "users")]
    pub items: Vec<T>,
    #[serde(default)]
    pub pagination: Pagination,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page: u32, total_pages: u32) -> Self {
        Self {
            items,
            pagination: Pagination { page, total_pages },
        }
    }
}

/// `message-delivered` push payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliveredPayload {
    #[serde(alias = "chat")]
    pub chat_id: IdRef,
    #[serde(deserialize_with = "lenient_datetime")]
    pub delivered_at: Option<DateTime<Utc>>,
}

/// `messages-seen` push payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SeenPayload {
    #[serde(alias = "chat")]
    pub chat_id: IdRef,
    #[serde(deserialize_with = "lenient_datetime")]
    pub seen_at: Option<DateTime<Utc>>,
}

/// `typing` push payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TypingPayload {
    #[serde(alias = "chat")]
    pub chat_id: IdRef,
    #[serde(alias = "user")]
    pub user_id: IdRef,
}

/// `stop-typing` push payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StopTypingPayload {
    #[serde(alias = "chat")]
    pub chat_id: IdRef,
}

/// Result of a block/unblock request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlockActionPayload {
    #[serde(alias = "chat")]
    pub chat_id: IdRef,
    #[serde(alias = "user", alias = "blockedUser")]
    pub user_id: IdRef,
    /// The control-signal message the server inserted, if it returned one
    pub message: Option<MessagePayload>,
}
