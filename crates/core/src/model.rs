//! The in-memory chat model shared by every reconciliation component.
//!
//! All identifiers held here are already normalized (see [`crate::ids`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix marking a client-synthesized (optimistic) message id.
pub const TEMP_ID_PREFIX: &str = "temp_";

/// Control-signal content announcing a block.
pub const BLOCKED_SIGNAL: &str = "blocked";

/// Control-signal content announcing an unblock.
pub const UNBLOCKED_SIGNAL: &str = "unblocked";

/// Preview text shown in the conversation list for image messages.
pub const IMAGE_PREVIEW_TEXT: &str = "📷 Photo";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    Text,
    Image,
    Signal,
}

impl MessageKind {
    /// Map the wire `type` field. Unknown or missing values are text.
    pub fn from_wire(kind: Option<&str>) -> Self {
        match kind.map(|k| k.trim().to_ascii_lowercase()).as_deref() {
            Some("image") => MessageKind::Image,
            Some("system") | Some("signal") | Some("control") => MessageKind::Signal,
            _ => MessageKind::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Signal => "system",
        }
    }
}

/// A block or unblock announcement carried inline as a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSignal {
    Blocked,
    Unblocked,
}

/// A single chat event: text, image or control signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server id, or a `temp_` id for optimistic entries
    pub id: String,

    /// Conversation this message belongs to
    pub chat_id: String,

    /// Normalized sender id; empty when the payload omitted it
    pub sender_id: String,

    /// Text body, or a media reference for images
    pub content: String,

    pub kind: MessageKind,

    /// Explicit authorship flag as sent by the server, if any
    pub is_mine: Option<bool>,

    pub delivered: bool,

    pub read: bool,

    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_temporary(&self) -> bool {
        is_temporary_id(&self.id)
    }

    /// Temporary id for an optimistic text message sent at `at`.
    pub fn temporary_id(at: DateTime<Utc>) -> String {
        format!("{TEMP_ID_PREFIX}{}", at.timestamp_millis())
    }

    /// Temporary id for the `index`-th media preview of one send attempt.
    pub fn temporary_media_id(at: DateTime<Utc>, index: usize) -> String {
        format!("{TEMP_ID_PREFIX}{}_{index}", at.timestamp_millis())
    }

    /// An optimistic text message authored locally.
    pub fn optimistic_text(
        chat_id: &str,
        sender_id: &str,
        content: &str,
        at: DateTime<Utc>,
        delivered: bool,
    ) -> Self {
        Self {
            id: Self::temporary_id(at),
            chat_id: chat_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            kind: MessageKind::Text,
            is_mine: Some(true),
            delivered,
            read: false,
            created_at: at,
        }
    }

    /// An optimistic image preview authored locally.
    pub fn optimistic_image(
        chat_id: &str,
        sender_id: &str,
        preview_ref: &str,
        at: DateTime<Utc>,
        index: usize,
    ) -> Self {
        Self {
            id: Self::temporary_media_id(at, index),
            chat_id: chat_id.to_string(),
            sender_id: sender_id.to_string(),
            content: preview_ref.to_string(),
            kind: MessageKind::Image,
            is_mine: Some(true),
            delivered: false,
            read: false,
            created_at: at,
        }
    }

    /// The block/unblock announcement this message carries, if any.
    pub fn block_signal(&self) -> Option<BlockSignal> {
        if self.kind == MessageKind::Image {
            return None;
        }
        match self.content.trim().to_ascii_lowercase().as_str() {
            BLOCKED_SIGNAL => Some(BlockSignal::Blocked),
            UNBLOCKED_SIGNAL => Some(BlockSignal::Unblocked),
            _ => None,
        }
    }

    /// One-line text shown in the conversation list.
    pub fn preview_text(&self) -> String {
        match self.kind {
            MessageKind::Image => IMAGE_PREVIEW_TEXT.to_string(),
            _ => self.content.clone(),
        }
    }
}

pub fn is_temporary_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockedBy {
    Me,
    Them,
}

impl BlockedBy {
    pub fn from_wire(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "me" => Some(BlockedBy::Me),
            "them" => Some(BlockedBy::Them),
            _ => None,
        }
    }
}

/// Blocked/blocking relationship of a conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockState {
    pub is_blocked: bool,
    pub blocked_by: Option<BlockedBy>,
}

impl BlockState {
    pub const NONE: BlockState = BlockState {
        is_blocked: false,
        blocked_by: None,
    };

    pub fn blocked_by(by: BlockedBy) -> Self {
        Self {
            is_blocked: true,
            blocked_by: Some(by),
        }
    }

    /// Build from the list payload's `isBlocked` / `blockedBy` pair.
    pub fn from_wire(is_blocked: bool, blocked_by: Option<&str>) -> Self {
        if !is_blocked {
            return Self::NONE;
        }
        Self {
            is_blocked: true,
            blocked_by: blocked_by.and_then(BlockedBy::from_wire),
        }
    }

    pub fn blocked_by_me(&self) -> bool {
        self.is_blocked && self.blocked_by == Some(BlockedBy::Me)
    }

    pub fn blocked_by_them(&self) -> bool {
        self.is_blocked && self.blocked_by == Some(BlockedBy::Them)
    }
}

/// The other participant of a one-to-one conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counterpart {
    pub id: String,
    pub full_name: Option<String>,
    pub avatar: Option<String>,
}

impl Counterpart {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or(&self.id)
    }
}

/// Pagination cursor reported by the API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(default, alias = "currentPage")]
    pub page: u32,
    #[serde(default)]
    pub total_pages: u32,
}

impl Pagination {
    pub fn has_more(&self) -> bool {
        self.page < self.total_pages
    }

    pub fn next_page(&self) -> u32 {
        self.page.saturating_add(1)
    }
}

/// A one-to-one conversation and its loaded working set of messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Server id; empty for a locally synthesized conversation
    pub id: String,
    pub counterpart: Option<Counterpart>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread: u32,
    pub block: BlockState,
    pub messages: Vec<Message>,
}

impl Conversation {
    /// A conversation the user started before the server assigned an id.
    pub fn synthesized(counterpart: Counterpart) -> Self {
        Self {
            counterpart: Some(counterpart),
            ..Self::default()
        }
    }

    pub fn is_synthesized(&self) -> bool {
        self.id.is_empty()
    }

    pub fn counterpart_id(&self) -> Option<&str> {
        self.counterpart
            .as_ref()
            .map(|c| c.id.as_str())
            .filter(|id| !id.is_empty())
    }

    /// Newest message of the working set.
    pub fn latest_message(&self) -> Option<&Message> {
        self.messages.iter().max_by_key(|m| m.created_at)
    }
}

/// A user entry from the paginated user directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub full_name: Option<String>,
    pub avatar: Option<String>,
}

impl From<&UserSummary> for Counterpart {
    fn from(user: &UserSummary) -> Self {
        Self {
            id: user.id.clone(),
            full_name: user.full_name.clone(),
            avatar: user.avatar.clone(),
        }
    }
}
