use serde::Serialize;

use murmur_conversations::ChatList;
use murmur_core::config::SyncConfig;
use murmur_core::model::{Conversation, Pagination, UserSummary};
use murmur_messaging::ActiveThread;
use murmur_presence::{OnlineRoster, TypingTracker};

/// In-flight request markers for the rendering layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFlags {
    pub conversations: bool,
    pub more_conversations: bool,
    pub users: bool,
    pub thread: bool,
    pub older_messages: bool,
    pub sending_media: bool,
    pub blocking: bool,
}

/// An immutable view of everything the client knows. The store replaces
/// it wholesale on every change, so a reader's copy never moves under it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSnapshot {
    pub conversations: ChatList,
    pub active: Option<ActiveThread>,
    pub typing: TypingTracker,
    pub online: OnlineRoster,
    pub users: Vec<UserSummary>,
    pub users_pagination: Pagination,
    pub loading: LoadingFlags,
    pub connected: bool,
    /// Last collaborator failure, for display; cleared on the next success
    pub last_error: Option<String>,
}

impl ChatSnapshot {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            conversations: ChatList::new(config.chat_preview_limit),
            active: None,
            typing: TypingTracker::new(config.typing_timeout()),
            online: OnlineRoster::default(),
            users: Vec::new(),
            users_pagination: Pagination::default(),
            loading: LoadingFlags::default(),
            connected: false,
            last_error: None,
        }
    }

    /// Id of the open conversation; `None` when nothing is open or the open
    /// thread has no server id yet.
    pub fn active_chat_id(&self) -> Option<&str> {
        self.active
            .as_ref()
            .map(ActiveThread::chat_id)
            .filter(|id| !id.is_empty())
    }

    pub fn is_active(&self, chat_id: &str) -> bool {
        self.active_chat_id() == Some(chat_id)
    }

    /// Conversations whose counterpart is currently online, most recent first.
    pub fn online_strip(&self, limit: usize) -> Vec<&Conversation> {
        self.conversations
            .online_strip(|id| self.online.is_online(id), limit)
    }

    /// Every counterpart id the roster should track.
    pub fn tracked_users(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .conversations
            .counterpart_ids()
            .map(str::to_string)
            .collect();
        if let Some(id) = self.active.as_ref().and_then(ActiveThread::counterpart_id) {
            if !ids.iter().any(|known| known == id) {
                ids.push(id.to_string());
            }
        }
        ids
    }
}

impl Default for ChatSnapshot {
    fn default() -> Self {
        Self::new(&SyncConfig::default())
    }
}
