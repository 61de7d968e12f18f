//! The conversation list: most recently active first, with unread
//! counters and a short working set of messages per conversation for
//! previews and receipt ticks.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use murmur_core::ids::same_id;
use murmur_core::model::{BlockState, Conversation, Counterpart, Message, Pagination};
use murmur_messaging::{mark_up_to, reconcile, BlockTarget, OwnershipResolver, StatusUpdate};

/// Outcome of folding an incoming message into the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incoming {
    /// The conversation was unknown and has been created at the front
    Created,
    /// An existing conversation was updated and moved to the front
    Updated,
    /// The message named no conversation or carried no id
    Ignored,
}

/// Last-message summary shown under a conversation's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preview {
    pub text: String,
    pub is_mine: bool,
    pub at: DateTime<Utc>,
    pub delivered: bool,
    pub read: bool,
}

/// Preview of the newest loaded message of `conversation`.
pub fn preview(conversation: &Conversation, resolver: &OwnershipResolver) -> Option<Preview> {
    conversation.latest_message().map(|m| Preview {
        text: m.preview_text(),
        is_mine: resolver.is_mine(m),
        at: m.created_at,
        delivered: m.delivered,
        read: m.read,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatList {
    conversations: Vec<Conversation>,
    pagination: Pagination,
    search: String,
    #[serde(skip)]
    preview_limit: usize,
    /// Message ids already folded in, per conversation. Outlives the
    /// working set so redeliveries of trimmed messages stay uncounted.
    #[serde(skip)]
    seen: BTreeMap<String, BTreeSet<String>>,
}

impl Default for ChatList {
    fn default() -> Self {
        Self::new(10)
    }
}

impl ChatList {
    /// `preview_limit` caps how many messages each conversation keeps.
    pub fn new(preview_limit: usize) -> Self {
        Self {
            conversations: Vec::new(),
            pagination: Pagination::default(),
            search: String::new(),
            preview_limit: preview_limit.max(1),
            seen: BTreeMap::new(),
        }
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn pagination(&self) -> Pagination {
        self.pagination
    }

    pub fn has_more(&self) -> bool {
        self.pagination.has_more()
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn get(&self, chat_id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| same_id(&c.id, chat_id))
    }

    pub fn find_by_counterpart(&self, user_id: &str) -> Option<&Conversation> {
        self.conversations
            .iter()
            .find(|c| c.counterpart_id().is_some_and(|id| same_id(id, user_id)))
    }

    fn position(&self, chat_id: &str) -> Option<usize> {
        self.conversations.iter().position(|c| same_id(&c.id, chat_id))
    }

    /// Record `message_id` for `chat_id`. Returns false if it was already known.
    fn remember(&mut self, chat_id: &str, message_id: &str) -> bool {
        self.seen
            .entry(chat_id.to_string())
            .or_default()
            .insert(message_id.to_string())
    }

    fn remember_all(&mut self, conversation: &Conversation) {
        let known = conversation
            .messages
            .iter()
            .filter(|m| !m.id.is_empty() && !m.is_temporary());
        for message in known {
            self.remember(&conversation.id, &message.id);
        }
    }

    fn trim_working_set(&self, messages: &mut Vec<Message>) {
        messages.sort_by_key(|m| m.created_at);
        if messages.len() > self.preview_limit {
            let excess = messages.len() - self.preview_limit;
            messages.drain(..excess);
        }
    }

    /// Fold a pushed message into its conversation and move it to the front.
    ///
    /// Unread is bumped only for the first delivery of a counterpart message
    /// while the conversation is not the active one; the active conversation
    /// is held at zero.
    pub fn apply_incoming(
        &mut self,
        message: Message,
        active_chat_id: Option<&str>,
        resolver: &OwnershipResolver,
        window: Duration,
    ) -> Incoming {
        let chat_id = message.chat_id.clone();
        if chat_id.is_empty() {
            warn!(message_id = %message.id, "incoming message names no conversation");
            return Incoming::Ignored;
        }
        if message.id.is_empty() {
            warn!(chat_id = %chat_id, "incoming message carries no id");
            return Incoming::Ignored;
        }
        let mine = resolver.is_mine(&message);
        let active = active_chat_id.is_some_and(|id| same_id(id, &chat_id));

        let first_delivery = message.is_temporary() || self.remember(&chat_id, &message.id);

        let Some(index) = self.position(&chat_id) else {
            let counterpart = (!mine && !message.sender_id.is_empty())
                .then(|| Counterpart::new(message.sender_id.clone()));
            let conversation = Conversation {
                id: chat_id.clone(),
                counterpart,
                last_message_at: Some(message.created_at),
                unread: u32::from(!mine && !active && first_delivery),
                block: BlockState::NONE,
                messages: vec![message],
            };
            debug!(chat_id = %chat_id, unread = conversation.unread, "conversation created from push");
            self.conversations.insert(0, conversation);
            return Incoming::Created;
        };

        let mut conversation = self.conversations.remove(index);
        let created_at = message.created_at;
        let mut messages = reconcile(&conversation.messages, message, window);
        self.trim_working_set(&mut messages);
        conversation.messages = messages;
        conversation.last_message_at = Some(
            conversation
                .last_message_at
                .map_or(created_at, |last| last.max(created_at)),
        );
        if active {
            conversation.unread = 0;
        } else if !mine && first_delivery {
            conversation.unread = conversation.unread.saturating_add(1);
        }
        debug!(chat_id = %chat_id, unread = conversation.unread, "conversation moved to front");
        self.conversations.insert(0, conversation);
        Incoming::Updated
    }

    /// Insert a conversation announced by the server unless already known.
    pub fn apply_new_chat(&mut self, mut conversation: Conversation) -> bool {
        if conversation.id.is_empty() || self.position(&conversation.id).is_some() {
            debug!(chat_id = %conversation.id, "new chat already known");
            return false;
        }
        let mut messages = std::mem::take(&mut conversation.messages);
        self.trim_working_set(&mut messages);
        conversation.messages = messages;
        self.remember_all(&conversation);
        self.conversations.insert(0, conversation);
        true
    }

    /// Apply a fetched page. Page 1 (or a changed search) replaces the list;
    /// later pages append only unseen conversations.
    pub fn apply_page(&mut self, page: Vec<Conversation>, pagination: Pagination, search: &str) {
        let replace = pagination.page <= 1 || search != self.search;
        if replace {
            self.conversations.clear();
        }
        let before = self.conversations.len();
        for mut conversation in page {
            if conversation.id.is_empty() || self.position(&conversation.id).is_some() {
                continue;
            }
            let mut messages = std::mem::take(&mut conversation.messages);
            self.trim_working_set(&mut messages);
            conversation.messages = messages;
            self.remember_all(&conversation);
            self.conversations.push(conversation);
        }
        debug!(
            page = pagination.page,
            added = self.conversations.len() - before,
            replace,
            "conversation page applied"
        );
        self.pagination = pagination;
        self.search = search.to_string();
    }

    /// Update block state in place, without reordering. Returns how many
    /// conversations matched.
    pub fn apply_block(&mut self, target: &BlockTarget, state: BlockState) -> usize {
        let mut matched = 0;
        for conversation in self.conversations.iter_mut().filter(|c| target.matches(c)) {
            conversation.block = state;
            matched += 1;
        }
        matched
    }

    pub fn mark_read(&mut self, chat_id: &str) -> bool {
        match self.position(chat_id) {
            Some(index) if self.conversations[index].unread > 0 => {
                self.conversations[index].unread = 0;
                true
            }
            _ => false,
        }
    }

    /// Apply a receipt watermark to one conversation's working set.
    pub fn apply_status(
        &mut self,
        chat_id: &str,
        watermark: Option<DateTime<Utc>>,
        update: StatusUpdate,
        resolver: &OwnershipResolver,
    ) -> usize {
        let Some(index) = self.position(chat_id) else {
            return 0;
        };
        let conversation = &mut self.conversations[index];
        let marked = mark_up_to(&conversation.messages, watermark, update, resolver);
        if marked.changed > 0 {
            conversation.messages = marked.messages;
        }
        marked.changed
    }

    /// The first `limit` conversations whose counterpart is online.
    pub fn online_strip(&self, is_online: impl Fn(&str) -> bool, limit: usize) -> Vec<&Conversation> {
        self.conversations
            .iter()
            .filter(|c| c.counterpart_id().is_some_and(&is_online))
            .take(limit)
            .collect()
    }

    pub fn counterpart_ids(&self) -> impl Iterator<Item = &str> {
        self.conversations.iter().filter_map(Conversation::counterpart_id)
    }
}
