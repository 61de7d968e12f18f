//! The message window of the currently open conversation.
//!
//! Every mutation leaves `messages` sorted ascending by creation time
//! (stable, so equal timestamps keep arrival order).

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use murmur_core::ids::same_id;
use murmur_core::model::{BlockState, Conversation, Counterpart, Message, Pagination};

use crate::ownership::OwnershipResolver;
use crate::reconcile::{reconcile, remove_temporaries};
use crate::status::{mark_up_to, StatusUpdate};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveThread {
    /// Conversation header; its `messages` field is unused here
    pub conversation: Conversation,
    pub messages: Vec<Message>,
    /// Cursor of the most recently loaded history page
    pub pagination: Pagination,
}

fn sort_chronologically(messages: &mut [Message]) {
    messages.sort_by_key(|m| m.created_at);
}

impl ActiveThread {
    /// Open `conversation` with an empty window; history is loaded separately.
    pub fn open(mut conversation: Conversation) -> Self {
        conversation.messages.clear();
        Self {
            conversation,
            messages: Vec::new(),
            pagination: Pagination::default(),
        }
    }

    /// A thread for a counterpart the server has no conversation with yet.
    pub fn synthesized(counterpart: Counterpart) -> Self {
        Self::open(Conversation::synthesized(counterpart))
    }

    pub fn chat_id(&self) -> &str {
        &self.conversation.id
    }

    pub fn counterpart_id(&self) -> Option<&str> {
        self.conversation.counterpart_id()
    }

    pub fn is_synthesized(&self) -> bool {
        self.conversation.is_synthesized()
    }

    pub fn has_more(&self) -> bool {
        self.pagination.has_more()
    }

    /// Whether `message` belongs in this window.
    pub fn accepts(&self, message: &Message) -> bool {
        same_id(&message.chat_id, self.chat_id())
    }

    /// Replace the window with the newest history page. Local entries the
    /// page cannot know about survive: temporaries, and confirmed messages
    /// newer than anything on the page.
    pub fn replace_with_page(
        &mut self,
        page: Vec<Message>,
        pagination: Pagination,
        window: Duration,
    ) {
        let newest = page.iter().map(|m| m.created_at).max();
        let mut next: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| {
                m.is_temporary() || newest.map_or(true, |newest| m.created_at > newest)
            })
            .cloned()
            .collect();
        sort_chronologically(&mut next);
        for message in page {
            next = reconcile(&next, message, window);
        }
        sort_chronologically(&mut next);
        debug!(chat_id = %self.chat_id(), count = next.len(), page = pagination.page, "thread replaced");
        self.messages = next;
        self.pagination = pagination;
    }

    /// Merge an older history page in front of the window. Only messages
    /// strictly older than the current oldest one are taken.
    pub fn merge_older(&mut self, older: Vec<Message>, pagination: Pagination) {
        let before = self.messages.len();
        let oldest = self.messages.iter().map(|m| m.created_at).min();
        for message in older {
            if oldest.is_some_and(|oldest| message.created_at >= oldest) {
                continue;
            }
            if !self.messages.iter().any(|m| same_id(&m.id, &message.id)) {
                self.messages.push(message);
            }
        }
        sort_chronologically(&mut self.messages);
        debug!(
            chat_id = %self.chat_id(),
            added = self.messages.len() - before,
            page = pagination.page,
            "older messages merged"
        );
        self.pagination = pagination;
    }

    /// Fold a pushed or confirmed message into the window.
    pub fn apply_incoming(&mut self, message: Message, window: Duration) {
        let mut next = reconcile(&self.messages, message, window);
        sort_chronologically(&mut next);
        self.messages = next;
    }

    /// Show a locally composed message before the server confirms it.
    pub fn push_optimistic(&mut self, message: Message) {
        self.messages.push(message);
        sort_chronologically(&mut self.messages);
    }

    /// Apply a receipt watermark. Returns the number of changed messages.
    pub fn apply_status(
        &mut self,
        watermark: Option<DateTime<Utc>>,
        update: StatusUpdate,
        resolver: &OwnershipResolver,
    ) -> usize {
        let marked = mark_up_to(&self.messages, watermark, update, resolver);
        if marked.changed > 0 {
            self.messages = marked.messages;
        }
        marked.changed
    }

    pub fn apply_block(&mut self, state: BlockState) {
        self.conversation.block = state;
    }

    /// Remove exactly the listed temporary messages.
    pub fn rollback(&mut self, temporary_ids: &[String]) {
        self.messages = remove_temporaries(&self.messages, temporary_ids);
    }

    /// Adopt the server-assigned id of a conversation that was synthesized.
    pub fn adopt(&mut self, conversation: &Conversation) {
        self.conversation.id = conversation.id.clone();
        self.conversation.block = conversation.block;
        if self.conversation.counterpart.is_none() {
            self.conversation.counterpart = conversation.counterpart.clone();
        }
    }

    pub fn is_sorted(&self) -> bool {
        self.messages
            .windows(2)
            .all(|pair| pair[0].created_at <= pair[1].created_at)
    }
}
