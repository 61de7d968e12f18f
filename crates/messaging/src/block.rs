//! Deriving block state from action results and inline control signals.

use murmur_core::ids::same_id;
use murmur_core::model::{BlockSignal, BlockState, BlockedBy, Conversation, Message};
use murmur_core::wire::BlockActionPayload;

use crate::ownership::OwnershipResolver;

/// Identifies which conversation a block change applies to. Either key may
/// be empty; a conversation matches on its id or its counterpart id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockTarget {
    pub chat_id: String,
    pub counterpart_id: String,
}

impl BlockTarget {
    pub fn new(chat_id: impl Into<String>, counterpart_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            counterpart_id: counterpart_id.into(),
        }
    }

    pub fn matches(&self, conversation: &Conversation) -> bool {
        same_id(&conversation.id, &self.chat_id)
            || conversation
                .counterpart_id()
                .is_some_and(|id| same_id(id, &self.counterpart_id))
    }

    pub fn is_empty(&self) -> bool {
        self.chat_id.is_empty() && self.counterpart_id.is_empty()
    }
}

/// State announced by a control signal. Whoever sent "blocked" is the blocker.
pub fn from_signal(signal: BlockSignal, authored_by_me: bool) -> BlockState {
    match signal {
        BlockSignal::Blocked if authored_by_me => BlockState::blocked_by(BlockedBy::Me),
        BlockSignal::Blocked => BlockState::blocked_by(BlockedBy::Them),
        BlockSignal::Unblocked => BlockState::NONE,
    }
}

/// State and target derived from an inline message, if it is a control signal.
pub fn from_message(
    message: &Message,
    resolver: &OwnershipResolver,
) -> Option<(BlockTarget, BlockState)> {
    let signal = message.block_signal()?;
    let mine = resolver.is_mine(message);
    // A signal from the counterpart names them; our own names only the chat.
    let counterpart = if mine {
        String::new()
    } else {
        message.sender_id.clone()
    };
    Some((
        BlockTarget::new(message.chat_id.clone(), counterpart),
        from_signal(signal, mine),
    ))
}

/// State after the local user's block (`blocked = true`) or unblock call
/// succeeded.
pub fn from_action(
    blocked: bool,
    response: &BlockActionPayload,
    fallback: BlockTarget,
) -> (BlockTarget, BlockState) {
    let chat_id = match response.chat_id.normalized() {
        id if id.is_empty() => fallback.chat_id,
        id => id,
    };
    let counterpart_id = match response.user_id.normalized() {
        id if id.is_empty() => fallback.counterpart_id,
        id => id,
    };
    let state = if blocked {
        BlockState::blocked_by(BlockedBy::Me)
    } else {
        BlockState::NONE
    };
    (BlockTarget { chat_id, counterpart_id }, state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};
    use murmur_core::model::{Counterpart, MessageKind};
    use serde_json::json;

    fn signal(content: &str, sender: &str) -> Message {
        Message {
            id: "s1".into(),
            chat_id: "c1".into(),
            sender_id: sender.into(),
            content: content.into(),
            kind: MessageKind::Signal,
            is_mine: None,
            delivered: false,
            read: false,
            created_at: Utc.timestamp_millis_opt(0).unwrap(),
        }
    }

    #[test]
    fn own_block_signal_means_blocked_by_me() {
        let resolver = OwnershipResolver::with_local_user("me");
        let (target, state) = from_message(&signal("blocked", "me"), &resolver).unwrap();
        assert_eq!(target.chat_id, "c1");
        assert!(state.blocked_by_me());
    }

    #[test]
    fn counterpart_block_signal_means_blocked_by_them() {
        let resolver = OwnershipResolver::with_local_user("me");
        let (target, state) = from_message(&signal("blocked", "u2"), &resolver).unwrap();
        assert_eq!(target.counterpart_id, "u2");
        assert!(state.blocked_by_them());
    }

    #[test]
    fn unblock_signal_clears() {
        let resolver = OwnershipResolver::new();
        let (_, state) = from_message(&signal("unblocked", "u2"), &resolver).unwrap();
        assert_eq!(state, BlockState::NONE);
    }

    #[test]
    fn ordinary_text_is_not_a_signal() {
        let resolver = OwnershipResolver::new();
        assert_matches!(from_message(&signal("hello", "u2"), &resolver), None);
    }

    #[test]
    fn target_matches_by_chat_or_counterpart() {
        let mut conv = Conversation::synthesized(Counterpart::new("u2"));
        assert!(BlockTarget::new("", "u2").matches(&conv));
        assert!(!BlockTarget::new("c1", "").matches(&conv));
        conv.id = "c1".into();
        assert!(BlockTarget::new("c1", "").matches(&conv));
        assert!(!BlockTarget::default().matches(&Conversation::default()));
    }

    #[test]
    fn action_prefers_response_ids_and_falls_back() {
        let response: BlockActionPayload =
            serde_json::from_value(json!({ "blockedUser": { "_id": "u9" } })).unwrap();
        let (target, state) = from_action(true, &response, BlockTarget::new("c1", "u2"));
        assert_eq!(target, BlockTarget::new("c1", "u9"));
        assert!(state.blocked_by_me());

        let (_, state) = from_action(false, &BlockActionPayload::default(), BlockTarget::default());
        assert_eq!(state, BlockState::NONE);
    }
}
