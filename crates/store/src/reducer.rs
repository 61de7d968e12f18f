//! Pure transitions of a [`ChatSnapshot`] in response to push events.
//!
//! The reducer never performs I/O. Side effects it wants (receipts, room
//! joins) are returned in an [`Outcome`] for the store to carry out.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use murmur_core::event::EventPayload;
use murmur_core::ids::same_id;
use murmur_core::model::{Conversation, Message};
use murmur_core::wire::ChatPayload;
use murmur_messaging::{block, ActiveThread, OwnershipResolver, StatusUpdate};

use crate::state::ChatSnapshot;
use crate::transport::SocketCommand;

/// Inputs a transition may consult besides the snapshot itself.
pub struct Context<'a> {
    pub resolver: &'a OwnershipResolver,
    pub window: Duration,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Whether the snapshot changed and should be published
    pub changed: bool,
    /// Commands to emit on the push channel
    pub commands: Vec<SocketCommand>,
    /// Conversation whose room should be (re)joined
    pub join: Option<String>,
    /// Counterparts changed and online flags need re-checking
    pub roster_dirty: bool,
}

/// Apply one push or system event.
pub fn apply(snapshot: &mut ChatSnapshot, payload: &EventPayload, ctx: &Context<'_>) -> Outcome {
    let mut outcome = Outcome::default();
    match payload {
        EventPayload::ConnectionEstablished { user_id } => {
            if let Some(user_id) = user_id {
                ctx.resolver.learn(user_id.trim());
            }
            snapshot.connected = true;
            outcome.changed = true;
            outcome.roster_dirty = true;
            outcome.join = snapshot.active_chat_id().map(str::to_string);
            debug!("push channel connected");
        }
        EventPayload::ConnectionLost { reason } => {
            debug!(reason = %reason, "push channel lost");
            snapshot.connected = false;
            snapshot.typing.clear();
            outcome.changed = true;
        }
        EventPayload::MessageReceived { message } => {
            let message = message.to_message("", ctx.now);
            apply_message(snapshot, message, ctx, &mut outcome);
        }
        EventPayload::ChatCreated { chat } => apply_new_chat(snapshot, chat, ctx, &mut outcome),
        EventPayload::MessagesDelivered { receipt } => {
            let chat_id = receipt.chat_id.normalized();
            apply_status(
                snapshot,
                &chat_id,
                receipt.delivered_at,
                StatusUpdate::DELIVERED,
                ctx,
                &mut outcome,
            );
        }
        EventPayload::MessagesSeen { receipt } => {
            let chat_id = receipt.chat_id.normalized();
            apply_status(
                snapshot,
                &chat_id,
                receipt.seen_at,
                StatusUpdate::SEEN,
                ctx,
                &mut outcome,
            );
        }
        EventPayload::TypingStarted { typing } => {
            let chat_id = typing.chat_id.normalized();
            let user_id = typing.user_id.normalized();
            if ctx.resolver.local_user().is_some_and(|me| same_id(me, &user_id)) {
                return outcome;
            }
            outcome.changed = snapshot.typing.on_typing(&chat_id, &user_id, ctx.now);
        }
        EventPayload::TypingStopped { typing } => {
            outcome.changed = snapshot.typing.on_stop_typing(&typing.chat_id.normalized());
        }
        EventPayload::ConversationOpened { .. }
        | EventPayload::ConversationClosed { .. } => {}
    }
    outcome
}

/// Fold a confirmed message into the list, the open thread and the derived
/// typing/block state.
pub fn apply_message(
    snapshot: &mut ChatSnapshot,
    message: Message,
    ctx: &Context<'_>,
    outcome: &mut Outcome,
) {
    let chat_id = message.chat_id.clone();
    if chat_id.is_empty() {
        warn!(message_id = %message.id, "dropping message without conversation");
        return;
    }
    if message.id.is_empty() {
        warn!(chat_id = %chat_id, "dropping message without id");
        return;
    }
    ctx.resolver.detect_local_user([&message]);
    let mine = ctx.resolver.is_mine(&message);

    if let Some(thread) = snapshot.active.as_mut() {
        let from_counterpart =
            !mine && thread.counterpart_id().is_some_and(|id| same_id(id, &message.sender_id));
        if thread.is_synthesized() && from_counterpart {
            debug!(chat_id = %chat_id, "synthesized thread learned its conversation id");
            thread.adopt(&Conversation {
                id: chat_id.clone(),
                ..Conversation::default()
            });
            outcome.join = Some(chat_id.clone());
        }
        if thread.accepts(&message) {
            thread.apply_incoming(message.clone(), ctx.window);
        }
    }

    snapshot.typing.clear_for_sender(&chat_id, &message.sender_id);

    let signal = block::from_message(&message, ctx.resolver);
    let active = snapshot.active_chat_id().map(str::to_string);
    let incoming =
        snapshot
            .conversations
            .apply_incoming(message, active.as_deref(), ctx.resolver, ctx.window);
    if incoming == murmur_conversations::Incoming::Created {
        outcome.roster_dirty = true;
    }

    if let Some((target, state)) = signal {
        debug!(chat_id = %chat_id, ?state, "block signal received");
        snapshot.conversations.apply_block(&target, state);
        if let Some(thread) = snapshot.active.as_mut() {
            if target.matches(&thread.conversation) {
                thread.apply_block(state);
            }
        }
    }

    if !mine {
        outcome.commands.push(SocketCommand::MarkDelivered {
            chat_id: chat_id.clone(),
        });
        if active.as_deref() == Some(chat_id.as_str()) {
            outcome.commands.push(SocketCommand::MarkRead { chat_id });
        }
    }
    outcome.changed = true;
}

fn apply_new_chat(
    snapshot: &mut ChatSnapshot,
    chat: &ChatPayload,
    ctx: &Context<'_>,
    outcome: &mut Outcome,
) {
    let conversation = chat.to_conversation(ctx.now);
    if conversation.id.is_empty() {
        warn!("dropping new chat without id");
        return;
    }
    ctx.resolver.detect_local_user(&conversation.messages);

    let first_is_mine = conversation
        .messages
        .iter()
        .min_by_key(|m| m.created_at)
        .is_some_and(|m| ctx.resolver.is_mine(m));

    if first_is_mine {
        let activate = match snapshot.active.as_ref() {
            None => true,
            Some(thread) => {
                thread.is_synthesized()
                    && conversation
                        .counterpart_id()
                        .zip(thread.counterpart_id())
                        .is_some_and(|(a, b)| same_id(a, b))
            }
        };
        if activate {
            let mut thread = match snapshot.active.take() {
                Some(mut thread) => {
                    thread.adopt(&conversation);
                    thread
                }
                None => ActiveThread::open(conversation.clone()),
            };
            for message in conversation.messages.iter().cloned() {
                thread.apply_incoming(message, ctx.window);
            }
            debug!(chat_id = %conversation.id, "new chat became active");
            snapshot.active = Some(thread);
            outcome.join = Some(conversation.id.clone());
            outcome.changed = true;
        }
    }

    let mut conversation = conversation;
    if snapshot.is_active(&conversation.id) {
        conversation.unread = 0;
    }
    if snapshot.conversations.apply_new_chat(conversation) {
        outcome.changed = true;
        outcome.roster_dirty = true;
    }
}

fn apply_status(
    snapshot: &mut ChatSnapshot,
    chat_id: &str,
    watermark: Option<DateTime<Utc>>,
    update: StatusUpdate,
    ctx: &Context<'_>,
    outcome: &mut Outcome,
) {
    if chat_id.is_empty() {
        warn!("dropping receipt without conversation");
        return;
    }
    let mut changed = snapshot
        .conversations
        .apply_status(chat_id, watermark, update, ctx.resolver);
    if let Some(thread) = snapshot.active.as_mut() {
        if same_id(thread.chat_id(), chat_id) {
            changed += thread.apply_status(watermark, update, ctx.resolver);
        }
    }
    debug!(chat_id, changed, seen = update.seen, "receipt applied");
    outcome.changed |= changed > 0;
}
