//! The explicitly constructed chat state store.
//!
//! A [`ChatStore`] owns the current [`ChatSnapshot`] and is the only place
//! it changes. Push events arrive through the event bus and run through the
//! reducer; user operations call the API collaborator and fold the results
//! in. Every change swaps in a new snapshot and notifies `watch` subscribers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use murmur_core::config::SyncConfig;
use murmur_core::error::EventBusError;
use murmur_core::event::{
    Channel, Event, EventBus, EventPayload, EventSource, EventSubscription,
};
use murmur_core::model::{Conversation, Counterpart, Message, Pagination, UserSummary};
use murmur_core::wire::UserPayload;
use murmur_messaging::{block, ActiveThread, BlockTarget, OwnershipResolver};
use murmur_presence::{TypingAction, TypingEmitter};

use crate::api::{ChatApi, MediaFile, MediaUpload};
use crate::error::StoreError;
use crate::handle::StoreHandle;
use crate::reducer::{self, Context, Outcome};
use crate::room::JoinedRoom;
use crate::sequence::RequestSequence;
use crate::state::ChatSnapshot;
use crate::transport::{SocketCommand, Transport};

/// Channels the store reacts to. UI events it publishes itself are excluded.
pub const SUBSCRIPTION_PATTERN: &str = "{system,transport}.**";

const EVENT_SOURCE: &str = "store";

fn poisoned(what: &str) -> StoreError {
    StoreError::Internal(format!("{what} lock poisoned"))
}

/// Some endpoints omit the page number; fall back to the one requested.
fn page_cursor(reported: Pagination, requested: u32) -> Pagination {
    if reported.page == 0 {
        Pagination {
            page: requested,
            ..reported
        }
    } else {
        reported
    }
}

pub struct ChatStore<A: ChatApi, T: Transport> {
    api: Arc<A>,
    transport: Arc<T>,
    event_bus: Arc<dyn EventBus>,
    config: SyncConfig,
    resolver: OwnershipResolver,
    state: RwLock<Arc<ChatSnapshot>>,
    updates: watch::Sender<Arc<ChatSnapshot>>,
    /// Advanced whenever the open conversation changes
    generation: AtomicU64,
    list_requests: RequestSequence,
    user_requests: RequestSequence,
    room: Mutex<Option<JoinedRoom<T>>>,
    typing_out: Mutex<TypingEmitter>,
}

impl<A: ChatApi, T: Transport> ChatStore<A, T> {
    pub fn new(
        api: Arc<A>,
        transport: Arc<T>,
        event_bus: Arc<dyn EventBus>,
        config: SyncConfig,
    ) -> Self {
        let initial = Arc::new(ChatSnapshot::new(&config));
        let (updates, _) = watch::channel(Arc::clone(&initial));
        Self {
            api,
            transport,
            event_bus,
            typing_out: Mutex::new(TypingEmitter::new(config.typing_idle())),
            config,
            resolver: OwnershipResolver::new(),
            state: RwLock::new(initial),
            updates,
            generation: AtomicU64::new(0),
            list_requests: RequestSequence::default(),
            user_requests: RequestSequence::default(),
            room: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn resolver(&self) -> &OwnershipResolver {
        &self.resolver
    }

    /// The current snapshot. Callers may hold it as long as they like.
    pub fn snapshot(&self) -> Arc<ChatSnapshot> {
        // A poisoned lock still holds the last complete snapshot.
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Receive every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ChatSnapshot>> {
        self.updates.subscribe()
    }

    /// Conversations with an online counterpart, capped by configuration.
    pub fn online_strip(&self) -> Vec<Conversation> {
        self.snapshot()
            .online_strip(self.config.online_strip_limit)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Apply `f` to a copy of the current snapshot and publish the copy if
    /// `f` reports a change.
    fn update_if(&self, f: impl FnOnce(&mut ChatSnapshot) -> bool) -> Result<bool, StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned("state"))?;
        let mut next = ChatSnapshot::clone(&state);
        if !f(&mut next) {
            return Ok(false);
        }
        let next = Arc::new(next);
        *state = Arc::clone(&next);
        self.updates.send_replace(next);
        Ok(true)
    }

    fn update(&self, f: impl FnOnce(&mut ChatSnapshot)) -> Result<(), StoreError> {
        self.update_if(|snapshot| {
            f(snapshot);
            true
        })
        .map(|_| ())
    }

    fn context(&self, now: DateTime<Utc>) -> Context<'_> {
        Context {
            resolver: &self.resolver,
            window: self.config.temp_match_window(),
            now,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Log a failed operation, record it for display and run `reset` on
    /// the snapshot. Returns the error for propagation.
    fn record_failure(
        &self,
        operation: &'static str,
        error: StoreError,
        reset: impl FnOnce(&mut ChatSnapshot),
    ) -> StoreError {
        error!(operation, error = %error, "operation failed");
        let message = error.to_string();
        if let Err(e) = self.update(|s| {
            reset(s);
            s.last_error = Some(message);
        }) {
            return e;
        }
        error
    }

    fn emit(&self, command: SocketCommand) {
        let name = command.name();
        if let Err(e) = self.transport.emit(command) {
            warn!(event = name, error = %e, "failed to emit command");
        }
    }

    fn emit_typing(&self, action: TypingAction) {
        self.emit(match action {
            TypingAction::Start(chat_id) => SocketCommand::StartTyping { chat_id },
            TypingAction::Stop(chat_id) => SocketCommand::StopTyping { chat_id },
        });
    }

    fn finish_typing(&self) -> Result<(), StoreError> {
        let action = self
            .typing_out
            .lock()
            .map_err(|_| poisoned("typing"))?
            .finish();
        if let Some(action) = action {
            self.emit_typing(action);
        }
        Ok(())
    }

    fn publish(&self, payload: EventPayload) {
        let channel = match Channel::new(payload.channel_name()) {
            Ok(channel) => channel,
            Err(e) => {
                warn!(error = %e, "invalid channel for store event");
                return;
            }
        };
        let event = Event::new(channel, EventSource::System(EVENT_SOURCE.into()), payload);
        if let Err(e) = self.event_bus.publish(event) {
            warn!(error = %e, "failed to publish store event");
        }
    }

    /// Hold membership of `chat_id`'s room, leaving any other room first.
    fn enter_room(&self, chat_id: &str) -> Result<(), StoreError> {
        let mut room = self.room.lock().map_err(|_| poisoned("room"))?;
        if let Some(current) = room.as_ref().filter(|r| r.chat_id() == chat_id) {
            if let Err(e) = current.rejoin() {
                warn!(chat_id, error = %e, "failed to rejoin room");
            }
            return Ok(());
        }
        room.take();
        match JoinedRoom::join(Arc::clone(&self.transport), chat_id) {
            Ok(joined) => *room = Some(joined),
            Err(e) => warn!(chat_id, error = %e, "failed to join room"),
        }
        Ok(())
    }

    fn leave_room(&self) -> Result<(), StoreError> {
        self.room.lock().map_err(|_| poisoned("room"))?.take();
        Ok(())
    }

    /// Fetch a page of the conversation list. Page 1 replaces the list;
    /// later pages append. A page-1 request supersedes every request issued
    /// before it.
    pub async fn load_conversations(&self, page: u32, search: &str) -> Result<(), StoreError> {
        let page = page.max(1);
        let search = search.trim();
        let seq = self.list_requests.begin(page == 1);
        self.update(|s| {
            if page == 1 {
                s.loading.conversations = true;
            } else {
                s.loading.more_conversations = true;
            }
        })?;
        debug!(page, search, seq, "loading conversations");

        let fetched = match self
            .api
            .list_chats(page, self.config.conversations_page_size, search)
            .await
        {
            Ok(fetched) => fetched,
            Err(e) if self.list_requests.is_stale(seq) => {
                debug!(page, seq, error = %e, "ignoring failure of superseded request");
                return Ok(());
            }
            Err(e) => {
                return Err(self.record_failure("load_conversations", e.into(), |s| {
                    s.loading.conversations = false;
                    s.loading.more_conversations = false;
                }))
            }
        };

        let now = Utc::now();
        let conversations: Vec<Conversation> = fetched
            .items
            .iter()
            .map(|chat| chat.to_conversation(now))
            .collect();
        self.resolver
            .detect_local_user(conversations.iter().flat_map(|c| c.messages.iter()));
        let pagination = page_cursor(fetched.pagination, page);
        let count = conversations.len();

        let applied = self.update_if(|s| {
            if self.list_requests.is_stale(seq) {
                return false;
            }
            s.conversations.apply_page(conversations, pagination, search);
            s.loading.conversations = false;
            s.loading.more_conversations = false;
            s.last_error = None;
            true
        })?;
        if !applied {
            warn!(page, seq, "dropping stale conversation page");
            return Ok(());
        }
        debug!(page, count, "conversations loaded");
        self.refresh_online()
    }

    /// Fetch the next conversation page if there is one and none is in flight.
    pub async fn load_more_conversations(&self) -> Result<bool, StoreError> {
        let snapshot = self.snapshot();
        if !snapshot.conversations.has_more()
            || snapshot.loading.conversations
            || snapshot.loading.more_conversations
        {
            return Ok(false);
        }
        let next = snapshot.conversations.pagination().next_page();
        let search = snapshot.conversations.search().to_string();
        self.load_conversations(next, &search).await?;
        Ok(true)
    }

    /// Fetch a page of the user directory, excluding the local user.
    pub async fn load_users(&self, page: u32, search: &str) -> Result<(), StoreError> {
        let page = page.max(1);
        let search = search.trim();
        let seq = self.user_requests.begin(page == 1);
        self.update(|s| s.loading.users = true)?;

        let fetched = match self
            .api
            .list_users(page, self.config.users_page_size, search)
            .await
        {
            Ok(fetched) => fetched,
            Err(e) if self.user_requests.is_stale(seq) => {
                debug!(page, seq, error = %e, "ignoring failure of superseded request");
                return Ok(());
            }
            Err(e) => {
                return Err(self.record_failure("load_users", e.into(), |s| {
                    s.loading.users = false;
                }))
            }
        };

        let local = self.resolver.local_user();
        let users: Vec<UserSummary> = fetched
            .items
            .iter()
            .map(UserPayload::to_summary)
            .filter(|u| !u.id.is_empty() && local != Some(u.id.as_str()))
            .collect();
        let pagination = page_cursor(fetched.pagination, page);

        let applied = self.update_if(|s| {
            if self.user_requests.is_stale(seq) {
                return false;
            }
            if page == 1 {
                s.users.clear();
            }
            for user in users {
                if !s.users.iter().any(|known| known.id == user.id) {
                    s.users.push(user);
                }
            }
            s.users_pagination = pagination;
            s.loading.users = false;
            s.last_error = None;
            true
        })?;
        if !applied {
            warn!(page, seq, "dropping stale user page");
        }
        Ok(())
    }

    /// Make `chat_id` the active conversation and load its newest history.
    ///
    /// The thread switches immediately. Header and history are fetched
    /// concurrently and applied only if no other conversation was opened
    /// in the meantime.
    pub async fn open_conversation(&self, chat_id: &str) -> Result<(), StoreError> {
        let chat_id = chat_id.trim().to_string();
        if chat_id.is_empty() {
            return Err(StoreError::MissingId("conversation"));
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.finish_typing()?;

        self.update(|s| {
            let header = s.conversations.get(&chat_id).cloned().unwrap_or_else(|| Conversation {
                id: chat_id.clone(),
                ..Conversation::default()
            });
            s.active = Some(ActiveThread::open(header));
            s.conversations.mark_read(&chat_id);
            s.loading.thread = true;
            s.loading.older_messages = false;
        })?;
        self.enter_room(&chat_id)?;
        self.emit(SocketCommand::MarkRead {
            chat_id: chat_id.clone(),
        });
        self.publish(EventPayload::ConversationOpened {
            chat_id: chat_id.clone(),
        });
        debug!(chat_id = %chat_id, generation, "conversation opened");

        let (detail, history) = tokio::join!(
            self.api.get_chat(&chat_id),
            self.api
                .get_messages(&chat_id, 1, self.config.messages_page_size)
        );

        let now = Utc::now();
        let window = self.config.temp_match_window();
        let header = detail.as_ref().ok().map(|d| d.to_conversation(now));
        let page = history.as_ref().ok().map(|p| {
            let messages: Vec<Message> = p
                .items
                .iter()
                .map(|m| m.to_message(&chat_id, now))
                .collect();
            (messages, page_cursor(p.pagination, 1))
        });
        if let Some((messages, _)) = &page {
            self.resolver.detect_local_user(messages);
        }
        let failure = detail.err().or(history.err());
        let failure_text = failure.as_ref().map(ToString::to_string);

        let applied = self.update_if(|s| {
            if !self.is_current(generation) || !s.is_active(&chat_id) {
                return false;
            }
            let Some(thread) = s.active.as_mut() else {
                return false;
            };
            if let Some(header) = header {
                thread.apply_block(header.block);
                if header.counterpart.is_some() {
                    thread.conversation.counterpart = header.counterpart;
                }
                s.conversations
                    .apply_block(&BlockTarget::new(chat_id.clone(), ""), header.block);
            }
            if let Some((messages, pagination)) = page {
                thread.replace_with_page(messages, pagination, window);
            }
            s.loading.thread = false;
            s.last_error = failure_text;
            true
        })?;

        if !applied {
            debug!(chat_id = %chat_id, generation, "discarding stale thread response");
            return Ok(());
        }
        if let Some(e) = failure {
            error!(chat_id = %chat_id, error = %e, "failed to load conversation");
            return Err(e.into());
        }
        self.refresh_online()
    }

    /// Open the conversation with `counterpart`, or a synthesized thread if
    /// none exists yet. The first send then creates it server-side.
    pub async fn start_conversation(&self, counterpart: Counterpart) -> Result<(), StoreError> {
        if counterpart.id.is_empty() {
            return Err(StoreError::MissingId("counterpart"));
        }
        let existing = self
            .snapshot()
            .conversations
            .find_by_counterpart(&counterpart.id)
            .map(|c| c.id.clone());
        if let Some(chat_id) = existing {
            return self.open_conversation(&chat_id).await;
        }

        self.generation.fetch_add(1, Ordering::SeqCst);
        self.finish_typing()?;
        self.leave_room()?;
        debug!(counterpart = %counterpart.id, "synthesized conversation opened");
        self.update(|s| {
            s.active = Some(ActiveThread::synthesized(counterpart));
            s.loading.thread = false;
            s.loading.older_messages = false;
        })?;
        self.refresh_online()
    }

    pub fn close_conversation(&self) -> Result<(), StoreError> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.finish_typing()?;
        self.leave_room()?;

        let mut closed = None;
        self.update_if(|s| {
            let Some(thread) = s.active.take() else {
                return false;
            };
            closed = Some(thread.conversation.id);
            s.loading.thread = false;
            s.loading.older_messages = false;
            true
        })?;
        if let Some(chat_id) = closed.filter(|id| !id.is_empty()) {
            debug!(chat_id = %chat_id, "conversation closed");
            self.publish(EventPayload::ConversationClosed { chat_id });
        }
        Ok(())
    }

    /// Scroll back one history page. Returns whether a page was requested.
    pub async fn load_older_messages(&self) -> Result<bool, StoreError> {
        let snapshot = self.snapshot();
        let Some(thread) = snapshot.active.as_ref() else {
            return Ok(false);
        };
        if thread.is_synthesized()
            || !thread.has_more()
            || snapshot.loading.thread
            || snapshot.loading.older_messages
        {
            return Ok(false);
        }
        let chat_id = thread.chat_id().to_string();
        let page = thread.pagination.next_page();
        let generation = self.generation.load(Ordering::SeqCst);
        self.update(|s| s.loading.older_messages = true)?;

        let fetched = match self
            .api
            .get_messages(&chat_id, page, self.config.messages_page_size)
            .await
        {
            Ok(fetched) => fetched,
            Err(e) if !self.is_current(generation) => {
                debug!(chat_id = %chat_id, page, error = %e, "ignoring failure of superseded request");
                return Ok(false);
            }
            Err(e) => {
                return Err(self.record_failure("load_older_messages", e.into(), |s| {
                    s.loading.older_messages = false;
                }))
            }
        };

        let now = Utc::now();
        let messages: Vec<Message> = fetched
            .items
            .iter()
            .map(|m| m.to_message(&chat_id, now))
            .collect();
        self.resolver.detect_local_user(&messages);
        let pagination = page_cursor(fetched.pagination, page);

        let applied = self.update_if(|s| {
            if !self.is_current(generation) || !s.is_active(&chat_id) {
                return false;
            }
            let Some(thread) = s.active.as_mut() else {
                return false;
            };
            thread.merge_older(messages, pagination);
            s.loading.older_messages = false;
            s.last_error = None;
            true
        })?;
        if !applied {
            debug!(chat_id = %chat_id, page, "discarding stale history page");
        }
        Ok(applied)
    }

    /// Send a text message in the active conversation.
    ///
    /// An optimistic bubble is shown at once and rolled back if the emit
    /// fails. A synthesized conversation sends by counterpart id and shows
    /// nothing until the server confirms.
    pub fn send_text(&self, text: &str) -> Result<(), StoreError> {
        let content = text.trim();
        if content.is_empty() {
            return Err(StoreError::EmptyMessage);
        }
        let snapshot = self.snapshot();
        if !snapshot.connected {
            return Err(StoreError::Disconnected);
        }
        let thread = snapshot
            .active
            .as_ref()
            .ok_or(StoreError::NoActiveConversation)?;
        if thread.conversation.block.is_blocked {
            return Err(StoreError::Blocked);
        }
        self.finish_typing()?;

        let counterpart = thread.counterpart_id().map(str::to_string);
        let online = counterpart
            .as_deref()
            .is_some_and(|id| self.transport.is_user_online(id));

        if thread.is_synthesized() {
            let other_user_id = counterpart.ok_or(StoreError::MissingId("counterpart"))?;
            debug!(counterpart = %other_user_id, "sending first message");
            self.transport.emit(SocketCommand::Send {
                chat_id: None,
                other_user_id: Some(other_user_id),
                content: content.to_string(),
                is_receiver_online: online,
            })?;
            return Ok(());
        }

        let chat_id = thread.chat_id().to_string();
        let sender = self.resolver.local_user().unwrap_or_default();
        let mut temp_id = None;
        self.update_if(|s| {
            let Some(thread) = s.active.as_mut().filter(|t| t.chat_id() == chat_id) else {
                return false;
            };
            let mut at = Utc::now();
            while thread
                .messages
                .iter()
                .any(|m| m.id == Message::temporary_id(at))
            {
                at += chrono::Duration::milliseconds(1);
            }
            let message = Message::optimistic_text(&chat_id, sender, content, at, online);
            temp_id = Some(message.id.clone());
            thread.push_optimistic(message);
            true
        })?;
        let temp_id = temp_id.ok_or(StoreError::NoActiveConversation)?;
        debug!(chat_id = %chat_id, temp_id = %temp_id, "optimistic message added");

        let sent = self.transport.emit(SocketCommand::Send {
            chat_id: Some(chat_id.clone()),
            other_user_id: None,
            content: content.to_string(),
            is_receiver_online: online,
        });
        if let Err(e) = sent {
            let ids = [temp_id];
            return Err(self.record_failure("send_text", e.into(), |s| {
                if let Some(thread) = s.active.as_mut() {
                    thread.rollback(&ids);
                }
            }));
        }
        Ok(())
    }

    /// Upload media to the active conversation, showing one preview per
    /// file until the server returns the confirmed messages.
    pub async fn send_media(&self, files: Vec<MediaFile>) -> Result<(), StoreError> {
        if files.is_empty() {
            return Err(StoreError::EmptyMessage);
        }
        let snapshot = self.snapshot();
        if !snapshot.connected {
            return Err(StoreError::Disconnected);
        }
        let thread = snapshot
            .active
            .as_ref()
            .ok_or(StoreError::NoActiveConversation)?;
        if thread.conversation.block.is_blocked {
            return Err(StoreError::Blocked);
        }
        let chat_id = thread.chat_id().to_string();
        let synthesized = thread.is_synthesized();
        let counterpart = thread.counterpart_id().map(str::to_string);
        if synthesized && counterpart.is_none() {
            return Err(StoreError::MissingId("counterpart"));
        }
        let online = counterpart
            .as_deref()
            .is_some_and(|id| self.transport.is_user_online(id));

        let at = Utc::now();
        let sender = self.resolver.local_user().unwrap_or_default();
        let previews: Vec<Message> = if synthesized {
            Vec::new()
        } else {
            files
                .iter()
                .enumerate()
                .map(|(index, file)| {
                    Message::optimistic_image(&chat_id, sender, &file.preview_ref, at, index)
                })
                .collect()
        };
        let preview_ids: Vec<String> = previews.iter().map(|m| m.id.clone()).collect();
        self.update(|s| {
            s.loading.sending_media = true;
            if let Some(thread) = s.active.as_mut().filter(|t| t.chat_id() == chat_id) {
                for preview in previews {
                    thread.push_optimistic(preview);
                }
            }
        })?;
        debug!(chat_id = %chat_id, files = files.len(), "uploading media");

        let upload = MediaUpload {
            chat_id: (!synthesized).then(|| chat_id.clone()),
            other_user_id: if synthesized { counterpart.clone() } else { None },
            is_receiver_online: online,
            files,
        };
        let payloads = match self.api.send_media(upload).await {
            Ok(payloads) => payloads,
            Err(e) => {
                return Err(self.record_failure("send_media", e.into(), |s| {
                    s.loading.sending_media = false;
                    if let Some(thread) = s.active.as_mut() {
                        thread.rollback(&preview_ids);
                    }
                }))
            }
        };

        let now = Utc::now();
        let confirmed: Vec<Message> = payloads
            .iter()
            .map(|p| {
                let mut message = p.to_message(&chat_id, now);
                message.is_mine = Some(true);
                message
            })
            .collect();
        let adopted = confirmed
            .first()
            .filter(|_| synthesized)
            .map(|m| m.chat_id.clone())
            .filter(|id| !id.is_empty());

        let ctx = self.context(now);
        let mut outcome = Outcome::default();
        self.update(|s| {
            if let (Some(id), Some(thread)) = (adopted.as_ref(), s.active.as_mut()) {
                if thread.is_synthesized() && thread.counterpart_id() == counterpart.as_deref() {
                    thread.adopt(&Conversation {
                        id: id.clone(),
                        ..Conversation::default()
                    });
                }
            }
            for message in confirmed {
                reducer::apply_message(s, message, &ctx, &mut outcome);
            }
            if let Some(thread) = s.active.as_mut() {
                thread.rollback(&preview_ids);
            }
            s.loading.sending_media = false;
            s.last_error = None;
        })?;

        if let Some(chat_id) = adopted {
            if self.snapshot().is_active(&chat_id) {
                self.enter_room(&chat_id)?;
            }
        }
        if outcome.roster_dirty {
            self.refresh_online()?;
        }
        Ok(())
    }

    /// Zero the active conversation's unread counter and tell the server.
    pub fn mark_read(&self) -> Result<(), StoreError> {
        let chat_id = self
            .snapshot()
            .active_chat_id()
            .map(str::to_string)
            .ok_or(StoreError::NoActiveConversation)?;
        self.update_if(|s| s.conversations.mark_read(&chat_id))?;
        self.emit(SocketCommand::MarkRead { chat_id });
        Ok(())
    }

    pub async fn block(&self) -> Result<(), StoreError> {
        self.set_blocked(true).await
    }

    pub async fn unblock(&self) -> Result<(), StoreError> {
        self.set_blocked(false).await
    }

    async fn set_blocked(&self, blocked: bool) -> Result<(), StoreError> {
        let operation = if blocked { "block" } else { "unblock" };
        let snapshot = self.snapshot();
        let thread = snapshot
            .active
            .as_ref()
            .ok_or(StoreError::NoActiveConversation)?;
        let counterpart = thread
            .counterpart_id()
            .map(str::to_string)
            .ok_or(StoreError::MissingId("counterpart"))?;
        let fallback = BlockTarget::new(thread.chat_id(), counterpart.clone());
        self.update(|s| s.loading.blocking = true)?;

        let result = if blocked {
            self.api.block_user(&counterpart).await
        } else {
            self.api.unblock_user(&counterpart).await
        };
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                return Err(self.record_failure(operation, e.into(), |s| {
                    s.loading.blocking = false;
                }))
            }
        };

        let (target, state) = block::from_action(blocked, &response, fallback);
        let now = Utc::now();
        let signal = response.message.as_ref().map(|payload| {
            let mut message = payload.to_message(&target.chat_id, now);
            message.is_mine = Some(true);
            message
        });
        let ctx = self.context(now);
        let mut outcome = Outcome::default();
        self.update(|s| {
            if let Some(message) = signal {
                reducer::apply_message(s, message, &ctx, &mut outcome);
            }
            s.conversations.apply_block(&target, state);
            if let Some(thread) = s.active.as_mut() {
                if target.matches(&thread.conversation) {
                    thread.apply_block(state);
                }
            }
            s.loading.blocking = false;
            s.last_error = None;
        })?;
        info!(counterpart = %counterpart, blocked, "block state changed");
        Ok(())
    }

    /// Register a local keystroke in the active conversation.
    pub fn notify_typing(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        let snapshot = self.snapshot();
        let Some(chat_id) = snapshot.active_chat_id() else {
            return Ok(());
        };
        let blocked = snapshot
            .active
            .as_ref()
            .is_some_and(|t| t.conversation.block.is_blocked);
        if !snapshot.connected || blocked {
            return Ok(());
        }
        let actions = self
            .typing_out
            .lock()
            .map_err(|_| poisoned("typing"))?
            .keystroke(chat_id, now);
        for action in actions {
            self.emit_typing(action);
        }
        Ok(())
    }

    /// Expire stale typing indicators and stop local typing after idling.
    pub fn sweep_typing(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.update_if(|s| !s.typing.sweep(now).is_empty())?;
        let idle = self
            .typing_out
            .lock()
            .map_err(|_| poisoned("typing"))?
            .poll(now);
        if let Some(action) = idle {
            self.emit_typing(action);
        }
        Ok(())
    }

    /// Re-check the online flag of every tracked counterpart.
    pub fn refresh_online(&self) -> Result<(), StoreError> {
        let transport = &self.transport;
        self.update_if(|s| {
            let ids = s.tracked_users();
            s.online
                .refresh(ids.iter().map(String::as_str), |id| transport.is_user_online(id))
        })?;
        Ok(())
    }

    /// Apply one event from the bus and carry out the side effects it asks for.
    pub fn handle_event(&self, event: &Event) -> Result<(), StoreError> {
        if matches!(event.payload, EventPayload::ConnectionLost { .. }) {
            // Nothing can be emitted while disconnected.
            self.typing_out
                .lock()
                .map_err(|_| poisoned("typing"))?
                .finish();
        }

        let ctx = self.context(event.timestamp);
        let mut outcome = Outcome::default();
        self.update_if(|s| {
            outcome = reducer::apply(s, &event.payload, &ctx);
            outcome.changed
        })?;

        for command in outcome.commands {
            self.emit(command);
        }
        if let Some(chat_id) = outcome.join {
            self.enter_room(&chat_id)?;
        }
        if outcome.roster_dirty {
            self.refresh_online()?;
        }
        Ok(())
    }

    /// Dispatch bus events until the bus closes.
    pub async fn run(self: Arc<Self>) -> Result<(), StoreError> {
        let subscription = self.event_bus.subscribe(SUBSCRIPTION_PATTERN)?;
        self.dispatch(subscription).await
    }

    /// Start dispatching on a background task. The subscription is taken
    /// before this returns, so no event published afterwards is missed.
    pub fn spawn(self: &Arc<Self>) -> Result<StoreHandle, StoreError> {
        let subscription = self.event_bus.subscribe(SUBSCRIPTION_PATTERN)?;
        let store = Arc::clone(self);
        Ok(StoreHandle::new(tokio::spawn(store.dispatch(subscription))))
    }

    async fn dispatch(self: Arc<Self>, mut subscription: EventSubscription) -> Result<(), StoreError> {
        loop {
            match subscription.recv().await {
                Ok(event) => {
                    if let Err(e) = self.handle_event(&event) {
                        error!(channel = %event.channel, error = %e, "failed to apply event");
                    }
                }
                Err(EventBusError::ChannelClosed) => {
                    debug!("event bus closed, chat store stopping");
                    return Ok(());
                }
                Err(EventBusError::Lagged(count)) => {
                    warn!(count, "chat store lagged, some events dropped");
                }
                Err(e) => {
                    error!(error = %e, "chat store subscription error");
                    return Err(e.into());
                }
            }
        }
    }
}

impl<A: ChatApi, T: Transport> std::fmt::Debug for ChatStore<A, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStore")
            .field("local_user", &self.resolver.local_user())
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
