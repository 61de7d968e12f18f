//! In-memory collaborators for driving a `ChatStore` in tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Notify;

use murmur_core::config::SyncConfig;
use murmur_core::event::{BroadcastEventBus, Channel, Event, EventPayload, EventSource};
use murmur_core::wire::{
    BlockActionPayload, ChatDetailPayload, ChatPayload, MessagePayload, Page, UserPayload,
};
use murmur_store::{
    ApiError, ChatApi, ChatSnapshot, ChatStore, MediaFile, MediaUpload, SocketCommand, Transport,
    TransportError,
};

pub type TestStore = ChatStore<FakeApi, FakeTransport>;

/// Deserialize a wire payload from JSON, panicking on shape errors.
pub fn wire<T: serde::de::DeserializeOwned>(value: Value) -> T {
    serde_json::from_value(value).unwrap()
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// A push event as the transport would publish it.
pub fn push(name: &str, data: Value) -> Event {
    Event::from_push(name, data).unwrap()
}

/// Wrap any payload in an envelope on its canonical channel.
pub fn event(payload: EventPayload) -> Event {
    let channel = Channel::new(payload.channel_name()).unwrap();
    Event::new(channel, EventSource::Transport, payload)
}

pub fn connected(user_id: &str) -> Event {
    event(EventPayload::ConnectionEstablished {
        user_id: Some(user_id.to_string()),
    })
}

pub fn disconnected() -> Event {
    event(EventPayload::ConnectionLost {
        reason: "transport closed".into(),
    })
}

pub fn file(name: &str) -> MediaFile {
    MediaFile {
        name: name.to_string(),
        preview_ref: format!("blob:{name}"),
        bytes: vec![0xff, 0xd8, 0xff],
    }
}

#[derive(Default)]
pub struct FakeApi {
    chats: Mutex<HashMap<(u32, String), Page<ChatPayload>>>,
    users: Mutex<HashMap<(u32, String), Page<UserPayload>>>,
    details: Mutex<HashMap<String, ChatDetailPayload>>,
    messages: Mutex<HashMap<(String, u32), Page<MessagePayload>>>,
    media: Mutex<VecDeque<Result<Vec<MessagePayload>, ApiError>>>,
    block_responses: Mutex<VecDeque<BlockActionPayload>>,
    failing: Mutex<HashSet<&'static str>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    pub uploads: Mutex<Vec<MediaUpload>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeApi {
    pub fn with_chats(&self, page: u32, search: &str, total_pages: u32, chats: Value) {
        let items: Vec<ChatPayload> = wire(chats);
        self.chats
            .lock()
            .unwrap()
            .insert((page, search.to_string()), Page::new(items, page, total_pages));
    }

    pub fn with_users(&self, page: u32, search: &str, total_pages: u32, users: Value) {
        let items: Vec<UserPayload> = wire(users);
        self.users
            .lock()
            .unwrap()
            .insert((page, search.to_string()), Page::new(items, page, total_pages));
    }

    pub fn with_detail(&self, chat_id: &str, detail: Value) {
        self.details
            .lock()
            .unwrap()
            .insert(chat_id.to_string(), wire(detail));
    }

    pub fn with_messages(&self, chat_id: &str, page: u32, total_pages: u32, messages: Value) {
        let items: Vec<MessagePayload> = wire(messages);
        self.messages
            .lock()
            .unwrap()
            .insert((chat_id.to_string(), page), Page::new(items, page, total_pages));
    }

    pub fn queue_media(&self, result: Result<Value, ApiError>) {
        self.media
            .lock()
            .unwrap()
            .push_back(result.map(wire));
    }

    pub fn queue_block_response(&self, response: Value) {
        self.block_responses.lock().unwrap().push_back(wire(response));
    }

    /// Make every call to `endpoint` fail.
    pub fn fail(&self, endpoint: &'static str) {
        self.failing.lock().unwrap().insert(endpoint);
    }

    /// Hold calls with this key until [`FakeApi::release`].
    pub fn hold(&self, key: &str) {
        self.gates
            .lock()
            .unwrap()
            .insert(key.to_string(), Arc::new(Notify::new()));
    }

    pub fn release(&self, key: &str) {
        if let Some(gate) = self.gates.lock().unwrap().remove(key) {
            gate.notify_one();
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn enter(&self, endpoint: &'static str, key: String) -> Result<(), ApiError> {
        self.calls.lock().unwrap().push(key.clone());
        let gate = self.gates.lock().unwrap().get(&key).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.failing.lock().unwrap().contains(endpoint) {
            return Err(ApiError::Request(format!("{endpoint} unavailable")));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn list_users(
        &self,
        page: u32,
        _limit: u32,
        search: &str,
    ) -> Result<Page<UserPayload>, ApiError> {
        self.enter("list_users", format!("users:{page}:{search}")).await?;
        Ok(self
            .users
            .lock()
            .unwrap()
            .get(&(page, search.to_string()))
            .cloned()
            .unwrap_or_else(|| Page::new(Vec::new(), page, page)))
    }

    async fn list_chats(
        &self,
        page: u32,
        _limit: u32,
        search: &str,
    ) -> Result<Page<ChatPayload>, ApiError> {
        self.enter("list_chats", format!("chats:{page}:{search}")).await?;
        Ok(self
            .chats
            .lock()
            .unwrap()
            .get(&(page, search.to_string()))
            .cloned()
            .unwrap_or_else(|| Page::new(Vec::new(), page, page)))
    }

    async fn get_chat(&self, chat_id: &str) -> Result<ChatDetailPayload, ApiError> {
        self.enter("get_chat", format!("chat:{chat_id}")).await?;
        self.details
            .lock()
            .unwrap()
            .get(chat_id)
            .cloned()
            .ok_or_else(|| ApiError::Rejected {
                status: 404,
                message: format!("no chat {chat_id}"),
            })
    }

    async fn get_messages(
        &self,
        chat_id: &str,
        page: u32,
        _limit: u32,
    ) -> Result<Page<MessagePayload>, ApiError> {
        self.enter("get_messages", format!("messages:{chat_id}:{page}"))
            .await?;
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(&(chat_id.to_string(), page))
            .cloned()
            .unwrap_or_else(|| Page::new(Vec::new(), page, page)))
    }

    async fn send_media(&self, upload: MediaUpload) -> Result<Vec<MessagePayload>, ApiError> {
        self.uploads.lock().unwrap().push(upload);
        self.enter("send_media", "media".to_string()).await?;
        self.media
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn block_user(&self, user_id: &str) -> Result<BlockActionPayload, ApiError> {
        self.enter("block_user", format!("block:{user_id}")).await?;
        Ok(self
            .block_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn unblock_user(&self, user_id: &str) -> Result<BlockActionPayload, ApiError> {
        self.enter("unblock_user", format!("unblock:{user_id}")).await?;
        Ok(self
            .block_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct FakeTransport {
    sent: Mutex<Vec<SocketCommand>>,
    online: Mutex<HashSet<String>>,
    refuse_sends: AtomicBool,
}

impl FakeTransport {
    pub fn set_online(&self, user_id: &str, online: bool) {
        let mut users = self.online.lock().unwrap();
        if online {
            users.insert(user_id.to_string());
        } else {
            users.remove(user_id);
        }
    }

    pub fn refuse_sends(&self, refuse: bool) {
        self.refuse_sends.store(refuse, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SocketCommand> {
        self.sent.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.sent.lock().unwrap().iter().map(SocketCommand::name).collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl Transport for FakeTransport {
    fn is_user_online(&self, user_id: &str) -> bool {
        self.online.lock().unwrap().contains(user_id)
    }

    fn emit(&self, command: SocketCommand) -> Result<(), TransportError> {
        let refused = matches!(command, SocketCommand::Send { .. })
            && self.refuse_sends.load(Ordering::SeqCst);
        if refused {
            return Err(TransportError::Emit {
                event: command.name(),
                message: "socket closed".into(),
            });
        }
        self.sent.lock().unwrap().push(command);
        Ok(())
    }
}

pub struct Harness {
    pub api: Arc<FakeApi>,
    pub transport: Arc<FakeTransport>,
    pub bus: Arc<BroadcastEventBus>,
    pub store: Arc<TestStore>,
}

impl Harness {
    pub fn new() -> Self {
        let api = Arc::new(FakeApi::default());
        let transport = Arc::new(FakeTransport::default());
        let bus = Arc::new(BroadcastEventBus::default());
        let store = Arc::new(ChatStore::new(
            Arc::clone(&api),
            Arc::clone(&transport),
            bus.clone(),
            SyncConfig::default(),
        ));
        Self {
            api,
            transport,
            bus,
            store,
        }
    }

    /// A harness whose push channel is up with `me` as the local user.
    pub fn connected() -> Self {
        let harness = Self::new();
        harness.store.handle_event(&connected("me")).unwrap();
        harness
    }

    /// Yield until `condition` holds for the current snapshot.
    pub async fn wait_for(&self, condition: impl Fn(&ChatSnapshot) -> bool) {
        for _ in 0..1000 {
            if condition(&self.store.snapshot()) {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition not reached");
    }
}
