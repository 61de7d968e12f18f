//! Collaborators for running the store without a server.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use murmur_core::wire::{
    BlockActionPayload, ChatDetailPayload, ChatPayload, MessagePayload, Page, UserPayload,
};
use murmur_store::{ApiError, ChatApi, MediaUpload, SocketCommand, Transport, TransportError};

fn offline<T>() -> Result<T, ApiError> {
    Err(ApiError::Request("offline replay has no API".into()))
}

/// Answers every listing with an empty page and refuses everything else.
#[derive(Debug, Default)]
pub struct OfflineApi;

#[async_trait]
impl ChatApi for OfflineApi {
    async fn list_users(
        &self,
        page: u32,
        _limit: u32,
        _search: &str,
    ) -> Result<Page<UserPayload>, ApiError> {
        Ok(Page::new(Vec::new(), page, page))
    }

    async fn list_chats(
        &self,
        page: u32,
        _limit: u32,
        _search: &str,
    ) -> Result<Page<ChatPayload>, ApiError> {
        Ok(Page::new(Vec::new(), page, page))
    }

    async fn get_chat(&self, _chat_id: &str) -> Result<ChatDetailPayload, ApiError> {
        offline()
    }

    async fn get_messages(
        &self,
        _chat_id: &str,
        page: u32,
        _limit: u32,
    ) -> Result<Page<MessagePayload>, ApiError> {
        Ok(Page::new(Vec::new(), page, page))
    }

    async fn send_media(&self, _upload: MediaUpload) -> Result<Vec<MessagePayload>, ApiError> {
        offline()
    }

    async fn block_user(&self, _user_id: &str) -> Result<BlockActionPayload, ApiError> {
        offline()
    }

    async fn unblock_user(&self, _user_id: &str) -> Result<BlockActionPayload, ApiError> {
        offline()
    }
}

/// Reports nobody online and records every command instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    emitted: Mutex<Vec<SocketCommand>>,
}

impl RecordingTransport {
    pub fn emitted(&self) -> Vec<SocketCommand> {
        match self.emitted.lock() {
            Ok(emitted) => emitted.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Transport for RecordingTransport {
    fn is_user_online(&self, _user_id: &str) -> bool {
        false
    }

    fn emit(&self, command: SocketCommand) -> Result<(), TransportError> {
        info!(event = command.name(), "command recorded");
        self.emitted
            .lock()
            .map_err(|_| TransportError::Emit {
                event: command.name(),
                message: "recorder poisoned".into(),
            })?
            .push(command);
        Ok(())
    }
}
