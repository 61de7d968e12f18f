use async_trait::async_trait;

use murmur_core::wire::{
    BlockActionPayload, ChatDetailPayload, ChatPayload, MessagePayload, Page, UserPayload,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// One file of a media send. Upload mechanics belong to the API client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub name: String,
    /// Local reference shown in the optimistic preview (e.g. an object URL)
    pub preview_ref: String,
    pub bytes: Vec<u8>,
}

/// A media send request. Exactly one of `chat_id` and `other_user_id` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUpload {
    pub chat_id: Option<String>,
    pub other_user_id: Option<String>,
    pub is_receiver_online: bool,
    pub files: Vec<MediaFile>,
}

/// The request/response collaborator.
#[async_trait]
pub trait ChatApi: Send + Sync + 'static {
    async fn list_users(
        &self,
        page: u32,
        limit: u32,
        search: &str,
    ) -> Result<Page<UserPayload>, ApiError>;

    async fn list_chats(
        &self,
        page: u32,
        limit: u32,
        search: &str,
    ) -> Result<Page<ChatPayload>, ApiError>;

    async fn get_chat(&self, chat_id: &str) -> Result<ChatDetailPayload, ApiError>;

    async fn get_messages(
        &self,
        chat_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<Page<MessagePayload>, ApiError>;

    /// Upload media; returns the confirmed messages replacing the previews.
    async fn send_media(&self, upload: MediaUpload) -> Result<Vec<MessagePayload>, ApiError>;

    async fn block_user(&self, user_id: &str) -> Result<BlockActionPayload, ApiError>;

    async fn unblock_user(&self, user_id: &str) -> Result<BlockActionPayload, ApiError>;
}
