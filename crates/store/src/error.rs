use murmur_core::error::EventBusError;

use crate::api::ApiError;
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("push channel is disconnected")]
    Disconnected,

    #[error("conversation is blocked")]
    Blocked,

    #[error("no active conversation")]
    NoActiveConversation,

    #[error("nothing to send")]
    EmptyMessage,

    #[error("missing {0} id")]
    MissingId(&'static str),

    #[error("internal error: {0}")]
    Internal(String),
}
