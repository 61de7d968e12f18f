use std::sync::Arc;

use tracing::{debug, warn};

use crate::transport::{SocketCommand, Transport, TransportError};

/// Membership of the open conversation's push-channel room.
///
/// Joining emits `join`; dropping the guard emits `leave`, so switching or
/// closing conversations can never leak a membership.
pub struct JoinedRoom<T: Transport> {
    chat_id: String,
    transport: Arc<T>,
}

impl<T: Transport> JoinedRoom<T> {
    pub fn join(transport: Arc<T>, chat_id: impl Into<String>) -> Result<Self, TransportError> {
        let chat_id = chat_id.into();
        transport.emit(SocketCommand::Join {
            chat_id: chat_id.clone(),
        })?;
        debug!(chat_id = %chat_id, "joined room");
        Ok(Self { chat_id, transport })
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Re-announce membership after the push channel reconnects.
    pub fn rejoin(&self) -> Result<(), TransportError> {
        self.transport.emit(SocketCommand::Join {
            chat_id: self.chat_id.clone(),
        })
    }
}

impl<T: Transport> Drop for JoinedRoom<T> {
    fn drop(&mut self) {
        let leave = SocketCommand::Leave {
            chat_id: std::mem::take(&mut self.chat_id),
        };
        match self.transport.emit(leave) {
            Ok(()) => debug!("left room"),
            Err(e) => warn!(error = %e, "failed to leave room"),
        }
    }
}

impl<T: Transport> std::fmt::Debug for JoinedRoom<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinedRoom")
            .field("chat_id", &self.chat_id)
            .finish_non_exhaustive()
    }
}
