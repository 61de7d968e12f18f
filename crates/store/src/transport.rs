use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("push channel is not connected")]
    NotConnected,

    #[error("failed to emit {event}: {message}")]
    Emit { event: &'static str, message: String },
}

/// Commands the client emits on the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum SocketCommand {
    Join {
        chat_id: String,
    },
    Leave {
        chat_id: String,
    },
    /// Text send; a first message to a new counterpart carries
    /// `other_user_id` instead of `chat_id`.
    Send {
        #[serde(skip_serializing_if = "Option::is_none")]
        chat_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        other_user_id: Option<String>,
        content: String,
        is_receiver_online: bool,
    },
    StartTyping {
        chat_id: String,
    },
    StopTyping {
        chat_id: String,
    },
    MarkDelivered {
        chat_id: String,
    },
    MarkRead {
        chat_id: String,
    },
}

impl SocketCommand {
    /// Wire event name.
    pub fn name(&self) -> &'static str {
        match self {
            SocketCommand::Join { .. } => "join",
            SocketCommand::Leave { .. } => "leave",
            SocketCommand::Send { .. } => "send",
            SocketCommand::StartTyping { .. } => "start-typing",
            SocketCommand::StopTyping { .. } => "stop-typing",
            SocketCommand::MarkDelivered { .. } => "mark-delivered",
            SocketCommand::MarkRead { .. } => "mark-read",
        }
    }
}

/// The push-channel collaborator: presence queries and emit-only actions.
/// Inbound events reach the store through the event bus.
pub trait Transport: Send + Sync + 'static {
    fn is_user_online(&self, user_id: &str) -> bool;

    fn emit(&self, command: SocketCommand) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commands_serialize_with_wire_names() {
        let join = SocketCommand::Join { chat_id: "c1".into() };
        assert_eq!(
            serde_json::to_value(&join).unwrap(),
            json!({ "event": "join", "data": { "chatId": "c1" } })
        );

        let first = SocketCommand::Send {
            chat_id: None,
            other_user_id: Some("u2".into()),
            content: "hi".into(),
            is_receiver_online: true,
        };
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            json!({
                "event": "send",
                "data": { "otherUserId": "u2", "content": "hi", "isReceiverOnline": true }
            })
        );
    }

    #[test]
    fn names_match_serialized_tags() {
        let commands = [
            SocketCommand::Leave { chat_id: "c".into() },
            SocketCommand::StartTyping { chat_id: "c".into() },
            SocketCommand::StopTyping { chat_id: "c".into() },
            SocketCommand::MarkDelivered { chat_id: "c".into() },
            SocketCommand::MarkRead { chat_id: "c".into() },
        ];
        for command in commands {
            let value = serde_json::to_value(&command).unwrap();
            assert_eq!(value["event"], command.name());
        }
    }
}
