use chrono::{DateTime, Utc};
#[cfg(feature = "native")]
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
#[cfg(feature = "native")]
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{EventBusError, MurmurError};
use crate::wire::{
    ChatPayload, DeliveredPayload, MessagePayload, SeenPayload, StopTypingPayload, TypingPayload,
};

/// Top-level channel domains. Each has its own broadcast channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    /// Connection lifecycle
    System = 0,
    /// Push events from the server
    Transport = 1,
    /// Announcements for the rendering layer
    Ui = 2,
}

impl Domain {
    pub const ALL: [Domain; 3] = [Domain::System, Domain::Transport, Domain::Ui];

    pub fn as_str(self) -> &'static str {
        match self {
            Domain::System => "system",
            Domain::Transport => "transport",
            Domain::Ui => "ui",
        }
    }

    pub fn parse(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.as_str() == segment)
    }
}

/// Hierarchical channel name validation and parsing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Channel(String);

impl Channel {
    /// Create a new channel, validating its format.
    pub fn new(name: impl Into<String>) -> std::result::Result<Self, EventBusError> {
        let name = name.into();
        if Self::is_valid(&name) {
            Ok(Self(name))
        } else {
            Err(EventBusError::InvalidChannel(name))
        }
    }

    /// Check if a channel name is valid.
    pub fn is_valid(name: &str) -> bool {
        if name.is_empty() || name.starts_with('.') || name.ends_with('.') || name.contains("..") {
            return false;
        }

        // Must be lowercase and only contain a-z, 0-9, and dots
        if name
            .chars()
            .any(|c| !matches!(c, 'a'..='z' | '0'..='9' | '.'))
        {
            return false;
        }

        name.split('.').next().and_then(Domain::parse).is_some()
    }

    /// The domain named by the first segment, if it is a known one.
    pub fn domain(&self) -> Option<Domain> {
        self.0.split('.').next().and_then(Domain::parse)
    }

    /// Get the full channel name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.0
    }
}

/// The standard event envelope wrapping all events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Hierarchical channel name (e.g., "transport.message.received")
    pub channel: Channel,

    /// When the event was created (UTC)
    pub timestamp: DateTime<Utc>,

    /// Unique identifier for this event
    pub id: Uuid,

    /// Source component that emitted this event
    pub source: EventSource,

    /// The typed event payload
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event with a given channel and payload.
    pub fn new(channel: Channel, source: EventSource, payload: EventPayload) -> Self {
        Self {
            channel,
            timestamp: Utc::now(),
            id: Uuid::new_v4(),
            source,
            payload,
        }
    }

    /// Wrap a raw push-channel event (`name` + JSON `data`) in an envelope
    /// on its canonical channel.
    pub fn from_push(name: &str, data: serde_json::Value) -> Result<Self, MurmurError> {
        let payload = EventPayload::from_push(name, data)?;
        let channel = Channel::new(payload.channel_name())?;
        Ok(Self::new(channel, EventSource::Transport, payload))
    }
}

/// Identifies the source of an event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "camelCase")]
pub enum EventSource {
    /// Core system component
    System(String),
    /// The push channel
    Transport,
    /// A recorded event stream being replayed
    Replay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum EventPayload {
    // ── System events ──────────────────────────────────────────────
    ConnectionEstablished {
        user_id: Option<String>,
    },
    ConnectionLost {
        reason: String,
    },

    // ── Push events ───────────────────────────────────────────────
    MessageReceived {
        message: MessagePayload,
    },
    ChatCreated {
        chat: ChatPayload,
    },
    MessagesDelivered {
        receipt: DeliveredPayload,
    },
    MessagesSeen {
        receipt: SeenPayload,
    },
    TypingStarted {
        typing: TypingPayload,
    },
    TypingStopped {
        typing: StopTypingPayload,
    },

    // ── UI events ────────────────────────────────────────────────
    ConversationOpened {
        chat_id: String,
    },
    ConversationClosed {
        chat_id: String,
    },
}

/// Push-channel event names as emitted by the server.
pub const PUSH_MESSAGE: &str = "message";
pub const PUSH_NEW_CHAT: &str = "new-chat";
pub const PUSH_MESSAGE_DELIVERED: &str = "message-delivered";
pub const PUSH_MESSAGES_SEEN: &str = "messages-seen";
pub const PUSH_TYPING: &str = "typing";
pub const PUSH_STOP_TYPING: &str = "stop-typing";

impl EventPayload {
    /// Classify a raw push event. Unknown names are rejected; malformed
    /// fields inside a known event fall back to their defaults.
    pub fn from_push(name: &str, data: serde_json::Value) -> Result<Self, MurmurError> {
        let payload = match name {
            PUSH_MESSAGE => EventPayload::MessageReceived {
                message: serde_json::from_value(data)?,
            },
            PUSH_NEW_CHAT => EventPayload::ChatCreated {
                chat: serde_json::from_value(data)?,
            },
            PUSH_MESSAGE_DELIVERED => EventPayload::MessagesDelivered {
                receipt: serde_json::from_value(data)?,
            },
            PUSH_MESSAGES_SEEN => EventPayload::MessagesSeen {
                receipt: serde_json::from_value(data)?,
            },
            PUSH_TYPING => EventPayload::TypingStarted {
                typing: serde_json::from_value(data)?,
            },
            PUSH_STOP_TYPING => EventPayload::TypingStopped {
                typing: serde_json::from_value(data)?,
            },
            other => {
                return Err(MurmurError::MalformedPayload(format!(
                    "unknown push event: {other}"
                )));
            }
        };
        Ok(payload)
    }

    /// The channel this payload is published on.
    pub fn channel_name(&self) -> &'static str {
        match self {
            EventPayload::ConnectionEstablished { .. } => "system.connection.established",
            EventPayload::ConnectionLost { .. } => "system.connection.lost",
            EventPayload::MessageReceived { .. } => "transport.message.received",
            EventPayload::ChatCreated { .. } => "transport.chat.created",
            EventPayload::MessagesDelivered { .. } => "transport.message.delivered",
            EventPayload::MessagesSeen { .. } => "transport.messages.seen",
            EventPayload::TypingStarted { .. } => "transport.typing.started",
            EventPayload::TypingStopped { .. } => "transport.typing.stopped",
            EventPayload::ConversationOpened { .. } => "ui.conversation.opened",
            EventPayload::ConversationClosed { .. } => "ui.conversation.closed",
        }
    }
}

#[cfg(feature = "native")]
pub trait EventBus: Send + Sync + 'static {
    fn publish(&self, event: Event) -> std::result::Result<(), EventBusError>;
    fn subscribe(&self, pattern: &str) -> std::result::Result<EventSubscription, EventBusError>;
}

/// One `tokio` broadcast channel per [`Domain`].
#[cfg(feature = "native")]
#[derive(Clone)]
pub struct BroadcastEventBus {
    senders: [broadcast::Sender<Event>; 3],
}

#[cfg(feature = "native")]
impl BroadcastEventBus {
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

    pub fn new(channel_capacity: usize) -> Self {
        let capacity = channel_capacity.max(1);
        Self {
            senders: Domain::ALL.map(|_| broadcast::channel(capacity).0),
        }
    }

    fn sender(&self, domain: Domain) -> &broadcast::Sender<Event> {
        &self.senders[domain as usize]
    }
}

#[cfg(feature = "native")]
impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CHANNEL_CAPACITY)
    }
}

#[cfg(feature = "native")]
impl EventBus for BroadcastEventBus {
    fn publish(&self, event: Event) -> std::result::Result<(), EventBusError> {
        let domain = event
            .channel
            .domain()
            .ok_or_else(|| EventBusError::InvalidChannel(event.channel.to_string()))?;
        // No receivers is not an error.
        let _ = self.sender(domain).send(event);
        Ok(())
    }

    /// Subscribe to every channel matching `pattern`. The first segment is
    /// itself a glob and picks the domains to listen on, so
    /// `{system,transport}.**` never sees `ui` traffic.
    fn subscribe(&self, pattern: &str) -> std::result::Result<EventSubscription, EventBusError> {
        let invalid = || EventBusError::InvalidPattern(pattern.to_string());
        let first_segment = pattern.split('.').next().unwrap_or_default();
        if first_segment.is_empty() {
            return Err(invalid());
        }
        let domains = Glob::new(first_segment).map_err(|_| invalid())?.compile_matcher();
        let matcher = Glob::new(pattern).map_err(|_| invalid())?.compile_matcher();

        let receivers = Domain::ALL
            .map(|d| domains.is_match(d.as_str()).then(|| self.sender(d).subscribe()));
        if receivers.iter().all(Option::is_none) {
            return Err(invalid());
        }
        Ok(EventSubscription { matcher, receivers })
    }
}

/// A live subscription. Dropping it releases the underlying receivers.
#[cfg(feature = "native")]
#[derive(Debug)]
pub struct EventSubscription {
    matcher: GlobMatcher,
    receivers: [Option<broadcast::Receiver<Event>>; 3],
}

#[cfg(feature = "native")]
impl EventSubscription {
    pub async fn recv(&mut self) -> std::result::Result<Event, EventBusError> {
        loop {
            let [system, transport, ui] = &mut self.receivers;
            let received = tokio::select! {
                result = recv_from_domain(system.as_mut()) => result,
                result = recv_from_domain(transport.as_mut()) => result,
                result = recv_from_domain(ui.as_mut()) => result,
            };

            match received {
                Ok(event) if self.matcher.is_match(event.channel.as_str()) => return Ok(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    return Err(EventBusError::Lagged(count));
                }
            }
        }
    }
}

#[cfg(feature = "native")]
async fn recv_from_domain(
    receiver: Option<&mut broadcast::Receiver<Event>>,
) -> std::result::Result<Event, broadcast::error::RecvError> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn test_channel_validation() {
        assert!(Channel::is_valid("system.startup.complete"));
        assert!(Channel::is_valid("transport.message.received"));
        assert!(Channel::is_valid("ui.conversation.opened"));

        assert!(!Channel::is_valid("invalid.domain.event"));
        assert!(!Channel::is_valid("system..double.dot"));
        assert!(!Channel::is_valid(".starts.with.dot"));
        assert!(!Channel::is_valid("ends.with.dot."));
        assert!(!Channel::is_valid("UpperCase"));
        assert!(!Channel::is_valid("with-hyphen"));
        assert!(!Channel::is_valid(""));
    }

    #[test]
    fn test_channel_domain() {
        let c = Channel::new("transport.message.received").unwrap();
        assert_eq!(c.domain(), Some(Domain::Transport));
        assert_eq!(c.to_string(), "transport.message.received");

        let forged: Channel = serde_json::from_value(json!("xmpp.message")).unwrap();
        assert_eq!(forged.domain(), None);
    }

    #[test]
    fn test_channel_new_rejects_invalid() {
        assert_matches!(
            Channel::new("xmpp.message.received"),
            Err(EventBusError::InvalidChannel(name)) if name == "xmpp.message.received"
        );
    }

    #[test]
    fn every_payload_channel_is_valid() {
        let payloads = [
            EventPayload::ConnectionEstablished { user_id: None },
            EventPayload::ConnectionLost { reason: "x".into() },
            EventPayload::MessageReceived {
                message: MessagePayload::default(),
            },
            EventPayload::ChatCreated {
                chat: ChatPayload::default(),
            },
            EventPayload::MessagesDelivered {
                receipt: DeliveredPayload::default(),
            },
            EventPayload::MessagesSeen {
                receipt: SeenPayload::default(),
            },
            EventPayload::TypingStarted {
                typing: TypingPayload::default(),
            },
            EventPayload::TypingStopped {
                typing: StopTypingPayload::default(),
            },
            EventPayload::ConversationOpened { chat_id: "c".into() },
            EventPayload::ConversationClosed { chat_id: "c".into() },
        ];
        for payload in payloads {
            assert!(Channel::is_valid(payload.channel_name()), "{}", payload.channel_name());
        }
    }

    #[test]
    fn from_push_classifies_known_events() {
        let event = Event::from_push(
            PUSH_MESSAGE,
            json!({ "_id": "m1", "chat": "c1", "content": "hi" }),
        )
        .unwrap();
        assert_eq!(event.channel.as_str(), "transport.message.received");
        assert_matches!(event.payload, EventPayload::MessageReceived { message } if message.id.normalized() == "m1");

        let typing = Event::from_push(PUSH_TYPING, json!({ "chatId": "c1", "userId": "u1" })).unwrap();
        assert_matches!(typing.payload, EventPayload::TypingStarted { .. });
    }

    #[test]
    fn from_push_rejects_unknown_event_names() {
        assert_matches!(
            Event::from_push("reaction", json!({})),
            Err(MurmurError::MalformedPayload(_))
        );
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let event = Event::from_push(PUSH_STOP_TYPING, json!({ "chatId": "c9" })).unwrap();
        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: Event = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.id, event.id);
        assert_matches!(decoded.payload, EventPayload::TypingStopped { typing } if typing.chat_id.normalized() == "c9");
    }

    #[cfg(feature = "native")]
    mod bus {
        use super::*;
        use std::time::Duration;
        use tokio::time::timeout;

        fn make_event(channel: &str, payload: EventPayload) -> Event {
            Event::new(
                Channel::new(channel).unwrap(),
                EventSource::System("test".into()),
                payload,
            )
        }

        #[tokio::test]
        async fn publish_to_transport_routes_to_transport_subscriber() {
            let bus = BroadcastEventBus::default();
            let mut sub = bus.subscribe("transport.**").unwrap();

            bus.publish(make_event(
                "transport.typing.stopped",
                EventPayload::TypingStopped {
                    typing: StopTypingPayload::default(),
                },
            ))
            .unwrap();

            let event = timeout(Duration::from_millis(100), sub.recv())
                .await
                .expect("timed out")
                .unwrap();
            assert_eq!(event.channel.as_str(), "transport.typing.stopped");
        }

        #[tokio::test]
        async fn transport_event_not_received_by_system_subscriber() {
            let bus = BroadcastEventBus::default();
            let mut sub = bus.subscribe("system.**").unwrap();

            bus.publish(make_event(
                "transport.message.received",
                EventPayload::MessageReceived {
                    message: MessagePayload::default(),
                },
            ))
            .unwrap();

            let result = timeout(Duration::from_millis(50), sub.recv()).await;
            assert!(result.is_err(), "system subscriber should not receive transport events");
        }

        #[tokio::test]
        async fn glob_filters_non_matching_channels_within_domain() {
            let bus = BroadcastEventBus::default();
            let mut sub = bus.subscribe("transport.typing.*").unwrap();

            bus.publish(make_event(
                "transport.message.received",
                EventPayload::MessageReceived {
                    message: MessagePayload::default(),
                },
            ))
            .unwrap();
            bus.publish(make_event(
                "transport.typing.started",
                EventPayload::TypingStarted {
                    typing: TypingPayload::default(),
                },
            ))
            .unwrap();

            let event = timeout(Duration::from_millis(100), sub.recv())
                .await
                .expect("timed out")
                .unwrap();
            assert_eq!(event.channel.as_str(), "transport.typing.started");
        }

        #[tokio::test]
        async fn wildcard_first_segment_receives_all_domains() {
            let bus = BroadcastEventBus::default();
            let mut sub = bus.subscribe("**").unwrap();

            bus.publish(make_event(
                "system.connection.lost",
                EventPayload::ConnectionLost { reason: "eof".into() },
            ))
            .unwrap();
            bus.publish(make_event(
                "ui.conversation.opened",
                EventPayload::ConversationOpened { chat_id: "c1".into() },
            ))
            .unwrap();

            let mut channels = Vec::new();
            for _ in 0..2 {
                let event = timeout(Duration::from_millis(100), sub.recv())
                    .await
                    .expect("timed out")
                    .unwrap();
                channels.push(event.channel.to_string());
            }
            channels.sort();
            assert_eq!(channels, ["system.connection.lost", "ui.conversation.opened"]);
        }

        #[tokio::test]
        async fn subscribe_unknown_literal_domain_returns_error() {
            let bus = BroadcastEventBus::default();
            assert_matches!(
                bus.subscribe("xmpp.**"),
                Err(EventBusError::InvalidPattern(_))
            );
            assert_matches!(bus.subscribe(""), Err(EventBusError::InvalidPattern(_)));
        }

        #[tokio::test]
        async fn lagged_subscriber_returns_lagged_error() {
            let bus = BroadcastEventBus::new(2);
            let mut sub = bus.subscribe("system.**").unwrap();

            for i in 0..10 {
                bus.publish(make_event(
                    "system.connection.lost",
                    EventPayload::ConnectionLost {
                        reason: format!("drop {i}"),
                    },
                ))
                .unwrap();
            }

            assert_matches!(sub.recv().await, Err(EventBusError::Lagged(_)));
        }

        #[tokio::test]
        async fn channel_closed_when_bus_dropped() {
            let mut sub;
            {
                let bus = BroadcastEventBus::default();
                sub = bus.subscribe("system.**").unwrap();
            }

            assert_matches!(sub.recv().await, Err(EventBusError::ChannelClosed));
        }

        #[tokio::test]
        async fn alternation_in_first_segment_selects_domains() {
            let bus = BroadcastEventBus::default();
            let mut sub = bus.subscribe("{system,transport}.**").unwrap();

            bus.publish(make_event(
                "ui.conversation.opened",
                EventPayload::ConversationOpened { chat_id: "c1".into() },
            ))
            .unwrap();
            bus.publish(make_event(
                "system.connection.established",
                EventPayload::ConnectionEstablished { user_id: None },
            ))
            .unwrap();

            let event = timeout(Duration::from_millis(100), sub.recv())
                .await
                .expect("timed out")
                .unwrap();
            assert_eq!(event.channel.as_str(), "system.connection.established");
        }

        #[test]
        fn publishing_on_an_unknown_domain_is_rejected() {
            let bus = BroadcastEventBus::default();
            let mut event = make_event(
                "system.connection.lost",
                EventPayload::ConnectionLost { reason: "x".into() },
            );
            event.channel = serde_json::from_value(json!("xmpp.message")).unwrap();
            assert_matches!(bus.publish(event), Err(EventBusError::InvalidChannel(_)));
        }
    }
}
