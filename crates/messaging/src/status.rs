use chrono::{DateTime, Utc};
use tracing::debug;

use murmur_core::model::Message;

use crate::ownership::OwnershipResolver;

/// Which receipt a watermark carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    pub delivered: bool,
    pub seen: bool,
}

impl StatusUpdate {
    pub const DELIVERED: StatusUpdate = StatusUpdate {
        delivered: true,
        seen: false,
    };

    pub const SEEN: StatusUpdate = StatusUpdate {
        delivered: true,
        seen: true,
    };

    pub fn is_empty(&self) -> bool {
        !self.delivered && !self.seen
    }

    fn already_satisfied(&self, message: &Message) -> bool {
        if self.seen {
            message.read
        } else {
            message.delivered
        }
    }
}

/// Result of applying a watermark.
#[derive(Debug, Clone, PartialEq)]
pub struct Marked {
    pub messages: Vec<Message>,
    /// Number of messages whose flags changed
    pub changed: usize,
}

/// Raise delivery/read flags on the local user's messages created at or
/// before `watermark` (`None` means no limit). Flags are only ever set,
/// and messages already satisfying the requested status are left as is.
pub fn mark_up_to(
    messages: &[Message],
    watermark: Option<DateTime<Utc>>,
    update: StatusUpdate,
    resolver: &OwnershipResolver,
) -> Marked {
    if update.is_empty() {
        return Marked {
            messages: messages.to_vec(),
            changed: 0,
        };
    }

    let mut changed = 0;
    let messages = messages
        .iter()
        .map(|m| {
            let within = watermark.map_or(true, |limit| m.created_at <= limit);
            if !within || !resolver.is_mine(m) || update.already_satisfied(m) {
                return m.clone();
            }
            let mut m = m.clone();
            m.delivered = true;
            if update.seen {
                m.read = true;
            }
            changed += 1;
            m
        })
        .collect();

    if changed > 0 {
        debug!(changed, ?watermark, seen = update.seen, "status watermark applied");
    }
    Marked { messages, changed }
}
