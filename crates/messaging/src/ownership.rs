use std::sync::OnceLock;

use tracing::debug;

use murmur_core::model::Message;

/// Decides whether a message was authored by the local user.
///
/// The local user id is learned lazily and written at most once per
/// session; later attempts to learn a different id are ignored.
#[derive(Debug, Default)]
pub struct OwnershipResolver {
    local_user: OnceLock<String>,
}

impl OwnershipResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A resolver that already knows the local user.
    pub fn with_local_user(user_id: impl Into<String>) -> Self {
        let resolver = Self::new();
        resolver.learn(user_id);
        resolver
    }

    pub fn local_user(&self) -> Option<&str> {
        self.local_user.get().map(String::as_str)
    }

    /// Adopt `user_id` as the local user if none is known yet. Returns
    /// `true` only when this call set the value.
    pub fn learn(&self, user_id: impl Into<String>) -> bool {
        let user_id = user_id.into();
        if user_id.is_empty() {
            return false;
        }
        let learned = self.local_user.set(user_id).is_ok();
        if learned {
            debug!(user_id = ?self.local_user(), "learned local user");
        }
        learned
    }

    /// Explicit authorship flag first, then the learned local id, else not mine.
    pub fn is_mine(&self, message: &Message) -> bool {
        if let Some(mine) = message.is_mine {
            return mine;
        }
        match self.local_user() {
            Some(local) => !message.sender_id.is_empty() && message.sender_id == local,
            None => false,
        }
    }

    /// Learn the local user from the first message explicitly flagged as
    /// self-authored. No-op once a value is known.
    pub fn detect_local_user<'a>(&self, messages: impl IntoIterator<Item = &'a Message>) {
        if self.local_user().is_some() {
            return;
        }
        if let Some(sender) = messages
            .into_iter()
            .find(|m| m.is_mine == Some(true) && !m.sender_id.is_empty())
            .map(|m| m.sender_id.clone())
        {
            self.learn(sender);
        }
    }
}
