use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use murmur_core::ids::same_id;

fn elapsed_at_least(since: DateTime<Utc>, now: DateTime<Utc>, limit: Duration) -> bool {
    let elapsed = (now - since).num_milliseconds();
    elapsed >= 0 && elapsed as u128 >= limit.as_millis()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicator {
    pub user_id: String,
    /// Last time a `typing` signal refreshed this indicator
    pub since: DateTime<Utc>,
}

/// Per-conversation typing indicators with local expiry.
///
/// An indicator is set by `typing` and cleared by `stop-typing`, by a
/// message from the typing user, or once it has gone `ttl` without a
/// refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypingTracker {
    #[serde(flatten)]
    indicators: BTreeMap<String, TypingIndicator>,
    #[serde(skip)]
    ttl: Duration,
}

impl TypingTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            indicators: BTreeMap::new(),
            ttl,
        }
    }

    pub fn on_typing(&mut self, chat_id: &str, user_id: &str, now: DateTime<Utc>) -> bool {
        if chat_id.is_empty() {
            return false;
        }
        let indicator = TypingIndicator {
            user_id: user_id.to_string(),
            since: now,
        };
        let previous = self.indicators.insert(chat_id.to_string(), indicator);
        debug!(chat_id, user_id, "typing started");
        previous.map_or(true, |p| p.user_id != user_id || p.since != now)
    }

    pub fn on_stop_typing(&mut self, chat_id: &str) -> bool {
        let removed = self.indicators.remove(chat_id).is_some();
        if removed {
            debug!(chat_id, "typing stopped");
        }
        removed
    }

    /// A message from the typing user supersedes their indicator. An empty
    /// typing user id matches any sender.
    pub fn clear_for_sender(&mut self, chat_id: &str, sender_id: &str) -> bool {
        let matches = self
            .indicators
            .get(chat_id)
            .is_some_and(|i| i.user_id.is_empty() || same_id(&i.user_id, sender_id));
        matches && self.on_stop_typing(chat_id)
    }

    /// Drop indicators that have not been refreshed within the ttl. Returns
    /// the affected conversation ids.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let ttl = self.ttl;
        let expired: Vec<String> = self
            .indicators
            .iter()
            .filter(|(_, i)| elapsed_at_least(i.since, now, ttl))
            .map(|(chat_id, _)| chat_id.clone())
            .collect();
        for chat_id in &expired {
            self.indicators.remove(chat_id);
            debug!(chat_id = %chat_id, "typing indicator expired");
        }
        expired
    }

    /// Who is typing in `chat_id`, ignoring an expired indicator.
    pub fn who(&self, chat_id: &str, now: DateTime<Utc>) -> Option<&str> {
        self.indicators
            .get(chat_id)
            .filter(|i| !elapsed_at_least(i.since, now, self.ttl))
            .map(|i| i.user_id.as_str())
    }

    pub fn is_typing(&self, chat_id: &str, now: DateTime<Utc>) -> bool {
        self.who(chat_id, now).is_some()
    }

    pub fn indicators(&self) -> &BTreeMap<String, TypingIndicator> {
        &self.indicators
    }

    pub fn clear(&mut self) {
        self.indicators.clear();
    }
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(6))
    }
}

/// A typing signal the local client should emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingAction {
    Start(String),
    Stop(String),
}

/// Debounces the local user's keystrokes into `start-typing` /
/// `stop-typing` signals.
#[derive(Debug, Clone)]
pub struct TypingEmitter {
    idle: Duration,
    current: Option<(String, DateTime<Utc>)>,
}

impl TypingEmitter {
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            current: None,
        }
    }

    /// Register a keystroke in `chat_id`. Emits `Start` on the first
    /// keystroke, and a `Stop` for the previous conversation if it changed.
    pub fn keystroke(&mut self, chat_id: &str, now: DateTime<Utc>) -> Vec<TypingAction> {
        let mut actions = Vec::new();
        match self.current.as_mut() {
            Some((current, last)) if current.as_str() == chat_id => {
                *last = now;
                return actions;
            }
            Some((current, _)) => actions.push(TypingAction::Stop(current.clone())),
            None => {}
        }
        self.current = Some((chat_id.to_string(), now));
        actions.push(TypingAction::Start(chat_id.to_string()));
        actions
    }

    /// Emits `Stop` once the idle period has elapsed since the last keystroke.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<TypingAction> {
        let expired = self
            .current
            .as_ref()
            .is_some_and(|(_, last)| elapsed_at_least(*last, now, self.idle));
        if expired {
            self.finish()
        } else {
            None
        }
    }

    /// Stop immediately, e.g. on send or when leaving the conversation.
    pub fn finish(&mut self) -> Option<TypingAction> {
        self.current
            .take()
            .map(|(chat_id, _)| TypingAction::Stop(chat_id))
    }

    /// When `poll` will next emit, if typing is active.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        let idle = chrono::Duration::from_std(self.idle).ok()?;
        self.current.as_ref().map(|(_, last)| *last + idle)
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }
}

/// Online flags of counterparts, refreshed from the presence source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OnlineRoster {
    #[serde(flatten)]
    flags: BTreeMap<String, bool>,
}

impl OnlineRoster {
    /// Re-check every id in `user_ids`, dropping ids no longer listed.
    /// Returns whether any flag changed.
    pub fn refresh<'a>(
        &mut self,
        user_ids: impl IntoIterator<Item = &'a str>,
        is_online: impl Fn(&str) -> bool,
    ) -> bool {
        let next: BTreeMap<String, bool> = user_ids
            .into_iter()
            .filter(|id| !id.is_empty())
            .map(|id| (id.to_string(), is_online(id)))
            .collect();
        let changed = next != self.flags;
        self.flags = next;
        changed
    }

    pub fn set(&mut self, user_id: &str, online: bool) -> bool {
        self.flags.insert(user_id.to_string(), online) != Some(online)
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.flags.get(user_id).copied().unwrap_or(false)
    }

    pub fn clear(&mut self) {
        self.flags.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    const T: i64 = 1_700_000_000_000;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn tracker() -> TypingTracker {
        TypingTracker::new(Duration::from_secs(6))
    }

    #[test]
    fn typing_then_stop() {
        let mut t = tracker();
        assert!(t.on_typing("c1", "u1", at(T)));
        assert_eq!(t.who("c1", at(T)), Some("u1"));
        assert!(t.on_stop_typing("c1"));
        assert!(!t.on_stop_typing("c1"));
        assert!(!t.is_typing("c1", at(T)));
    }

    #[test]
    fn empty_conversation_id_is_ignored() {
        let mut t = tracker();
        assert!(!t.on_typing("", "u1", at(T)));
        assert!(t.indicators().is_empty());
    }

    #[test]
    fn indicator_expires_without_refresh() {
        let mut t = tracker();
        t.on_typing("c1", "u1", at(T));
        t.on_typing("c2", "u2", at(T + 4_000));
        assert!(t.is_typing("c1", at(T + 5_999)));
        assert!(!t.is_typing("c1", at(T + 6_000)));

        assert_eq!(t.sweep(at(T + 6_000)), ["c1"]);
        assert!(t.is_typing("c2", at(T + 6_000)));
        assert!(t.sweep(at(T + 6_000)).is_empty());
    }

    #[test]
    fn refresh_extends_indicator() {
        let mut t = tracker();
        t.on_typing("c1", "u1", at(T));
        t.on_typing("c1", "u1", at(T + 5_000));
        assert!(t.sweep(at(T + 7_000)).is_empty());
    }

    #[test]
    fn message_from_typing_user_clears() {
        let mut t = tracker();
        t.on_typing("c1", "u1", at(T));
        assert!(!t.clear_for_sender("c1", "me"));
        assert!(t.clear_for_sender("c1", "u1"));
        assert!(!t.is_typing("c1", at(T)));
    }

    #[test]
    #[tracing_test::traced_test]
    fn transitions_are_logged() {
        let mut t = tracker();
        t.on_typing("c1", "u1", at(T));
        assert!(logs_contain("typing started"));
    }

    #[test]
    fn emitter_debounces_keystrokes() {
        let mut e = TypingEmitter::new(Duration::from_secs(2));
        assert_eq!(e.keystroke("c1", at(T)), [TypingAction::Start("c1".into())]);
        assert!(e.keystroke("c1", at(T + 500)).is_empty());
        assert_eq!(e.deadline(), Some(at(T + 2_500)));
        assert_matches!(e.poll(at(T + 2_000)), None);
        assert_eq!(e.poll(at(T + 2_500)), Some(TypingAction::Stop("c1".into())));
        assert!(!e.is_active());
        assert_matches!(e.poll(at(T + 9_000)), None);
    }

    #[test]
    fn emitter_switches_conversation() {
        let mut e = TypingEmitter::new(Duration::from_secs(2));
        e.keystroke("c1", at(T));
        assert_eq!(
            e.keystroke("c2", at(T + 100)),
            [TypingAction::Stop("c1".into()), TypingAction::Start("c2".into())]
        );
        assert_eq!(e.finish(), Some(TypingAction::Stop("c2".into())));
        assert_eq!(e.finish(), None);
    }

    #[test]
    fn roster_refresh_reports_changes() {
        let mut r = OnlineRoster::default();
        assert!(r.refresh(["u1", "u2", ""], |id| id == "u1"));
        assert!(r.is_online("u1"));
        assert!(!r.is_online("u2"));
        assert!(!r.refresh(["u1", "u2"], |id| id == "u1"));
        assert!(r.set("u2", true));
        assert!(!r.set("u2", true));
        assert!(!r.is_online("unknown"));
    }
}
