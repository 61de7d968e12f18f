//! Folding server-confirmed messages into a set that may still hold
//! optimistic (temporary) entries.
//!
//! Matching a temporary entry to its confirmation is a heuristic: the two
//! must be close in time and carry the same payload. Only the single
//! closest qualifying temporary is retired per confirmation, so a burst of
//! identical sends reconciles one-for-one and unrelated temporaries stay.

use std::time::Duration;

use tracing::debug;

use murmur_core::ids::same_id;
use murmur_core::model::{Message, MessageKind};

/// Default maximum distance between a temporary message and its confirmation.
pub const DEFAULT_MATCH_WINDOW: Duration = Duration::from_secs(10);

fn distance_ms(a: &Message, b: &Message) -> u64 {
    (a.created_at - b.created_at).num_milliseconds().unsigned_abs()
}

/// Whether `candidate` is an optimistic entry that `confirmed` supersedes.
pub fn is_superseded(candidate: &Message, confirmed: &Message, window: Duration) -> bool {
    if !candidate.is_temporary() {
        return false;
    }
    if u128::from(distance_ms(candidate, confirmed)) >= window.as_millis() {
        return false;
    }
    match (candidate.kind, confirmed.kind) {
        (MessageKind::Image, MessageKind::Image) => true,
        (MessageKind::Text, MessageKind::Text) => candidate.content == confirmed.content,
        _ => false,
    }
}

/// Raise `target`'s status flags to at least those of `source`.
fn absorb_status(target: &mut Message, source: &Message) {
    target.read |= source.read;
    target.delivered |= source.delivered || target.read;
    if target.is_mine.is_none() {
        target.is_mine = source.is_mine;
    }
}

/// Merge `confirmed` into `existing`.
///
/// If the confirmed id is already present its flags are merged in place and
/// nothing else changes. Otherwise the closest superseded temporary (ties go
/// to the earlier position) is dropped and `confirmed` is inserted after the
/// last message not newer than it.
pub fn reconcile(existing: &[Message], confirmed: Message, window: Duration) -> Vec<Message> {
    if existing.iter().any(|m| same_id(&m.id, &confirmed.id)) {
        return existing
            .iter()
            .map(|m| {
                let mut m = m.clone();
                if same_id(&m.id, &confirmed.id) {
                    absorb_status(&mut m, &confirmed);
                }
                m
            })
            .collect();
    }

    let superseded = existing
        .iter()
        .enumerate()
        .filter(|(_, m)| is_superseded(m, &confirmed, window))
        .min_by_key(|(_, m)| distance_ms(m, &confirmed))
        .map(|(index, _)| index);

    let mut next: Vec<Message> = Vec::with_capacity(existing.len() + 1);
    for (index, m) in existing.iter().enumerate() {
        if Some(index) == superseded {
            debug!(temp_id = %m.id, confirmed_id = %confirmed.id, "temporary message superseded");
            continue;
        }
        next.push(m.clone());
    }

    let at = next
        .iter()
        .rposition(|m| m.created_at <= confirmed.created_at)
        .map_or(0, |i| i + 1);
    next.insert(at, confirmed);
    next
}

/// Remove exactly the listed temporary ids. Confirmed messages are never
/// removed, even if listed.
pub fn remove_temporaries(messages: &[Message], ids: &[String]) -> Vec<Message> {
    messages
        .iter()
        .filter(|m| !(m.is_temporary() && ids.iter().any(|id| id == &m.id)))
        .cloned()
        .collect()
}
