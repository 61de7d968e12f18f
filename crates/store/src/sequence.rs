use std::sync::atomic::{AtomicU64, Ordering};

/// Orders overlapping paginated list requests.
///
/// A request that replaces the list (page 1, or a new search) opens a new
/// epoch. Responses to requests issued before the latest epoch are stale
/// and must not be applied.
#[derive(Debug, Default)]
pub(crate) struct RequestSequence {
    issued: AtomicU64,
    epoch: AtomicU64,
}

impl RequestSequence {
    /// Number a new request.
    pub(crate) fn begin(&self, replaces: bool) -> u64 {
        let seq = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        if replaces {
            self.epoch.fetch_max(seq, Ordering::SeqCst);
        }
        seq
    }

    pub(crate) fn is_stale(&self, seq: u64) -> bool {
        seq < self.epoch.load(Ordering::SeqCst)
    }
}
