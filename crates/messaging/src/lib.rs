//! Message-level reconciliation rules for Murmur.
//!
//! Everything here is synchronous and free of I/O: functions take the
//! current messages by reference and hand back the next state, so callers
//! can swap snapshots wholesale.

pub mod block;
pub mod ownership;
pub mod reconcile;
pub mod status;
pub mod thread;

pub use block::BlockTarget;
pub use ownership::OwnershipResolver;
pub use reconcile::{is_superseded, reconcile, remove_temporaries, DEFAULT_MATCH_WINDOW};
pub use status::{mark_up_to, Marked, StatusUpdate};
pub use thread::ActiveThread;
