//! The chat state store: one explicitly constructed owner of the client's
//! conversation state, fed by push events and user operations.
//!
//! ```text
//!   event bus ──► ChatStore::handle_event ──► reducer ──┐
//!   operations ─► ChatApi / Transport ─────────────────┼─► Arc<ChatSnapshot> ─► watch
//! ```

pub mod api;
pub mod error;
pub mod handle;
pub mod reducer;
pub mod room;
mod sequence;
pub mod state;
pub mod store;
pub mod transport;

pub use api::{ApiError, ChatApi, MediaFile, MediaUpload};
pub use error::StoreError;
pub use handle::StoreHandle;
pub use room::JoinedRoom;
pub use state::{ChatSnapshot, LoadingFlags};
pub use store::{ChatStore, SUBSCRIPTION_PATTERN};
pub use transport::{SocketCommand, Transport, TransportError};
