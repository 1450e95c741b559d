//! `relaysync-core` — shared building blocks for the request generators.
//!
//! This crate contains **pure value types** (no IO, no async, no clocks).

pub mod error;
pub mod event_range;
pub mod id;
pub mod prekey;

pub use error::{SyncError, SyncResult};
pub use event_range::{EventId, EventRange};
pub use id::{ClientId, ConversationId, RemoteClientId, UserId};
pub use prekey::{LAST_RESORT_PREKEY_ID, MAX_PREKEY_ID, PrekeyId, PrekeyIndexRange};
