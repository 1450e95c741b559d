//! `relaysync-sync` — the request generators of the synchronization engine.
//!
//! ## Components
//!
//! - `GapFillScheduler`: downloads missing conversation events, whitelisted
//!   conversations first, the rest behind a cooldown
//! - `KeyLifecycleManager`: registers clients and rotates their pre-keys
//! - `MissingKeyBatchFetcher`: pages requests for other users' missing client keys
//! - `AccountDeletionStrategy`: one-shot, flag-guarded account deletion
//!
//! Every generator mutates its state only inside the shared [`SyncContext`],
//! both when producing a request and when that request completes.

pub mod account_deletion;
pub mod config;
pub mod context;
pub mod gap_fill;
pub mod keys;
pub mod metadata;
pub mod missing_clients;
pub mod timer;

pub use account_deletion::{AccountDeletionStrategy, DeletionState, SignOutHandler};
pub use config::{ClientType, SyncConfig};
pub use context::{SyncContext, SyncEnvironment};
pub use gap_fill::{
    ConversationEventsRequestEncoder, DownloadedEventsParser, GapFillScheduler, HistorySyncStatus,
    InMemoryIncompleteConversationsCache, IncompleteConversationsCache, ManualHistorySyncStatus,
};
pub use keys::{
    Credentials, KeyLifecycleManager, KeyProvider, RandomKeyProvider, SignalingKeyStore,
    SignalingKeys, UserClient,
};
pub use metadata::{FileMetadataStore, InMemoryMetadataStore, PersistentMetadataStore};
pub use missing_clients::{
    MissingClient, MissingClientsMap, MissingClientsPage, MissingKeyBatchFetcher,
    PrekeysResponseParser,
};
pub use timer::{
    Clock, ManualClock, ManualTimer, SystemClock, Timer, TimerHandle, TokioClock, TokioTimer,
};
