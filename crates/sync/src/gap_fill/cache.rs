//! Where gap-fill work comes from.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use relaysync_core::{ConversationId, EventRange};

/// Read-only view of conversations with missing events.
///
/// Both lists are in priority order; the scheduler never reorders them.
pub trait IncompleteConversationsCache: Send + Sync {
    /// Conversations flagged for high-priority synchronization that have gaps.
    fn incomplete_whitelisted_conversations(&self) -> Vec<ConversationId>;

    /// Every other conversation with gaps.
    fn incomplete_non_whitelisted_conversations(&self) -> Vec<ConversationId>;

    /// The next gap to fetch for `conversation`, if it still has one.
    fn gap_for_conversation(&self, conversation: ConversationId) -> Option<EventRange>;

    /// Whether the conversation still exists locally. Completions check this
    /// before handing a response to the parser.
    fn conversation_exists(&self, _conversation: ConversationId) -> bool {
        true
    }
}

/// External signal: is downloading the full history permitted right now?
pub trait HistorySyncStatus: Send + Sync {
    fn should_download_full_history(&self) -> bool;
}

/// History sync status flipped by hand (tests, or a host app with its own policy).
#[derive(Debug, Default)]
pub struct ManualHistorySyncStatus {
    permitted: AtomicBool,
}

impl ManualHistorySyncStatus {
    pub fn new(permitted: bool) -> Self {
        Self {
            permitted: AtomicBool::new(permitted),
        }
    }

    pub fn set(&self, permitted: bool) {
        self.permitted.store(permitted, Ordering::SeqCst);
    }
}

impl HistorySyncStatus for ManualHistorySyncStatus {
    fn should_download_full_history(&self) -> bool {
        self.permitted.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct CacheState {
    whitelisted: Vec<ConversationId>,
    non_whitelisted: Vec<ConversationId>,
    gaps: HashMap<ConversationId, EventRange>,
    deleted: HashSet<ConversationId>,
}

impl CacheState {
    fn unlist(&mut self, conversation: ConversationId) {
        self.whitelisted.retain(|c| *c != conversation);
        self.non_whitelisted.retain(|c| *c != conversation);
    }
}

/// In-memory cache for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryIncompleteConversationsCache {
    state: RwLock<CacheState>,
}

impl InMemoryIncompleteConversationsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or replace) the gap of a conversation. A conversation that changes
    /// tier moves to the end of its new list.
    pub fn set_gap(&self, conversation: ConversationId, gap: EventRange, whitelisted: bool) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.deleted.remove(&conversation);
        state.gaps.insert(conversation, gap);

        let already_listed = if whitelisted {
            state.whitelisted.contains(&conversation)
        } else {
            state.non_whitelisted.contains(&conversation)
        };
        if !already_listed {
            state.unlist(conversation);
            if whitelisted {
                state.whitelisted.push(conversation);
            } else {
                state.non_whitelisted.push(conversation);
            }
        }
    }

    /// The conversation is complete: drop it from both lists.
    pub fn clear_gap(&self, conversation: ConversationId) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.gaps.remove(&conversation);
        state.unlist(conversation);
    }

    /// The conversation was deleted locally.
    pub fn remove_conversation(&self, conversation: ConversationId) {
        self.clear_gap(conversation);
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.deleted.insert(conversation);
    }
}

impl IncompleteConversationsCache for InMemoryIncompleteConversationsCache {
    fn incomplete_whitelisted_conversations(&self) -> Vec<ConversationId> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.whitelisted.clone()
    }

    fn incomplete_non_whitelisted_conversations(&self) -> Vec<ConversationId> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.non_whitelisted.clone()
    }

    fn gap_for_conversation(&self, conversation: ConversationId) -> Option<EventRange> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.gaps.get(&conversation).copied()
    }

    fn conversation_exists(&self, conversation: ConversationId) -> bool {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        !state.deleted.contains(&conversation)
    }
}
