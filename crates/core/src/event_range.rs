//! Gaps in a conversation's event history.

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Position of an event inside one conversation's history.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl core::fmt::Display for EventId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A contiguous, inclusive span `[oldest, newest]` of events missing locally.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventRange {
    oldest: EventId,
    newest: EventId,
}

impl EventRange {
    pub fn new(oldest: EventId, newest: EventId) -> SyncResult<Self> {
        if oldest > newest {
            return Err(SyncError::precondition(format!(
                "event range is inverted: {oldest} > {newest}"
            )));
        }
        Ok(Self { oldest, newest })
    }

    pub fn oldest(&self) -> EventId {
        self.oldest
    }

    pub fn newest(&self) -> EventId {
        self.newest
    }

    /// Number of events in the range. Saturates at `u64::MAX` for the one range
    /// spanning every id, which holds one event more than that.
    pub fn len(&self) -> u64 {
        (self.newest.0 - self.oldest.0).saturating_add(1)
    }

    /// Ranges always hold at least one event.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, id: EventId) -> bool {
        self.oldest <= id && id <= self.newest
    }

    /// The newest `max_len` events of this range, or the whole range if it is
    /// already short enough. Request encoders use this to fetch a smaller
    /// slice than the full gap.
    ///
    /// A `max_len` of 0 means "no limit" and returns the whole range.
    pub fn newest_slice(&self, max_len: u64) -> Self {
        if max_len == 0 || self.len() <= max_len {
            return *self;
        }
        Self {
            oldest: EventId(self.newest.0 - (max_len - 1)),
            newest: self.newest,
        }
    }
}

impl core::fmt::Display for EventRange {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[{}..={}]", self.oldest, self.newest)
    }
}
