//! Pre-key index allocation.
//!
//! Rotating pre-keys use ids `0..=MAX_PREKEY_ID`. The last-resort key lives one
//! past that space so it can never collide with a rotating id.

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

pub type PrekeyId = u16;

/// Highest id a rotating pre-key can carry.
pub const MAX_PREKEY_ID: PrekeyId = 0xFFFE;

/// Reserved id of the non-rotating last-resort key.
pub const LAST_RESORT_PREKEY_ID: PrekeyId = MAX_PREKEY_ID + 1;

/// Half-open range `[start, start + count)` of pre-key ids allocated to a client.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrekeyIndexRange {
    start: PrekeyId,
    count: u16,
}

impl PrekeyIndexRange {
    /// Allocate `count` ids starting at `start`.
    pub fn allocate(start: PrekeyId, count: u16) -> SyncResult<Self> {
        if count == 0 {
            return Err(SyncError::precondition("pre-key batch must not be empty"));
        }
        if u32::from(start) + u32::from(count) > u32::from(MAX_PREKEY_ID) + 1 {
            return Err(SyncError::precondition(format!(
                "pre-key range [{start}, {}) exceeds the rotating id space",
                u32::from(start) + u32::from(count)
            )));
        }
        Ok(Self { start, count })
    }

    /// The first batch of a freshly registered client.
    pub fn first(count: u16) -> SyncResult<Self> {
        Self::allocate(0, count)
    }

    /// The batch that directly follows this one.
    ///
    /// When the rotating space would be overrun the allocation restarts at id 0;
    /// keys that old have long been consumed by peers.
    pub fn next(&self, count: u16) -> SyncResult<Self> {
        let start = self.end();
        if start + u32::from(count) > u32::from(MAX_PREKEY_ID) + 1 {
            return Self::allocate(0, count);
        }
        Self::allocate(start as PrekeyId, count)
    }

    pub fn start(&self) -> PrekeyId {
        self.start
    }

    pub fn count(&self) -> u16 {
        self.count
    }

    /// Exclusive upper bound.
    pub fn end(&self) -> u32 {
        u32::from(self.start) + u32::from(self.count)
    }

    /// Highest id inside the range.
    pub fn max_index(&self) -> PrekeyId {
        (self.end() - 1) as PrekeyId
    }

    pub fn contains(&self, id: PrekeyId) -> bool {
        self.start <= id && u32::from(id) < self.end()
    }

    /// Ids in allocation order.
    pub fn ids(&self) -> impl Iterator<Item = PrekeyId> {
        let start = self.start;
        (0..self.count).map(move |offset| start + offset)
    }
}
