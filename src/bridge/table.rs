//! Indexed stream table: one registration slot per stream.

use std::fmt;

use parking_lot::Mutex;

use crate::bridge::slot::RegistrationSlot;
use crate::{BridgeError, DispatchFn};

/// Number of streams that can hold an indexed slot at the same time.
pub const MAX_STREAMS: usize = 64;

/// Index of a stream's slot in the [`StreamTable`].
///
/// The id doubles as the driver's user-data token for
/// [`indexed_trampoline`](crate::indexed_trampoline).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(usize);

impl StreamId {
    /// Raw table index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }

    /// Recovers an id from a user-data token. No bounds check.
    #[must_use]
    pub fn from_token(token: usize) -> Self {
        Self(token)
    }

    /// The token to hand to the driver as user data.
    #[must_use]
    pub fn token(self) -> usize {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

/// Fixed-size table mapping [`StreamId`]s to their own entry points.
///
/// Claiming and releasing ids takes a lock and belongs on control threads.
/// Looking up an entry point is an index plus an atomic load and is safe to do
/// on the audio thread.
pub struct StreamTable {
    slots: [RegistrationSlot; MAX_STREAMS],
    claimed: Mutex<[bool; MAX_STREAMS]>,
}

impl StreamTable {
    /// An empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [const { RegistrationSlot::new() }; MAX_STREAMS],
            claimed: parking_lot::const_mutex([false; MAX_STREAMS]),
        }
    }

    /// Claims a free slot and registers `entry` in it.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::StreamTableFull`] if every slot is claimed.
    pub fn claim(&self, entry: DispatchFn) -> Result<StreamId, BridgeError> {
        let mut claimed = self.claimed.lock();
        let index = claimed
            .iter()
            .position(|taken| !taken)
            .ok_or(BridgeError::StreamTableFull {
                capacity: MAX_STREAMS,
            })?;
        claimed[index] = true;
        self.slots[index].set(entry);
        Ok(StreamId(index))
    }

    /// Replaces the entry point of a claimed slot.
    ///
    /// Takes effect on the stream's next period. Unclaimed ids are ignored.
    pub fn set(&self, id: StreamId, entry: DispatchFn) {
        let claimed = self.claimed.lock();
        if claimed.get(id.0).copied().unwrap_or(false) {
            self.slots[id.0].set(entry);
        }
    }

    /// Clears and frees a slot.
    ///
    /// The caller must make sure the driver no longer calls back with this id.
    pub fn release(&self, id: StreamId) {
        let mut claimed = self.claimed.lock();
        if let Some(taken) = claimed.get_mut(id.0) {
            self.slots[id.0].clear();
            *taken = false;
        }
    }

    /// Entry point registered for `id`, if any. Lock-free.
    #[inline]
    #[must_use]
    pub fn get(&self, id: StreamId) -> Option<DispatchFn> {
        self.slots.get(id.0).and_then(RegistrationSlot::get)
    }

    /// Number of claimed slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.claimed.lock().iter().filter(|taken| **taken).count()
    }

    /// Returns `true` if no slot is claimed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StreamTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide table read by [`indexed_trampoline`](crate::indexed_trampoline).
pub(crate) static STREAM_TABLE: StreamTable = StreamTable::new();
