//! Registration slot holding the active dispatch entry point.

#![allow(unsafe_code)] // fn pointer <-> raw pointer round-trip

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::CallbackContext;

/// Entry point of independently linked callback logic.
///
/// Called once per period with the descriptor of that period. The `C-unwind`
/// ABI lets a Rust panic reach the trampoline's guard instead of aborting; it is
/// call-compatible with plain `extern "C"` functions from other languages.
pub type DispatchFn = unsafe extern "C-unwind" fn(ctx: *mut CallbackContext);

/// A cell holding at most one [`DispatchFn`].
///
/// Reads are a single acquire load and never block, so the audio thread can
/// read the slot every period. Writes are a release store: a write made before
/// a period starts is visible to that period. Writing while a stream is running
/// swaps the entry point for the next period; nothing serializes writers
/// against each other, so concurrent writers race and the last store wins.
#[derive(Debug)]
pub struct RegistrationSlot {
    entry: AtomicPtr<()>,
}

impl RegistrationSlot {
    /// An empty slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entry: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Stores `entry`, replacing any previous entry point without notice.
    pub fn set(&self, entry: DispatchFn) {
        self.entry.store(entry as *mut (), Ordering::Release);
    }

    /// Empties the slot.
    pub fn clear(&self) {
        self.entry.store(ptr::null_mut(), Ordering::Release);
    }

    /// The current entry point, if any.
    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<DispatchFn> {
        let raw = self.entry.load(Ordering::Acquire);
        if raw.is_null() {
            None
        } else {
            // SAFETY: the only non-null values ever stored are `DispatchFn`s
            // cast in `set`.
            Some(unsafe { std::mem::transmute::<*mut (), DispatchFn>(raw) })
        }
    }

    /// Returns `true` if an entry point is registered.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        !self.entry.load(Ordering::Acquire).is_null()
    }
}

impl Default for RegistrationSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide slot read by [`trampoline`](crate::trampoline).
pub(crate) static GLOBAL_SLOT: RegistrationSlot = RegistrationSlot::new();

/// Registers the entry point that [`trampoline`](crate::trampoline) dispatches to.
///
/// Call this before starting a stream that uses the trampoline. Calling it
/// again silently replaces the previous entry point, and the replacement is
/// seen by the very next period of every stream bound to the trampoline: there
/// is one callback identity per process. Use
/// [`RawStream::open_indexed`](crate::RawStream::open_indexed) or
/// [`Stream`](crate::Stream) for independent per-stream callbacks.
pub fn set_dispatch(entry: DispatchFn) {
    GLOBAL_SLOT.set(entry);
}

/// Returns `true` if an entry point has been registered with [`set_dispatch`].
#[must_use]
pub fn dispatch_registered() -> bool {
    GLOBAL_SLOT.is_registered()
}
