//! Dispatch indirection between the trampoline and external logic.

#![allow(unsafe_code)] // exported C symbol

use crate::{CallbackContext, DispatchFn};

/// Forwards `ctx` to `entry`.
///
/// This is the seam between the trampoline's link unit and the link unit
/// providing `entry`: its symbol name is stable (`stream_bridge_dispatch`) so
/// either side can reach it without seeing the other's internals. It holds no
/// state and leaves the descriptor untouched.
///
/// # Safety
///
/// `ctx` must point to a descriptor whose buffers are live for the duration of
/// the call, and `entry` must uphold its own contract for that descriptor.
#[no_mangle]
#[inline(never)]
pub unsafe extern "C-unwind" fn stream_bridge_dispatch(
    entry: DispatchFn,
    ctx: *mut CallbackContext,
) {
    entry(ctx);
}
