//! Native trampolines: the functions the driver calls directly.

#![allow(unsafe_code)] // native callback entry points

use std::ffi::{c_int, c_ulong, c_void};

use crate::bridge::dispatch::stream_bridge_dispatch;
use crate::bridge::guard::rt_guard;
use crate::bridge::slot::{RegistrationSlot, GLOBAL_SLOT};
use crate::bridge::table::{StreamId, STREAM_TABLE};
use crate::{CallbackContext, DispatchFn, StatusCode, StatusFlags, TimeInfo};

/// The native callback signature drivers invoke once per period.
pub type RawStreamCallback = unsafe extern "C" fn(
    input: *const c_void,
    output: *mut c_void,
    frame_count: c_ulong,
    time_info: *const TimeInfo,
    status_flags: StatusFlags,
    user_data: *mut c_void,
) -> c_int;

/// Builds the descriptor and forwards it through the dispatch indirection.
///
/// Always returns `Continue`: the descriptor carries no outcome back, and a
/// panicking entry point is swallowed here.
#[inline]
fn dispatch_period(entry: Option<DispatchFn>, mut ctx: CallbackContext) -> c_int {
    if let Some(entry) = entry {
        rt_guard!((); {
            // SAFETY: the driver guarantees the raw pointers in `ctx` are live
            // until this callback returns; `ctx` itself lives on this frame.
            unsafe { stream_bridge_dispatch(entry, &mut ctx) }
        });
    }
    StatusCode::Continue.as_raw()
}

/// Runs one period against `slot`.
pub(crate) fn bridge_call(
    slot: &RegistrationSlot,
    input: *const c_void,
    output: *mut c_void,
    frame_count: c_ulong,
    time_info: *const TimeInfo,
    status_flags: StatusFlags,
    user_data: *mut c_void,
) -> c_int {
    let ctx = CallbackContext::from_raw(
        input,
        output,
        frame_count,
        time_info,
        status_flags,
        user_data,
    );
    dispatch_period(slot.get(), ctx)
}

/// Driver-facing callback bound to the process-wide slot.
///
/// Builds a [`CallbackContext`] from its arguments without touching buffer
/// contents, reads the entry point registered with
/// [`set_dispatch`](crate::set_dispatch) and, if there is one, calls it through
/// [`stream_bridge_dispatch`]. `user_data` is passed through as the
/// descriptor's `stream` handle.
///
/// Returns `Continue` on every invocation: there is no path for the entry point
/// to ask the driver to stop, and a panic inside it is caught and ignored. A
/// failing entry point is only visible as whatever it left in the output
/// buffer. Use [`Stream`](crate::Stream) when the callback must be able to
/// finish or abort the stream.
///
/// # Safety
///
/// Must only be called by a driver honouring the callback protocol: buffer and
/// time-info pointers are null or valid for the call's duration.
pub unsafe extern "C" fn trampoline(
    input: *const c_void,
    output: *mut c_void,
    frame_count: c_ulong,
    time_info: *const TimeInfo,
    status_flags: StatusFlags,
    user_data: *mut c_void,
) -> c_int {
    bridge_call(
        &GLOBAL_SLOT,
        input,
        output,
        frame_count,
        time_info,
        status_flags,
        user_data,
    )
}

/// Driver-facing callback bound to the indexed stream table.
///
/// `user_data` is the stream's [`StreamId`] token; the entry point registered
/// for that id is dispatched exactly like [`trampoline`] does. Unknown ids
/// dispatch nothing. Always returns `Continue`.
///
/// # Safety
///
/// Same contract as [`trampoline`].
pub unsafe extern "C" fn indexed_trampoline(
    input: *const c_void,
    output: *mut c_void,
    frame_count: c_ulong,
    time_info: *const TimeInfo,
    status_flags: StatusFlags,
    user_data: *mut c_void,
) -> c_int {
    let id = StreamId::from_token(user_data as usize);
    let ctx = CallbackContext::from_raw(
        input,
        output,
        frame_count,
        time_info,
        status_flags,
        user_data,
    );
    dispatch_period(STREAM_TABLE.get(id), ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::ptr;

    thread_local! {
        static CALLS: Cell<u32> = const { Cell::new(0) };
        static FRAMES: Cell<c_ulong> = const { Cell::new(0) };
    }

    unsafe extern "C-unwind" fn count(ctx: *mut CallbackContext) {
        CALLS.set(CALLS.get() + 1);
        FRAMES.set((*ctx).frame_count);
    }

    unsafe extern "C-unwind" fn explode(_: *mut CallbackContext) {
        panic!("callback fault");
    }

    fn call(slot: &RegistrationSlot, frames: c_ulong) -> c_int {
        bridge_call(
            slot,
            ptr::null(),
            ptr::null_mut(),
            frames,
            ptr::null(),
            StatusFlags::NONE,
            ptr::null_mut(),
        )
    }

    #[test]
    fn test_empty_slot_dispatches_nothing() {
        CALLS.set(0);
        let slot = RegistrationSlot::new();
        assert_eq!(call(&slot, 64), StatusCode::Continue.as_raw());
        assert_eq!(CALLS.get(), 0);
    }

    #[test]
    fn test_registered_slot_dispatches_once() {
        CALLS.set(0);
        let slot = RegistrationSlot::new();
        slot.set(count);

        assert_eq!(call(&slot, 256), StatusCode::Continue.as_raw());
        assert_eq!(CALLS.get(), 1);
        assert_eq!(FRAMES.get(), 256);
    }

    #[test]
    fn test_panicking_entry_still_continues() {
        let slot = RegistrationSlot::new();
        slot.set(explode);
        assert_eq!(call(&slot, 32), StatusCode::Continue.as_raw());
    }

    #[test]
    fn test_indexed_unknown_id_continues() {
        let status = unsafe {
            indexed_trampoline(
                ptr::null(),
                ptr::null_mut(),
                16,
                ptr::null(),
                StatusFlags::NONE,
                usize::MAX as *mut c_void,
            )
        };
        assert_eq!(status, StatusCode::Continue.as_raw());
    }
}
