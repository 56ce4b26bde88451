//! The callback bridge proper.
//!
//! Per period the driver calls a trampoline on its real-time thread:
//!
//! ```text
//! Driver → trampoline → RegistrationSlot → stream_bridge_dispatch → DispatchFn
//! ```
//!
//! - **Trampolines**: fixed native signature, build the [`CallbackContext`](crate::CallbackContext)
//! - **Registration slots**: lock-free cells holding the active entry point,
//!   one process-wide and one per claimed [`StreamId`]
//! - **Dispatch indirection**: exported symbol forwarding the descriptor
//!
//! Nothing on this path locks, allocates or lets a panic unwind into the driver.

mod dispatch;
mod guard;
mod slot;
mod table;
mod trampoline;

pub use dispatch::stream_bridge_dispatch;
pub(crate) use guard::rt_guard;
pub use slot::{dispatch_registered, set_dispatch, DispatchFn, RegistrationSlot};
pub use table::{StreamId, StreamTable, MAX_STREAMS};
pub(crate) use table::STREAM_TABLE;
pub use trampoline::{indexed_trampoline, trampoline, RawStreamCallback};
