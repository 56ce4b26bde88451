//! Panic guard for the native boundary.
//!
//! Every `extern "C"` entry the driver calls must catch panics: unwinding into
//! the driver's frames is undefined behaviour.

/// Runs an expression and yields `$on_panic` if it panics.
///
/// ```ignore
/// let status = rt_guard!(StatusCode::Continue; {
///     callback.process(&mut period)
/// });
/// ```
macro_rules! rt_guard {
    ($on_panic:expr; $($body:tt)*) => {{
        use std::panic::{self, AssertUnwindSafe};

        match panic::catch_unwind(AssertUnwindSafe(|| { $($body)* })) {
            Ok(result) => result,
            Err(_) => $on_panic,
        }
    }};
}

pub(crate) use rt_guard;
