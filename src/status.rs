//! Driver-facing status codes and callback flags.

use std::ffi::{c_int, c_ulong};

use bitflags::bitflags;

/// Outcome of one callback invocation, as returned to the driver.
///
/// The discriminants are the values the native callback protocol expects
/// (`paContinue`, `paComplete`, `paAbort`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum StatusCode {
    /// Keep calling back.
    #[default]
    Continue = 0,
    /// Stop after the buffers already queued have played.
    Complete = 1,
    /// Stop as soon as possible, discarding queued buffers.
    Abort = 2,
}

impl StatusCode {
    /// Value returned across the native boundary.
    #[must_use]
    pub const fn as_raw(self) -> c_int {
        self as c_int
    }

    /// Interprets a value returned by a native callback.
    ///
    /// Returns `None` for values outside the protocol.
    #[must_use]
    pub const fn from_raw(raw: c_int) -> Option<Self> {
        match raw {
            0 => Some(Self::Continue),
            1 => Some(Self::Complete),
            2 => Some(Self::Abort),
            _ => None,
        }
    }

    /// Returns `true` if the driver should stop calling back.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        !matches!(self, Self::Continue)
    }
}

bitflags! {
    /// Status bitmask the driver passes with every period.
    ///
    /// Bits outside the named flags are kept as passed by the driver.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusFlags: c_ulong {
        /// Input data was discarded because the callback could not keep up.
        const INPUT_UNDERFLOW = 0x1;
        /// Input data was discarded before the callback saw it.
        const INPUT_OVERFLOW = 0x2;
        /// Output inserted silence because the callback was late.
        const OUTPUT_UNDERFLOW = 0x4;
        /// Output data will be discarded because no room is available.
        const OUTPUT_OVERFLOW = 0x8;
        /// Output is being generated while the stream primes its buffers.
        const PRIMING_OUTPUT = 0x10;

        const _ = !0;
    }
}

impl StatusFlags {
    /// No flags set.
    pub const NONE: Self = Self::empty();

    const XRUN: Self = Self::INPUT_UNDERFLOW
        .union(Self::INPUT_OVERFLOW)
        .union(Self::OUTPUT_UNDERFLOW)
        .union(Self::OUTPUT_OVERFLOW);

    /// Returns `true` if any underflow or overflow bit is set.
    ///
    /// `PRIMING_OUTPUT` is informational and doesn't count.
    #[must_use]
    pub const fn is_xrun(self) -> bool {
        self.intersects(Self::XRUN)
    }
}
