//! Sample types a driver can hand to the bridge.
//!
//! The bridge never converts samples. These types only describe what the raw
//! buffer pointers point at, so [`Period`](crate::Period) can hand out typed
//! slices without copying.

use std::fmt;

/// Sample format of a stream's buffers.
///
/// Samples are in native byte order. With
/// [`StreamConfig::interleaved`](crate::StreamConfig::interleaved) set, each
/// direction has one buffer with frames laid out channel after channel;
/// otherwise each direction has one buffer per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SampleFormat {
    /// 32-bit float in `[-1.0, 1.0]`.
    #[default]
    F32,
    /// 32-bit signed integer.
    I32,
    /// Packed 24-bit signed integer, native byte order.
    I24,
    /// 16-bit signed integer.
    I16,
    /// 8-bit signed integer.
    I8,
    /// 8-bit unsigned integer, silence at 128.
    U8,
}

impl SampleFormat {
    /// Size of a single sample in bytes.
    #[must_use]
    pub fn sample_size(self) -> usize {
        match self {
            Self::F32 | Self::I32 => 4,
            Self::I24 => 3,
            Self::I16 => 2,
            Self::I8 | Self::U8 => 1,
        }
    }

    /// Byte value that encodes silence in this format.
    #[must_use]
    pub fn silence_byte(self) -> u8 {
        match self {
            Self::U8 => 0x80,
            _ => 0,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::F32 => "f32",
            Self::I32 => "i32",
            Self::I24 => "i24",
            Self::I16 => "i16",
            Self::I8 => "i8",
            Self::U8 => "u8",
        };
        f.write_str(name)
    }
}

/// Packed 24-bit sample in native byte order.
///
/// On a little-endian host the bytes are `[lo, mid, hi]`, on a big-endian host
/// `[hi, mid, lo]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct Int24(pub [u8; 3]);

impl Int24 {
    /// Sign-extends the packed value to `i32`.
    #[must_use]
    pub fn to_i32(self) -> i32 {
        let [a, b, c] = self.0;
        let bytes = if cfg!(target_endian = "little") {
            [0, a, b, c]
        } else {
            [a, b, c, 0]
        };
        i32::from_ne_bytes(bytes) >> 8
    }

    /// Packs the low 24 bits of `value`.
    #[must_use]
    pub fn from_i32(value: i32) -> Self {
        let bytes = value.to_ne_bytes();
        if cfg!(target_endian = "little") {
            Self([bytes[0], bytes[1], bytes[2]])
        } else {
            Self([bytes[1], bytes[2], bytes[3]])
        }
    }
}

mod sealed {
    pub trait Sealed {}
}

/// A sample type that can be viewed directly inside a driver buffer.
///
/// Sealed: only the driver's native sample types implement it.
pub trait Sample: sealed::Sealed + Copy + Send + 'static {
    /// Format tag matching this type.
    const FORMAT: SampleFormat;
}

macro_rules! impl_sample {
    ($($ty:ty => $format:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}
            impl Sample for $ty {
                const FORMAT: SampleFormat = SampleFormat::$format;
            }
        )*
    };
}

impl_sample! {
    f32 => F32,
    i32 => I32,
    Int24 => I24,
    i16 => I16,
    i8 => I8,
    u8 => U8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_sizes_match_types() {
        assert_eq!(SampleFormat::F32.sample_size(), std::mem::size_of::<f32>());
        assert_eq!(SampleFormat::I24.sample_size(), std::mem::size_of::<Int24>());
        assert_eq!(SampleFormat::I16.sample_size(), std::mem::size_of::<i16>());
        assert_eq!(SampleFormat::U8.sample_size(), 1);
    }

    #[test]
    fn test_format_tags() {
        assert_eq!(<f32 as Sample>::FORMAT, SampleFormat::F32);
        assert_eq!(<Int24 as Sample>::FORMAT, SampleFormat::I24);
        assert_eq!(<u8 as Sample>::FORMAT, SampleFormat::U8);
    }

    #[test]
    fn test_int24_sign_extension() {
        assert_eq!(Int24::from_i32(-1).to_i32(), -1);
        assert_eq!(Int24::from_i32(8_388_607).to_i32(), 8_388_607);
        assert_eq!(Int24::from_i32(-8_388_608).to_i32(), -8_388_608);
    }

    #[test]
    fn test_int24_native_byte_order() {
        let packed = Int24::from_i32(0x01_02_03);
        if cfg!(target_endian = "little") {
            assert_eq!(packed.0, [0x03, 0x02, 0x01]);
        } else {
            assert_eq!(packed.0, [0x01, 0x02, 0x03]);
        }

        // The significant bytes of a native i32 read back unchanged.
        let wide = (-123_456_i32).to_ne_bytes();
        let narrow = if cfg!(target_endian = "little") {
            Int24([wide[0], wide[1], wide[2]])
        } else {
            Int24([wide[1], wide[2], wide[3]])
        };
        assert_eq!(narrow.to_i32(), -123_456);
    }

    #[test]
    fn test_silence_byte() {
        assert_eq!(SampleFormat::U8.silence_byte(), 0x80);
        assert_eq!(SampleFormat::F32.silence_byte(), 0);
    }
}
