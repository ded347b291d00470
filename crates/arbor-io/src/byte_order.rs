//! Byte order for typed stream encoding.

/// Byte order used to encode multi-byte integers and floats.
///
/// Streams default to big-endian regardless of the host so that files
/// written on one machine load on any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum ByteOrder {
    #[default]
    BigEndian,
    LittleEndian,
}

impl ByteOrder {
    /// Byte order of the host.
    #[must_use]
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            Self::BigEndian
        } else {
            Self::LittleEndian
        }
    }

    #[must_use]
    pub const fn is_native(self) -> bool {
        matches!(
            (self, Self::native()),
            (Self::BigEndian, Self::BigEndian) | (Self::LittleEndian, Self::LittleEndian)
        )
    }
}

macro_rules! codec {
    ($($enc:ident, $dec:ident, $ty:ty;)*) => {
        impl ByteOrder {
            $(
                #[must_use]
                pub fn $enc(self, v: $ty) -> [u8; std::mem::size_of::<$ty>()] {
                    match self {
                        Self::BigEndian => v.to_be_bytes(),
                        Self::LittleEndian => v.to_le_bytes(),
                    }
                }

                #[must_use]
                pub fn $dec(self, b: [u8; std::mem::size_of::<$ty>()]) -> $ty {
                    match self {
                        Self::BigEndian => <$ty>::from_be_bytes(b),
                        Self::LittleEndian => <$ty>::from_le_bytes(b),
                    }
                }
            )*
        }
    };
}

codec! {
    encode_u16, decode_u16, u16;
    encode_u32, decode_u32, u32;
    encode_u64, decode_u64, u64;
    encode_i16, decode_i16, i16;
    encode_i32, decode_i32, i32;
    encode_i64, decode_i64, i64;
    encode_f32, decode_f32, f32;
    encode_f64, decode_f64, f64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_big_endian() {
        assert_eq!(ByteOrder::default(), ByteOrder::BigEndian);
    }

    #[test]
    fn encodings_differ_by_order() {
        assert_eq!(ByteOrder::BigEndian.encode_u32(0x0102_0304), [1, 2, 3, 4]);
        assert_eq!(ByteOrder::LittleEndian.encode_u32(0x0102_0304), [4, 3, 2, 1]);
    }

    #[test]
    fn float_bits_survive() {
        let bytes = ByteOrder::LittleEndian.encode_f64(-1.5);
        assert_eq!(ByteOrder::LittleEndian.decode_f64(bytes), -1.5);
    }

    #[test]
    fn native_matches_target() {
        assert!(ByteOrder::native().is_native());
    }
}
