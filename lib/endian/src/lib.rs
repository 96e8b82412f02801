//! Runtime-selectable byte-order packing and unpacking of fixed-width integers.
#![warn(missing_docs)]

/// Selects the byte order used to decode or encode a scalar value.
///
/// Unlike a compile-time encoding marker, [`Endian`] is a runtime value: a memory map carries a
/// default program [`Endian`] but individual reads and writes may override it.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Endian {
    /// Least-significant byte first.
    Little,
    /// Most-significant byte first.
    Big,
}

/// Generates a pair of pack/unpack methods for a given integer width.
macro_rules! setup_scalar {
    ($unpack:ident, $pack:ident, $kind:ident, $len:literal) => {
        #[doc = concat!("Decodes a ", stringify!($kind), " from exactly ", stringify!($len), " bytes.")]
        ///
        /// # Panics
        ///
        /// Panics if `bytes.len() != ` the width of this integer type.
        pub fn $unpack(self, bytes: &[u8]) -> $kind {
            let arr: [u8; $len] = bytes.try_into().expect("unpack requires an exact-width slice");
            match self {
                Self::Little => $kind::from_le_bytes(arr),
                Self::Big => $kind::from_be_bytes(arr),
            }
        }

        #[doc = concat!("Encodes `value` as ", stringify!($len), " bytes in this byte order.")]
        pub fn $pack(self, value: $kind) -> [u8; $len] {
            match self {
                Self::Little => value.to_le_bytes(),
                Self::Big => value.to_be_bytes(),
            }
        }
    };
}

impl Endian {
    setup_scalar!(unpack_u16, pack_u16, u16, 2);
    setup_scalar!(unpack_u32, pack_u32, u32, 4);
    setup_scalar!(unpack_u64, pack_u64, u64, 8);
    setup_scalar!(unpack_i16, pack_i16, i16, 2);
    setup_scalar!(unpack_i32, pack_i32, i32, 4);
    setup_scalar!(unpack_i64, pack_i64, i64, 8);

    /// Decodes as many complete `u16`s as `bytes` holds, discarding any trailing partial element.
    pub fn unpack_u16s(self, bytes: &[u8], dst: &mut [u16]) -> usize {
        self.unpack_bulk(bytes, dst, Self::unpack_u16)
    }

    /// Decodes as many complete `u32`s as `bytes` holds, discarding any trailing partial element.
    pub fn unpack_u32s(self, bytes: &[u8], dst: &mut [u32]) -> usize {
        self.unpack_bulk(bytes, dst, Self::unpack_u32)
    }

    /// Decodes as many complete `u64`s as `bytes` holds, discarding any trailing partial element.
    pub fn unpack_u64s(self, bytes: &[u8], dst: &mut [u64]) -> usize {
        self.unpack_bulk(bytes, dst, Self::unpack_u64)
    }

    fn unpack_bulk<T: Copy>(self, bytes: &[u8], dst: &mut [T], unpack_one: fn(Self, &[u8]) -> T) -> usize {
        let width = core::mem::size_of::<T>();
        let count = (bytes.len() / width).min(dst.len());
        for (i, slot) in dst.iter_mut().enumerate().take(count) {
            *slot = unpack_one(self, &bytes[i * width..(i + 1) * width]);
        }
        count
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_u32_little() {
        let value = 0x1020_3040u32;
        let bytes = Endian::Little.pack_u32(value);
        assert_eq!(bytes, [0x40, 0x30, 0x20, 0x10]);
        assert_eq!(Endian::Little.unpack_u32(&bytes), value);
    }

    #[test]
    fn round_trips_u64_big() {
        let value = 0x0102_0304_0506_0708u64;
        let bytes = Endian::Big.pack_u64(value);
        assert_eq!(Endian::Big.unpack_u64(&bytes), value);
        assert_eq!(bytes[0], 0x01);
    }

    #[test]
    fn bulk_unpack_discards_trailing_partial_element() {
        let bytes = [0x00, 0x01, 0x00, 0x02, 0xFF];
        let mut dst = [0u16; 4];
        let n = Endian::Big.unpack_u16s(&bytes, &mut dst);
        assert_eq!(n, 2);
        assert_eq!(dst[..2], [1, 2]);
    }
}
