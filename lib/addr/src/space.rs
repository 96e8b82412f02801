//! Address space identity and validity descriptors.

/// Distinguishes a user-creatable memory space from an overlay space shadowing one.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum AddressSpaceKind {
    /// A space that may host blocks directly, e.g. the default "ram" space of a loaded program.
    Memory,
    /// A shadow of a memory space, created to host an alternate view over part of its range.
    ///
    /// Overlay spaces may only ever contain overlay blocks, and are removed automatically when
    /// their last block is removed.
    Overlay {
        /// The memory space this overlay shadows.
        base: u32,
    },
}

/// Opaque identity for an address space, assigned by the address factory (see the `memmap`
/// crate's `AddressFactory` trait) when a space is created.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct AddressSpaceId(u32);

impl AddressSpaceId {
    /// Creates an [`AddressSpaceId`] wrapping the given raw identity.
    ///
    /// Only the address factory that owns the space's identity namespace should call this.
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw identity wrapped by this [`AddressSpaceId`].
    pub const fn id(self) -> u32 {
        self.0
    }
}

/// A description of the valid offsets within an address space.
///
/// Mirrors the bit-width/canonicality description used for physical and virtual address spaces
/// in lower-level memory abstractions, generalized to describe the legal offset range of an
/// arbitrary named address space.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct AddressSpaceDescriptor {
    /// The number of valid low bits in an offset.
    implemented_bits: u8,
}

impl AddressSpaceDescriptor {
    /// Constructs a new [`AddressSpaceDescriptor`] with the given number of implemented bits.
    ///
    /// # Panics
    ///
    /// Panics if `implemented_bits` is greater than 64.
    pub const fn new(implemented_bits: u8) -> Self {
        assert!(implemented_bits <= 64);

        Self { implemented_bits }
    }

    /// Returns the number of implemented offset bits in this space.
    pub const fn implemented_bits(self) -> u8 {
        self.implemented_bits
    }

    /// Returns `true` if `offset` is representable in this address space.
    pub const fn is_valid(self, offset: u64) -> bool {
        if self.implemented_bits == 64 {
            return true;
        } else if self.implemented_bits == 0 {
            return false;
        }

        let mask = (1u64 << self.implemented_bits) - 1;
        offset <= mask
    }

    /// Returns `true` if the inclusive range `[start, end]` lies entirely within this space.
    pub const fn is_valid_range(self, start: u64, end: u64) -> bool {
        start <= end && self.is_valid(start) && self.is_valid(end)
    }

    /// Returns the largest valid offset in this address space.
    pub const fn max_offset(self) -> u64 {
        if self.implemented_bits == 64 {
            u64::MAX
        } else {
            (1u64 << self.implemented_bits) - 1
        }
    }
}
