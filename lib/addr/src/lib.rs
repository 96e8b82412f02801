//! Address spaces, addresses, address ranges, and address sets.
#![warn(missing_docs)]

mod range;
mod set;
mod space;

pub use range::AddressRange;
pub use set::AddressSet;
pub use space::{AddressSpaceDescriptor, AddressSpaceId, AddressSpaceKind};

/// A location in an [`AddressSpaceId`], identified by a byte offset from that space's origin.
///
/// Two [`Address`] values are only meaningfully ordered or compared when they belong to the
/// same space; debug builds assert this at every comparison-adjacent operation that takes a
/// second [`Address`].
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Address {
    space: AddressSpaceId,
    offset: u64,
}

impl Address {
    /// Creates a new [`Address`] at `offset` within `space`.
    pub const fn new(space: AddressSpaceId, offset: u64) -> Self {
        Self { space, offset }
    }

    /// Returns the [`AddressSpaceId`] this address belongs to.
    pub const fn space(self) -> AddressSpaceId {
        self.space
    }

    /// Returns the byte offset of this address within its space.
    pub const fn offset(self) -> u64 {
        self.offset
    }

    /// Returns a new address `count` bytes higher in the same space.
    ///
    /// Returns `None` if the operation would overflow the space's offset type.
    pub const fn checked_add(self, count: u64) -> Option<Self> {
        match self.offset.checked_add(count) {
            Some(offset) => Some(Self::new(self.space, offset)),
            None => None,
        }
    }

    /// Returns a new address `count` bytes lower in the same space.
    ///
    /// Returns `None` if the operation would underflow below offset zero.
    pub const fn checked_sub(self, count: u64) -> Option<Self> {
        match self.offset.checked_sub(count) {
            Some(offset) => Some(Self::new(self.space, offset)),
            None => None,
        }
    }

    /// Returns `true` if `self` is immediately followed by `other` (`self + 1 == other`) within
    /// the same space.
    pub const fn is_successor(self, other: Self) -> bool {
        self.space.id() == other.space.id() && self.offset.wrapping_add(1) == other.offset
    }
}
