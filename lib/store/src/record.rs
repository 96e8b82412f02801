//! The persisted shape of a block.

use addr::Address;
use serde::{Deserialize, Serialize};

use crate::BlockId;

/// The kind of a block, determining how its byte access is implemented.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    /// A block that owns its own backing bytes when initialized, in the default address space.
    Default,
    /// Like [`BlockKind::Default`], but resides in an overlay space and cannot move, split, or
    /// join with another block.
    Overlay,
    /// A block whose addresses each expand to a single bit read from a target block.
    BitMapped,
    /// A block whose addresses forward one-to-one to a target block's addresses.
    ByteMapped,
}

impl BlockKind {
    /// Returns `true` for [`BlockKind::BitMapped`] and [`BlockKind::ByteMapped`].
    pub const fn is_mapped(self) -> bool {
        matches!(self, Self::BitMapped | Self::ByteMapped)
    }

    /// Returns `true` for [`BlockKind::Default`] and [`BlockKind::Overlay`], the kinds that may
    /// own backing bytes.
    pub const fn can_own_bytes(self) -> bool {
        matches!(self, Self::Default | Self::Overlay)
    }
}

bitflags::bitflags! {
    /// Access permissions and attributes of a block.
    #[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Permissions: u8 {
        /// The block may be read.
        const READ = 1 << 0;
        /// The block may be written.
        const WRITE = 1 << 1;
        /// The block may contain executable code.
        const EXECUTE = 1 << 2;
        /// The block's contents may change outside the map's control (e.g. memory-mapped I/O).
        const VOLATILE = 1 << 3;
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::READ
    }
}

/// The adapter's on-the-wire representation of a block.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockRecord {
    /// The block's adapter-assigned identity.
    pub id: BlockId,
    /// The kind of block this record describes.
    pub kind: BlockKind,
    /// The block's display name; unique within the map.
    pub name: String,
    /// The first address the block occupies.
    pub start: Address,
    /// The number of addresses the block occupies.
    pub length: u64,
    /// The block's access permissions.
    pub permissions: Permissions,
    /// Whether the block is initialized (owns zero-filled-or-loaded backing bytes, for
    /// Default/Overlay kinds) or, for mapped kinds, is meaningful to treat as contributing to the
    /// initialized coverage set.
    pub initialized: bool,
    /// For bit- and byte-mapped blocks, the address in another block's space that this block
    /// forwards reads and writes to.
    pub mapping_target: Option<Address>,
}

impl Serialize for BlockId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BlockId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u32::deserialize(deserializer).map(BlockId::from_raw)
    }
}
