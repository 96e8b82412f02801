//! The in-memory view of a single block, derived from its persisted [`BlockRecord`].

use addr::{Address, AddressRange};
pub use store::{BlockId, BlockKind, Permissions};
use store::BlockRecord;



/// A block's range, kind, and attributes, as last observed from the store.
///
/// This is a snapshot, not a live handle: the map owns the authoritative [`BlockRecord`]s and
/// replaces every [`Block`] wholesale on [`crate::MemoryMap::rebuild`] (see the design note on
/// cycle risk: a [`Block`] never references the map that produced it, so nothing here can extend
/// the map's lifetime or keep a stale lock alive).
#[derive(Clone, Debug)]
pub struct Block {
    /// The block's adapter-assigned identity. Immutable for the block's lifetime.
    id: BlockId,
    /// The block's kind. Immutable for the block's lifetime.
    kind: BlockKind,
    /// The block's display name.
    name: String,
    /// The first address the block occupies.
    start: Address,
    /// The number of addresses the block occupies.
    length: u64,
    /// The block's access permissions.
    permissions: Permissions,
    /// Whether the block owns initialized backing bytes (Default/Overlay), or is meaningful to
    /// treat as contributing to the initialized coverage set (mapped kinds).
    initialized: bool,
    /// For bit- and byte-mapped blocks, the address this block forwards reads and writes to.
    mapping_target: Option<Address>,
}

impl Block {
    /// Builds a [`Block`] view from a freshly loaded [`BlockRecord`].
    pub(crate) fn from_record(record: BlockRecord) -> Self {
        Self {
            id: record.id,
            kind: record.kind,
            name: record.name,
            start: record.start,
            length: record.length,
            permissions: record.permissions,
            initialized: record.initialized,
            mapping_target: record.mapping_target,
        }
    }

    /// Returns the block's adapter-assigned identity.
    pub const fn id(&self) -> BlockId {
        self.id
    }

    /// Returns the block's kind.
    pub const fn kind(&self) -> BlockKind {
        self.kind
    }

    /// Returns the block's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the first address the block occupies.
    pub const fn start(&self) -> Address {
        self.start
    }

    /// Returns the number of addresses the block occupies.
    pub const fn length(&self) -> u64 {
        self.length
    }

    /// Returns the inclusive last address the block occupies.
    pub const fn end(&self) -> Address {
        Address::new(self.start.space(), self.start.offset() + self.length - 1)
    }

    /// Returns the block's address range.
    pub const fn range(&self) -> AddressRange {
        AddressRange::new(self.start, self.length)
    }

    /// Returns the block's access permissions.
    pub const fn permissions(&self) -> Permissions {
        self.permissions
    }

    /// Returns `true` if the block owns allocated backing bytes (Default/Overlay, initialized).
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Returns `true` for [`BlockKind::BitMapped`] and [`BlockKind::ByteMapped`].
    pub const fn is_mapped(&self) -> bool {
        self.kind.is_mapped()
    }

    /// Returns `true` if reads through this block can ever reach initialized bytes: either it
    /// owns initialized backing bytes directly, or it is mapped and forwards into another block
    /// (whose own initialization is resolved separately, by the mapped projection in
    /// [`crate::snapshot`]).
    pub const fn is_initialized_or_mapped(&self) -> bool {
        self.initialized || self.kind.is_mapped()
    }

    /// Returns `true` if this block's backing is part of the program's loaded image: Default and
    /// Overlay blocks are loaded directly, mapped blocks are loaded only via their target (and so
    /// report `false` here; the mapped projection resolves that case from the target's own
    /// loaded-initialized coverage).
    pub const fn is_loaded(&self) -> bool {
        matches!(self.kind, BlockKind::Default | BlockKind::Overlay)
    }

    /// Returns `true` if `addr` falls within this block's range.
    pub fn contains(&self, addr: Address) -> bool {
        self.range().contains(addr)
    }

    /// For mapped blocks, the target address their first byte/bit forwards to.
    pub const fn mapping_target(&self) -> Option<Address> {
        self.mapping_target
    }

    /// For mapped blocks, the number of target addresses spanned: `length` for byte-mapped,
    /// `ceil(length / 8)` for bit-mapped.
    ///
    /// Returns `0` for unmapped kinds.
    pub const fn target_span(&self) -> u64 {
        match self.kind {
            BlockKind::BitMapped => self.length.div_ceil(8),
            BlockKind::ByteMapped => self.length,
            BlockKind::Default | BlockKind::Overlay => 0,
        }
    }

    /// For mapped blocks, the range of target addresses this block forwards to.
    ///
    /// Returns `None` for unmapped kinds.
    pub fn target_range(&self) -> Option<AddressRange> {
        let target = self.mapping_target?;
        Some(AddressRange::new(target, self.target_span()))
    }

    /// Renders this view back into the adapter's persisted shape, for mutators that need to
    /// modify a field and hand the record back to the store.
    pub(crate) fn to_record(&self) -> BlockRecord {
        BlockRecord {
            id: self.id,
            kind: self.kind,
            name: self.name.clone(),
            start: self.start,
            length: self.length,
            permissions: self.permissions,
            initialized: self.initialized,
            mapping_target: self.mapping_target,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use addr::AddressSpaceId;

    fn space() -> AddressSpaceId {
        AddressSpaceId::from_raw(0)
    }

    fn record(kind: BlockKind, start: u64, length: u64, initialized: bool, target: Option<u64>) -> BlockRecord {
        BlockRecord {
            id: BlockId::from_raw(0),
            kind,
            name: "b".to_string(),
            start: Address::new(space(), start),
            length,
            permissions: Permissions::READ,
            initialized,
            mapping_target: target.map(|t| Address::new(space(), t)),
        }
    }

    #[test]
    fn default_block_end_is_inclusive() {
        let block = Block::from_record(record(BlockKind::Default, 0x1000, 0x10, true, None));
        assert_eq!(block.end().offset(), 0x100F);
    }

    #[test]
    fn bit_mapped_target_span_rounds_up() {
        let block = Block::from_record(record(BlockKind::BitMapped, 0, 20, true, Some(0x2000)));
        assert_eq!(block.target_span(), 3);
    }

    #[test]
    fn byte_mapped_target_span_is_exact() {
        let block = Block::from_record(record(BlockKind::ByteMapped, 0, 20, true, Some(0x2000)));
        assert_eq!(block.target_span(), 20);
    }

    #[test]
    fn mapped_blocks_are_initialized_or_mapped_without_owning_bytes() {
        let block = Block::from_record(record(BlockKind::ByteMapped, 0, 4, false, Some(0x2000)));
        assert!(!block.is_initialized());
        assert!(block.is_initialized_or_mapped());
        assert!(!block.is_loaded());
    }
}
