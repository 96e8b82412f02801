//! The published, immutable view of the block set produced by [`crate::MemoryMap::rebuild`].

use std::collections::HashMap;

use addr::{Address, AddressRange, AddressSet};
use store::BlockId;

use crate::block::Block;

/// A fresh derivation of the block set and its coverage sets.
///
/// Every public read that needs a consistent view across `blocks`, `block_by_id`, and the
/// coverage sets clones the current `Arc<Snapshot>` once and reads from that clone; mutators swap
/// in a brand-new [`Snapshot`] under the map's short internal monitor (§5 of the design). Nothing
/// here is ever mutated in place.
#[derive(Debug, Default)]
pub struct Snapshot {
    /// Every block, sorted ascending by `start` within its space (the sole iteration order).
    pub(crate) blocks: Vec<Block>,
    /// Index from identity to position in `blocks`, for O(1) lookup by id.
    pub(crate) block_by_id: HashMap<BlockId, usize>,
    /// The union of every block's range: I3.
    pub(crate) addr_set: AddressSet,
    /// The union of ranges that are initialized or mapped-to-initialized: I4.
    pub(crate) all_initialized_set: AddressSet,
    /// `all_initialized_set` restricted to loaded blocks: I5.
    pub(crate) loaded_initialized_set: AddressSet,
}

impl Snapshot {
    /// Builds a fresh [`Snapshot`] from a freshly loaded, already-sorted block list.
    pub(crate) fn build(blocks: Vec<Block>) -> Self {
        let mut block_by_id = HashMap::with_capacity(blocks.len());
        let mut addr_set = AddressSet::new();
        let mut all_initialized_set = AddressSet::new();
        let mut loaded_initialized_set = AddressSet::new();

        for (index, block) in blocks.iter().enumerate() {
            block_by_id.insert(block.id(), index);
            addr_set.insert(block.range());

            // A mapped block's own range is never unconditionally initialized here: whether its
            // addresses read as initialized is entirely a function of its target's coverage,
            // computed below by `mapped_projection`. Folding `is_mapped()` into this union too
            // would mark a mapped block fully initialized even where its target is not.
            if block.is_initialized() {
                all_initialized_set.insert(block.range());
                if block.is_loaded() {
                    loaded_initialized_set.insert(block.range());
                }
            }
        }

        let mapped: Vec<&Block> = blocks.iter().filter(|b| b.is_mapped()).collect();
        for projected in mapped_projection(&mapped, &all_initialized_set) {
            all_initialized_set.insert(projected);
        }
        for projected in mapped_projection(&mapped, &loaded_initialized_set) {
            loaded_initialized_set.insert(projected);
        }

        Self {
            blocks,
            block_by_id,
            addr_set,
            all_initialized_set,
            loaded_initialized_set,
        }
    }

    /// Returns the block at `index`, if any.
    pub(crate) fn block_at(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }

    /// Binary-searches `blocks` for the block containing `addr`.
    ///
    /// Implements §4.3's comparator: an exact hit on `start` returns that block directly; a miss
    /// consults the block immediately preceding the insertion point, since `addr` can only be
    /// covered by the block whose range starts at or before it. `blocks` is sorted by `start`,
    /// whose derived [`Ord`] compares the owning space before the offset, so this single
    /// `partition_point` call is correct even though the vector spans multiple spaces.
    pub(crate) fn lookup(&self, addr: Address) -> Option<(usize, &Block)> {
        let pos = self.blocks.partition_point(|b| b.start() <= addr);
        if pos == 0 {
            return None;
        }

        let index = pos - 1;
        let block = &self.blocks[index];
        block.contains(addr).then_some((index, block))
    }

    /// Returns the block named `name`, if any is a member of this snapshot.
    pub(crate) fn by_name(&self, name: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.name() == name)
    }

    /// Returns the block with identity `id`, if any is a member of this snapshot.
    pub(crate) fn by_id(&self, id: BlockId) -> Option<&Block> {
        self.block_by_id.get(&id).map(|&index| &self.blocks[index])
    }
}

/// Computes the mapped projection (§4.4): for every mapped block `M` whose target range
/// intersects `source`, the corresponding sub-range of `M`'s own address range.
fn mapped_projection(mapped: &[&Block], source: &AddressSet) -> Vec<AddressRange> {
    let mut out = Vec::new();

    for block in mapped {
        let Some(target_range) = block.target_range() else {
            continue;
        };
        let Some(overlay_min) = block.mapping_target() else {
            continue;
        };

        for covered in source.ranges_in(target_range.space()) {
            let intersection = target_range.intersection(covered);
            if intersection.is_empty() {
                continue;
            }

            let off = intersection.start().offset() - overlay_min.offset();
            let (scale, start_offset) = match block.kind() {
                store::BlockKind::BitMapped => (8, off * 8),
                store::BlockKind::ByteMapped => (1, off),
                store::BlockKind::Default | store::BlockKind::Overlay => unreachable!("filtered to mapped kinds"),
            };

            let projected_start = Address::new(block.start().space(), block.start().offset() + start_offset);
            out.push(AddressRange::new(projected_start, intersection.count() * scale));
        }
    }

    out
}
