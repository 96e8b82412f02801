//! Property tests: invariants that must hold after any sequence of valid block placements.

use proptest::prelude::*;

use memmap::{Address, AddressFactory, Endian, InMemoryAddressFactory, InMemoryBlockStore, MemoryMap, NullChangeBus, NullCodeManager, Permissions};

fn open_map(factory: InMemoryAddressFactory) -> MemoryMap {
    MemoryMap::open(
        Box::new(InMemoryBlockStore::new()),
        Box::new(factory),
        Box::new(NullCodeManager),
        Box::new(NullChangeBus),
        Endian::Little,
    )
    .expect("opening a map over an empty store never fails")
}

/// A small, non-overlapping layout: `count` blocks of `length` bytes each, spaced `stride` apart
/// (`stride >= length`), starting at `0x1000`.
fn layout() -> impl Strategy<Value = (u64, u64, usize)> {
    (1u64..=64, 0u64..=64, 1usize..=12).prop_map(|(length, gap, count)| (length, length + gap, count))
}

proptest! {
    /// After placing any number of disjoint initialized blocks, the map's `addr_set` is exactly
    /// the union of the placed ranges, `get_block` agrees with block membership at every
    /// placed address and at every gap address, and no two blocks overlap.
    #[test]
    fn disjoint_blocks_agree_with_addr_set((length, stride, count) in layout()) {
        let factory = InMemoryAddressFactory::new(32);
        let space = factory.default_space();
        let map = open_map(factory);

        let base = 0x1_0000u64;
        let mut starts = Vec::with_capacity(count);
        for i in 0..count {
            let start = Address::new(space, base + i as u64 * stride);
            map.create_uninitialized_block(&format!("b{i}"), start, length, Permissions::READ, None).unwrap();
            starts.push(start);
        }

        let blocks = map.blocks();
        prop_assert_eq!(blocks.len(), count);

        // Pairwise disjoint.
        for a in 0..blocks.len() {
            for b in (a + 1)..blocks.len() {
                prop_assert!(!blocks[a].range().overlaps(blocks[b].range()));
            }
        }

        let total: u64 = blocks.iter().map(|b| b.length()).sum();
        prop_assert_eq!(map.addr_set().num_addresses(), total);

        for &start in &starts {
            prop_assert!(map.contains(start));
            let found = map.get_block(start);
            prop_assert!(found.is_some());
            prop_assert!(found.unwrap().contains(start));
        }

        if stride > length {
            for &start in &starts {
                let gap_addr = Address::new(space, start.offset() + length);
                if gap_addr.offset() < base + (count as u64) * stride {
                    prop_assert!(!map.contains(gap_addr));
                    prop_assert!(map.get_block(gap_addr).is_none());
                }
            }
        }
    }

    /// Splitting a block at an interior address and immediately rejoining the two halves restores
    /// the original single-block coverage, regardless of where the split point falls.
    #[test]
    fn split_join_round_trips_coverage(length in 2u64..=128, split_offset in 1u64..128) {
        prop_assume!(split_offset < length);

        let factory = InMemoryAddressFactory::new(32);
        let space = factory.default_space();
        let map = open_map(factory);

        let start = Address::new(space, 0x2000);
        let block = map.create_uninitialized_block("b", start, length, Permissions::READ, None).unwrap();

        let split_at = Address::new(space, start.offset() + split_offset);
        let (lower, upper) = map.split(block.id(), split_at).unwrap();
        prop_assert_eq!(lower.length() + upper.length(), length);

        let joined = map.join(lower.id(), upper.id()).unwrap();
        prop_assert_eq!(joined.start().offset(), start.offset());
        prop_assert_eq!(joined.length(), length);
        prop_assert_eq!(map.blocks().len(), 1);
        prop_assert_eq!(map.addr_set().num_addresses(), length);
    }

    /// Endian-aware scalar packing round-trips through `Endian::pack_u32`/`unpack_u32` for any
    /// value, independent of byte order.
    #[test]
    fn endian_u32_round_trips(value: u32, big in any::<bool>()) {
        let endian = if big { Endian::Big } else { Endian::Little };
        let bytes = endian.pack_u32(value);
        prop_assert_eq!(endian.unpack_u32(&bytes), value);
    }
}
