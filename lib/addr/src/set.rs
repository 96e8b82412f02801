//! Coverage sets: merged, disjoint collections of address ranges across one or more spaces.

use std::collections::HashMap;

use rangemap::RangeSet;

use crate::{Address, AddressRange, AddressSpaceId};

/// A set of addresses, represented as a merged collection of disjoint ranges per address space.
///
/// Used for the block set's membership, initialization, and loaded-initialization coverage
/// (`addr_set`, `all_initialized_set`, `loaded_initialized_set`). Backed by [`rangemap::RangeSet`]
/// per space, which already implements merge-on-insert interval bookkeeping.
#[derive(Clone, Debug, Default)]
pub struct AddressSet {
    by_space: HashMap<AddressSpaceId, RangeSet<u64>>,
}

impl AddressSet {
    /// Creates an empty [`AddressSet`].
    pub fn new() -> Self {
        Self {
            by_space: HashMap::new(),
        }
    }

    /// Inserts `range` into the set, merging with any overlapping or adjacent ranges already
    /// present in the same space.
    pub fn insert(&mut self, range: AddressRange) {
        if range.is_empty() {
            return;
        }

        self.by_space
            .entry(range.space())
            .or_default()
            .insert(range.start().offset()..range.end_exclusive().offset());
    }

    /// Removes `range` from the set.
    pub fn remove(&mut self, range: AddressRange) {
        if range.is_empty() {
            return;
        }

        if let Some(set) = self.by_space.get_mut(&range.space()) {
            set.remove(range.start().offset()..range.end_exclusive().offset());
        }
    }

    /// Returns `true` if `address` is covered by this set.
    pub fn contains(&self, address: Address) -> bool {
        self.by_space
            .get(&address.space())
            .is_some_and(|set| set.contains(&address.offset()))
    }

    /// Returns the total number of addresses covered by this set, across every space.
    pub fn num_addresses(&self) -> u64 {
        self.by_space
            .values()
            .flat_map(RangeSet::iter)
            .map(|r| r.end - r.start)
            .sum()
    }

    /// Returns an iterator over the disjoint, ascending ranges covered in `space`.
    pub fn ranges_in(&self, space: AddressSpaceId) -> impl Iterator<Item = AddressRange> + '_ {
        self.by_space
            .get(&space)
            .into_iter()
            .flat_map(RangeSet::iter)
            .map(move |r| AddressRange::from_exclusive(Address::new(space, r.start), Address::new(space, r.end)))
    }

    /// Returns the smallest range in `space` that contains or follows `from`, if any.
    ///
    /// Used to seat a forward iteration cursor (e.g. pattern search) at or after a given address
    /// without scanning every earlier range.
    pub fn range_at_or_after(&self, space: AddressSpaceId, from: Address) -> Option<AddressRange> {
        self.ranges_in(space)
            .find(|r| r.end_exclusive().offset() > from.offset())
    }

    /// Returns an iterator over every individual [`Address`] covered by this set, ascending
    /// within a space and across spaces in an unspecified but stable-per-call order.
    pub fn addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.by_space.iter().flat_map(|(space, set)| {
            let space = *space;
            set.iter()
                .flat_map(move |r| (r.start..r.end).map(move |offset| Address::new(space, offset)))
        })
    }

    /// Removes every range belonging to `space` from the set.
    pub fn clear_space(&mut self, space: AddressSpaceId) {
        self.by_space.remove(&space);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn addr(offset: u64) -> Address {
        Address::new(AddressSpaceId::from_raw(0), offset)
    }

    fn range(start: u64, count: u64) -> AddressRange {
        AddressRange::new(addr(start), count)
    }

    #[test]
    fn insert_merges_adjacent_ranges() {
        let mut set = AddressSet::new();
        set.insert(range(0, 4));
        set.insert(range(4, 4));
        assert_eq!(set.num_addresses(), 8);
        assert_eq!(set.ranges_in(AddressSpaceId::from_raw(0)).count(), 1);
    }

    #[test]
    fn contains_is_space_aware() {
        let mut set = AddressSet::new();
        set.insert(range(0, 4));
        assert!(set.contains(addr(2)));
        assert!(!set.contains(Address::new(AddressSpaceId::from_raw(1), 2)));
    }

    #[test]
    fn remove_splits_a_covering_range() {
        let mut set = AddressSet::new();
        set.insert(range(0, 10));
        set.remove(range(3, 2));
        assert!(set.contains(addr(2)));
        assert!(!set.contains(addr(3)));
        assert!(!set.contains(addr(4)));
        assert!(set.contains(addr(5)));
    }
}
