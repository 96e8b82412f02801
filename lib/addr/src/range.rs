//! Address ranges and their algebra.

use crate::{Address, AddressSpaceId};

/// A contiguous, inclusive-start/exclusive-end run of addresses within a single address space.
///
/// The range algebra here (contains, split, overlap, merge, intersect, partition) mirrors the
/// equivalent operations on lower-level address-range types, generalized to carry the owning
/// space alongside the offsets so two ranges from different spaces can never silently compare.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct AddressRange {
    start: Address,
    count: u64,
}

impl AddressRange {
    /// Creates an empty range anchored at `start.space()`.
    pub const fn empty(space: AddressSpaceId) -> Self {
        Self {
            start: Address::new(space, 0),
            count: 0,
        }
    }

    /// Creates a range starting at `start` containing `count` addresses.
    pub const fn new(start: Address, count: u64) -> Self {
        Self { start, count }
    }

    /// Creates a range `[start, end]`, both endpoints inclusive.
    ///
    /// # Panics
    ///
    /// Panics (in debug builds) if `start` and `end` are not in the same space.
    pub fn from_inclusive(start: Address, end: Address) -> Self {
        debug_assert_eq!(start.space(), end.space());
        let count = end.offset().saturating_sub(start.offset()) + 1;
        Self { start, count }
    }

    /// Creates a range `[start, end)`, `end` exclusive.
    ///
    /// # Panics
    ///
    /// Panics (in debug builds) if `start` and `end` are not in the same space.
    pub fn from_exclusive(start: Address, end: Address) -> Self {
        debug_assert_eq!(start.space(), end.space());
        let count = end.offset().saturating_sub(start.offset());
        Self { start, count }
    }

    /// Returns the address space this range lies within.
    pub const fn space(self) -> AddressSpaceId {
        self.start.space()
    }

    /// Returns the first address in the range.
    pub const fn start(self) -> Address {
        self.start
    }

    /// Returns the number of addresses in the range.
    pub const fn count(self) -> u64 {
        self.count
    }

    /// Returns `true` if the range contains no addresses.
    pub const fn is_empty(self) -> bool {
        self.count == 0
    }

    /// Returns the inclusive last address in the range.
    ///
    /// Gives the same result for a one-address range as for an empty range anchored at the same
    /// start; callers that must distinguish the two should check [`AddressRange::is_empty`]
    /// first.
    pub const fn end_inclusive(self) -> Address {
        Address::new(self.start.space(), self.start.offset() + self.count.saturating_sub(1))
    }

    /// Returns the exclusive end address of the range.
    pub const fn end_exclusive(self) -> Address {
        Address::new(self.start.space(), self.start.offset() + self.count)
    }

    /// Returns `true` if `address` falls within this range.
    pub fn contains(self, address: Address) -> bool {
        address.space() == self.start.space()
            && address.offset() >= self.start.offset()
            && (address.offset() - self.start.offset()) < self.count
    }

    /// Splits the range at `at` into `[start, at)` and `[at, end)`.
    ///
    /// Returns `None` if `at` does not lie within (or at the exclusive end of) the range, or if
    /// `at` is in a different space.
    pub fn split_at(self, at: Address) -> Option<(Self, Self)> {
        if at.space() != self.start.space() {
            return None;
        }
        if at.offset() < self.start.offset() || at.offset() - self.start.offset() > self.count {
            return None;
        }

        let lower = Self::from_exclusive(self.start, at);
        let upper = Self::new(at, self.count - lower.count);
        Some((lower, upper))
    }

    /// Returns `true` if `self` and `other` share at least one address.
    ///
    /// Ranges in different spaces never overlap.
    pub fn overlaps(self, other: Self) -> bool {
        self.start.space() == other.start.space()
            && !self.is_empty()
            && !other.is_empty()
            && self.start.offset() <= other.end_inclusive().offset()
            && other.start.offset() <= self.end_inclusive().offset()
    }

    /// Returns the merged range if `self` and `other` overlap or are adjacent.
    ///
    /// Returns `None` if they are disjoint and non-adjacent, or lie in different spaces.
    pub fn merge(self, other: Self) -> Option<Self> {
        if self.start.space() != other.start.space() {
            return None;
        }
        if self.end_exclusive().offset() < other.start.offset()
            || other.end_exclusive().offset() < self.start.offset()
        {
            return None;
        }

        let start = if self.start.offset() <= other.start.offset() {
            self.start
        } else {
            other.start
        };
        let end = if self.end_exclusive().offset() >= other.end_exclusive().offset() {
            self.end_exclusive()
        } else {
            other.end_exclusive()
        };

        Some(Self::from_exclusive(start, end))
    }

    /// Returns the intersection of `self` and `other`.
    ///
    /// Returns an empty range (anchored at `self`'s space) if they do not overlap or are in
    /// different spaces.
    pub fn intersection(self, other: Self) -> Self {
        if self.start.space() != other.start.space() {
            return Self::empty(self.start.space());
        }

        let start = if self.start.offset() >= other.start.offset() {
            self.start
        } else {
            other.start
        };
        let end = if self.end_exclusive().offset() <= other.end_exclusive().offset() {
            self.end_exclusive()
        } else {
            other.end_exclusive()
        };

        if end.offset() <= start.offset() {
            Self::empty(self.start.space())
        } else {
            Self::from_exclusive(start, end)
        }
    }

    /// Partitions `self` into `(lower, overlap, upper)` relative to `other`: the part of `self`
    /// strictly below `other`, the intersection, and the part strictly above `other`.
    pub fn partition(self, other: Self) -> (Self, Self, Self) {
        if self.start.space() != other.start.space() {
            return (self, Self::empty(self.start.space()), Self::empty(self.start.space()));
        }

        let lower_end = if self.end_exclusive().offset() <= other.start.offset() {
            self.end_exclusive()
        } else {
            other.start
        };
        let upper_start = if self.start.offset() >= other.end_exclusive().offset() {
            self.start
        } else {
            other.end_exclusive()
        };

        let lower = Self::from_exclusive(self.start, lower_end);
        let overlap = self.intersection(other);
        let upper = Self::from_exclusive(upper_start, self.end_exclusive());
        (lower, overlap, upper)
    }

    /// Returns an iterator over every address in the range, in ascending order.
    pub fn iter(self) -> impl Iterator<Item = Address> {
        let space = self.start.space();
        (self.start.offset()..self.end_exclusive().offset()).map(move |offset| Address::new(space, offset))
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
    fn contains_respects_bounds() {
        let r = range(10, 5);
        assert!(!r.contains(addr(9)));
        assert!(r.contains(addr(10)));
        assert!(r.contains(addr(14)));
        assert!(!r.contains(addr(15)));
    }

    #[test]
    fn partition_touching_lower_boundary() {
        let r = range(0, 10);
        let other = range(0, 4);
        let (lower, overlap, upper) = r.partition(other);
        assert!(lower.is_empty());
        assert_eq!(overlap, range(0, 4));
        assert_eq!(upper, range(4, 6));
    }

    #[test]
    fn partition_touching_upper_boundary() {
        let r = range(0, 10);
        let other = range(6, 4);
        let (lower, overlap, upper) = r.partition(other);
        assert_eq!(lower, range(0, 6));
        assert_eq!(overlap, range(6, 4));
        assert!(upper.is_empty());
    }

    #[test]
    fn partition_disjoint_other_below() {
        let r = range(10, 5);
        let other = range(0, 5);
        let (lower, overlap, upper) = r.partition(other);
        assert_eq!(lower, range(10, 0));
        assert!(overlap.is_empty());
        assert_eq!(upper, range(10, 5));
    }

    #[test]
    fn partition_empty_other() {
        let r = range(10, 5);
        let other = AddressRange::empty(AddressSpaceId::from_raw(0));
        let (lower, overlap, upper) = r.partition(other);
        assert!(overlap.is_empty());
        assert_eq!(lower.count() + upper.count(), r.count());
    }

    #[test]
    fn merge_adjacent() {
        let a = range(0, 4);
        let b = range(4, 4);
        assert_eq!(a.merge(b), Some(range(0, 8)));
    }

    #[test]
    fn merge_disjoint_is_none() {
        let a = range(0, 4);
        let b = range(5, 4);
        assert_eq!(a.merge(b), None);
    }

    #[test]
    fn split_at_exclusive_end_yields_empty_upper() {
        let r = range(0, 4);
        let (lower, upper) = r.split_at(addr(4)).unwrap();
        assert_eq!(lower, r);
        assert!(upper.is_empty());
    }

    #[test]
    fn iter_yields_every_address() {
        let r = range(5, 3);
        let addrs: Vec<_> = r.iter().map(Address::offset).collect();
        assert_eq!(addrs, vec![5, 6, 7]);
    }
}
