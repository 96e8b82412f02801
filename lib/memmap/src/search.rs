//! The iteration cursor and safe-skip heuristic behind [`crate::MemoryMap::find_bytes`] (§4.8).

use addr::{Address, AddressRange, AddressSet, AddressSpaceId};

/// Walks the covered addresses of a single space, forward or backward, skipping gaps between
/// disjoint ranges and honoring an optional bound.
///
/// Built once per [`crate::MemoryMap::find_bytes`] call from a snapshot of the relevant coverage
/// set (`loaded_initialized_set` or `all_initialized_set`); the underlying ranges do not change
/// for the lifetime of a single search.
pub(crate) struct Cursor {
    /// The disjoint, ascending ranges covered in the search space.
    ranges: Vec<AddressRange>,
    /// The address the cursor currently points at, or `None` once exhausted.
    current: Option<Address>,
    /// The caller's bound, if any; its sense (inclusive/exclusive) depends on `forward`.
    end: Option<Address>,
    /// `true` for a forward (ascending) search, `false` for backward (descending).
    forward: bool,
}

impl Cursor {
    /// Seats a new cursor at the first in-bounds covered address at or after (forward) / at or
    /// before (backward) `start`.
    pub(crate) fn new(
        set: &AddressSet,
        space: AddressSpaceId,
        start: Address,
        end: Option<Address>,
        forward: bool,
    ) -> Self {
        let ranges: Vec<AddressRange> = set.ranges_in(space).collect();
        let mut cursor = Self {
            ranges,
            current: None,
            end,
            forward,
        };
        cursor.seat(start);
        cursor
    }

    /// Returns the address the cursor currently points at, or `None` if exhausted.
    pub(crate) fn current(&self) -> Option<Address> {
        self.current
    }

    /// Advances the cursor `skip` addresses in its direction of travel, re-seating it in the
    /// covered set.
    ///
    /// Per §9: a forward jump that would overflow the space falls back to stepping one address at
    /// a time; a backward advance is always by one address (the only caller of the backward path
    /// passes `skip = 1`).
    pub(crate) fn advance_by(&mut self, skip: u64) {
        let Some(cur) = self.current else { return };

        let next = if self.forward {
            cur.checked_add(skip).or_else(|| cur.checked_add(1))
        } else {
            cur.checked_sub(skip)
        };

        match next {
            Some(next) => self.seat(next),
            None => self.current = None,
        }
    }

    /// Returns `true` if `addr` satisfies the caller's bound.
    ///
    /// Forward searches treat `end` as inclusive. Backward searches resolve the source's
    /// ambiguous bound (§9(b)) by treating `end` as exclusive: an address at or below `end` is
    /// out of bounds.
    fn in_bounds(&self, addr: Address) -> bool {
        match self.end {
            Some(end) if self.forward => addr.offset() <= end.offset(),
            Some(end) => addr.offset() > end.offset(),
            None => true,
        }
    }

    /// Re-seats the cursor at the nearest in-bounds covered address at or after (forward) / at or
    /// before (backward) `from`.
    fn seat(&mut self, from: Address) {
        self.current = if self.forward { self.seat_forward(from) } else { self.seat_backward(from) }
            .filter(|&addr| self.in_bounds(addr));
    }

    /// Finds the first covered address at or after `from`.
    fn seat_forward(&self, from: Address) -> Option<Address> {
        let index = self.ranges.partition_point(|r| r.end_inclusive().offset() < from.offset());
        let range = self.ranges.get(index)?;
        Some(if range.contains(from) { from } else { range.start() })
    }

    /// Finds the last covered address at or before `from`.
    fn seat_backward(&self, from: Address) -> Option<Address> {
        let count = self.ranges.partition_point(|r| r.start().offset() <= from.offset());
        let range = self.ranges.get(count.checked_sub(1)?)?;
        Some(if range.contains(from) { from } else { range.end_inclusive() })
    }
}

/// Computes the Boyer-Moore-style safe skip on a forward mismatch (§4.8 step 4).
///
/// Finds the smallest `j` in `[1, pattern.len()]` such that `pattern[0..pattern.len() - j]`
/// matches `buf[j..pattern.len()]` under `mask` (if given), and returns `j`: the caller can
/// advance by `j` addresses without skipping over a possible match. Returns `pattern.len()` if no
/// such `j` exists short of sliding the whole pattern past `buf`.
pub(crate) fn safe_skip(pattern: &[u8], mask: Option<&[u8]>, buf: &[u8]) -> u64 {
    let len = pattern.len();

    for j in 1..len {
        let window = len - j;
        let matches = (0..window).all(|i| match mask {
            Some(mask) => (pattern[i] & mask[i]) == (buf[j + i] & mask[j + i]),
            None => pattern[i] == buf[j + i],
        });
        if matches {
            return j as u64;
        }
    }

    len as u64
}

#[cfg(test)]
mod test {
    use super::*;
    use addr::AddressSpaceId;

    fn space() -> AddressSpaceId {
        AddressSpaceId::from_raw(0)
    }

    fn addr(offset: u64) -> Address {
        Address::new(space(), offset)
    }

    fn set_with(ranges: &[(u64, u64)]) -> AddressSet {
        let mut set = AddressSet::new();
        for &(start, len) in ranges {
            set.insert(AddressRange::new(addr(start), len));
        }
        set
    }

    #[test]
    fn forward_cursor_skips_gaps() {
        let set = set_with(&[(0x1000, 4), (0x2000, 4)]);
        let mut cursor = Cursor::new(&set, space(), addr(0x1002), None, true);
        assert_eq!(cursor.current(), Some(addr(0x1002)));
        cursor.advance_by(4);
        assert_eq!(cursor.current(), Some(addr(0x2000)));
    }

    #[test]
    fn forward_cursor_respects_inclusive_end() {
        let set = set_with(&[(0, 0x10)]);
        let mut cursor = Cursor::new(&set, space(), addr(0), Some(addr(4)), true);
        cursor.advance_by(4);
        assert_eq!(cursor.current(), Some(addr(4)));
        cursor.advance_by(1);
        assert_eq!(cursor.current(), None);
    }

    #[test]
    fn backward_cursor_excludes_end_bound() {
        let set = set_with(&[(0, 0x10)]);
        let mut cursor = Cursor::new(&set, space(), addr(8), Some(addr(4)), false);
        assert_eq!(cursor.current(), Some(addr(8)));
        cursor.advance_by(4);
        assert_eq!(cursor.current(), None);
    }

    #[test]
    fn backward_cursor_seats_at_nearest_covered_predecessor() {
        let set = set_with(&[(0x1000, 4), (0x2000, 4)]);
        let cursor = Cursor::new(&set, space(), addr(0x1800), None, false);
        assert_eq!(cursor.current(), Some(addr(0x1003)));
    }

    #[test]
    fn safe_skip_matches_full_width_without_overlap() {
        let pattern = [0x11, 0x22, 0x33];
        let buf = [0xAA, 0xBB, 0xCC];
        assert_eq!(safe_skip(&pattern, None, &buf), 3);
    }

    #[test]
    fn safe_skip_soundness_no_earlier_offset_matches() {
        let pattern = [0xAA, 0xAA, 0xBB];
        let buf = [0xAA, 0xAA, 0xAA];
        let j = safe_skip(&pattern, None, &buf) as usize;

        for shift in 1..j {
            let window = pattern.len() - shift;
            let matches = (0..window).all(|i| pattern[i] == buf[shift + i]);
            assert!(!matches, "offset {shift} should not match if safe_skip returned {j}");
        }
    }

    #[test]
    fn safe_skip_under_mask_ignores_masked_bits() {
        let pattern = [0xFF, 0x0F];
        let mask = [0xFF, 0x0F];
        let buf = [0x00, 0xFF];
        // pattern[0..1] = [0xFF] vs buf[1..2] masked = [0xFF & 0x0F] = [0x0F]; no match at j=1.
        // j=2 is the fallback (full pattern length).
        assert_eq!(safe_skip(&pattern, Some(&mask), &buf), 2);
    }
}
