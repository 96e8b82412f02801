//! Compiled-in size limits enforced by the memory map.
//!
//! These are constants, not runtime configuration: the surrounding program owns profile and
//! workspace configuration, and the core only needs fixed upper bounds to keep pathological
//! inputs (an accidental multi-exabyte block) from being accepted.

/// The largest size, in bytes, a single initialized block may declare.
pub const MAX_INITIALIZED_BLOCK_SIZE: u64 = 0x1_0000_0000; // 4 GiB

/// The largest size, in bytes, a single uninitialized block may declare.
pub const MAX_UNINITIALIZED_BLOCK_SIZE: u64 = 0x1_0000_0000_0000; // 256 TiB

/// The largest total number of addresses a memory map may have covered across every block.
pub const MAX_BINARY_SIZE: u64 = 0x4_0000_0000_0000; // 1 PiB

/// The number of bits to shift a byte count right to express it in gibibytes, for diagnostics.
pub const GBYTE_SHIFT_FACTOR: u32 = 30;

/// [`MAX_BINARY_SIZE`] expressed in gibibytes, for diagnostics.
pub const MAX_BINARY_SIZE_GB: u64 = MAX_BINARY_SIZE >> GBYTE_SHIFT_FACTOR;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn gbyte_shift_factor_is_consistent_with_max_binary_size_gb() {
        assert_eq!(MAX_BINARY_SIZE >> GBYTE_SHIFT_FACTOR, MAX_BINARY_SIZE_GB);
    }
}
