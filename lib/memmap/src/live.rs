//! The live-memory override: an optional handler that short-circuits block-backed I/O.

use addr::Address;

/// Observes and reacts to the memory map's block-backed I/O being bypassed.
pub trait LiveMemoryListener: Send {
    /// Called after a live write, with the affected address range's bounds.
    fn bytes_changed(&mut self, start: Address, end: Address);
}

/// Short-circuits reads and writes to a running target process, superseding block-backed I/O.
///
/// When installed, the memory map reports every address in `addr_set` as initialized (§6): the
/// running target is assumed to have *some* value at every address it covers, whether or not a
/// backing block happens to be marked initialized.
pub trait LiveMemoryHandler: Send {
    /// Reads one byte from the live target at `addr`.
    ///
    /// # Errors
    ///
    /// Returns `Err(())` if the live target could not service the read (the caller surfaces this
    /// as [`crate::MemoryMapError::MemoryAccess`]).
    fn get_byte(&mut self, addr: Address) -> Result<u8, ()>;

    /// Reads up to `dst.len()` bytes from the live target starting at `addr`, returning the
    /// number of bytes actually read.
    fn get_bytes(&mut self, addr: Address, dst: &mut [u8]) -> usize;

    /// Writes one byte to the live target at `addr`.
    ///
    /// # Errors
    ///
    /// Returns `Err(())` if the live target rejected the write.
    fn put_byte(&mut self, addr: Address, value: u8) -> Result<(), ()>;

    /// Writes `src` to the live target starting at `addr`, returning the number of bytes actually
    /// written.
    fn put_bytes(&mut self, addr: Address, src: &[u8]) -> usize;

    /// Discards any locally cached view of the live target's memory.
    fn clear_cache(&mut self);

    /// Registers a listener to be notified of live writes.
    fn add_listener(&mut self, listener: Box<dyn LiveMemoryListener>);

    /// Removes every previously registered listener.
    fn remove_listener(&mut self);
}
