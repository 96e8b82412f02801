//! End-to-end exercises of a [`MemoryMap`] built entirely from its reference collaborators.
//!
//! Each test stands up a fresh map over [`InMemoryBlockStore`]/[`InMemoryAddressFactory`] and
//! drives it purely through the public API, the way an embedder with no custom adapter would.

use std::sync::Once;

use memmap::{
    Address, AddressFactory, ConstantByteStream, Endian, InMemoryAddressFactory, InMemoryBlockStore, MemoryMap,
    MemoryMapError, NullChangeBus, NullCodeManager, Permissions, SliceByteStream,
};

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

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

/// Scenario 1: a filled Default initialized block reads back byte-for-byte and as a big-endian
/// word, and is the sole contributor to `addr_set`.
#[test]
fn create_initialized_block_reads_back_filled_bytes() {
    init_tracing();
    let factory = InMemoryAddressFactory::new(32);
    let space = factory.default_space();
    let map = open_map(factory);

    let start = Address::new(space, 0x1000);
    let mut fill = ConstantByteStream::new(0xAA);
    map.create_initialized_block(".text", start, 0x10, Permissions::READ | Permissions::EXECUTE, Some(&mut fill), None, None)
        .unwrap();

    assert_eq!(map.get_byte(Address::new(space, 0x1005)).unwrap(), 0xAA);
    assert_eq!(map.get_u32(Address::new(space, 0x1000), Some(true)).unwrap(), 0xAAAA_AAAA);
    assert_eq!(map.addr_set().num_addresses(), 16);
}

/// Scenario 2: an uninitialized block covers addresses but refuses to be read.
#[test]
fn uninitialized_block_rejects_reads() {
    init_tracing();
    let factory = InMemoryAddressFactory::new(32);
    let space = factory.default_space();
    let map = open_map(factory);

    let start = Address::new(space, 0x2000);
    map.create_uninitialized_block(".bss", start, 0x100, Permissions::READ | Permissions::WRITE, None).unwrap();

    assert!(matches!(map.get_byte(start), Err(MemoryMapError::AccessDenied(_))));

    let mut buf = [0u8; 8];
    assert!(matches!(map.get_bytes(start, &mut buf), Err(MemoryMapError::MemoryAccess(_))));
}

/// Scenario 3: splitting an initialized block in two and rejoining it reproduces the original
/// bytes under a single block.
#[test]
fn split_then_join_reproduces_original_bytes() {
    init_tracing();
    let factory = InMemoryAddressFactory::new(32);
    let space = factory.default_space();
    let map = open_map(factory);

    let start = Address::new(space, 0x1000);
    let mut fill = ConstantByteStream::new(0xAA);
    let text = map
        .create_initialized_block(".text", start, 0x10, Permissions::READ | Permissions::EXECUTE, Some(&mut fill), None, None)
        .unwrap();

    let (lower, upper) = map.split(text.id(), Address::new(space, 0x1008)).unwrap();
    assert_eq!(lower.range().start().offset(), 0x1000);
    assert_eq!(lower.end().offset(), 0x1007);
    assert_eq!(upper.range().start().offset(), 0x1008);
    assert_eq!(upper.end().offset(), 0x100F);

    let joined = map.join(lower.id(), upper.id()).unwrap();
    assert_eq!(joined.start().offset(), 0x1000);
    assert_eq!(joined.length(), 0x10);

    let mut buf = [0u8; 16];
    map.get_bytes(start, &mut buf).unwrap();
    assert_eq!(buf, [0xAA; 16]);
}

/// Scenario 4: a byte-mapped block forwards reads one-to-one and contributes to
/// `all_initialized_set` wherever its target is initialized.
#[test]
fn byte_mapped_block_forwards_to_initialized_target() {
    init_tracing();
    let mut factory = InMemoryAddressFactory::new(32);
    let ram = factory.default_space();
    let overlay = factory.create_overlay_space("ov", ram).unwrap();
    let map = open_map(factory);

    let mut fill = ConstantByteStream::new(0xAA);
    map.create_initialized_block(
        ".text",
        Address::new(ram, 0x1000),
        0x10,
        Permissions::READ,
        Some(&mut fill),
        None,
        None,
    )
    .unwrap();

    map.create_byte_mapped_block("overlay.text", Address::new(overlay, 0), 4, Address::new(ram, 0x1000), Permissions::READ)
        .unwrap();

    assert_eq!(map.get_byte(Address::new(overlay, 2)).unwrap(), 0xAA);

    let covered = map.all_initialized_set();
    assert!(covered.contains(Address::new(overlay, 0)));
    assert!(covered.contains(Address::new(overlay, 3)));
}

/// Scenario 5: a bit-mapped block expands each target bit, LSB-first, into its own byte.
#[test]
fn bit_mapped_block_expands_bits_lsb_first() {
    init_tracing();
    let mut factory = InMemoryAddressFactory::new(32);
    let ram = factory.default_space();
    let overlay = factory.create_overlay_space("ov", ram).unwrap();
    let map = open_map(factory);

    let mut fill = SliceByteStream::new(&[0b1011_0001]);
    map.create_initialized_block(".flags", Address::new(ram, 0x1000), 1, Permissions::READ, Some(&mut fill), None, None)
        .unwrap();

    map.create_bit_mapped_block("overlay.flags", Address::new(overlay, 0), 8, Address::new(ram, 0x1000), Permissions::READ)
        .unwrap();

    let expected = [1u8, 0, 0, 0, 1, 1, 0, 1];
    for (bit, &want) in expected.iter().enumerate() {
        assert_eq!(map.get_byte(Address::new(overlay, bit as u64)).unwrap(), want, "bit {bit}");
    }
}

/// Scenario 6: an exact pattern is found; a pattern that cannot match anywhere in the covered
/// bytes returns `None` rather than looping forever.
#[test]
fn find_bytes_matches_exact_pattern_and_misses_cleanly() {
    init_tracing();
    let factory = InMemoryAddressFactory::new(32);
    let space = factory.default_space();
    let map = open_map(factory);

    let start = Address::new(space, 0x1000);
    let mut fill = ConstantByteStream::new(0xAA);
    map.create_initialized_block(".text", start, 0x10, Permissions::READ, Some(&mut fill), None, None).unwrap();

    let found = map.find_bytes(start, None, &[0xAA, 0xAA, 0xAA], None, true, None).unwrap();
    assert_eq!(found, Some(start));

    let missing = map.find_bytes(start, None, &[0xAA, 0xBB], None, true, None).unwrap();
    assert_eq!(missing, None);
}

/// Scenario 7: a write that would run off the end of covered memory is rejected in its entirety,
/// before any byte is mutated.
#[test]
fn set_bytes_preflights_the_whole_span_before_mutating() {
    init_tracing();
    let factory = InMemoryAddressFactory::new(32);
    let space = factory.default_space();
    let map = open_map(factory);

    let start = Address::new(space, 0x1000);
    let mut fill = ConstantByteStream::new(0xAA);
    map.create_initialized_block(".text", start, 0x10, Permissions::READ | Permissions::WRITE, Some(&mut fill), None, None)
        .unwrap();

    let write_start = Address::new(space, 0x100E);
    let result = map.set_bytes(write_start, &[0x01, 0x02, 0x03, 0x04]);
    assert!(matches!(result, Err(MemoryMapError::AccessDenied(_))));

    assert_eq!(map.get_byte(Address::new(space, 0x100E)).unwrap(), 0xAA);
    assert_eq!(map.get_byte(Address::new(space, 0x100F)).unwrap(), 0xAA);
}

struct ConstantLiveHandler {
    value: u8,
}

impl memmap::LiveMemoryHandler for ConstantLiveHandler {
    fn get_byte(&mut self, _addr: Address) -> Result<u8, ()> {
        Ok(self.value)
    }

    fn get_bytes(&mut self, _addr: Address, dst: &mut [u8]) -> usize {
        dst.fill(self.value);
        dst.len()
    }

    fn put_byte(&mut self, _addr: Address, value: u8) -> Result<(), ()> {
        self.value = value;
        Ok(())
    }

    fn put_bytes(&mut self, _addr: Address, src: &[u8]) -> usize {
        if let Some(&last) = src.last() {
            self.value = last;
        }
        src.len()
    }

    fn clear_cache(&mut self) {}

    fn add_listener(&mut self, _listener: Box<dyn memmap::LiveMemoryListener>) {}

    fn remove_listener(&mut self) {}
}

/// Scenario 8: once a live-memory handler is installed, mutators that assume block-backed storage
/// are rejected, while reads delegate to the handler regardless of what, if anything, backs the
/// address in the block set.
#[test]
fn live_memory_handler_supersedes_block_backed_io() {
    init_tracing();
    let factory = InMemoryAddressFactory::new(32);
    let space = factory.default_space();
    let map = open_map(factory);

    let start = Address::new(space, 0x1000);
    let block = map
        .create_uninitialized_block(".text", start, 0x10, Permissions::READ | Permissions::WRITE, None)
        .unwrap();

    map.set_live_memory_handler(Box::new(ConstantLiveHandler { value: 0x42 }));

    assert!(matches!(
        map.move_block(block.id(), Address::new(space, 0x5000)),
        Err(MemoryMapError::StateConflict)
    ));

    // Even though the underlying block is uninitialized, the live handler answers every read.
    assert_eq!(map.get_byte(start).unwrap(), 0x42);
}
