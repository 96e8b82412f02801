//! The address-space/factory collaborator: space lookup and overlay-space allocation.

use std::collections::HashMap;

use addr::{AddressSpaceDescriptor, AddressSpaceId, AddressSpaceKind};

use crate::MemoryMapError;

/// Looks up known address spaces and allocates overlay spaces on demand.
///
/// Out of scope per §1: production space-allocation policy (how an overlay's backing memory is
/// actually reserved in a running target) lives in another subsystem. This trait is the seam the
/// memory map calls through; [`InMemoryAddressFactory`] is a minimal reference implementation
/// sufficient to create and remove overlay spaces in isolation.
pub trait AddressFactory: Send {
    /// Looks up a space by name.
    fn get_space(&self, name: &str) -> Option<AddressSpaceId>;

    /// Returns the default memory space every program has.
    fn default_space(&self) -> AddressSpaceId;

    /// Returns the legal-offset description of `space`.
    fn descriptor(&self, space: AddressSpaceId) -> Option<AddressSpaceDescriptor>;

    /// Returns the kind of `space`.
    fn kind(&self, space: AddressSpaceId) -> Option<AddressSpaceKind>;

    /// Creates a new overlay space named `name`, shadowing `base_space`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryMapError::DuplicateName`] if `name` is already in use.
    fn create_overlay_space(&mut self, name: &str, base_space: AddressSpaceId) -> Result<AddressSpaceId, MemoryMapError>;

    /// Removes an overlay space once its last block has been removed.
    fn remove_overlay_space(&mut self, space: AddressSpaceId);
}

/// A space known to an [`InMemoryAddressFactory`].
struct SpaceEntry {
    /// The space's display name.
    name: String,
    /// The space's kind (memory, or overlay of another space).
    kind: AddressSpaceKind,
    /// The space's legal-offset description.
    descriptor: AddressSpaceDescriptor,
}

/// A reference [`AddressFactory`] that tracks spaces entirely in memory.
///
/// Sufficient to exercise and test the memory map in isolation; a production address database
/// would persist space definitions alongside block records.
pub struct InMemoryAddressFactory {
    /// Every known space, keyed by identity.
    spaces: HashMap<AddressSpaceId, SpaceEntry>,
    /// The default memory space, created with the factory.
    default_space: AddressSpaceId,
    /// The next identity to assign to a newly created space.
    next_id: u32,
}

impl InMemoryAddressFactory {
    /// Creates a factory with a single default memory space of the given address width.
    pub fn new(default_space_bits: u8) -> Self {
        let default_space = AddressSpaceId::from_raw(0);
        let mut spaces = HashMap::new();
        spaces.insert(default_space, SpaceEntry {
            name: "ram".to_string(),
            kind: AddressSpaceKind::Memory,
            descriptor: AddressSpaceDescriptor::new(default_space_bits),
        });

        Self {
            spaces,
            default_space,
            next_id: 1,
        }
    }

    /// Registers an additional named memory space (e.g. a second RAM region), returning its
    /// identity.
    pub fn add_memory_space(&mut self, name: &str, bits: u8) -> AddressSpaceId {
        let id = AddressSpaceId::from_raw(self.next_id);
        self.next_id += 1;
        self.spaces.insert(id, SpaceEntry {
            name: name.to_string(),
            kind: AddressSpaceKind::Memory,
            descriptor: AddressSpaceDescriptor::new(bits),
        });
        id
    }
}

impl AddressFactory for InMemoryAddressFactory {
    fn get_space(&self, name: &str) -> Option<AddressSpaceId> {
        self.spaces.iter().find(|(_, entry)| entry.name == name).map(|(id, _)| *id)
    }

    fn default_space(&self) -> AddressSpaceId {
        self.default_space
    }

    fn descriptor(&self, space: AddressSpaceId) -> Option<AddressSpaceDescriptor> {
        self.spaces.get(&space).map(|entry| entry.descriptor)
    }

    fn kind(&self, space: AddressSpaceId) -> Option<AddressSpaceKind> {
        self.spaces.get(&space).map(|entry| entry.kind)
    }

    fn create_overlay_space(
        &mut self,
        name: &str,
        base_space: AddressSpaceId,
    ) -> Result<AddressSpaceId, MemoryMapError> {
        if self.get_space(name).is_some() {
            return Err(MemoryMapError::DuplicateName(name.to_string()));
        }

        let descriptor = self.spaces.get(&base_space).map(|entry| entry.descriptor).unwrap_or(AddressSpaceDescriptor::new(0));

        let id = AddressSpaceId::from_raw(self.next_id);
        self.next_id += 1;
        self.spaces.insert(id, SpaceEntry {
            name: name.to_string(),
            kind: AddressSpaceKind::Overlay { base: base_space.id() },
            descriptor,
        });
        Ok(id)
    }

    fn remove_overlay_space(&mut self, space: AddressSpaceId) {
        self.spaces.remove(&space);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_space_is_named_ram() {
        let factory = InMemoryAddressFactory::new(32);
        assert_eq!(factory.get_space("ram"), Some(factory.default_space()));
    }

    #[test]
    fn overlay_space_rejects_duplicate_names() {
        let mut factory = InMemoryAddressFactory::new(32);
        let base = factory.default_space();
        factory.create_overlay_space("ov", base).unwrap();
        assert!(matches!(factory.create_overlay_space("ov", base), Err(MemoryMapError::DuplicateName(_))));
    }

    #[test]
    fn removing_overlay_space_frees_its_name() {
        let mut factory = InMemoryAddressFactory::new(32);
        let base = factory.default_space();
        let overlay = factory.create_overlay_space("ov", base).unwrap();
        factory.remove_overlay_space(overlay);
        assert!(factory.get_space("ov").is_none());
    }
}
