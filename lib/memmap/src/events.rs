//! The program-level change-event bus.

use addr::{Address, AddressRange};
use store::BlockId;

/// A single notification posted after a successful mutation.
///
/// Carries start/end/old/new as appropriate, matching §6; posted only after the map's internal
/// monitor has released the new [`crate::Snapshot`] (§5), so listeners that immediately query the
/// map back see the change already published.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A new block was created.
    BlockAdded {
        /// The identity of the new block.
        id: BlockId,
        /// The new block's range.
        range: AddressRange,
    },
    /// A block was deleted.
    BlockRemoved {
        /// The identity of the removed block.
        id: BlockId,
        /// The removed block's former range.
        range: AddressRange,
    },
    /// A block's metadata (name, permissions, initialization) changed in place.
    BlockChanged {
        /// The identity of the changed block.
        id: BlockId,
    },
    /// A block was split into two.
    BlockSplit {
        /// The identity of the original block, now covering only the lower half.
        original: BlockId,
        /// The identity of the new block covering the upper half.
        new: BlockId,
        /// The address the split occurred at.
        at: Address,
    },
    /// Two adjacent blocks were joined into one.
    BlocksJoined {
        /// The identity of the surviving, combined block.
        survivor: BlockId,
        /// The identity of the block that was absorbed and removed.
        absorbed: BlockId,
    },
    /// A block moved to a new start address.
    BlockMoved {
        /// The identity of the moved block.
        id: BlockId,
        /// The block's former start address.
        old_start: Address,
        /// The block's new start address.
        new_start: Address,
    },
    /// Backing bytes changed without any block metadata changing.
    BytesChanged {
        /// The affected address range.
        range: AddressRange,
    },
}

/// Posts [`ChangeEvent`]s as a single-writer ordered stream.
///
/// Out of scope per §1: the program-level event bus that fans events out to UI and analysis
/// listeners lives in another subsystem. [`ChannelChangeBus`] is a minimal reference
/// implementation backed by [`std::sync::mpsc`], sufficient for tests and simple embedders.
pub trait ChangeBus: Send {
    /// Posts `event` to every listener.
    ///
    /// Must not be called while the map's program lock is held, and listeners must not call back
    /// into the map re-entrantly (§5).
    fn post(&mut self, event: ChangeEvent);
}

/// A [`ChangeBus`] that forwards every event to an `mpsc` channel.
pub struct ChannelChangeBus {
    /// The sending half of the channel events are posted to.
    sender: std::sync::mpsc::Sender<ChangeEvent>,
}

impl ChannelChangeBus {
    /// Creates a channel-backed bus, returning it paired with the receiver that observes posted
    /// events.
    pub fn new() -> (Self, std::sync::mpsc::Receiver<ChangeEvent>) {
        let (sender, receiver) = std::sync::mpsc::channel();
        (Self { sender }, receiver)
    }
}

impl ChangeBus for ChannelChangeBus {
    fn post(&mut self, event: ChangeEvent) {
        // A full receiver that dropped its end just means nobody is listening; that is not a
        // memory map failure.
        let _ = self.sender.send(event);
    }
}

/// A [`ChangeBus`] that discards every event, for callers that don't need notifications.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullChangeBus;

impl ChangeBus for NullChangeBus {
    fn post(&mut self, _event: ChangeEvent) {}
}

#[cfg(test)]
mod test {
    use super::*;
    use addr::AddressSpaceId;

    #[test]
    fn channel_bus_delivers_events_in_order() {
        let (mut bus, receiver) = ChannelChangeBus::new();
        let range = AddressRange::new(Address::new(AddressSpaceId::from_raw(0), 0), 1);
        bus.post(ChangeEvent::BlockAdded {
            id: BlockId::from_raw(0),
            range,
        });
        bus.post(ChangeEvent::BlockRemoved {
            id: BlockId::from_raw(0),
            range,
        });

        assert!(matches!(receiver.recv().unwrap(), ChangeEvent::BlockAdded { .. }));
        assert!(matches!(receiver.recv().unwrap(), ChangeEvent::BlockRemoved { .. }));
    }
}
