//! Tracks which of the W5500's eight hardware sockets are free, allocated,
//! and — for sockets handed off from a [`TcpServer`](crate::tcp::server::TcpServer)
//! to a connection handler — detached from their original owner.
//!
//! The allocator never hands out a socket beyond the number made usable by
//! the configured [`SocketBufferSize`](crate::socket::SocketBufferSize); the
//! remaining slots simply never get set as available.

use crate::socket::{SocketId, SOCKETS, SOCKET_COUNT};

/// No free socket satisfies the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Exhausted;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Disabled,
    Free,
    Allocated,
    Detached,
}

/// A bitmap-style allocator over the chip's eight hardware sockets.
pub struct SocketAllocator {
    slots: [Slot; SOCKET_COUNT],
}

impl SocketAllocator {
    /// Creates an allocator with every slot disabled. Call
    /// [`SocketAllocator::enable`] once the stack knows how many sockets the
    /// configured buffer size makes usable.
    pub const fn new() -> Self {
        Self {
            slots: [Slot::Disabled; SOCKET_COUNT],
        }
    }

    /// Marks the first `usable_sockets` slots free and the rest disabled.
    /// Called once during `NetworkStack::initialize`.
    pub fn enable(&mut self, usable_sockets: usize) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            *slot = if index < usable_sockets { Slot::Free } else { Slot::Disabled };
        }
    }

    /// Allocates any one free socket.
    pub fn allocate_one(&mut self) -> Result<SocketId, Exhausted> {
        let id = SOCKETS
            .iter()
            .copied()
            .find(|id| self.slots[id.index()] == Slot::Free)
            .ok_or(Exhausted)?;
        self.slots[id.index()] = Slot::Allocated;
        Ok(id)
    }

    /// Allocates exactly `count` free sockets, or none at all if fewer than
    /// `count` are free (atomic all-or-none).
    pub fn allocate_many(&mut self, count: usize) -> Result<[Option<SocketId>; SOCKET_COUNT], Exhausted> {
        let free = SOCKETS.iter().copied().filter(|id| self.slots[id.index()] == Slot::Free).count();
        if free < count {
            return Err(Exhausted);
        }

        let mut allocated = [None; SOCKET_COUNT];
        let mut n = 0;
        for id in SOCKETS.iter().copied() {
            if n == count {
                break;
            }
            if self.slots[id.index()] == Slot::Free {
                self.slots[id.index()] = Slot::Allocated;
                allocated[n] = Some(id);
                n += 1;
            }
        }
        Ok(allocated)
    }

    /// Marks `id` as a handler detached from its original `TcpServer`. The
    /// flag is consulted by [`SocketAllocator::deallocate`] purely to decide
    /// whether the socket's teardown still needs port-cleanup bookkeeping;
    /// it carries no other meaning.
    pub fn mark_detached(&mut self, id: SocketId) {
        debug_assert_eq!(self.slots[id.index()], Slot::Allocated);
        self.slots[id.index()] = Slot::Detached;
    }

    /// `true` if `id` is currently marked as a detached handler.
    pub fn is_detached(&self, id: SocketId) -> bool {
        self.slots[id.index()] == Slot::Detached
    }

    /// Releases `id` back to the free pool, running `on_deallocate` first if
    /// (and only if) it was a detached handler that still owes port
    /// cleanup. Idempotent-safe only when the caller is certain it owns
    /// `id`; deallocating a slot the caller does not own is a programming
    /// error and `debug_assert`s in development builds.
    pub fn deallocate(&mut self, id: SocketId, on_deallocate: impl FnOnce()) {
        debug_assert_ne!(self.slots[id.index()], Slot::Free);
        debug_assert_ne!(self.slots[id.index()], Slot::Disabled);

        if self.slots[id.index()] == Slot::Detached {
            on_deallocate();
        }
        self.slots[id.index()] = Slot::Free;
    }
}

impl Default for SocketAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_one_never_returns_the_same_socket_twice() {
        let mut allocator = SocketAllocator::new();
        allocator.enable(2);

        let a = allocator.allocate_one().unwrap();
        let b = allocator.allocate_one().unwrap();
        assert_ne!(a, b);
        assert_eq!(allocator.allocate_one(), Err(Exhausted));
    }

    #[test]
    fn allocate_one_respects_the_enabled_count() {
        let mut allocator = SocketAllocator::new();
        allocator.enable(1);

        allocator.allocate_one().unwrap();
        assert_eq!(allocator.allocate_one(), Err(Exhausted));
    }

    #[test]
    fn allocate_many_is_all_or_none() {
        let mut allocator = SocketAllocator::new();
        allocator.enable(3);

        assert_eq!(allocator.allocate_many(4), Err(Exhausted));

        let allocated = allocator.allocate_many(3).unwrap();
        assert_eq!(allocated.iter().filter(|s| s.is_some()).count(), 3);
        assert_eq!(allocator.allocate_one(), Err(Exhausted));
    }

    #[test]
    fn detach_then_deallocate_runs_cleanup_exactly_for_detached_sockets() {
        let mut allocator = SocketAllocator::new();
        allocator.enable(2);
        let id = allocator.allocate_one().unwrap();

        let mut cleanups = 0;
        allocator.deallocate(id, || cleanups += 1);
        assert_eq!(cleanups, 0);

        let id = allocator.allocate_one().unwrap();
        allocator.mark_detached(id);
        assert!(allocator.is_detached(id));

        let mut cleanups = 0;
        allocator.deallocate(id, || cleanups += 1);
        assert_eq!(cleanups, 1);
    }

    #[test]
    fn deallocated_socket_can_be_reallocated() {
        let mut allocator = SocketAllocator::new();
        allocator.enable(1);
        let id = allocator.allocate_one().unwrap();
        allocator.deallocate(id, || {});
        assert_eq!(allocator.allocate_one().unwrap(), id);
    }
}
