use std::fmt::{self, Debug};

use log::{debug, trace};

use super::bus::{Bus, BusError};
use super::message::Message;
use super::node::{Delivery, Node};

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct Handle {
    index: u32,
    generation: u32,
}

/// Handle of a node inside a `Network`. Stays unique after the node is removed.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(Handle);

/// Handle of a bus inside a `Network`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusId(Handle);

impl NodeId {
    #[cfg(test)]
    pub(crate) fn from_raw(index: u32, generation: u32) -> Self {
        NodeId(Handle { index, generation })
    }
}

impl Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {}v{}", self.0.index, self.0.generation)
    }
}

impl Debug for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bus {}v{}", self.0.index, self.0.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot storage handing out generational handles.
/// A freed slot bumps its generation, so old handles to it stop resolving.
/// A slot whose generation would wrap is retired instead of reused.
#[derive(Debug)]
struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// # Panics
    ///
    /// When more than `u32::MAX` slots would be needed.
    pub fn insert(&mut self, value: T) -> Handle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            self.len += 1;
            return Handle {
                index,
                generation: slot.generation,
            };
        }
        let index = match u32::try_from(self.slots.len()) {
            Ok(index) => index,
            Err(_) => panic!("arena is out of handles ({} slots)", self.slots.len()),
        };
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        self.len += 1;
        Handle {
            index,
            generation: 0,
        }
    }

    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        self.len -= 1;
        match slot.generation.checked_add(1) {
            Some(generation) => {
                slot.generation = generation;
                self.free.push(handle.index);
            }
            None => debug!("slot {} retired", handle.index),
        }
        Some(value)
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    // `insert` never hands out an index past u32::MAX, so the casts below hold.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let handle = Handle {
                index: index as u32,
                generation: slot.generation,
            };
            slot.value.as_ref().map(|value| (handle, value))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let handle = Handle {
                index: index as u32,
                generation: slot.generation,
            };
            slot.value.as_mut().map(|value| (handle, value))
        })
    }
}

/// Owner of the virtual nodes and the buses they talk over.
///
/// Every bus operation goes through here: callers keep `NodeId`/`BusId`
/// handles, the network keeps the data. A node can be connected to several
/// buses of the same network at once. Networks share nothing with each other.
///
/// The network is single threaded and synchronous. `transmit` calls every
/// receiving handler before it returns, and handlers may call back into the
/// network through their `Delivery`.
#[derive(Debug)]
pub struct Network {
    nodes: Arena<Node>,
    buses: Arena<Bus>,
}

impl Default for Network {
    fn default() -> Self {
        Network::new()
    }
}

impl Network {
    pub fn new() -> Self {
        Network {
            nodes: Arena::new(),
            buses: Arena::new(),
        }
    }

    // ----- buses ----- //
    pub fn add_bus(&mut self) -> BusId {
        let id = BusId(self.buses.insert(Bus::new()));
        debug!("{:?} created", id);
        id
    }

    /// Drops the bus. Its handle is dead afterwards, the nodes are untouched.
    pub fn remove_bus(&mut self, bus: BusId) -> Option<Bus> {
        let removed = self.buses.remove(bus.0);
        if removed.is_some() {
            debug!("{:?} removed", bus);
        }
        removed
    }

    /// Re-initialises the bus: no nodes, no last message, zeroed stats.
    pub fn reset_bus(&mut self, bus: BusId) -> Result<(), BusError> {
        self.buses.get_mut(bus.0).ok_or(BusError::NullBus)?.reset();
        debug!("{:?} reset", bus);
        Ok(())
    }

    pub fn bus(&self, bus: BusId) -> Option<&Bus> {
        self.buses.get(bus.0)
    }

    pub fn buses(&self) -> impl Iterator<Item = (BusId, &Bus)> {
        self.buses.iter().map(|(handle, bus)| (BusId(handle), bus))
    }

    pub fn bus_count(&self) -> usize {
        self.buses.len()
    }

    // ----- nodes ----- //
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let tag = node.tag();
        let id = NodeId(self.nodes.insert(node));
        debug!("{:?} created with tag {}", id, tag);
        id
    }

    /// Disconnects the node from every bus, then frees it.
    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        if !self.nodes.contains(id.0) {
            return None;
        }
        for (handle, bus) in self.buses.iter_mut() {
            if bus.detach(id).is_ok() {
                debug!("{:?} dropped from {:?} on removal", id, BusId(handle));
            }
        }
        self.nodes.remove(id.0)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Buses the node is currently connected to.
    pub fn buses_of(&self, id: NodeId) -> Vec<BusId> {
        self.buses
            .iter()
            .filter(|(_, bus)| bus.is_connected(id))
            .map(|(handle, _)| BusId(handle))
            .collect()
    }

    // ----- registry ----- //
    /// Attaches a node to the bus, appending it to the delivery order.
    ///
    /// Checked in order: live bus, live node, handler present, free slot,
    /// not already connected.
    pub fn connect(&mut self, bus: BusId, node: NodeId) -> Result<(), BusError> {
        let registry = self.buses.get_mut(bus.0).ok_or(BusError::NullBus)?;
        let candidate = self.nodes.get(node.0).ok_or(BusError::NullNode)?;
        if !candidate.has_handler() {
            return Err(BusError::NullCallback);
        }
        registry.attach(node)
    }

    /// Detaches a node from the bus. The remaining nodes keep their order.
    pub fn disconnect(&mut self, bus: BusId, node: NodeId) -> Result<(), BusError> {
        let registry = self.buses.get_mut(bus.0).ok_or(BusError::NullBus)?;
        if !self.nodes.contains(node.0) {
            return Err(BusError::NullNode);
        }
        registry.detach(node)
    }

    // ----- dispatch ----- //
    /// Sends a copy of `msg` to every node connected to the bus, in connection
    /// order, except `source`. Returns how many handlers ran.
    ///
    /// `source` does not need to be connected; pass `None` to reach everyone.
    /// The walk covers the nodes connected when the call starts and skips any
    /// of them that a handler disconnects before its turn. Handlers still
    /// running further up the stack are called again.
    pub fn transmit(
        &mut self,
        bus: BusId,
        msg: &Message,
        source: Option<NodeId>,
    ) -> Result<usize, BusError> {
        let msg = *msg;
        let registry = self.buses.get_mut(bus.0).ok_or(BusError::NullBus)?;
        registry.record_transmission(&msg);
        let targets = registry.snapshot();
        trace!("{:?} transmits {:?} from {:?} to {} nodes", bus, msg, source, targets.len());

        let mut delivered = 0;
        let mut skipped = 0;
        for target in targets {
            if Some(target) == source {
                continue;
            }
            let still_connected = self
                .buses
                .get(bus.0)
                .map_or(false, |registry| registry.is_connected(target));
            if !still_connected {
                continue;
            }
            if self.deliver(bus, target, &msg) {
                delivered += 1;
            } else {
                skipped += 1;
            }
        }

        if let Some(registry) = self.buses.get_mut(bus.0) {
            registry.record_dispatch(delivered as u64, skipped);
        }
        Ok(delivered)
    }

    fn deliver(&mut self, bus: BusId, target: NodeId, msg: &Message) -> bool {
        let node = match self.nodes.get(target.0) {
            Some(node) => node,
            None => return false,
        };
        let tag = node.tag();
        // Cloned out so the slot stays free to be replaced, cleared or
        // called again while this delivery runs.
        let handler = match node.handler() {
            Some(handler) => handler,
            None => {
                debug!("{:?} skipped on {:?}, no handler", target, bus);
                return false;
            }
        };
        trace!("{:?} (tag {}) receives {:?}", target, tag, msg);
        handler.on_receive(&mut Delivery::new(self, bus, target, tag), msg);
        true
    }
}
