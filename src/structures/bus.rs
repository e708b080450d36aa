/*
Registry side of a virtual bus.

A `Bus` only remembers which nodes listen to it and in which order they
connected; the nodes themselves live in the owning `Network`. Dispatch walks
`nodes()` front to back, so the order kept here is the delivery order.
*/
use log::debug;
use serde::Serialize;
use thiserror::Error;

use super::message::Message;
use super::network::NodeId;

/// Max amount of nodes connected to one bus.
#[cfg(not(feature = "wide-bus"))]
pub const MAX_CONNECTED_NODES: usize = 16;
/// Max amount of nodes connected to one bus.
#[cfg(feature = "wide-bus")]
pub const MAX_CONNECTED_NODES: usize = 32;

/// Bus operation errors. Nothing is modified when one of these is returned.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusError {
    /// The bus handle does not refer to a live bus.
    #[error("bus does not exist")]
    NullBus,
    /// The node handle does not refer to a live node.
    #[error("node does not exist")]
    NullNode,
    /// The node has no receive handler installed.
    #[error("node has no receive handler")]
    NullCallback,
    #[error("bus already has the maximum of {} connected nodes", MAX_CONNECTED_NODES)]
    TooManyConnected,
    #[error("node is not connected to this bus")]
    NotFound,
    #[error("node is already connected to this bus")]
    AlreadyConnected,
}

impl BusError {
    /// Numeric code, stable across releases. 2 is retired (absent message).
    pub fn code(&self) -> u8 {
        match self {
            BusError::NullBus => 1,
            BusError::NullNode => 3,
            BusError::NullCallback => 4,
            BusError::TooManyConnected => 5,
            BusError::NotFound => 6,
            BusError::AlreadyConnected => 7,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BusStats {
    /// Calls to transmit, nested ones included.
    pub transmissions: u64,
    /// Handler invocations.
    pub deliveries: u64,
    /// Connected nodes passed over because their handler was running or missing.
    pub skipped: u64,
}

#[derive(Debug, Default)]
pub struct Bus {
    /// Nodes to deliver new messages to, in connection order.
    nodes: heapless::Vec<NodeId, MAX_CONNECTED_NODES>,
    /// The message just transmitted over the bus.
    last_message: Option<Message>,
    stats: BusStats,
}

impl Bus {
    pub fn new() -> Self {
        Bus::default()
    }

    /// Back to the freshly initialised state: no nodes, no message, zeroed stats.
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.last_message = None;
        self.stats = BusStats::default();
    }

    pub fn connected(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    pub fn is_full(&self) -> bool {
        self.nodes.is_full()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.last_message.as_ref()
    }

    pub fn stats(&self) -> BusStats {
        self.stats
    }

    pub(crate) fn attach(&mut self, node: NodeId) -> Result<(), BusError> {
        if self.nodes.is_full() {
            return Err(BusError::TooManyConnected);
        }
        if self.is_connected(node) {
            return Err(BusError::AlreadyConnected);
        }
        self.nodes
            .push(node)
            .map_err(|_| BusError::TooManyConnected)?;
        debug_assert!(self.nodes.len() <= MAX_CONNECTED_NODES);
        debug!("{:?} connected at position {}", node, self.nodes.len() - 1);
        Ok(())
    }

    /// Removes `node` keeping the order of the others.
    pub(crate) fn detach(&mut self, node: NodeId) -> Result<(), BusError> {
        let position = self
            .nodes
            .iter()
            .position(|&n| n == node)
            .ok_or(BusError::NotFound)?;
        self.nodes.remove(position);
        debug!("{:?} disconnected from position {}", node, position);
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> heapless::Vec<NodeId, MAX_CONNECTED_NODES> {
        self.nodes.clone()
    }

    pub(crate) fn record_transmission(&mut self, msg: &Message) {
        self.last_message = Some(*msg);
        self.stats.transmissions += 1;
    }

    pub(crate) fn record_dispatch(&mut self, delivered: u64, skipped: u64) {
        self.stats.deliveries += delivered;
        self.stats.skipped += skipped;
    }
}
