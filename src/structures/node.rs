/*
This module defines the `Node` structure and the handler it runs on reception.

A node is a tag plus a handler. The handler is any `Receiver`: a struct
holding whatever state the node logic needs, or a closure capturing it.
On every delivery the handler gets the message and a `Delivery` context,
which identifies the node and bus involved and gives access to the whole
network so the handler can answer, relay or reconfigure from inside the
callback.
*/
use std::fmt::Debug;
use std::rc::Rc;

use super::bus::BusError;
use super::message::Message;
use super::network::{BusId, Network, NodeId};

pub trait Receiver {
    /// Called once per message delivered to the node. Should be quick.
    ///
    /// May be called again before it returns, when the handler transmits and
    /// the nested message comes back to this node. Keep state in `Cell` or
    /// `RefCell` and do not hold a borrow across a transmit.
    fn on_receive(&self, rx: &mut Delivery<'_>, msg: &Message);
}

impl<F> Receiver for F
where
    F: Fn(&mut Delivery<'_>, &Message),
{
    fn on_receive(&self, rx: &mut Delivery<'_>, msg: &Message) {
        self(rx, msg)
    }
}

/// Context of a single delivery, handed to `Receiver::on_receive`.
pub struct Delivery<'a> {
    network: &'a mut Network,
    bus: BusId,
    node: NodeId,
    tag: u32,
}

impl<'a> Delivery<'a> {
    pub(crate) fn new(network: &'a mut Network, bus: BusId, node: NodeId, tag: u32) -> Self {
        Delivery {
            network,
            bus,
            node,
            tag,
        }
    }

    /// Bus the message arrived on.
    pub fn bus(&self) -> BusId {
        self.bus
    }

    /// Handle of the receiving node.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Tag of the receiving node.
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// Transmits on the same bus with the receiving node as source.
    ///
    /// Runs to completion before returning, like any other transmit. Nodes
    /// whose handler is still running further up the stack receive it too,
    /// so relays must bound their own recursion.
    pub fn transmit(&mut self, msg: &Message) -> Result<usize, BusError> {
        self.network.transmit(self.bus, msg, Some(self.node))
    }

    pub fn network(&mut self) -> &mut Network {
        &mut *self.network
    }
}

pub struct Node {
    /// Identifier of the node. Can be anything, the bus does not use it.
    tag: u32,
    handler: Option<Rc<dyn Receiver>>,
}

impl Node {
    pub fn new<R>(tag: u32, receiver: R) -> Self
    where
        R: Receiver + 'static,
    {
        Node {
            tag,
            handler: Some(Rc::new(receiver)),
        }
    }

    /// Same as `new`, with the closure signature spelled out for inference.
    pub fn from_fn<F>(tag: u32, f: F) -> Self
    where
        F: Fn(&mut Delivery<'_>, &Message) + 'static,
    {
        Node::new(tag, f)
    }

    /// A node that cannot be connected until a handler is set.
    pub fn without_handler(tag: u32) -> Self {
        Node { tag, handler: None }
    }

    pub fn tag(&self) -> u32 {
        self.tag
    }

    pub fn set_tag(&mut self, tag: u32) {
        self.tag = tag;
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Installs or replaces the handler. Takes effect from the next delivery;
    /// a call already running finishes with the old one.
    pub fn set_handler<R>(&mut self, receiver: R)
    where
        R: Receiver + 'static,
    {
        self.handler = Some(Rc::new(receiver));
    }

    pub fn clear_handler(&mut self) {
        self.handler = None;
    }

    /// Shared handle on the current handler, kept alive for one delivery.
    pub(crate) fn handler(&self) -> Option<Rc<dyn Receiver>> {
        self.handler.clone()
    }
}

impl Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handler = if self.has_handler() { "set" } else { "missing" };
        write!(f, "Node tag: {}, handler: {}", self.tag, handler)
    }
}
