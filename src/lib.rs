//! # VCAN
//!
//! A tiny virtual CAN / CAN-FD bus for testing node logic without hardware.
//!
//! Virtual nodes are connected to a virtual bus. Whenever someone transmits a
//! message on the bus, every connected node but the sender gets a copy and its
//! handler runs, one node after the other in connection order, before
//! `transmit` returns.
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use vcan::{Message, Network, Node};
//!
//! let mut network = Network::new();
//! let bus = network.add_bus();
//!
//! let received = Rc::new(RefCell::new(Vec::new()));
//! let inbox = Rc::clone(&received);
//! let listener = network.add_node(Node::from_fn(2, move |_, msg| inbox.borrow_mut().push(*msg)));
//! let talker = network.add_node(Node::from_fn(1, |_, _| {}));
//! network.connect(bus, listener).unwrap();
//! network.connect(bus, talker).unwrap();
//!
//! let msg = Message::new(0xABCD, &[0x00, 0x1A, 0x2B]).unwrap();
//! assert_eq!(network.transmit(bus, &msg, Some(talker)), Ok(1));
//! assert_eq!(received.borrow().as_slice(), &[msg]);
//! ```
//!
//! ## Limitations
//!
//! The bus is simple, synchronous and single threaded. It does not simulate
//! transmission errors, collisions, arbitration or timing, just pure data
//! transfer. Handlers should be fast.
pub mod structures;

pub use structures::bus::{Bus, BusError, BusStats, MAX_CONNECTED_NODES};
pub use structures::message::{CanId, Message, MessageError, DATA_MAX_LEN};
pub use structures::network::{BusId, Network, NodeId};
pub use structures::node::{Delivery, Node, Receiver};
