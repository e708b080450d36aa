use std::cell::{Cell, RefCell};
use std::rc::Rc;

use vcan::{BusError, Delivery, Message, Network, Node, NodeId, Receiver, MAX_CONNECTED_NODES};

type Log = Rc<RefCell<Vec<(u32, Message)>>>;

fn does_nothing(_: &mut Delivery<'_>, _: &Message) {}

fn recorder(tag: u32, log: &Log) -> Node {
    let log = Rc::clone(log);
    Node::from_fn(tag, move |rx, msg| log.borrow_mut().push((rx.tag(), *msg)))
}

fn tags(log: &Log) -> Vec<u32> {
    log.borrow().iter().map(|(tag, _)| *tag).collect()
}

fn sample() -> Message {
    Message::new(20, &[1, 2, 3]).unwrap()
}

/// Handler flipping a flag, standing in for "set custom data on reception".
struct Flag(Rc<Cell<u32>>, u32);

impl Receiver for Flag {
    fn on_receive(&self, _: &mut Delivery<'_>, _: &Message) {
        self.0.set(self.1);
    }
}

#[test]
fn test_init_valid() {
    let mut network = Network::new();
    let bus = network.add_bus();
    let registry = network.bus(bus).unwrap();
    assert_eq!(registry.connected(), 0);
    assert!(registry.nodes().is_empty());
    assert!(registry.last_message().is_none());
}

#[test]
fn test_connect_null_bus() {
    let mut network = Network::new();
    let bus = network.add_bus();
    network.remove_bus(bus);
    let node = network.add_node(Node::new(1, does_nothing));
    assert_eq!(network.connect(bus, node), Err(BusError::NullBus));
}

#[test]
fn test_connect_null_node() {
    let mut network = Network::new();
    let bus = network.add_bus();
    let node = network.add_node(Node::new(1, does_nothing));
    network.remove_node(node);
    assert_eq!(network.connect(bus, node), Err(BusError::NullNode));
}

#[test]
fn test_connect_null_callback() {
    let mut network = Network::new();
    let bus = network.add_bus();
    let node = network.add_node(Node::without_handler(1));
    assert_eq!(network.connect(bus, node), Err(BusError::NullCallback));
    assert_eq!(network.bus(bus).unwrap().connected(), 0);
}

#[test]
fn test_connect_valid() {
    let mut network = Network::new();
    let bus = network.add_bus();
    let node = network.add_node(Node::new(1, does_nothing));
    assert_eq!(network.connect(bus, node), Ok(()));
    let registry = network.bus(bus).unwrap();
    assert_eq!(registry.connected(), 1);
    assert_eq!(registry.nodes(), &[node]);
}

#[test]
fn test_connect_already_connected() {
    let mut network = Network::new();
    let bus = network.add_bus();
    let node = network.add_node(Node::new(1, does_nothing));
    network.connect(bus, node).unwrap();
    assert_eq!(network.connect(bus, node), Err(BusError::AlreadyConnected));
    let registry = network.bus(bus).unwrap();
    assert_eq!(registry.connected(), 1);
    assert_eq!(registry.nodes(), &[node]);
}

#[test]
fn test_connect_up_to_capacity_keeps_order() {
    let mut network = Network::new();
    let bus = network.add_bus();
    let nodes: Vec<NodeId> = (0..MAX_CONNECTED_NODES as u32)
        .map(|tag| network.add_node(Node::new(tag, does_nothing)))
        .collect();
    for (count, &node) in nodes.iter().enumerate() {
        network.connect(bus, node).unwrap();
        assert_eq!(network.bus(bus).unwrap().connected(), count + 1);
    }
    assert_eq!(network.bus(bus).unwrap().nodes(), nodes.as_slice());
}

#[test]
fn test_connect_max_reached() {
    let mut network = Network::new();
    let bus = network.add_bus();
    let nodes: Vec<NodeId> = (0..MAX_CONNECTED_NODES as u32)
        .map(|tag| network.add_node(Node::new(tag, does_nothing)))
        .collect();
    for &node in &nodes {
        network.connect(bus, node).unwrap();
    }
    let extra = network.add_node(Node::new(99, does_nothing));

    assert_eq!(network.connect(bus, extra), Err(BusError::TooManyConnected));
    assert_eq!(network.connect(bus, nodes[3]), Err(BusError::TooManyConnected));
    let registry = network.bus(bus).unwrap();
    assert_eq!(registry.connected(), MAX_CONNECTED_NODES);
    assert_eq!(registry.nodes(), nodes.as_slice());

    // Room again after a disconnection.
    network.disconnect(bus, nodes[0]).unwrap();
    assert_eq!(network.connect(bus, extra), Ok(()));
    assert_eq!(network.bus(bus).unwrap().nodes().last(), Some(&extra));
}

#[test]
fn test_equal_tags_are_distinct_nodes() {
    let log = Log::default();
    let mut network = Network::new();
    let bus = network.add_bus();
    let first = network.add_node(recorder(5, &log));
    let second = network.add_node(recorder(5, &log));
    network.connect(bus, first).unwrap();
    assert_eq!(network.connect(bus, second), Ok(()));

    network.transmit(bus, &sample(), Some(first)).unwrap();
    assert_eq!(log.borrow().len(), 1);
}

#[test]
fn test_disconnect_null_bus() {
    let mut network = Network::new();
    let bus = network.add_bus();
    let node = network.add_node(Node::new(1, does_nothing));
    network.connect(bus, node).unwrap();
    network.remove_bus(bus);
    assert_eq!(network.disconnect(bus, node), Err(BusError::NullBus));
}

#[test]
fn test_disconnect_null_node() {
    let mut network = Network::new();
    let bus = network.add_bus();
    let node = network.add_node(Node::new(1, does_nothing));
    network.remove_node(node);
    assert_eq!(network.disconnect(bus, node), Err(BusError::NullNode));
}

#[test]
fn test_disconnect_valid() {
    let mut network = Network::new();
    let bus = network.add_bus();
    let node = network.add_node(Node::new(1, does_nothing));
    network.connect(bus, node).unwrap();
    assert_eq!(network.disconnect(bus, node), Ok(()));
    assert_eq!(network.bus(bus).unwrap().connected(), 0);
    assert_eq!(network.disconnect(bus, node), Err(BusError::NotFound));
}

#[test]
fn test_disconnect_empty_bus() {
    let mut network = Network::new();
    let bus = network.add_bus();
    let node = network.add_node(Node::new(1, does_nothing));
    assert_eq!(network.disconnect(bus, node), Err(BusError::NotFound));
    assert_eq!(network.bus(bus).unwrap().connected(), 0);
}

#[test]
fn test_disconnect_not_found() {
    let mut network = Network::new();
    let bus = network.add_bus();
    let node_1 = network.add_node(Node::new(1, does_nothing));
    let node_2 = network.add_node(Node::new(2, does_nothing));
    network.connect(bus, node_1).unwrap();

    assert_eq!(network.disconnect(bus, node_2), Err(BusError::NotFound));
    let registry = network.bus(bus).unwrap();
    assert_eq!(registry.connected(), 1);
    assert_eq!(registry.nodes(), &[node_1]);
}

#[test]
fn test_disconnect_preserves_order() {
    let mut network = Network::new();
    let bus = network.add_bus();
    let nodes: Vec<NodeId> = (0..5).map(|tag| network.add_node(Node::new(tag, does_nothing))).collect();
    for &node in &nodes {
        network.connect(bus, node).unwrap();
    }
    network.disconnect(bus, nodes[2]).unwrap();
    network.disconnect(bus, nodes[0]).unwrap();
    assert_eq!(network.bus(bus).unwrap().nodes(), &[nodes[1], nodes[3], nodes[4]]);
}

#[test]
fn test_tx_null_bus() {
    let mut network = Network::new();
    let bus = network.add_bus();
    network.remove_bus(bus);
    assert_eq!(network.transmit(bus, &sample(), None), Err(BusError::NullBus));
}

#[test]
fn test_tx_no_nodes_connected() {
    let mut network = Network::new();
    let bus = network.add_bus();
    // Exists, but is not connected.
    let called = Rc::new(Cell::new(0));
    let node = network.add_node(Node::new(1, Flag(Rc::clone(&called), 1)));

    assert_eq!(network.transmit(bus, &sample(), Some(node)), Ok(0));
    assert_eq!(called.get(), 0);
    assert_eq!(network.bus(bus).unwrap().last_message(), Some(&sample()));
}

#[test]
fn test_tx_to_all_nodes() {
    let mut network = Network::new();
    let bus = network.add_bus();
    let data_1 = Rc::new(Cell::new(0));
    let data_2 = Rc::new(Cell::new(0));
    let node_1 = network.add_node(Node::new(1, Flag(Rc::clone(&data_1), 1)));
    let node_2 = network.add_node(Node::new(2, Flag(Rc::clone(&data_2), 1)));
    network.connect(bus, node_1).unwrap();
    network.connect(bus, node_2).unwrap();
    // Setting one handler after connecting.
    network.node_mut(node_2).unwrap().set_handler(Flag(Rc::clone(&data_2), 2));

    assert_eq!(network.transmit(bus, &sample(), None), Ok(2));
    assert_eq!(network.bus(bus).unwrap().last_message(), Some(&sample()));
    assert_eq!(data_1.get(), 1);
    assert_eq!(data_2.get(), 2);
}

#[test]
fn test_tx_to_all_nodes_except_source() {
    let mut network = Network::new();
    let bus = network.add_bus();
    let data_1 = Rc::new(Cell::new(0));
    let data_2 = Rc::new(Cell::new(0));
    let node_1 = network.add_node(Node::new(1, Flag(Rc::clone(&data_1), 1)));
    let node_2 = network.add_node(Node::new(2, does_nothing));
    network.connect(bus, node_1).unwrap();
    network.connect(bus, node_2).unwrap();
    network.node_mut(node_2).unwrap().set_handler(Flag(Rc::clone(&data_2), 2));

    assert_eq!(network.transmit(bus, &sample(), Some(node_2)), Ok(1));
    assert_eq!(data_1.get(), 1);
    // Source node untouched
    assert_eq!(data_2.get(), 0);
}

#[test]
fn test_tx_delivers_in_order_with_full_payload() {
    let log = Log::default();
    let mut network = Network::new();
    let bus = network.add_bus();
    for tag in [4, 1, 3, 2] {
        let node = network.add_node(recorder(tag, &log));
        network.connect(bus, node).unwrap();
    }
    let payload: Vec<u8> = (0..64).collect();
    let msg = Message::new(0x1FFF_FFFF, &payload).unwrap();

    network.transmit(bus, &msg, None).unwrap();
    assert_eq!(tags(&log), vec![4, 1, 3, 2]);
    assert!(log.borrow().iter().all(|(_, received)| *received == msg));
    assert_eq!(log.borrow()[0].1.payload(), payload.as_slice());
}

#[test]
fn test_tx_from_unconnected_source() {
    let log = Log::default();
    let mut network = Network::new();
    let bus = network.add_bus();
    let outsider = network.add_node(recorder(9, &log));
    for tag in 1..=3 {
        let node = network.add_node(recorder(tag, &log));
        network.connect(bus, node).unwrap();
    }
    assert_eq!(network.transmit(bus, &sample(), Some(outsider)), Ok(3));
    assert_eq!(tags(&log), vec![1, 2, 3]);

    // A removed source is just as harmless.
    network.remove_node(outsider);
    assert_eq!(network.transmit(bus, &sample(), Some(outsider)), Ok(3));
}

#[test]
fn test_readme_scenario() {
    let log = Log::default();
    let mut network = Network::new();
    let bus = network.add_bus();
    let a = network.add_node(recorder(1, &log));
    let b = network.add_node(recorder(2, &log));
    let c = network.add_node(recorder(3, &log));
    for node in [a, b, c] {
        network.connect(bus, node).unwrap();
    }
    let msg = Message::new(0xABCD, &[0x00, 0x1A, 0x2B]).unwrap();

    network.transmit(bus, &msg, Some(a)).unwrap();
    assert_eq!(tags(&log), vec![2, 3]);
    assert!(log.borrow().iter().all(|(_, received)| *received == msg));

    log.borrow_mut().clear();
    network.disconnect(bus, b).unwrap();
    network.transmit(bus, &msg, Some(a)).unwrap();
    assert_eq!(tags(&log), vec![3]);
}

#[test]
fn test_buses_are_independent() {
    let log = Log::default();
    let mut network = Network::new();
    let bus_1 = network.add_bus();
    let bus_2 = network.add_bus();
    let shared = network.add_node(recorder(1, &log));
    let only_2 = network.add_node(recorder(2, &log));
    network.connect(bus_1, shared).unwrap();
    network.connect(bus_2, shared).unwrap();
    network.connect(bus_2, only_2).unwrap();

    network.transmit(bus_1, &sample(), None).unwrap();
    assert_eq!(tags(&log), vec![1]);
    assert!(network.bus(bus_2).unwrap().last_message().is_none());

    network.disconnect(bus_1, shared).unwrap();
    assert_eq!(network.bus(bus_2).unwrap().nodes(), &[shared, only_2]);

    let mut other = Network::new();
    let foreign = other.add_bus();
    assert_eq!(other.bus(foreign).unwrap().connected(), 0);
}

#[test]
fn test_gateway_between_buses() {
    let log = Log::default();
    let mut network = Network::new();
    let body = network.add_bus();
    let chassis = network.add_bus();

    // Forwards everything seen on the body bus to the chassis bus.
    let gateway = network.add_node(Node::from_fn(10, move |rx, msg| {
        let me = rx.node();
        rx.network().transmit(chassis, msg, Some(me)).unwrap();
    }));
    let sensor = network.add_node(recorder(1, &log));
    let brake = network.add_node(recorder(2, &log));
    network.connect(body, sensor).unwrap();
    network.connect(body, gateway).unwrap();
    network.connect(chassis, gateway).unwrap();
    network.connect(chassis, brake).unwrap();

    network.transmit(body, &sample(), Some(sensor)).unwrap();
    assert_eq!(tags(&log), vec![2]);
    assert_eq!(network.bus(chassis).unwrap().last_message(), Some(&sample()));
}

#[test]
fn test_ping_pong_bounded_by_hop_count() {
    let _ = env_logger::builder().is_test(true).try_init();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut network = Network::new();
    let bus = network.add_bus();
    for tag in 1..=2 {
        let seen = Rc::clone(&seen);
        let node = network.add_node(Node::from_fn(tag, move |rx, msg| {
            let hops = msg.payload()[0];
            seen.borrow_mut().push((rx.tag(), hops));
            if hops < 3 {
                let mut answer = *msg;
                answer.set_byte(0, hops + 1).unwrap();
                rx.transmit(&answer).unwrap();
            }
        }));
        network.connect(bus, node).unwrap();
    }

    let serve = Message::new(20, &[0]).unwrap();
    assert_eq!(network.transmit(bus, &serve, None), Ok(2));
    // Both nodes get answers while their first handler is still running.
    assert_eq!(
        *seen.borrow(),
        vec![(1, 0), (2, 1), (1, 2), (2, 3), (2, 0), (1, 1), (2, 2), (1, 3)]
    );
    let stats = network.bus(bus).unwrap().stats();
    assert_eq!(stats.transmissions, 7);
    assert_eq!(stats.deliveries, 8);
    assert_eq!(stats.skipped, 0);
}
