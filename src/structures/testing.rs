use std::cell::RefCell;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::Path;
use std::rc::Rc;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::bus::{BusError, BusStats, MAX_CONNECTED_NODES};
use super::message::{Message, MessageError, DATA_MAX_LEN};
use super::network::Network;
use super::node::{Delivery, Node, Receiver};

/// Highest 11-bit (classic) CAN identifier.
const STANDARD_ID_MAX: u32 = 0x7FF;

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("invalid workload configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// Every node only counts what it receives.
    Broadcast,
    /// Every node counts and passes the message on, bumping the hop counter
    /// in payload byte 0, until the hop limit is reached.
    Relay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    pub num_nodes: usize,
    pub topology: Topology,
    /// Transmissions issued by the workload itself, relays not included.
    pub messages: usize,
    pub payload_len: usize,
    pub hop_limit: u8,
    /// Share of transmissions sent from outside the bus (no source node).
    pub external_ratio: f64,
    pub seed: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        TestConfig {
            num_nodes: 4,
            topology: Topology::Broadcast,
            messages: 16,
            payload_len: 8,
            hop_limit: 1,
            external_ratio: 0.25,
            seed: 0,
        }
    }
}

impl TestConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WorkloadError> {
        let reader = BufReader::new(File::open(path)?);
        let config: TestConfig = serde_json::from_reader(reader)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), WorkloadError> {
        if self.num_nodes > MAX_CONNECTED_NODES {
            return Err(WorkloadError::InvalidConfig(format!(
                "{} nodes requested, a bus holds at most {}",
                self.num_nodes, MAX_CONNECTED_NODES
            )));
        }
        if self.payload_len > DATA_MAX_LEN {
            return Err(WorkloadError::InvalidConfig(format!(
                "payload of {} bytes requested, a frame holds at most {}",
                self.payload_len, DATA_MAX_LEN
            )));
        }
        if !(0.0..=1.0).contains(&self.external_ratio) {
            return Err(WorkloadError::InvalidConfig(format!(
                "external ratio {} is not within 0..=1",
                self.external_ratio
            )));
        }
        if self.topology == Topology::Relay && self.payload_len == 0 {
            return Err(WorkloadError::InvalidConfig(
                "relay topology needs at least one payload byte for the hop counter".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct TestResult {
    /// Transmissions issued by the workload.
    pub transmissions: u64,
    /// Counters of the bus, relayed traffic included.
    pub bus: BusStats,
    /// Messages received by each node, in connection order.
    pub received: Vec<u64>,
    pub last_message: Option<Message>,
}

#[derive(Debug, Serialize)]
pub struct TestLog {
    pub config: TestConfig,
    pub result: TestResult,
}

type Tally = Rc<RefCell<Vec<u64>>>;

struct Counter {
    index: usize,
    tally: Tally,
}

impl Receiver for Counter {
    fn on_receive(&self, _: &mut Delivery<'_>, _: &Message) {
        if let Some(count) = self.tally.borrow_mut().get_mut(self.index) {
            *count += 1;
        }
    }
}

struct Relay {
    counter: Counter,
    hop_limit: u8,
}

impl Receiver for Relay {
    fn on_receive(&self, rx: &mut Delivery<'_>, msg: &Message) {
        self.counter.on_receive(rx, msg);
        let hops = match msg.payload().first() {
            Some(&hops) => hops,
            None => return,
        };
        if hops >= self.hop_limit {
            return;
        }
        let mut next = *msg;
        next.set_byte(0, hops + 1);
        if let Err(err) = rx.transmit(&next) {
            warn!("node {} could not relay: {}", rx.tag(), err);
        }
    }
}

fn random_message(rng: &mut StdRng, config: &TestConfig) -> Result<Message, MessageError> {
    let id = rng.gen_range(0..=STANDARD_ID_MAX);
    let mut payload: Vec<u8> = (0..config.payload_len).map(|_| rng.gen()).collect();
    if config.topology == Topology::Relay {
        if let Some(hops) = payload.first_mut() {
            *hops = 0;
        }
    }
    Message::new(id, &payload)
}

/// Connects `num_nodes` nodes to a fresh bus and fires the configured amount
/// of random messages at it. Same seed, same traffic.
pub fn run_workload(config: &TestConfig) -> Result<TestResult, WorkloadError> {
    config.validate()?;
    let mut network = Network::new();
    let bus = network.add_bus();
    let tally: Tally = Rc::new(RefCell::new(vec![0; config.num_nodes]));

    let mut nodes = Vec::with_capacity(config.num_nodes);
    for index in 0..config.num_nodes {
        let counter = Counter {
            index,
            tally: Rc::clone(&tally),
        };
        let node = match config.topology {
            Topology::Broadcast => Node::new(index as u32, counter),
            Topology::Relay => Node::new(
                index as u32,
                Relay {
                    counter,
                    hop_limit: config.hop_limit,
                },
            ),
        };
        let id = network.add_node(node);
        network.connect(bus, id)?;
        nodes.push(id);
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    for _ in 0..config.messages {
        let msg = random_message(&mut rng, config)?;
        let source = if nodes.is_empty() || rng.gen_bool(config.external_ratio) {
            None
        } else {
            nodes.get(rng.gen_range(0..nodes.len())).copied()
        };
        let delivered = network.transmit(bus, &msg, source)?;
        debug!("{:?} from {:?} reached {} nodes", msg, source, delivered);
    }

    let registry = network.bus(bus).ok_or(BusError::NullBus)?;
    let result = TestResult {
        transmissions: config.messages as u64,
        bus: registry.stats(),
        received: tally.borrow().clone(),
        last_message: registry.last_message().copied(),
    };
    info!(
        "{} transmissions, {} deliveries, {} skipped",
        result.bus.transmissions, result.bus.deliveries, result.bus.skipped
    );
    Ok(result)
}

/// Writes the run as pretty JSON, creating parent directories as needed.
pub fn log_test(test_log: &TestLog, path: impl AsRef<Path>) -> Result<(), WorkloadError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    serde_json::to_writer_pretty(&mut file, test_log)?;
    writeln!(file)?;
    info!("Logged test to: {}", path.display());
    Ok(())
}

/// Three nodes printing what they receive: transmit from node 1, from
/// outside the bus, then from node 1 again after node 2 left.
/// Returns the printed lines.
pub fn readme_demo() -> Result<Vec<String>, WorkloadError> {
    let lines = Rc::new(RefCell::new(Vec::new()));
    let mut network = Network::new();
    let bus = network.add_bus();

    let mut nodes = Vec::new();
    for tag in 1..=3 {
        let out = Rc::clone(&lines);
        let node = Node::from_fn(tag, move |rx, msg| {
            out.borrow_mut().push(format!("Node {} received {}", rx.tag(), msg));
        });
        let id = network.add_node(node);
        network.connect(bus, id)?;
        nodes.push(id);
    }
    let (node_1, node_2) = (nodes[0], nodes[1]);
    let msg = Message::new(0xABCD, &[0x00, 0x1A, 0x2B])?;

    let say = |text: &str| lines.borrow_mut().push(text.to_string());
    say("Transmitting from node 1, node 2 and 3 receive.");
    network.transmit(bus, &msg, Some(node_1))?;

    say("Transmitting from outside the bus, everyone receives.");
    network.transmit(bus, &msg, None)?;

    network.disconnect(bus, node_2)?;
    say("Transmitting from node 1 after node 2 disconnection, node 3 receives.");
    network.transmit(bus, &msg, Some(node_1))?;

    let printed = lines.borrow().clone();
    Ok(printed)
}
