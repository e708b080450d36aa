use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use log::error;

use vcan::structures::testing::{log_test, readme_demo, run_workload, TestConfig, TestLog, Topology, WorkloadError};

#[derive(Parser)]
#[command(name = "vcan", version, about = "Virtual CAN / CAN-FD bus simulator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Three nodes, a few transmissions and a disconnection, printed as they happen
    Demo,
    /// Run a generated workload against a single bus and report its counters
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// JSON workload configuration, flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    nodes: Option<usize>,
    #[arg(long, value_enum)]
    topology: Option<Topology>,
    #[arg(long)]
    messages: Option<usize>,
    #[arg(long)]
    payload_len: Option<usize>,
    #[arg(long)]
    hop_limit: Option<u8>,
    /// Share of transmissions without a source node, 0 to 1
    #[arg(long)]
    external_ratio: Option<f64>,
    #[arg(long)]
    seed: Option<u64>,
    /// Write the JSON report here instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,
}

impl RunArgs {
    fn to_config(&self) -> Result<TestConfig, WorkloadError> {
        let mut config = match &self.config {
            Some(path) => TestConfig::load(path)?,
            None => TestConfig::default(),
        };
        if let Some(nodes) = self.nodes {
            config.num_nodes = nodes;
        }
        if let Some(topology) = self.topology {
            config.topology = topology;
        }
        if let Some(messages) = self.messages {
            config.messages = messages;
        }
        if let Some(payload_len) = self.payload_len {
            config.payload_len = payload_len;
        }
        if let Some(hop_limit) = self.hop_limit {
            config.hop_limit = hop_limit;
        }
        if let Some(external_ratio) = self.external_ratio {
            config.external_ratio = external_ratio;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        Ok(config)
    }
}

fn run(command: Command) -> Result<(), WorkloadError> {
    match command {
        Command::Demo => {
            for line in readme_demo()? {
                println!("{}", line);
            }
        }
        Command::Run(args) => {
            let config = args.to_config()?;
            let result = run_workload(&config)?;
            let test_log = TestLog { config, result };
            match &args.out {
                Some(path) => log_test(&test_log, path)?,
                None => println!("{}", serde_json::to_string_pretty(&test_log)?),
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            match err {
                WorkloadError::Bus(bus_err) => ExitCode::from(bus_err.code()),
                _ => ExitCode::FAILURE,
            }
        }
    }
}
