/*
    Agreement on a single bit between N nodes, up to F of which may be
    silent. Each node serves its state over HTTP and, once started, polls
    every other node once. With F < N/2 the plurality of healthy answers is
    adopted straight away; otherwise the node falls back to a bounded run
    of rounds that never decides on its own.

    `node` runs one node of a larger network. `cluster` runs a whole
    network inside this process, which is the easiest way to watch a run.
*/

use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use rand::{seq::index::sample, Rng};
use simple_consensus::{
    common::{
        config::{NetworkConfig, RunConfig, BASE_NODE_PORT, DEFAULT_HOST},
        error::Result,
        logging,
    },
    consensus::message::Value,
    network::{
        cluster::{Cluster, ClusterLayout},
        node::Node,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "simple-consensus", about = "Binary agreement between HTTP nodes")]
struct Cli {
    #[command(flatten)]
    network: NetworkArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct NetworkArgs {
    /// Host every node binds to and is reached at
    #[arg(long, global = true, default_value = DEFAULT_HOST)]
    host: String,

    /// Node i listens on base-port + i
    #[arg(long, global = true, default_value_t = BASE_NODE_PORT)]
    base_port: u16,

    #[arg(long, global = true, default_value_t = 1000)]
    poll_timeout_ms: u64,

    #[arg(long, global = true, default_value_t = 200)]
    round_period_ms: u64,
}

impl NetworkArgs {
    fn config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            base_port: self.base_port,
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            round_period: Duration::from_millis(self.round_period_ms),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve a single node until interrupted
    Node {
        #[arg(long)]
        id: usize,
        #[arg(long)]
        nodes: usize,
        #[arg(long)]
        faults: usize,
        /// 0, 1 or ?
        #[arg(long, default_value = "1")]
        initial: Value,
        #[arg(long)]
        faulty: bool,
    },
    /// Serve a whole network in this process
    Cluster {
        #[arg(long)]
        nodes: usize,
        #[arg(long)]
        faults: usize,
        /// One value per node; drawn at random when omitted
        #[arg(long, value_delimiter = ',')]
        values: Vec<Value>,
        /// Indices of faulty nodes; `faults` random nodes when omitted
        #[arg(long, value_delimiter = ',')]
        faulty: Option<Vec<usize>>,
        /// Send /start to every node once they are all up
        #[arg(long)]
        start: bool,
        /// How long to let the run progress before reporting
        #[arg(long, default_value_t = 3000)]
        settle_ms: u64,
        /// Keep serving after the report until interrupted
        #[arg(long)]
        keep_running: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let network = cli.network.config();

    match cli.command {
        Command::Node {
            id,
            nodes,
            faults,
            initial,
            faulty,
        } => run_node(RunConfig::new(id, nodes, faults, initial, faulty), network).await,
        Command::Cluster {
            nodes,
            faults,
            values,
            faulty,
            start,
            settle_ms,
            keep_running,
        } => {
            let layout = random_layout(nodes, faults, values, faulty);
            run_cluster(layout, network, start, Duration::from_millis(settle_ms), keep_running).await
        }
    }
}

async fn run_node(config: RunConfig, network: NetworkConfig) -> Result<()> {
    let shutdown = CancellationToken::new();
    let server = Node::new(config, network)?.spawn(None, shutdown.clone()).await?;

    tokio::signal::ctrl_c().await?;
    info!("interrupted, shutting down");
    shutdown.cancel();
    match server.await {
        Ok(served) => served,
        Err(e) => Err(std::io::Error::other(e).into()),
    }
}

async fn run_cluster(
    layout: ClusterLayout,
    network: NetworkConfig,
    start: bool,
    settle: Duration,
    keep_running: bool,
) -> Result<()> {
    info!(values = ?layout.initial_values, faulty = ?layout.faulty, "launching network");
    let cluster = Cluster::launch(layout, network).await?;

    if start {
        for reply in cluster.start_all().await? {
            info!(node = reply.node, status = reply.status, body = %reply.body, "start");
        }
    }

    tokio::time::sleep(settle).await;
    for (node, state) in cluster.states().await.into_iter().enumerate() {
        match state {
            Some(state) => println!("node {node}: {}", serde_json::to_string(&state).unwrap_or_default()),
            None => println!("node {node}: unreachable"),
        }
    }

    if keep_running {
        tokio::signal::ctrl_c().await?;
    }
    cluster.stop_all().await?;
    cluster.shutdown().await
}

/// Fills in whatever part of the layout was not given on the command line.
fn random_layout(n: usize, f: usize, values: Vec<Value>, faulty: Option<Vec<usize>>) -> ClusterLayout {
    let mut rng = rand::thread_rng();

    let initial_values = if values.is_empty() {
        (0..n)
            .map(|_| if rng.gen_bool(0.5) { Value::One } else { Value::Zero })
            .collect()
    } else {
        values
    };

    let faulty_indices = faulty.unwrap_or_else(|| sample(&mut rng, n, f.min(n)).into_vec());
    let faulty = (0..n).map(|index| faulty_indices.contains(&index)).collect();

    ClusterLayout {
        n,
        f,
        initial_values,
        faulty,
    }
}
