use std::time::Duration;

use futures::future::{join_all, try_join_all};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::node::{Node, Readiness};
use crate::{
    common::{
        config::{NetworkConfig, RunConfig},
        error::{NodeError, Result},
    },
    consensus::{
        client::{HttpPeerClient, PeerClient},
        message::{NodeState, Value},
        peers::PeerDirectory,
    },
};

const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Initial layout of a network: one entry per node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterLayout {
    pub n: usize,
    pub f: usize,
    pub initial_values: Vec<Value>,
    pub faulty: Vec<bool>,
}

impl ClusterLayout {
    pub fn validate(&self) -> Result<()> {
        if self.n == 0 {
            return Err(NodeError::InvalidLayout("a network needs at least one node".to_string()));
        }
        if self.initial_values.len() != self.n {
            return Err(NodeError::InvalidLayout(format!(
                "expected {} initial values, got {}",
                self.n,
                self.initial_values.len()
            )));
        }
        if self.faulty.len() != self.n {
            return Err(NodeError::InvalidLayout(format!(
                "expected {} faulty flags, got {}",
                self.n,
                self.faulty.len()
            )));
        }
        Ok(())
    }

    pub fn faulty_count(&self) -> usize {
        self.faulty.iter().filter(|faulty| **faulty).count()
    }
}

/// Answer of one node to a control request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlReply {
    pub node: usize,
    pub status: u16,
    pub body: String,
}

/// N nodes served from one process, each on its own port.
pub struct Cluster {
    directory: PeerDirectory,
    http: reqwest::Client,
    servers: Vec<JoinHandle<Result<()>>>,
    shutdown: CancellationToken,
}

impl Cluster {
    pub async fn launch(layout: ClusterLayout, network: NetworkConfig) -> Result<Cluster> {
        layout.validate()?;
        if layout.faulty_count() > layout.f {
            warn!(
                faulty = layout.faulty_count(),
                f = layout.f,
                "more faulty nodes than the assumed fault bound"
            );
        }

        let directory = PeerDirectory::from_config(&network, layout.n);
        directory.validate()?;
        let http = reqwest::Client::builder().timeout(network.poll_timeout * 2).build()?;

        let readiness = Readiness::new(layout.n);
        let shutdown = CancellationToken::new();
        let mut servers = Vec::with_capacity(layout.n);

        for node_id in 0..layout.n {
            let config = RunConfig::new(
                node_id,
                layout.n,
                layout.f,
                layout.initial_values[node_id],
                layout.faulty[node_id],
            );
            let spawned = match Node::new(config, network.clone()) {
                Ok(node) => node.spawn(Some(readiness.clone()), shutdown.clone()).await,
                Err(e) => Err(e),
            };
            match spawned {
                Ok(server) => servers.push(server),
                Err(e) => {
                    take_down(&shutdown, servers).await;
                    return Err(e);
                }
            }
        }

        if let Err(e) = readiness.wait_all(READY_TIMEOUT).await {
            take_down(&shutdown, servers).await;
            return Err(e);
        }
        info!(n = layout.n, f = layout.f, base_port = network.base_port, "all nodes ready");

        Ok(Cluster {
            directory,
            http,
            servers,
            shutdown,
        })
    }

    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    /// Sends `GET /start` to every node at once.
    pub async fn start_all(&self) -> Result<Vec<ControlReply>> {
        self.broadcast("start").await
    }

    /// Sends `GET /stop` to every node at once.
    pub async fn stop_all(&self) -> Result<Vec<ControlReply>> {
        self.broadcast("stop").await
    }

    /// Every node's published state, in index order. Unreachable nodes are `None`.
    pub async fn states(&self) -> Vec<Option<NodeState>> {
        let client = HttpPeerClient::from_client(self.http.clone());
        let queries = (0..self.directory.len()).map(|index| {
            let client = &client;
            let address = self.directory.address_of(index);
            async move {
                match address {
                    Some(address) => client.fetch_state(&address).await,
                    None => None,
                }
            }
        });
        join_all(queries).await
    }

    /// Stops every server and waits for them to exit.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.cancel();
        for server in join_all(self.servers).await {
            match server {
                Ok(served) => served?,
                Err(e) => warn!(error = %e, "node task failed"),
            }
        }
        info!("cluster shut down");
        Ok(())
    }

    async fn broadcast(&self, route: &str) -> Result<Vec<ControlReply>> {
        let requests = (0..self.directory.len()).map(|node| {
            let address = self.directory.address_of(node);
            async move {
                let address = address.ok_or(NodeError::PortRange {
                    base_port: self.directory.base_port(),
                    nodes: self.directory.len(),
                })?;
                let url = format!("{address}/{route}");
                let response = self.http.get(url).send().await?;
                let status = response.status().as_u16();
                let body = response.text().await?;
                Ok::<_, NodeError>(ControlReply { node, status, body })
            }
        });
        try_join_all(requests).await
    }
}

/// Cancels every already running node and waits for it to release its port.
async fn take_down(shutdown: &CancellationToken, servers: Vec<JoinHandle<Result<()>>>) {
    shutdown.cancel();
    join_all(servers).await;
}
