use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{net::TcpListener, sync::Notify, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::routes::create_router;
use crate::{
    common::{
        config::{NetworkConfig, RunConfig},
        error::{NodeError, Result},
    },
    consensus::{peers::PeerDirectory, processor::ConsensusProcessor},
};

/// Tracks which nodes of a network have bound their listener.
#[derive(Clone, Debug)]
pub struct Readiness {
    ready: Arc<Vec<AtomicBool>>,
    changed: Arc<Notify>,
}

impl Readiness {
    pub fn new(size: usize) -> Self {
        Readiness {
            ready: Arc::new((0..size).map(|_| AtomicBool::new(false)).collect()),
            changed: Arc::new(Notify::new()),
        }
    }

    pub fn mark_ready(&self, index: usize) {
        if let Some(flag) = self.ready.get(index) {
            flag.store(true, Ordering::SeqCst);
            self.changed.notify_waiters();
        }
    }

    pub fn is_ready(&self, index: usize) -> bool {
        self.ready.get(index).is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    pub fn all_ready(&self) -> bool {
        self.ready.iter().all(|flag| flag.load(Ordering::SeqCst))
    }

    pub async fn wait_all(&self, timeout: Duration) -> Result<()> {
        let wait = async {
            loop {
                let changed = self.changed.notified();
                if self.all_ready() {
                    return;
                }
                changed.await;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| NodeError::NotReady(timeout))
    }
}

/// One running node: its consensus processor plus the HTTP service in front of it.
pub struct Node {
    pub processor: Arc<ConsensusProcessor>,
    pub network: NetworkConfig,
}

impl Node {
    /// Rejects configurations where the node is not part of the network or some node has no port.
    pub fn new(config: RunConfig, network: NetworkConfig) -> Result<Self> {
        config.validate()?;
        PeerDirectory::from_config(&network, config.n).validate()?;
        let processor = ConsensusProcessor::over_http(config, network.clone())?;
        Ok(Node {
            processor: Arc::new(processor),
            network,
        })
    }

    pub fn id(&self) -> usize {
        self.processor.config().node_id
    }

    pub fn listen_addr(&self) -> Result<String> {
        let peers = self.processor.peers();
        let port = peers.port_of(self.id()).ok_or(NodeError::PortRange {
            base_port: peers.base_port(),
            nodes: peers.len(),
        })?;
        Ok(format!("{}:{}", self.network.host, port))
    }

    /// Binds `base_port + node_id`, reports readiness and serves until `shutdown` is cancelled.
    pub async fn spawn(
        self,
        readiness: Option<Readiness>,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<Result<()>>> {
        let addr = self.listen_addr()?;
        let listener = TcpListener::bind(&addr).await.map_err(|source| NodeError::Bind {
            addr: addr.clone(),
            source,
        })?;

        let node = self.id();
        info!(node, %addr, "node listening");
        if let Some(readiness) = readiness {
            readiness.mark_ready(node);
        }

        let app = create_router(self.processor.clone());
        let processor = self.processor;
        Ok(tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            // Leave no round task behind once the service is gone
            processor.stop().await;
            if let Err(e) = &served {
                error!(node, error = %e, "node server failed");
            }
            info!(node, "node shut down");
            served.map_err(NodeError::from)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{client::HttpPeerClient, client::PeerClient, message::Value};

    #[tokio::test]
    async fn test_readiness() {
        let readiness = Readiness::new(3);
        assert!(!readiness.all_ready());
        assert!(readiness
            .wait_all(Duration::from_millis(20))
            .await
            .is_err());

        let waiter = tokio::spawn({
            let readiness = readiness.clone();
            async move { readiness.wait_all(Duration::from_secs(5)).await }
        });
        for index in 0..3 {
            readiness.mark_ready(index);
        }
        // Out of range indices are ignored
        readiness.mark_ready(7);

        waiter.await.unwrap().unwrap();
        assert!(readiness.is_ready(2));
        assert!(!readiness.is_ready(7));
    }

    #[tokio::test]
    async fn test_node_serves_state_until_shutdown() {
        let network = NetworkConfig::default().with_base_port(47380);
        let node = Node::new(RunConfig::new(1, 2, 0, Value::Zero, false), network.clone()).unwrap();
        let address = node.processor.peers().address_of(1).unwrap();
        let readiness = Readiness::new(2);
        let shutdown = CancellationToken::new();

        let server = node.spawn(Some(readiness.clone()), shutdown.clone()).await.unwrap();
        assert!(readiness.is_ready(1));
        assert!(!readiness.is_ready(0));

        let client = HttpPeerClient::new(Duration::from_secs(1)).unwrap();
        let state = client.fetch_state(&address).await.unwrap();
        assert_eq!(state.x, Some(Value::Zero));
        assert_eq!(state.k, Some(0));

        shutdown.cancel();
        server.await.unwrap().unwrap();
        assert_eq!(client.fetch_state(&address).await, None);
    }

    #[test]
    fn test_node_rejects_bad_configuration() {
        let network = NetworkConfig::default();
        assert!(matches!(
            Node::new(RunConfig::new(0, 0, 0, Value::One, false), network.clone()),
            Err(NodeError::InvalidConfig(_))
        ));
        assert!(matches!(
            Node::new(RunConfig::new(5, 3, 1, Value::One, false), network.clone()),
            Err(NodeError::InvalidConfig(_))
        ));
        assert!(matches!(
            Node::new(RunConfig::new(1, 2, 0, Value::One, false), network.with_base_port(65535)),
            Err(NodeError::PortRange { base_port: 65535, nodes: 2 })
        ));

        let top = Node::new(RunConfig::new(0, 1, 0, Value::One, false), NetworkConfig::default().with_base_port(65535));
        assert_eq!(top.unwrap().listen_addr().unwrap(), "127.0.0.1:65535");
    }
}
